//! The output sink and the fault-latching box writer around it.

use crate::{Error, Result};
use std::io::{self, prelude::*, SeekFrom};

/// Anything the muxer can write into.
///
/// Reading is only needed when the media data is relocated to make room for
/// a leading movie box.
pub trait Sink: Read + Write + Seek {}

impl<T: Read + Write + Seek + ?Sized> Sink for T {}

/// A sink that discards everything and only tracks the cursor.
///
/// Used to measure a box tree without allocating it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Probe {
    pos: u64,
    end: u64,
}

impl Probe {
    /// Number of bytes that would have been written.
    pub fn len(&self) -> u64 {
        self.end
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.end == 0
    }
}

impl Write for Probe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pos += buf.len() as u64;
        self.end = self.end.max(self.pos);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for Probe {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new = match pos {
            SeekFrom::Start(x) => Some(x),
            SeekFrom::Current(x) => self.pos.checked_add_signed(x),
            SeekFrom::End(x) => self.end.checked_add_signed(x),
        };
        self.pos = new.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of probe")
        })?;
        Ok(self.pos)
    }
}

impl Read for Probe {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "probe sink holds no data",
        ))
    }
}

/// A latched failure. Once set, every later operation fails with
/// [`Error::Faulted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The sink reported an I/O error of this kind.
    Io(io::ErrorKind),
    /// A table could not grow.
    OutOfMemory,
}

/// Big-endian primitive writes and back-patched box sizes on top of a
/// [`Sink`], with a sticky fault flag.
#[derive(Debug)]
pub struct BoxWriter<S> {
    sink: S,
    fault: Option<Fault>,
}

impl<S: Sink> BoxWriter<S> {
    /// Wraps a sink.
    pub fn new(sink: S) -> Self {
        Self { sink, fault: None }
    }

    /// The latched fault, if any.
    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    /// Fails with [`Error::Faulted`] if a fault was latched.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn check(&self) -> Result<()> {
        match self.fault {
            Some(_) => Err(Error::Faulted),
            None => Ok(()),
        }
    }

    /// Latches `err` if it is an I/O or allocation failure and passes it on.
    pub fn latch(&mut self, err: Error) -> Error {
        let fault = match &err {
            Error::Io(e) => Some(Fault::Io(e.kind())),
            Error::OutOfMemory => Some(Fault::OutOfMemory),
            _ => None,
        };
        if let Some(fault) = fault {
            #[cfg(feature = "log")]
            log::warn!("Muxer faulted: {}", err);
            self.fault.get_or_insert(fault);
        }
        err
    }

    /// Runs `f` against the sink unless faulted, latching any I/O error.
    ///
    /// # Errors
    ///
    /// [`Error::Faulted`] if already faulted, otherwise the I/O error from `f`.
    pub fn with<T>(&mut self, f: impl FnOnce(&mut S) -> io::Result<T>) -> Result<T> {
        self.check()?;
        f(&mut self.sink).map_err(|e| self.latch(e.into()))
    }

    /// Current position of the sink.
    ///
    /// # Errors
    ///
    /// I/O error or [`Error::Faulted`].
    pub fn tell(&mut self) -> Result<u64> {
        self.with(|s| s.stream_position())
    }

    /// Moves the cursor to an absolute position.
    ///
    /// # Errors
    ///
    /// I/O error or [`Error::Faulted`].
    pub fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.with(|s| s.seek(SeekFrom::Start(pos)).map(drop))
    }

    /// # Errors
    ///
    /// I/O error or [`Error::Faulted`].
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.with(|s| s.write_all(buf))
    }

    /// # Errors
    ///
    /// I/O error or [`Error::Faulted`].
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.with(|s| s.read_exact(buf))
    }

    /// # Errors
    ///
    /// I/O error or [`Error::Faulted`].
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_all(&value.to_be_bytes())
    }

    /// Writes the low 24 bits of `value`.
    ///
    /// # Errors
    ///
    /// I/O error or [`Error::Faulted`].
    pub fn write_u24(&mut self, value: u32) -> Result<()> {
        self.write_all(&value.to_be_bytes()[1..])
    }

    /// # Errors
    ///
    /// I/O error or [`Error::Faulted`].
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_all(&value.to_be_bytes())
    }

    /// # Errors
    ///
    /// I/O error or [`Error::Faulted`].
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_all(&value.to_be_bytes())
    }

    /// Writes `value` at `pos` and returns to the current position.
    ///
    /// # Errors
    ///
    /// I/O error or [`Error::Faulted`].
    pub fn write_u32_at(&mut self, pos: u64, value: u32) -> Result<()> {
        let here = self.tell()?;
        self.seek_to(pos)?;
        self.write_u32(value)?;
        self.seek_to(here)
    }

    /// Writes a box header with a placeholder size and returns the box start.
    ///
    /// # Errors
    ///
    /// I/O error or [`Error::Faulted`].
    pub fn begin_box(&mut self, box_type: [u8; 4]) -> Result<u64> {
        let start = self.tell()?;
        self.write_u32(0)?;
        self.write_all(&box_type)?;
        Ok(start)
    }

    /// Patches the size of the box opened at `start` to reach the current
    /// position, and returns that size.
    ///
    /// # Errors
    ///
    /// I/O error, [`Error::Faulted`], or [`Error::Unsupported`] if the box
    /// outgrew a 32-bit size.
    pub fn end_box(&mut self, start: u64) -> Result<u64> {
        let size = self.tell()? - start;
        let size32 = u32::try_from(size)
            .map_err(|_| Error::Unsupported(format!("box of {size} bytes needs a 64-bit size")))?;
        self.write_u32_at(start, size32)?;
        Ok(size)
    }

    /// Serializes a box through the fault latch.
    ///
    /// # Errors
    ///
    /// I/O error or [`Error::Faulted`].
    pub fn put<B: bmff::BmffBox>(&mut self, bmff_box: &B) -> Result<()> {
        self.with(|s| bmff::write_to(bmff_box, s))
    }

    /// # Errors
    ///
    /// I/O error or [`Error::Faulted`].
    pub fn flush(&mut self) -> Result<()> {
        self.with(|s| s.flush())
    }

    /// Borrows the sink.
    pub fn get_ref(&self) -> &S {
        &self.sink
    }

    /// Unwraps the sink.
    pub fn into_inner(self) -> S {
        self.sink
    }
}
