//! Reading raw ADTS AAC streams.
//!
//! Each ADTS frame is a 7-byte header (9 with CRC) followed by one raw AAC
//! access unit. The header carries everything needed to rebuild the
//! AudioSpecificConfig an MP4 sample entry wants.

use quick_error::quick_error;
use std::io::{self, prelude::*};

/// Samples per AAC access unit.
pub const FRAME_LENGTH: u32 = 1024;

/// Sampling frequencies by `sampling_frequency_index`.
pub const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

quick_error! {
    /// Errors from [`AdtsReader`].
    #[derive(Debug)]
    #[non_exhaustive]
    pub enum Error {
        /// I/O error. This wraps an [`std::io::Error`].
        Io(err: io::Error) {
            source(err)
            display("{}", err)
            from()
        }
        /// No sync word where a frame should start.
        LostSync(offset: u64) {
            display("No ADTS sync word at byte {}", offset)
        }
        /// The stream ended inside a frame.
        Truncated(offset: u64) {
            display("ADTS frame at byte {} is truncated", offset)
        }
        /// A frame uses a feature that cannot be remuxed.
        Unsupported(offset: u64, what: String) {
            display("Unsupported ADTS frame at byte {}: {}", offset, what)
        }
    }
}

/// A `Result` type alias for this module's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// The fields of an ADTS header that matter for remuxing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// `profile_ObjectType`, the audio object type minus one.
    pub profile: u8,
    pub sampling_index: u8,
    /// Zero means the layout is given by an in-band program config element.
    pub channel_config: u8,
    pub protection_absent: bool,
    /// Whole frame, header included.
    pub frame_length: usize,
    /// Raw data blocks in the frame, minus one.
    pub raw_blocks: u8,
}

impl AdtsHeader {
    /// Parses the fixed 7 header bytes. Returns `None` without a sync word.
    pub fn parse(buf: &[u8; 7]) -> Option<Self> {
        if buf[0] != 0xff || buf[1] & 0xf0 != 0xf0 {
            return None;
        }
        Some(Self {
            profile: buf[2] >> 6,
            sampling_index: (buf[2] >> 2) & 0x0f,
            channel_config: ((buf[2] & 0x01) << 2) | (buf[3] >> 6),
            protection_absent: buf[1] & 0x01 == 1,
            frame_length: (usize::from(buf[3] & 0x03) << 11)
                | (usize::from(buf[4]) << 3)
                | usize::from(buf[5] >> 5),
            raw_blocks: buf[6] & 0x03,
        })
    }

    /// Header size, CRC included.
    pub fn header_length(&self) -> usize {
        if self.protection_absent {
            7
        } else {
            9
        }
    }

    /// Sampling frequency in Hz, `None` for reserved indices.
    pub fn sample_rate(&self) -> Option<u32> {
        SAMPLE_RATES.get(usize::from(self.sampling_index)).copied()
    }

    /// The two-byte AudioSpecificConfig for this stream.
    pub fn audio_specific_config(&self) -> [u8; 2] {
        let object_type = self.profile + 1;
        [
            (object_type << 3) | (self.sampling_index >> 1),
            ((self.sampling_index & 1) << 7) | (self.channel_config << 3),
        ]
    }

    /// Whether `other` describes the same stream configuration.
    pub fn same_stream(&self, other: &Self) -> bool {
        self.profile == other.profile
            && self.sampling_index == other.sampling_index
            && self.channel_config == other.channel_config
    }
}

/// One ADTS frame with its header stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: AdtsHeader,
    /// Byte offset of the frame in the stream.
    pub offset: u64,
    /// The raw access unit.
    pub payload: Vec<u8>,
}

/// Splits a byte stream into ADTS frames.
#[derive(Debug)]
pub struct AdtsReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> AdtsReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next frame, or `None` at a clean end of stream.
    ///
    /// # Errors
    ///
    /// I/O errors, a missing sync word, a frame cut short, or a frame with
    /// more than one raw data block.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let offset = self.offset;
        let mut fixed = [0; 7];
        match read_full(&mut self.inner, &mut fixed)? {
            0 => return Ok(None),
            7 => {}
            _ => return Err(Error::Truncated(offset)),
        }
        let header = AdtsHeader::parse(&fixed).ok_or(Error::LostSync(offset))?;
        if header.raw_blocks != 0 {
            return Err(Error::Unsupported(
                offset,
                format!("{} raw data blocks in one frame", header.raw_blocks + 1),
            ));
        }
        let header_length = header.header_length();
        if header.frame_length < header_length {
            return Err(Error::Unsupported(
                offset,
                format!("frame length {} is shorter than its header", header.frame_length),
            ));
        }

        // CRC
        let mut crc = [0; 2];
        let crc = &mut crc[..header_length - 7];
        let mut payload = vec![0; header.frame_length - header_length];
        for buf in [crc, &mut payload[..]] {
            if read_full(&mut self.inner, buf)? != buf.len() {
                return Err(Error::Truncated(offset));
            }
        }

        self.offset += header.frame_length as u64;
        Ok(Some(Frame {
            header,
            offset,
            payload,
        }))
    }
}

impl<R: Read> Iterator for AdtsReader<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// Like `read_exact`, but reports how much was read before end of stream.
fn read_full(mut r: impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Wraps a payload in an AAC-LC, 44.1 kHz, stereo ADTS header.
#[cfg(test)]
pub(crate) fn frame(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() + 7;
    let mut frame = vec![
        0xff,
        0xf1,
        (1 << 6) | (4 << 2),
        (2 << 6) | ((len >> 11) & 0x03) as u8,
        (len >> 3) as u8,
        (((len & 0x07) << 5) | 0x1f) as u8,
        0xfc,
    ];
    frame.extend_from_slice(payload);
    frame
}
