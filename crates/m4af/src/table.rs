//! Per-track sample and chunk bookkeeping.

use crate::{sink::BoxWriter, Error, Result, Sink};
use bmff::{
    ChunkLargeOffsetBox, ChunkOffsetBox, ChunkOffsets, SampleSizeBox, SampleToChunkBox,
    TimeToSampleBox,
};

/// One access unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Size in bytes.
    pub size: u32,
    /// Duration in the track timescale.
    pub duration: u32,
}

/// A run of samples stored back to back in the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Absolute file offset. Zero until the chunk is written.
    pub offset: u64,
    /// Total size in bytes.
    pub size: u64,
    /// Number of samples.
    pub samples: u32,
    /// Total duration in the track timescale.
    pub duration: u64,
}

/// Append-only list of samples in presentation order.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    samples: Vec<Sample>,
    duration: u64,
    max_size: u32,
}

impl SampleTable {
    /// Makes room for one more sample.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the table cannot grow.
    pub fn reserve(&mut self) -> Result<()> {
        self.samples.try_reserve(1).map_err(|_| Error::OutOfMemory)
    }

    /// Appends a sample.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the table cannot grow.
    pub fn push(&mut self, sample: Sample) -> Result<()> {
        self.reserve()?;
        self.samples.push(sample);
        self.duration += u64::from(sample.duration);
        self.max_size = self.max_size.max(sample.size);
        Ok(())
    }

    /// The samples in insertion order.
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample was added yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sum of all sample durations.
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Largest sample size seen.
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Bitrate of the trailing second of samples, ending at the newest one.
    ///
    /// Walks back from the last sample until at least `timescale` ticks are
    /// covered, or the start of the table is reached.
    pub fn trailing_bitrate(&self, timescale: u32) -> u32 {
        let mut size = 0u64;
        let mut duration = 0u64;
        for sample in self.samples.iter().rev() {
            if duration >= u64::from(timescale) {
                break;
            }
            size += u64::from(sample.size);
            duration += u64::from(sample.duration);
        }
        bitrate(size, duration, timescale)
    }

    /// Run-length encoded sample durations.
    pub fn time_to_sample(&self) -> TimeToSampleBox {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for sample in &self.samples {
            match runs.last_mut() {
                Some((count, delta)) if *delta == sample.duration => *count += 1,
                _ => runs.push((1, sample.duration)),
            }
        }
        TimeToSampleBox { samples: runs }
    }

    /// Sample sizes, one entry per sample.
    pub fn sample_sizes(&self) -> SampleSizeBox {
        SampleSizeBox {
            sample_sizes: self.samples.iter().map(|s| s.size).collect(),
        }
    }
}

/// `size` bytes over `duration` ticks, in bits per second, rounded to
/// nearest. Zero for an empty duration.
pub fn bitrate(size: u64, duration: u64, timescale: u32) -> u32 {
    if duration == 0 {
        return 0;
    }
    let bits = u128::from(size) * 8 * u128::from(timescale);
    let duration = u128::from(duration);
    u32::try_from((bits * 2 + duration) / (duration * 2)).unwrap_or(u32::MAX)
}

/// Chunk list plus the bytes of the chunk still being filled.
#[derive(Debug, Clone, Default)]
pub struct ChunkTable {
    chunks: Vec<Chunk>,
    buffer: Vec<u8>,
}

impl ChunkTable {
    /// Whether a sample of `duration` must start a new chunk. Chunks are
    /// capped at half a second of media.
    pub fn needs_new_chunk(&self, duration: u32, timescale: u32) -> bool {
        match self.chunks.last() {
            None => true,
            Some(chunk) => chunk.duration + u64::from(duration) > u64::from(timescale / 2),
        }
    }

    /// Makes room for one more chunk entry.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the table cannot grow.
    pub fn reserve_chunk(&mut self) -> Result<()> {
        self.chunks.try_reserve(1).map_err(|_| Error::OutOfMemory)
    }

    /// Makes room for `len` more buffered bytes. Capacity grows to the next
    /// power of two.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the buffer cannot grow.
    pub fn reserve_bytes(&mut self, len: usize) -> Result<()> {
        let needed = self.buffer.len() + len;
        if needed > self.buffer.capacity() {
            let target = needed.checked_next_power_of_two().unwrap_or(needed);
            self.buffer
                .try_reserve_exact(target - self.buffer.len())
                .map_err(|_| Error::OutOfMemory)?;
        }
        Ok(())
    }

    /// Starts an empty chunk.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the table cannot grow.
    pub fn open(&mut self) -> Result<()> {
        self.reserve_chunk()?;
        self.chunks.push(Chunk::default());
        Ok(())
    }

    /// Adds a sample to the open chunk.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the buffer cannot grow, or
    /// [`Error::Unsupported`] if no chunk is open.
    pub fn append(&mut self, data: &[u8], duration: u32) -> Result<()> {
        self.reserve_bytes(data.len())?;
        let chunk = self
            .chunks
            .last_mut()
            .ok_or_else(|| Error::Unsupported("no open chunk".into()))?;
        chunk.size += data.len() as u64;
        chunk.samples += 1;
        chunk.duration += u64::from(duration);
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Bytes of the open chunk not yet written.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Writes the buffered bytes of the open chunk at the current sink
    /// position, which becomes the chunk's offset. Returns the number of bytes
    /// written. Does nothing when nothing is buffered.
    ///
    /// # Errors
    ///
    /// I/O error or [`Error::Faulted`].
    pub fn flush<S: Sink>(&mut self, out: &mut BoxWriter<S>) -> Result<u64> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let offset = out.tell()?;
        let n = self.chunks.len();
        debug_assert!(
            n < 2 || self.chunks[n - 2].offset + self.chunks[n - 2].size <= offset,
            "chunk offsets must increase"
        );
        let Some(chunk) = self.chunks.last_mut() else {
            return Ok(0);
        };
        chunk.offset = offset;
        out.write_all(&self.buffer)?;
        let written = self.buffer.len() as u64;
        self.buffer.clear();
        #[cfg(feature = "log")]
        log::trace!("Flushed chunk {} ({} bytes) at {}", n, written, offset);
        Ok(written)
    }

    /// The chunks in file order.
    pub fn as_slice(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether no chunk was opened yet.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Sum of all chunk sizes, including the open one.
    pub fn total_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.size).sum()
    }

    /// Moves every chunk `delta` bytes further into the file.
    pub fn shift(&mut self, delta: u64) {
        for chunk in &mut self.chunks {
            chunk.offset += delta;
        }
    }

    /// Run-length encoded samples per chunk.
    pub fn sample_to_chunk(&self) -> SampleToChunkBox {
        let mut entries: Vec<(u32, u32, u32)> = Vec::new();
        for (i, chunk) in self.chunks.iter().enumerate() {
            if entries.last().map_or(true, |&(_, n, _)| n != chunk.samples) {
                entries.push((i as u32 + 1, chunk.samples, 1));
            }
        }
        SampleToChunkBox { entries }
    }

    /// Chunk offsets as they would be if every chunk were `shift` bytes
    /// further into the file.
    ///
    /// Offsets only ever grow, so the last one decides whether 64-bit
    /// entries are needed.
    pub fn offsets(&self, shift: u64) -> ChunkOffsets {
        let large = self
            .chunks
            .last()
            .map_or(false, |c| c.offset + shift > u32::MAX as u64);
        let offsets = self.chunks.iter().map(|c| c.offset + shift);
        if large {
            ChunkOffsets::Co64(ChunkLargeOffsetBox {
                chunk_offsets: offsets.collect(),
            })
        } else {
            ChunkOffsets::Stco(ChunkOffsetBox {
                chunk_offsets: offsets.map(|x| x as u32).collect(),
            })
        }
    }

    #[cfg(test)]
    pub(crate) fn set_offset(&mut self, idx: usize, offset: u64) {
        self.chunks[idx].offset = offset;
    }
}
