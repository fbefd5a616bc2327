use crate::{
    config::Codec,
    sink::BoxWriter,
    table::{bitrate, ChunkTable, Sample, SampleTable},
    Error, Result, Sink,
};
use std::num::NonZeroU32;

/// Codec parameters and sample bookkeeping of one track.
#[derive(Debug, Clone)]
pub struct Track {
    pub(crate) codec: Codec,
    pub(crate) timescale: u32,
    pub(crate) channels: u16,
    pub(crate) frame_duration: Option<NonZeroU32>,
    pub(crate) decoder_specific_info: Vec<u8>,
    pub(crate) vbr: bool,
    pub(crate) delay: u32,
    pub(crate) padding: u32,
    pub(crate) max_bitrate: u32,
    pub(crate) avg_bitrate: u32,
    pub(crate) samples: SampleTable,
    pub(crate) chunks: ChunkTable,
}

impl Track {
    pub(crate) fn new(codec: Codec, timescale: u32) -> Self {
        Self {
            codec,
            timescale,
            channels: 2,
            frame_duration: None,
            decoder_specific_info: Vec::new(),
            vbr: false,
            delay: 0,
            padding: 0,
            max_bitrate: 0,
            avg_bitrate: 0,
            samples: SampleTable::default(),
            chunks: ChunkTable::default(),
        }
    }

    /// The codec of this track.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Ticks per second.
    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    /// Sum of all sample durations, in the track timescale.
    pub fn duration(&self) -> u64 {
        self.samples.duration()
    }

    /// Encoder delay and padding, in samples.
    pub fn priming(&self) -> (u32, u32) {
        (self.delay, self.padding)
    }

    /// Highest bitrate over any one second window, in bits per second.
    pub fn max_bitrate(&self) -> u32 {
        self.max_bitrate
    }

    /// Average bitrate. Zero until the muxer is finalized.
    pub fn avg_bitrate(&self) -> u32 {
        self.avg_bitrate
    }

    /// Samples added so far.
    pub fn samples(&self) -> &SampleTable {
        &self.samples
    }

    /// Chunks started so far.
    pub fn chunks(&self) -> &ChunkTable {
        &self.chunks
    }

    /// Duration without encoder delay and padding.
    pub(crate) fn presentation_duration(&self) -> u64 {
        self.duration()
            .saturating_sub(u64::from(self.delay) + u64::from(self.padding))
    }

    /// Whether any priming information needs signaling.
    pub(crate) fn has_priming(&self) -> bool {
        self.delay != 0 || self.padding != 0
    }

    /// Records a sample and buffers its payload, flushing the previous chunk
    /// when a new one starts. Returns the number of bytes flushed.
    ///
    /// Every allocation is made before any table is touched, so a failed
    /// call leaves the tables as they were.
    pub(crate) fn append_sample<S: Sink>(
        &mut self,
        out: &mut BoxWriter<S>,
        data: &[u8],
        duration: u32,
    ) -> Result<u64> {
        let duration = self.frame_duration.map_or(duration, NonZeroU32::get);
        let size = u32::try_from(data.len())
            .map_err(|_| Error::Unsupported(format!("sample of {} bytes", data.len())))?;

        self.samples.reserve()?;
        let mut flushed = 0;
        if self.chunks.needs_new_chunk(duration, self.timescale) {
            self.chunks.reserve_chunk()?;
            flushed = self.chunks.flush(out)?;
            self.chunks.open()?;
        }
        self.chunks.reserve_bytes(data.len())?;

        self.samples.push(Sample { size, duration })?;
        self.chunks.append(data, duration)?;
        self.max_bitrate = self
            .max_bitrate
            .max(self.samples.trailing_bitrate(self.timescale));
        Ok(flushed)
    }

    /// Computes the average bitrate and writes the open chunk. Returns the
    /// number of bytes flushed.
    pub(crate) fn finish<S: Sink>(&mut self, out: &mut BoxWriter<S>) -> Result<u64> {
        self.avg_bitrate = bitrate(self.chunks.total_size(), self.duration(), self.timescale);
        self.chunks.flush(out)
    }
}
