use crate::{
    config::{Codec, GaplessMode, MuxerConfig},
    metadata::{MetadataTable, Tag},
    sink::{BoxWriter, Fault},
    Error, Result, Sink, Track,
};
use bmff::{BmffBox, FileTypeBox, FreeSpaceBox};
use chrono::Utc;
use std::num::NonZeroU32;

/// A file holds at most this many tracks.
pub const MAX_TRACKS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Configuring,
    Writing,
    Finalized,
}

/// Writes an M4A file into a [`Sink`].
///
/// The usual sequence is: [`Muxer::new`], track setters,
/// [`Muxer::begin_write`], one [`Muxer::append_sample`] per access unit, and
/// [`Muxer::finalize`]. Tags can be added at any point before finalization.
#[derive(Debug)]
pub struct Muxer<S> {
    pub(crate) out: BoxWriter<S>,
    pub(crate) timescale: u32,
    pub(crate) creation_time: u64,
    pub(crate) modification_time: u64,
    pub(crate) gapless: GaplessMode,
    /// End of the `ftyp` box, where a relocated `moov` goes.
    pub(crate) header_end: u64,
    /// Start of the media payload, just past the `mdat` header.
    pub(crate) mdat_pos: u64,
    pub(crate) mdat_size: u64,
    pub(crate) tracks: Vec<Track>,
    pub(crate) metadata: MetadataTable,
    pub(crate) state: State,
}

impl<S: Sink> Muxer<S> {
    /// Creates a muxer with one track of `codec`, using `timescale` for both
    /// the track and the movie. With `no_timestamp`, creation and
    /// modification times are written as zero.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] if `codec` is not an audio codec or
    /// `timescale` is zero.
    pub fn new(codec: Codec, timescale: u32, sink: S, no_timestamp: bool) -> Result<Self> {
        if codec == Codec::Text {
            return Err(Error::Unsupported(
                "the primary track must be AAC or ALAC".to_string(),
            ));
        }
        if timescale == 0 {
            return Err(Error::Unsupported("timescale must be nonzero".to_string()));
        }
        let now = if no_timestamp {
            0
        } else {
            bmff::mp4_time(Utc::now())
        };
        Ok(Self {
            out: BoxWriter::new(sink),
            timescale,
            creation_time: now,
            modification_time: now,
            gapless: GaplessMode::default(),
            header_end: 0,
            mdat_pos: 0,
            mdat_size: 0,
            tracks: vec![Track::new(codec, timescale)],
            metadata: MetadataTable::default(),
            state: State::Configuring,
        })
    }

    /// Creates a muxer from a [`MuxerConfig`]. The config's `optimize` flag
    /// is meant to be passed to [`Muxer::finalize`].
    ///
    /// # Errors
    ///
    /// See [`Muxer::new`].
    pub fn with_config(config: &MuxerConfig, sink: S) -> Result<Self> {
        let mut muxer = Self::new(config.codec, config.timescale, sink, config.no_timestamp)?;
        muxer.gapless = config.gapless;
        Ok(muxer)
    }

    fn configurable(&self) -> Result<()> {
        self.out.check()?;
        if self.state == State::Finalized {
            return Err(Error::Unsupported("the muxer is finalized".to_string()));
        }
        Ok(())
    }

    fn track_mut(&mut self, idx: usize) -> Result<&mut Track> {
        self.configurable()?;
        let count = self.tracks.len();
        self.tracks
            .get_mut(idx)
            .ok_or_else(|| Error::Unsupported(format!("track {idx} out of range (0..{count})")))
    }

    /// Adds a secondary track and returns its index.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] after [`Muxer::begin_write`], when the file
    /// already has [`MAX_TRACKS`] tracks, or if `timescale` is zero.
    pub fn add_track(&mut self, codec: Codec, timescale: u32) -> Result<usize> {
        self.configurable()?;
        if self.state != State::Configuring {
            return Err(Error::Unsupported(
                "tracks must be added before writing starts".to_string(),
            ));
        }
        if self.tracks.len() >= MAX_TRACKS {
            return Err(Error::Unsupported(format!(
                "at most {MAX_TRACKS} tracks are supported"
            )));
        }
        if timescale == 0 {
            return Err(Error::Unsupported("timescale must be nonzero".to_string()));
        }
        self.tracks.push(Track::new(codec, timescale));
        Ok(self.tracks.len() - 1)
    }

    /// Sets the channel count written in the sample entry. Defaults to 2.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for an unknown track, [`Error::Faulted`] if
    /// faulted.
    pub fn set_num_channels(&mut self, track: usize, channels: u16) -> Result<()> {
        self.track_mut(track)?.channels = channels;
        Ok(())
    }

    /// Gives every sample of the track this duration, regardless of what is
    /// passed to [`Muxer::append_sample`]. Zero disables the override.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for an unknown track, [`Error::Faulted`] if
    /// faulted.
    pub fn set_fixed_frame_duration(&mut self, track: usize, duration: u32) -> Result<()> {
        self.track_mut(track)?.frame_duration = NonZeroU32::new(duration);
        Ok(())
    }

    /// Sets the codec configuration: the AudioSpecificConfig for AAC, the
    /// magic cookie for ALAC.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for an unknown track, [`Error::OutOfMemory`]
    /// if the copy cannot be allocated, [`Error::Faulted`] if faulted.
    pub fn set_decoder_specific_info(&mut self, track: usize, data: &[u8]) -> Result<()> {
        let track = self.track_mut(track)?;
        let mut dsi = Vec::new();
        let copied = dsi.try_reserve_exact(data.len()).map(|_| {
            dsi.extend_from_slice(data);
            track.decoder_specific_info = dsi;
        });
        copied.map_err(|_| self.out.latch(Error::OutOfMemory))
    }

    /// Marks the track as variable bitrate, which zeroes the average bitrate
    /// in its decoder configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for an unknown track, [`Error::Faulted`] if
    /// faulted.
    pub fn set_vbr(&mut self, track: usize, vbr: bool) -> Result<()> {
        self.track_mut(track)?.vbr = vbr;
        Ok(())
    }

    /// Sets the encoder delay and trailing padding, in samples. May be called
    /// any time before [`Muxer::finalize`].
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for an unknown track, [`Error::Faulted`] if
    /// faulted.
    pub fn set_priming(&mut self, track: usize, delay: u32, padding: u32) -> Result<()> {
        let track = self.track_mut(track)?;
        track.delay = delay;
        track.padding = padding;
        Ok(())
    }

    /// Chooses how priming is signaled.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] once finalized, [`Error::Faulted`] if faulted.
    pub fn set_gapless_mode(&mut self, mode: GaplessMode) -> Result<()> {
        self.configurable()?;
        self.gapless = mode;
        Ok(())
    }

    /// Writes the file header and opens the media data box.
    ///
    /// # Errors
    ///
    /// I/O error, [`Error::Faulted`], or [`Error::Unsupported`] if called
    /// twice.
    pub fn begin_write(&mut self) -> Result<()> {
        self.configurable()?;
        if self.state != State::Configuring {
            return Err(Error::Unsupported("writing already started".to_string()));
        }
        let ftyp = FileTypeBox::m4a();
        self.out.put(&ftyp)?;
        self.header_end = self.out.tell()?;
        // room for a 64-bit mdat header
        self.out.put(&FreeSpaceBox { size: 8 })?;
        self.out.begin_box(*b"mdat")?;
        self.mdat_pos = self.out.tell()?;
        debug_assert_eq!(self.mdat_pos, ftyp.size() + 16);
        self.state = State::Writing;
        Ok(())
    }

    /// Appends one access unit to a track. `duration` is in the track
    /// timescale and is ignored if the track has a fixed frame duration.
    ///
    /// # Errors
    ///
    /// I/O error or [`Error::OutOfMemory`] (both latched), [`Error::Faulted`]
    /// if faulted, [`Error::Unsupported`] for an unknown track or when not
    /// between [`Muxer::begin_write`] and [`Muxer::finalize`].
    pub fn append_sample(&mut self, track: usize, data: &[u8], duration: u32) -> Result<()> {
        self.out.check()?;
        if self.state != State::Writing {
            return Err(Error::Unsupported(
                "samples can only be added after begin_write".to_string(),
            ));
        }
        let count = self.tracks.len();
        let track = self
            .tracks
            .get_mut(track)
            .ok_or_else(|| Error::Unsupported(format!("track {track} out of range (0..{count})")))?;
        let flushed = track
            .append_sample(&mut self.out, data, duration)
            .map_err(|e| self.out.latch(e))?;
        self.mdat_size += flushed;
        Ok(())
    }

    /// Adds or replaces a metadata item.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for an invalid tag or after finalization,
    /// [`Error::OutOfMemory`] (latched), [`Error::Faulted`] if faulted.
    pub fn add_tag(&mut self, tag: Tag<'_>) -> Result<()> {
        self.configurable()?;
        self.metadata.add(tag).map_err(|e| self.out.latch(e))
    }

    /// A track by index.
    pub fn track(&self, idx: usize) -> Option<&Track> {
        self.tracks.get(idx)
    }

    /// Number of tracks.
    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// The metadata table.
    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    /// The latched fault, if any.
    pub fn fault(&self) -> Option<Fault> {
        self.out.fault()
    }

    /// Borrows the sink.
    pub fn get_ref(&self) -> &S {
        self.out.get_ref()
    }

    /// Releases the sink.
    pub fn into_inner(self) -> S {
        self.out.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn muxer() -> Muxer<Cursor<Vec<u8>>> {
        Muxer::new(Codec::Aac, 44100, Cursor::new(Vec::new()), true).unwrap()
    }

    #[test]
    fn header_layout() {
        let mut muxer = muxer();
        muxer.begin_write().unwrap();
        assert_eq!(muxer.header_end, 32);
        assert_eq!(muxer.mdat_pos, 48);
        let file = muxer.into_inner().into_inner();
        assert_eq!(&file[32..48], b"\0\0\0\x08free\0\0\0\0mdat");
    }

    #[test]
    fn rejects_text_primary_track() {
        let err = Muxer::new(Codec::Text, 1000, Cursor::new(Vec::new()), true).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        let err = Muxer::new(Codec::Aac, 0, Cursor::new(Vec::new()), true).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn track_ceiling() {
        let mut muxer = muxer();
        assert_eq!(muxer.add_track(Codec::Text, 1000).unwrap(), 1);
        assert!(matches!(
            muxer.add_track(Codec::Aac, 1000),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(muxer.num_tracks(), 2);
    }

    #[test]
    fn bad_track_index_is_not_latched() {
        let mut muxer = muxer();
        assert!(matches!(
            muxer.set_num_channels(2, 1),
            Err(Error::Unsupported(_))
        ));
        muxer.begin_write().unwrap();
        assert!(matches!(
            muxer.append_sample(5, &[0], 1024),
            Err(Error::Unsupported(_))
        ));
        assert!(muxer.fault().is_none());
        muxer.append_sample(0, &[0], 1024).unwrap();
    }

    #[test]
    fn samples_need_begin_write() {
        let mut muxer = muxer();
        assert!(matches!(
            muxer.append_sample(0, &[0], 1024),
            Err(Error::Unsupported(_))
        ));
        muxer.begin_write().unwrap();
        assert!(muxer.begin_write().is_err());
        assert!(muxer.add_track(Codec::Text, 1000).is_err());
    }

    #[test]
    fn gapless_mode_after_finalize() {
        let mut muxer = muxer();
        muxer.set_gapless_mode(GaplessMode::Iso).unwrap();
        muxer.begin_write().unwrap();
        muxer.set_gapless_mode(GaplessMode::Both).unwrap();
        muxer.finalize(false).unwrap();
        assert!(matches!(
            muxer.set_gapless_mode(GaplessMode::None),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(muxer.gapless, GaplessMode::Both);
    }

    #[test]
    fn zero_timestamps() {
        let muxer = muxer();
        assert_eq!(muxer.creation_time, 0);
        let muxer = Muxer::new(Codec::Alac, 44100, Cursor::new(Vec::new()), false).unwrap();
        assert!(muxer.creation_time > bmff::MP4_EPOCH_OFFSET as u64);
    }
}
