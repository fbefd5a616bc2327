//! Closing the file: the last chunks, the `mdat` size and the `moov` box.

use crate::{
    metadata::{itunsmpb, ITUNSMPB},
    muxer::{Muxer, State},
    Error, Probe, Result, Sink, Tag,
};
use bmff::{BmffBox, FreeSpaceBox, MediaDataHeader, MovieBox, WriteTo};

/// Slack added to the probed `moov` size when reserving room in front of the
/// media data.
const RELOCATION_HEADROOM: u64 = 1024;
const MAX_PROBE_PASSES: usize = 4;
const COPY_BLOCK_SIZE: usize = 2 << 20;

impl<S: Sink> Muxer<S> {
    /// Flushes pending samples and writes the movie box.
    ///
    /// With `optimize`, the media data is moved back so the movie box sits
    /// right after `ftyp`, which lets players start before the whole file is
    /// downloaded. This reads the media data back, so the sink must be
    /// readable. Otherwise the movie box is appended at the end.
    ///
    /// # Errors
    ///
    /// I/O error or [`Error::OutOfMemory`] (both latched),
    /// [`Error::Faulted`] if faulted, or [`Error::Unsupported`] if writing
    /// never started, the muxer was already finalized, or the movie box
    /// does not settle on a size.
    pub fn finalize(&mut self, optimize: bool) -> Result<()> {
        self.out.check()?;
        match self.state {
            State::Configuring => {
                return Err(Error::Unsupported("begin_write was never called".to_string()))
            }
            State::Finalized => return Err(Error::Unsupported("already finalized".to_string())),
            State::Writing => {}
        }
        self.state = State::Finalized;

        for track in &mut self.tracks {
            let flushed = track
                .finish(&mut self.out)
                .map_err(|e| self.out.latch(e))?;
            self.mdat_size += flushed;
        }

        if self.gapless.legacy() {
            if let Some(track) = self.tracks.first().filter(|t| t.has_priming()) {
                let value = itunsmpb(track.delay, track.padding, track.presentation_duration());
                self.metadata
                    .add(Tag::FreeForm {
                        name: ITUNSMPB,
                        value: &value,
                    })
                    .map_err(|e| self.out.latch(e))?;
            }
        }

        self.write_mdat_header()?;
        if optimize {
            self.relocate()?;
        } else {
            self.append_movie_box()?;
        }
        self.out.flush()?;

        #[cfg(feature = "log")]
        log::debug!(
            "Finalized: {} bytes of media at {}, moov {}",
            self.mdat_size,
            self.mdat_pos,
            if optimize { "first" } else { "last" },
        );
        Ok(())
    }

    /// Writes the final `mdat` header in front of `mdat_pos` and moves to the
    /// end of the media data.
    fn write_mdat_header(&mut self) -> Result<()> {
        let header = MediaDataHeader {
            data_size: self.mdat_size,
        };
        // the extended header takes over the `free` box placed before it
        self.out.seek_to(self.mdat_pos - header.header_size())?;
        self.out.with(|s| header.write_to(s))?;
        self.out.seek_to(self.mdat_pos + self.mdat_size)
    }

    fn write_movie_box(&mut self, moov: &MovieBox) -> Result<u64> {
        let start = self.out.begin_box(MovieBox::TYPE)?;
        self.out.with(|s| moov.write_box(s))?;
        let size = self.out.end_box(start)?;
        debug_assert_eq!(size, moov.size());
        Ok(size)
    }

    fn append_movie_box(&mut self) -> Result<()> {
        let moov = self.movie_box(0);
        self.write_movie_box(&moov).map(drop)
    }

    /// Encoded size of the movie box with chunk offsets shifted by `shift`.
    fn probe(&self, shift: u64) -> Result<u64> {
        let moov = self.movie_box(shift);
        let mut probe = Probe::default();
        bmff::write_to(&moov, &mut probe)?;
        debug_assert_eq!(probe.len(), moov.size());
        Ok(probe.len())
    }

    /// Finds how far the media data has to move to fit the movie box in
    /// front of it.
    ///
    /// Moving the data can push chunk offsets past 32 bits, which grows the
    /// movie box, so this iterates until the box fits its own gap exactly or
    /// leaves room for a `free` box.
    fn relocation_gap(&self) -> Result<u64> {
        let mut gap = self.probe(0)? + RELOCATION_HEADROOM;
        for _pass in 0..MAX_PROBE_PASSES {
            let size = self.probe(gap)?;
            #[cfg(feature = "log")]
            log::trace!("Probe pass {}: moov of {} bytes in a gap of {}", _pass, size, gap);
            if size == gap || size + 8 <= gap {
                return Ok(gap);
            }
            gap = size + RELOCATION_HEADROOM;
        }
        Err(Error::Unsupported(format!(
            "moov size did not settle after {MAX_PROBE_PASSES} passes"
        )))
    }

    /// Moves the media data `gap` bytes toward the end, back to front.
    fn shift_media_data(&mut self, gap: u64) -> Result<()> {
        let mut buf = Vec::new();
        let block = self.mdat_size.min(COPY_BLOCK_SIZE as u64) as usize;
        buf.try_reserve_exact(block)
            .map_err(|_| self.out.latch(Error::OutOfMemory))?;
        buf.resize(block, 0);

        let mut remaining = self.mdat_size;
        while remaining > 0 {
            let n = remaining.min(block as u64) as usize;
            remaining -= n as u64;
            let src = self.mdat_pos + remaining;
            self.out.seek_to(src)?;
            self.out.read_exact(&mut buf[..n])?;
            self.out.seek_to(src + gap)?;
            self.out.write_all(&buf[..n])?;
        }

        for track in &mut self.tracks {
            track.chunks.shift(gap);
        }
        self.mdat_pos += gap;
        Ok(())
    }

    /// Rewrites the file as `ftyp`, `moov`, `free`, `mdat`.
    fn relocate(&mut self) -> Result<()> {
        let gap = self.relocation_gap()?;
        #[cfg(feature = "log")]
        log::debug!("Moving {} bytes of media by {}", self.mdat_size, gap);
        self.shift_media_data(gap)?;

        self.out.seek_to(self.mdat_pos - 16)?;
        self.out.put(&FreeSpaceBox { size: 8 })?;
        self.out.begin_box(*b"mdat")?;
        self.write_mdat_header()?;

        self.out.seek_to(self.header_end)?;
        let moov = self.movie_box(0);
        let size = self.write_movie_box(&moov)?;
        debug_assert!(size <= gap);
        if gap > size {
            self.out.put(&FreeSpaceBox { size: gap - size })?;
        }
        self.out.seek_to(self.mdat_pos + self.mdat_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Codec;
    use std::io::Cursor;

    fn muxer() -> Muxer<Cursor<Vec<u8>>> {
        let mut muxer = Muxer::new(Codec::Aac, 44100, Cursor::new(Vec::new()), true).unwrap();
        muxer.set_fixed_frame_duration(0, 1024).unwrap();
        muxer.begin_write().unwrap();
        muxer
    }

    fn top_level(file: &[u8]) -> Vec<([u8; 4], u64, u64)> {
        let mut boxes = Vec::new();
        let mut pos = 0;
        while pos < file.len() {
            let mut size = u32::from_be_bytes(file[pos..pos + 4].try_into().unwrap()) as u64;
            let box_type: [u8; 4] = file[pos + 4..pos + 8].try_into().unwrap();
            if size == 1 {
                size = u64::from_be_bytes(file[pos + 8..pos + 16].try_into().unwrap());
            }
            boxes.push((box_type, pos as u64, size));
            pos += size as usize;
        }
        boxes
    }

    #[test]
    fn append_layout() {
        let mut muxer = muxer();
        for i in 0..100u8 {
            muxer.append_sample(0, &[i; 10], 0).unwrap();
        }
        muxer.finalize(false).unwrap();
        let file = muxer.into_inner().into_inner();
        let boxes = top_level(&file);
        let types: Vec<_> = boxes.iter().map(|b| &b.0).collect();
        assert_eq!(types, [b"ftyp", b"free", b"mdat", b"moov"]);
        assert_eq!(boxes[2], (*b"mdat", 40, 1008));
    }

    #[test]
    fn relocate_layout() {
        let mut muxer = muxer();
        for i in 0..100u8 {
            muxer.append_sample(0, &[i; 10], 0).unwrap();
        }
        muxer.finalize(true).unwrap();
        let mdat_pos = muxer.mdat_pos;
        let offsets = muxer.tracks[0].chunks.as_slice()[0].offset;
        assert_eq!(offsets, mdat_pos);
        let file = muxer.into_inner().into_inner();
        let boxes = top_level(&file);
        let types: Vec<_> = boxes.iter().map(|b| &b.0).collect();
        assert_eq!(types, [b"ftyp", b"moov", b"free", b"free", b"mdat"]);
        assert_eq!(boxes[1].1, 32);
        assert_eq!(boxes[4], (*b"mdat", mdat_pos - 8, 1008));
        assert_eq!(file[mdat_pos as usize..][..10], [0; 10]);
        assert_eq!(file[file.len() - 10..], [99; 10]);
    }

    fn extended_mdat_header(data_size: u64) -> Vec<u8> {
        let mut header = b"\0\0\0\x01mdat".to_vec();
        header.extend((data_size + 16).to_be_bytes());
        header
    }

    #[test]
    fn wide_mdat_takes_over_free() {
        let mut muxer = muxer();
        muxer.append_sample(0, &[1; 10], 0).unwrap();
        for track in &mut muxer.tracks {
            track.finish(&mut muxer.out).unwrap();
        }

        muxer.mdat_size = u32::MAX as u64 - 8;
        muxer.write_mdat_header().unwrap();
        let file = muxer.get_ref().get_ref();
        assert_eq!(&file[32..40], b"\0\0\0\x08free");
        assert_eq!(&file[40..48], b"\xff\xff\xff\xffmdat");

        muxer.mdat_size = u32::MAX as u64 - 7;
        muxer.write_mdat_header().unwrap();
        let file = muxer.get_ref().get_ref();
        assert_eq!(file[32..48], extended_mdat_header(u32::MAX as u64 - 7));
        assert_eq!(file[48..58], [1; 10]);
    }

    #[test]
    fn wide_mdat_after_relocation() {
        let mut muxer = muxer();
        for i in 0..100u8 {
            muxer.append_sample(0, &[i; 10], 0).unwrap();
        }
        muxer.finalize(true).unwrap();
        let mdat_pos = muxer.mdat_pos as usize;

        muxer.mdat_size = u32::MAX as u64;
        muxer.write_mdat_header().unwrap();
        let file = muxer.get_ref().get_ref();
        assert_eq!(&file[36..40], b"moov");
        assert_eq!(file[mdat_pos - 16..mdat_pos], extended_mdat_header(u32::MAX as u64));
        assert_eq!(file[mdat_pos..][..10], [0; 10]);
    }

    #[test]
    fn finalize_twice() {
        let mut muxer = muxer();
        muxer.finalize(false).unwrap();
        assert!(matches!(muxer.finalize(false), Err(Error::Unsupported(_))));
        assert!(matches!(
            muxer.append_sample(0, &[0], 0),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn finalize_needs_begin_write() {
        let mut muxer = Muxer::new(Codec::Aac, 44100, Cursor::new(Vec::new()), true).unwrap();
        assert!(matches!(muxer.finalize(true), Err(Error::Unsupported(_))));
    }

    #[test]
    fn gap_grows_when_offsets_widen() {
        let mut muxer = muxer();
        // 300 chunks of one sample each
        muxer.set_fixed_frame_duration(0, 44100).unwrap();
        for _ in 0..300 {
            muxer.append_sample(0, &[0; 2], 0).unwrap();
        }
        for track in &mut muxer.tracks {
            track.finish(&mut muxer.out).unwrap();
        }
        let chunks = muxer.tracks[0].chunks.len();
        assert_eq!(chunks, 300);
        for i in 0..chunks {
            let offset = u32::MAX as u64 - 1000 + i as u64;
            muxer.tracks[0].chunks.set_offset(i, offset);
        }
        let narrow = muxer.probe(0).unwrap();
        let gap = muxer.relocation_gap().unwrap();
        // 4 more bytes per chunk once the offsets need 64 bits
        assert!(gap >= narrow + 4 * 300);
        let moov = muxer.movie_box(gap);
        assert!(moov.trak[0].mdia.minf.stbl.stco.is_large());
        assert!(moov.size() + 8 <= gap);
    }
}
