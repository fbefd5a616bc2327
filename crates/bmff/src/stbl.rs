use crate::descriptor::EsDescriptor;
use crate::{write_to, write_to_full, BmffBox, FullBox, WriteTo};
use fixed::types::U16F16;
use std::io::{self, prelude::*};

#[derive(Debug, Clone)]
pub struct SampleTableBox {
    pub stsd: SampleDescriptionBox,
    /// Roll-recovery grouping, written only together with `sgpd`.
    pub sbgp: Option<SampleToGroupBox>,
    pub sgpd: Option<SampleGroupDescriptionBox>,
    pub stts: TimeToSampleBox,
    pub stsc: SampleToChunkBox,
    pub stsz: SampleSizeBox,
    pub stco: ChunkOffsets,
}

impl BmffBox for SampleTableBox {
    const TYPE: [u8; 4] = *b"stbl";

    #[inline]
    fn size(&self) -> u64 {
        8 + self.stsd.size()
            + self.sbgp.as_ref().map_or(0, BmffBox::size)
            + self.sgpd.as_ref().map_or(0, BmffBox::size)
            + self.stts.size()
            + self.stsc.size()
            + self.stsz.size()
            + self.stco.size()
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        write_to_full(&self.stsd, &mut w)?;
        if let Some(sbgp) = &self.sbgp {
            write_to_full(sbgp, &mut w)?;
        }
        if let Some(sgpd) = &self.sgpd {
            write_to_full(sgpd, &mut w)?;
        }
        write_to_full(&self.stts, &mut w)?;
        write_to_full(&self.stsc, &mut w)?;
        write_to_full(&self.stsz, &mut w)?;
        self.stco.write_to(&mut w)?;
        Ok(())
    }
}

/// Holds exactly one sample entry.
#[derive(Debug, Clone)]
pub struct SampleDescriptionBox {
    pub entry: SampleEntry,
}

impl BmffBox for SampleDescriptionBox {
    const TYPE: [u8; 4] = *b"stsd";

    #[inline]
    fn size(&self) -> u64 {
        12 + 4 + self.entry.size()
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&1u32.to_be_bytes())?;
        self.entry.write_to(&mut w)?;
        Ok(())
    }
}

impl FullBox for SampleDescriptionBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

#[derive(Debug, Clone)]
pub enum SampleEntry {
    Mp4a(AudioSampleEntry<EsdsBox>),
    Alac(AudioSampleEntry<AlacSpecificBox>),
    Text(TextSampleEntry),
}

impl SampleEntry {
    #[inline]
    pub fn size(&self) -> u64 {
        match self {
            Self::Mp4a(mp4a) => mp4a.size(),
            Self::Alac(alac) => alac.size(),
            Self::Text(text) => text.size(),
        }
    }
}

impl WriteTo for SampleEntry {
    fn write_to(&self, w: impl Write) -> io::Result<()> {
        match self {
            Self::Mp4a(mp4a) => write_to(mp4a, w),
            Self::Alac(alac) => write_to(alac, w),
            Self::Text(text) => write_to(text, w),
        }
    }
}

/// The codec configuration box nested in an [`AudioSampleEntry`]. Its
/// `FORMAT` names the sample entry itself.
pub trait CodecConfigBox: FullBox {
    const FORMAT: [u8; 4];
}

#[derive(Debug, Clone)]
pub struct AudioSampleEntry<C> {
    pub data_reference_index: u16,
    pub channel_count: u16,
    /// bits
    pub sample_size: u16,
    pub sample_rate: U16F16,
    pub config: C,
}

impl<C: CodecConfigBox> BmffBox for AudioSampleEntry<C> {
    const TYPE: [u8; 4] = C::FORMAT;

    #[inline]
    fn size(&self) -> u64 {
        8 + 6 + 2 + 4 * 2 + 2 + 2 + 2 + 2 + 4 + self.config.size()
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&[0u8; 6])?;
        w.write_all(&self.data_reference_index.to_be_bytes())?;
        w.write_all(&[0u32.to_be_bytes(); 2].concat())?;
        w.write_all(&self.channel_count.to_be_bytes())?;
        w.write_all(&self.sample_size.to_be_bytes())?;
        w.write_all(&0u16.to_be_bytes())?;
        w.write_all(&0u16.to_be_bytes())?;
        w.write_all(&self.sample_rate.to_be_bytes())?;
        write_to_full(&self.config, &mut w)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EsdsBox {
    pub es: EsDescriptor,
}

impl BmffBox for EsdsBox {
    const TYPE: [u8; 4] = *b"esds";

    #[inline]
    fn size(&self) -> u64 {
        12 + self.es.size()
    }

    fn write_box(&self, w: impl Write) -> io::Result<()> {
        self.es.write_to(w)
    }
}

impl FullBox for EsdsBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

impl CodecConfigBox for EsdsBox {
    const FORMAT: [u8; 4] = *b"mp4a";
}

/// Wraps the ALAC magic cookie, copied verbatim.
#[derive(Debug, Clone, Default)]
pub struct AlacSpecificBox {
    pub cookie: Vec<u8>,
}

impl BmffBox for AlacSpecificBox {
    const TYPE: [u8; 4] = *b"alac";

    #[inline]
    fn size(&self) -> u64 {
        12 + self.cookie.len() as u64
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&self.cookie)
    }
}

impl FullBox for AlacSpecificBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

impl CodecConfigBox for AlacSpecificBox {
    const FORMAT: [u8; 4] = *b"alac";
}

/// Minimal `text` sample entry: the generic sample entry fields followed by
/// an opaque configuration blob.
#[derive(Debug, Clone, Default)]
pub struct TextSampleEntry {
    pub data_reference_index: u16,
    pub config: Vec<u8>,
}

impl BmffBox for TextSampleEntry {
    const TYPE: [u8; 4] = *b"text";

    #[inline]
    fn size(&self) -> u64 {
        8 + 6 + 2 + self.config.len() as u64
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&[0u8; 6])?;
        w.write_all(&self.data_reference_index.to_be_bytes())?;
        w.write_all(&self.config)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimeToSampleBox {
    /// `(sample_count, sample_delta)`
    pub samples: Vec<(u32, u32)>,
}

impl BmffBox for TimeToSampleBox {
    const TYPE: [u8; 4] = *b"stts";

    #[inline]
    fn size(&self) -> u64 {
        12 + 4 + self.samples.len() as u64 * 8
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&(self.samples.len() as u32).to_be_bytes())?;
        for (sample_count, sample_delta) in &self.samples {
            w.write_all(&sample_count.to_be_bytes())?;
            w.write_all(&sample_delta.to_be_bytes())?;
        }
        Ok(())
    }
}

impl FullBox for TimeToSampleBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

#[derive(Debug, Clone, Default)]
pub struct SampleToChunkBox {
    /// `(first_chunk, samples_per_chunk, sample_description_index)`
    pub entries: Vec<(u32, u32, u32)>,
}

impl BmffBox for SampleToChunkBox {
    const TYPE: [u8; 4] = *b"stsc";

    #[inline]
    fn size(&self) -> u64 {
        12 + 4 + self.entries.len() as u64 * 4 * 3
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&(self.entries.len() as u32).to_be_bytes())?;
        for (first_chunk, samples_per_chunk, sample_description_index) in &self.entries {
            w.write_all(&first_chunk.to_be_bytes())?;
            w.write_all(&samples_per_chunk.to_be_bytes())?;
            w.write_all(&sample_description_index.to_be_bytes())?;
        }
        Ok(())
    }
}

impl FullBox for SampleToChunkBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

/// Always written with a per-sample size list.
#[derive(Debug, Clone, Default)]
pub struct SampleSizeBox {
    pub sample_sizes: Vec<u32>,
}

impl BmffBox for SampleSizeBox {
    const TYPE: [u8; 4] = *b"stsz";

    #[inline]
    fn size(&self) -> u64 {
        12 + 4 + 4 + self.sample_sizes.len() as u64 * 4
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&0u32.to_be_bytes())?;
        w.write_all(&(self.sample_sizes.len() as u32).to_be_bytes())?;
        for size in &self.sample_sizes {
            w.write_all(&size.to_be_bytes())?;
        }
        Ok(())
    }
}

impl FullBox for SampleSizeBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkOffsetBox {
    pub chunk_offsets: Vec<u32>,
}

impl BmffBox for ChunkOffsetBox {
    const TYPE: [u8; 4] = *b"stco";

    #[inline]
    fn size(&self) -> u64 {
        12 + 4 + self.chunk_offsets.len() as u64 * 4
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&(self.chunk_offsets.len() as u32).to_be_bytes())?;
        for chunk_offset in &self.chunk_offsets {
            w.write_all(&chunk_offset.to_be_bytes())?;
        }
        Ok(())
    }
}

impl FullBox for ChunkOffsetBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkLargeOffsetBox {
    pub chunk_offsets: Vec<u64>,
}

impl BmffBox for ChunkLargeOffsetBox {
    const TYPE: [u8; 4] = *b"co64";

    #[inline]
    fn size(&self) -> u64 {
        12 + 4 + self.chunk_offsets.len() as u64 * 8
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&(self.chunk_offsets.len() as u32).to_be_bytes())?;
        for chunk_offset in &self.chunk_offsets {
            w.write_all(&chunk_offset.to_be_bytes())?;
        }
        Ok(())
    }
}

impl FullBox for ChunkLargeOffsetBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

#[derive(Debug, Clone)]
pub enum ChunkOffsets {
    Stco(ChunkOffsetBox),
    Co64(ChunkLargeOffsetBox),
}

impl ChunkOffsets {
    #[inline]
    pub fn size(&self) -> u64 {
        match self {
            Self::Stco(stco) => stco.size(),
            Self::Co64(co64) => co64.size(),
        }
    }

    #[inline]
    pub fn is_large(&self) -> bool {
        matches!(self, Self::Co64(_))
    }
}

impl WriteTo for ChunkOffsets {
    fn write_to(&self, w: impl Write) -> io::Result<()> {
        match self {
            Self::Stco(stco) => write_to_full(stco, w),
            Self::Co64(co64) => write_to_full(co64, w),
        }
    }
}

/// `roll` sample grouping assigning every sample to group description 1.
#[derive(Debug, Clone)]
pub struct SampleToGroupBox {
    pub grouping_type: [u8; 4],
    /// `(sample_count, group_description_index)`
    pub entries: Vec<(u32, u32)>,
}

impl SampleToGroupBox {
    pub fn roll(sample_count: u32) -> Self {
        Self {
            grouping_type: *b"roll",
            entries: vec![(sample_count, 1)],
        }
    }
}

impl BmffBox for SampleToGroupBox {
    const TYPE: [u8; 4] = *b"sbgp";

    #[inline]
    fn size(&self) -> u64 {
        12 + 4 + 4 + self.entries.len() as u64 * 8
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&self.grouping_type)?;
        w.write_all(&(self.entries.len() as u32).to_be_bytes())?;
        for (sample_count, group_description_index) in &self.entries {
            w.write_all(&sample_count.to_be_bytes())?;
            w.write_all(&group_description_index.to_be_bytes())?;
        }
        Ok(())
    }
}

impl FullBox for SampleToGroupBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

/// Version 0 `roll` group descriptions, one `roll_distance` each.
#[derive(Debug, Clone)]
pub struct SampleGroupDescriptionBox {
    pub grouping_type: [u8; 4],
    pub roll_distances: Vec<i16>,
}

impl SampleGroupDescriptionBox {
    pub fn roll(roll_distance: i16) -> Self {
        Self {
            grouping_type: *b"roll",
            roll_distances: vec![roll_distance],
        }
    }
}

impl BmffBox for SampleGroupDescriptionBox {
    const TYPE: [u8; 4] = *b"sgpd";

    #[inline]
    fn size(&self) -> u64 {
        12 + 4 + 4 + self.roll_distances.len() as u64 * 2
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&self.grouping_type)?;
        w.write_all(&(self.roll_distances.len() as u32).to_be_bytes())?;
        for roll_distance in &self.roll_distances {
            w.write_all(&roll_distance.to_be_bytes())?;
        }
        Ok(())
    }
}

impl FullBox for SampleGroupDescriptionBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DecoderConfigDescriptor;
    use crate::{encode, encode_full};

    fn mp4a() -> AudioSampleEntry<EsdsBox> {
        AudioSampleEntry {
            data_reference_index: 1,
            channel_count: 2,
            sample_size: 16,
            sample_rate: U16F16::from_num(44100),
            config: EsdsBox {
                es: EsDescriptor {
                    decoder_config: DecoderConfigDescriptor {
                        buffer_size_db: 700,
                        max_bitrate: 160_000,
                        avg_bitrate: 128_000,
                        decoder_specific_info: vec![0x12, 0x10],
                    },
                },
            },
        }
    }

    #[test]
    fn mp4a_entry() {
        let buf = encode(&mp4a());
        assert_eq!(&buf[4..8], b"mp4a");
        assert_eq!(&buf[8..16], b"\0\0\0\0\0\0\0\x01");
        assert_eq!(&buf[24..28], b"\0\x02\0\x10");
        assert_eq!(&buf[32..36], b"\xac\x44\0\0");
        assert_eq!(&buf[40..44], b"esds");
        assert_eq!(buf.len(), 36 + 12 + 5 + 32 + 2);
    }

    #[test]
    fn alac_entry_keeps_cookie() {
        let cookie = (0u8..24).collect::<Vec<_>>();
        let alac = AudioSampleEntry {
            data_reference_index: 1,
            channel_count: 2,
            sample_size: 16,
            sample_rate: U16F16::from_num(44100),
            config: AlacSpecificBox {
                cookie: cookie.clone(),
            },
        };
        let buf = encode(&alac);
        assert_eq!(&buf[4..8], b"alac");
        assert_eq!(&buf[40..48], b"alac\0\0\0\0");
        assert_eq!(buf[48..], cookie[..]);
    }

    #[test]
    fn roll_group_boxes() {
        let sbgp = encode_full(&SampleToGroupBox::roll(0x1234));
        assert_eq!(
            sbgp,
            b"\0\0\0\x1csbgp\0\0\0\0roll\0\0\0\x01\0\0\x12\x34\0\0\0\x01"
        );
        let sgpd = encode_full(&SampleGroupDescriptionBox::roll(-1));
        assert_eq!(sgpd, b"\0\0\0\x16sgpd\0\0\0\0roll\0\0\0\x01\xff\xff");
    }

    #[test]
    fn sample_size_list() {
        let stsz = SampleSizeBox {
            sample_sizes: vec![10, 20],
        };
        assert_eq!(
            encode_full(&stsz),
            b"\0\0\0\x1cstsz\0\0\0\0\0\0\0\0\0\0\0\x02\0\0\0\x0a\0\0\0\x14"
        );
    }

    #[test]
    fn chunk_offset_width() {
        let mut buf = Vec::new();
        let stco = ChunkOffsets::Stco(ChunkOffsetBox {
            chunk_offsets: vec![48],
        });
        stco.write_to(&mut buf).unwrap();
        assert_eq!(buf, b"\0\0\0\x14stco\0\0\0\0\0\0\0\x01\0\0\0\x30");
        assert_eq!(stco.size(), 20);

        buf.clear();
        let co64 = ChunkOffsets::Co64(ChunkLargeOffsetBox {
            chunk_offsets: vec![u32::MAX as u64 + 1],
        });
        co64.write_to(&mut buf).unwrap();
        assert_eq!(&buf[4..8], b"co64");
        assert_eq!(buf[16..], (u32::MAX as u64 + 1).to_be_bytes());
        assert_eq!(co64.size(), 24);
        assert!(co64.is_large());
    }
}
