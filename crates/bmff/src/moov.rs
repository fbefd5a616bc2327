use crate::{flag_bytes, needs_wide_fields, write_header, write_to, write_to_full, BmffBox, FullBox, SampleTableBox, UserDataBox, WriteTo};
use bitflags::bitflags;
use fixed::types::{I16F16, I8F8};
use std::io::{self, prelude::*};

macro_rules! matrix {
    ( $( [ $($val:literal),* $(,)? ] ),* $(,)? ) => {
        [
            $([
                $( I16F16::from_bits($val), )*
            ],)*
        ]
    }
}

/// Identity transformation.
pub const MATRIX_0: [[I16F16; 3]; 3] = matrix![
    [0x0001_0000, 0x0000_0000, 0x0000_0000],
    [0x0000_0000, 0x0001_0000, 0x0000_0000],
    [0x0000_0000, 0x0000_0000, 0x4000_0000],
];

fn write_matrix(mut w: impl Write, matrix: &[[I16F16; 3]; 3]) -> io::Result<()> {
    for row in matrix {
        for value in row {
            w.write_all(&value.to_be_bytes())?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct FileTypeBox {
    pub major_brand: [u8; 4],
    pub minor_version: u32,
    pub compatible_brands: Vec<[u8; 4]>,
}

impl FileTypeBox {
    /// The `M4A ` header written at the start of every file. The trailing
    /// zero brand pads the box to 32 bytes.
    pub fn m4a() -> Self {
        Self {
            major_brand: *b"M4A ",
            minor_version: 0,
            compatible_brands: vec![*b"M4A ", *b"mp42", *b"isom", [0; 4]],
        }
    }
}

impl BmffBox for FileTypeBox {
    const TYPE: [u8; 4] = *b"ftyp";

    #[inline]
    fn size(&self) -> u64 {
        8 + 4 + 4 + self.compatible_brands.len() as u64 * 4
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&self.major_brand)?;
        w.write_all(&self.minor_version.to_be_bytes())?;
        for i in &self.compatible_brands {
            w.write_all(i)?;
        }
        Ok(())
    }
}

/// A `free` box of `size` bytes, header included. The payload is zeroed.
#[derive(Debug, Clone, Copy)]
pub struct FreeSpaceBox {
    pub size: u64,
}

impl BmffBox for FreeSpaceBox {
    const TYPE: [u8; 4] = *b"free";

    #[inline]
    fn size(&self) -> u64 {
        self.size.max(8)
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        io::copy(&mut io::repeat(0).take(self.size() - 8), &mut w)?;
        Ok(())
    }
}

/// The header of a `mdat` box holding `data_size` payload bytes.
///
/// Payloads too large for a 32-bit size use the 16-byte extended header.
#[derive(Debug, Clone, Copy)]
pub struct MediaDataHeader {
    pub data_size: u64,
}

impl MediaDataHeader {
    #[inline]
    pub fn is_large(&self) -> bool {
        self.data_size + 8 > u32::MAX as u64
    }

    #[inline]
    pub fn header_size(&self) -> u64 {
        if self.is_large() {
            16
        } else {
            8
        }
    }
}

impl WriteTo for MediaDataHeader {
    fn write_to(&self, w: impl Write) -> io::Result<()> {
        // `write_header` switches to the extended form once the 8-byte
        // variant overflows.
        write_header(w, *b"mdat", self.data_size + 8)
    }
}

#[derive(Debug, Clone)]
pub struct MovieBox {
    pub mvhd: MovieHeaderBox,
    pub trak: Vec<TrackBox>,
    pub udta: Option<UserDataBox>,
}

impl BmffBox for MovieBox {
    const TYPE: [u8; 4] = *b"moov";

    #[inline]
    fn size(&self) -> u64 {
        8 + self.mvhd.size()
            + self.trak.iter().map(BmffBox::size).sum::<u64>()
            + self.udta.as_ref().map_or(0, BmffBox::size)
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        write_to_full(&self.mvhd, &mut w)?;
        for trak in &self.trak {
            write_to(trak, &mut w)?;
        }
        if let Some(udta) = &self.udta {
            write_to(udta, &mut w)?;
        }
        Ok(())
    }
}

/// Times are seconds since 1904-01-01, see [`crate::mp4_time`].
#[derive(Debug, Clone)]
pub struct MovieHeaderBox {
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub rate: I16F16,
    pub volume: I8F8,
    pub matrix: [[I16F16; 3]; 3],
    pub next_track_id: u32,
}

impl BmffBox for MovieHeaderBox {
    const TYPE: [u8; 4] = *b"mvhd";

    #[inline]
    fn size(&self) -> u64 {
        12 + (if self.version() == 1 {
            8 + 8 + 4 + 8
        } else {
            4 + 4 + 4 + 4
        }) + 4
            + 2
            + 2
            + 4 * 2
            + 4 * 9
            + 4 * 6
            + 4
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        if self.version() == 1 {
            w.write_all(&self.creation_time.to_be_bytes())?;
            w.write_all(&self.modification_time.to_be_bytes())?;
            w.write_all(&self.timescale.to_be_bytes())?;
            w.write_all(&self.duration.to_be_bytes())?;
        } else {
            w.write_all(&(self.creation_time as u32).to_be_bytes())?;
            w.write_all(&(self.modification_time as u32).to_be_bytes())?;
            w.write_all(&self.timescale.to_be_bytes())?;
            w.write_all(&(self.duration as u32).to_be_bytes())?;
        }
        w.write_all(&self.rate.to_be_bytes())?;
        w.write_all(&self.volume.to_be_bytes())?;
        w.write_all(&0u16.to_be_bytes())?;
        w.write_all(&[0u32.to_be_bytes(); 2].concat())?;
        write_matrix(&mut w, &self.matrix)?;
        w.write_all(&[0u32.to_be_bytes(); 6].concat())?;
        w.write_all(&self.next_track_id.to_be_bytes())?;
        Ok(())
    }
}

impl FullBox for MovieHeaderBox {
    #[inline]
    fn version(&self) -> u8 {
        u8::from(needs_wide_fields(&[
            self.creation_time,
            self.modification_time,
            self.duration,
        ]))
    }
}

#[derive(Debug, Clone)]
pub struct TrackBox {
    pub tkhd: TrackHeaderBox,
    pub edts: Option<EditBox>,
    pub mdia: MediaBox,
}

impl BmffBox for TrackBox {
    const TYPE: [u8; 4] = *b"trak";

    #[inline]
    fn size(&self) -> u64 {
        8 + self.tkhd.size() + self.edts.as_ref().map_or(0, BmffBox::size) + self.mdia.size()
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        write_to_full(&self.tkhd, &mut w)?;
        if let Some(edts) = &self.edts {
            write_to(edts, &mut w)?;
        }
        write_to(&self.mdia, &mut w)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TrackHeaderBox {
    pub flags: TrackHeaderFlags,
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    /// In the movie timescale.
    pub duration: u64,
    pub volume: I8F8,
    pub matrix: [[I16F16; 3]; 3],
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TrackHeaderFlags: u32 {
        const TRACK_ENABLED = 0x00_0001;
        const TRACK_IN_MOVIE = 0x00_0002;
        const TRACK_IN_PREVIEW = 0x00_0004;
    }
}

impl BmffBox for TrackHeaderBox {
    const TYPE: [u8; 4] = *b"tkhd";

    #[inline]
    fn size(&self) -> u64 {
        12 + (if self.version() == 1 {
            8 + 8 + 4 + 4 + 8
        } else {
            4 + 4 + 4 + 4 + 4
        }) + 4 * 2
            + 2
            + 2
            + 2
            + 2
            + 4 * 9
            + 4
            + 4
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        if self.version() == 1 {
            w.write_all(&self.creation_time.to_be_bytes())?;
            w.write_all(&self.modification_time.to_be_bytes())?;
            w.write_all(&self.track_id.to_be_bytes())?;
            w.write_all(&0u32.to_be_bytes())?;
            w.write_all(&self.duration.to_be_bytes())?;
        } else {
            w.write_all(&(self.creation_time as u32).to_be_bytes())?;
            w.write_all(&(self.modification_time as u32).to_be_bytes())?;
            w.write_all(&self.track_id.to_be_bytes())?;
            w.write_all(&0u32.to_be_bytes())?;
            w.write_all(&(self.duration as u32).to_be_bytes())?;
        }
        w.write_all(&[0u32.to_be_bytes(); 2].concat())?;
        // layer, alternate_group
        w.write_all(&[0u16.to_be_bytes(); 2].concat())?;
        w.write_all(&self.volume.to_be_bytes())?;
        w.write_all(&0u16.to_be_bytes())?;
        write_matrix(&mut w, &self.matrix)?;
        // width, height
        w.write_all(&[0u32.to_be_bytes(); 2].concat())?;
        Ok(())
    }
}

impl FullBox for TrackHeaderBox {
    #[inline]
    fn version(&self) -> u8 {
        u8::from(needs_wide_fields(&[
            self.creation_time,
            self.modification_time,
            self.duration,
        ]))
    }

    fn flags(&self) -> [u8; 3] {
        flag_bytes(self.flags.bits())
    }
}

#[derive(Debug, Clone)]
pub struct EditBox {
    pub elst: EditListBox,
}

impl BmffBox for EditBox {
    const TYPE: [u8; 4] = *b"edts";

    #[inline]
    fn size(&self) -> u64 {
        8 + self.elst.size()
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        write_to_full(&self.elst, &mut w)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EditListBox {
    /// `(segment_duration, media_time)`
    pub entries: Vec<(u64, i64)>,
    pub media_rate_integer: i16,
    pub media_rate_fraction: i16,
}

impl EditListBox {
    fn wide(&self) -> bool {
        self.entries.iter().any(|&(duration, media_time)| {
            duration > u32::MAX as u64 || i32::try_from(media_time).is_err()
        })
    }
}

impl BmffBox for EditListBox {
    const TYPE: [u8; 4] = *b"elst";

    #[inline]
    fn size(&self) -> u64 {
        let entry_size = if self.wide() { 8 * 2 } else { 4 * 2 };
        12 + 4 + self.entries.len() as u64 * entry_size + 2 + 2
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        let wide = self.wide();
        w.write_all(&(self.entries.len() as u32).to_be_bytes())?;
        for &(segment_duration, media_time) in &self.entries {
            if wide {
                w.write_all(&segment_duration.to_be_bytes())?;
                w.write_all(&media_time.to_be_bytes())?;
            } else {
                w.write_all(&(segment_duration as u32).to_be_bytes())?;
                w.write_all(&(media_time as i32).to_be_bytes())?;
            }
        }
        w.write_all(&self.media_rate_integer.to_be_bytes())?;
        w.write_all(&self.media_rate_fraction.to_be_bytes())?;
        Ok(())
    }
}

impl FullBox for EditListBox {
    #[inline]
    fn version(&self) -> u8 {
        u8::from(self.wide())
    }
}

#[derive(Debug, Clone)]
pub struct MediaBox {
    pub mdhd: MediaHeaderBox,
    pub hdlr: HandlerBox,
    pub minf: MediaInformationBox,
}

impl BmffBox for MediaBox {
    const TYPE: [u8; 4] = *b"mdia";

    #[inline]
    fn size(&self) -> u64 {
        8 + self.mdhd.size() + self.hdlr.size() + self.minf.size()
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        write_to_full(&self.mdhd, &mut w)?;
        write_to_full(&self.hdlr, &mut w)?;
        write_to(&self.minf, &mut w)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MediaHeaderBox {
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    /// ISO-639-2/T code, lowercase.
    pub language: [u8; 3],
}

impl BmffBox for MediaHeaderBox {
    const TYPE: [u8; 4] = *b"mdhd";

    #[inline]
    fn size(&self) -> u64 {
        12 + (if self.version() == 1 {
            8 + 8 + 4 + 8
        } else {
            4 * 4
        }) + 2
            + 2
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        if self.version() == 1 {
            w.write_all(&self.creation_time.to_be_bytes())?;
            w.write_all(&self.modification_time.to_be_bytes())?;
            w.write_all(&self.timescale.to_be_bytes())?;
            w.write_all(&self.duration.to_be_bytes())?;
        } else {
            w.write_all(&(self.creation_time as u32).to_be_bytes())?;
            w.write_all(&(self.modification_time as u32).to_be_bytes())?;
            w.write_all(&self.timescale.to_be_bytes())?;
            w.write_all(&(self.duration as u32).to_be_bytes())?;
        }
        // 000aaaaa 000bbbbb 000ccccc
        //    |||||   //  \\\   |||||
        //    |||||  //    \\\  |||||
        //  0 xxxxx xx      xxx xxxxx
        let language = [
            (self.language[0] - 0x60) << 2 | (self.language[1] - 0x60) >> 3,
            (self.language[1] - 0x60) << 5 | (self.language[2] - 0x60),
        ];
        w.write_all(&language)?;
        w.write_all(&0u16.to_be_bytes())?;
        Ok(())
    }
}

impl FullBox for MediaHeaderBox {
    #[inline]
    fn version(&self) -> u8 {
        u8::from(needs_wide_fields(&[
            self.creation_time,
            self.modification_time,
            self.duration,
        ]))
    }
}

#[derive(Debug, Clone)]
pub struct HandlerBox {
    pub handler_type: HandlerType,
    /// Stored in the first reserved word. iTunes expects `appl` on the
    /// metadata handler.
    pub manufacturer: Option<[u8; 4]>,
    // a null-terminated UTF-8 string, so not a `CString`
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HandlerType {
    Audio = u32::from_be_bytes(*b"soun"),
    Text = u32::from_be_bytes(*b"text"),
    Metadata = u32::from_be_bytes(*b"mdir"),
}

impl HandlerBox {
    pub fn new(handler_type: HandlerType) -> Self {
        Self {
            handler_type,
            manufacturer: (handler_type == HandlerType::Metadata).then_some(*b"appl"),
            name: String::new(),
        }
    }
}

impl BmffBox for HandlerBox {
    const TYPE: [u8; 4] = *b"hdlr";

    #[inline]
    fn size(&self) -> u64 {
        12 + 4 + 4 + 4 * 3 + self.name.len() as u64 + 1
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&0u32.to_be_bytes())?;
        w.write_all(&(self.handler_type as u32).to_be_bytes())?;
        w.write_all(&self.manufacturer.unwrap_or([0; 4]))?;
        w.write_all(&[0u32.to_be_bytes(); 2].concat())?;
        w.write_all(self.name.as_bytes())?;
        w.write_all(&[0u8])?; // Null terminator
        Ok(())
    }
}

impl FullBox for HandlerBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

#[derive(Debug, Clone)]
pub struct MediaInformationBox {
    /// Absent for text tracks.
    pub smhd: Option<SoundMediaHeaderBox>,
    pub dinf: DataInformationBox,
    pub stbl: SampleTableBox,
}

impl BmffBox for MediaInformationBox {
    const TYPE: [u8; 4] = *b"minf";

    #[inline]
    fn size(&self) -> u64 {
        8 + self.smhd.as_ref().map_or(0, BmffBox::size) + self.dinf.size() + self.stbl.size()
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        if let Some(smhd) = &self.smhd {
            write_to_full(smhd, &mut w)?;
        }
        write_to(&self.dinf, &mut w)?;
        write_to(&self.stbl, &mut w)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SoundMediaHeaderBox {
    pub balance: I8F8,
}

impl BmffBox for SoundMediaHeaderBox {
    const TYPE: [u8; 4] = *b"smhd";

    #[inline]
    fn size(&self) -> u64 {
        12 + 2 + 2
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&self.balance.to_be_bytes())?;
        w.write_all(&0u16.to_be_bytes())?;
        Ok(())
    }
}

impl FullBox for SoundMediaHeaderBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

#[derive(Debug, Clone)]
pub struct DataInformationBox {
    pub dref: DataReferenceBox,
}

impl DataInformationBox {
    /// A single self-contained `url ` entry.
    pub fn self_contained() -> Self {
        Self {
            dref: DataReferenceBox {
                data_entries: vec![DataEntryUrlBox {
                    flags: DataEntryFlags::SELF_CONTAINED,
                    location: String::new(),
                }],
            },
        }
    }
}

impl BmffBox for DataInformationBox {
    const TYPE: [u8; 4] = *b"dinf";

    #[inline]
    fn size(&self) -> u64 {
        8 + self.dref.size()
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        write_to_full(&self.dref, &mut w)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DataReferenceBox {
    pub data_entries: Vec<DataEntryUrlBox>,
}

impl BmffBox for DataReferenceBox {
    const TYPE: [u8; 4] = *b"dref";

    #[inline]
    fn size(&self) -> u64 {
        12 + 4 + self.data_entries.iter().map(BmffBox::size).sum::<u64>()
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&(self.data_entries.len() as u32).to_be_bytes())?;
        for entry in &self.data_entries {
            write_to_full(entry, &mut w)?;
        }
        Ok(())
    }
}

impl FullBox for DataReferenceBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DataEntryFlags: u32 {
        /// Indicates that the media data is in the same file as the containing MovieBox.
        const SELF_CONTAINED = 0x00_0001;
    }
}

#[derive(Debug, Clone)]
pub struct DataEntryUrlBox {
    pub flags: DataEntryFlags,
    pub location: String,
}

impl BmffBox for DataEntryUrlBox {
    const TYPE: [u8; 4] = *b"url ";

    #[inline]
    fn size(&self) -> u64 {
        12 + if self.flags.contains(DataEntryFlags::SELF_CONTAINED) {
            0
        } else {
            self.location.len() as u64 + 1
        }
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        if !self.flags.contains(DataEntryFlags::SELF_CONTAINED) {
            w.write_all(self.location.as_bytes())?;
            w.write_all(&[0u8])?; // Null terminator
        }
        Ok(())
    }
}

impl FullBox for DataEntryUrlBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }

    #[inline]
    fn flags(&self) -> [u8; 3] {
        flag_bytes(self.flags.bits())
    }
}
