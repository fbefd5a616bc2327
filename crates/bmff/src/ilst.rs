//! iTunes-style metadata: `udta` > `meta` > (`hdlr`, `ilst`).

use crate::{flag_bytes, write_header, write_to, write_to_full, BmffBox, FullBox, HandlerBox, HandlerType, WriteTo};
use std::io::{self, prelude::*};

/// Meaning string of free-form (`----`) items.
pub const ITUNES_MEANING: &str = "com.apple.iTunes";

#[derive(Debug, Clone)]
pub struct UserDataBox {
    pub meta: MetaBox,
}

impl BmffBox for UserDataBox {
    const TYPE: [u8; 4] = *b"udta";

    #[inline]
    fn size(&self) -> u64 {
        8 + self.meta.size()
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        write_to_full(&self.meta, &mut w)
    }
}

#[derive(Debug, Clone)]
pub struct MetaBox {
    pub hdlr: HandlerBox,
    pub ilst: ItemListBox,
}

impl MetaBox {
    pub fn itunes(ilst: ItemListBox) -> Self {
        Self {
            hdlr: HandlerBox::new(HandlerType::Metadata),
            ilst,
        }
    }
}

impl BmffBox for MetaBox {
    const TYPE: [u8; 4] = *b"meta";

    #[inline]
    fn size(&self) -> u64 {
        12 + self.hdlr.size() + self.ilst.size()
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        write_to_full(&self.hdlr, &mut w)?;
        write_to(&self.ilst, &mut w)?;
        Ok(())
    }
}

impl FullBox for MetaBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ItemListBox {
    pub items: Vec<MetadataItem>,
}

impl BmffBox for ItemListBox {
    const TYPE: [u8; 4] = *b"ilst";

    #[inline]
    fn size(&self) -> u64 {
        8 + self.items.iter().map(MetadataItem::size).sum::<u64>()
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        for item in &self.items {
            item.write_to(&mut w)?;
        }
        Ok(())
    }
}

/// One `ilst` child. The box type is the item's four-character code, so it
/// cannot be a [`BmffBox`].
#[derive(Debug, Clone)]
pub enum MetadataItem {
    Data { fcc: [u8; 4], data: DataBox },
    /// A `----` item identified by name.
    FreeForm { name: NameBox, data: DataBox },
}

impl MetadataItem {
    pub fn fcc(&self) -> [u8; 4] {
        match self {
            Self::Data { fcc, .. } => *fcc,
            Self::FreeForm { .. } => *b"----",
        }
    }

    #[inline]
    pub fn size(&self) -> u64 {
        8 + match self {
            Self::Data { data, .. } => data.size(),
            Self::FreeForm { name, data } => MeaningBox.size() + name.size() + data.size(),
        }
    }
}

impl WriteTo for MetadataItem {
    fn write_to(&self, mut w: impl Write) -> io::Result<()> {
        write_header(&mut w, self.fcc(), self.size())?;
        match self {
            Self::Data { data, .. } => write_to_full(data, &mut w),
            Self::FreeForm { name, data } => {
                write_to_full(&MeaningBox, &mut w)?;
                write_to_full(name, &mut w)?;
                write_to_full(data, &mut w)
            }
        }
    }
}

/// The well-known type code travels in the flags field, after a zero
/// version (the type set indicator).
#[derive(Debug, Clone)]
pub struct DataBox {
    pub type_code: u32,
    pub locale: u32,
    pub payload: Vec<u8>,
}

impl BmffBox for DataBox {
    const TYPE: [u8; 4] = *b"data";

    #[inline]
    fn size(&self) -> u64 {
        12 + 4 + self.payload.len() as u64
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&self.locale.to_be_bytes())?;
        w.write_all(&self.payload)?;
        Ok(())
    }
}

impl FullBox for DataBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }

    #[inline]
    fn flags(&self) -> [u8; 3] {
        flag_bytes(self.type_code)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MeaningBox;

impl BmffBox for MeaningBox {
    const TYPE: [u8; 4] = *b"mean";

    #[inline]
    fn size(&self) -> u64 {
        12 + ITUNES_MEANING.len() as u64
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(ITUNES_MEANING.as_bytes())
    }
}

impl FullBox for MeaningBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}

/// Not null-terminated.
#[derive(Debug, Clone)]
pub struct NameBox {
    pub name: String,
}

impl BmffBox for NameBox {
    const TYPE: [u8; 4] = *b"name";

    #[inline]
    fn size(&self) -> u64 {
        12 + self.name.len() as u64
    }

    fn write_box(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(self.name.as_bytes())
    }
}

impl FullBox for NameBox {
    #[inline]
    fn version(&self) -> u8 {
        0
    }
}
