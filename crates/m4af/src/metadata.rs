//! The iTunes metadata (`ilst`) table.
//!
//! Tags are kept in insertion order. Adding a tag whose four-character code
//! (or, for free-form tags, whose name) is already present replaces the
//! earlier value in place; artwork is the exception and always appends, so a
//! file may carry several cover images.

use crate::{Error, Result};
use bmff::{DataBox, ItemListBox, MetadataItem, NameBox};

/// A four-character code.
pub type FourCc = [u8; 4];

/// Well-known item codes.
pub mod tag {
    use super::FourCc;

    /// Track title.
    pub const TITLE: FourCc = *b"\xa9nam";
    /// Track artist.
    pub const ARTIST: FourCc = *b"\xa9ART";
    /// Album title.
    pub const ALBUM: FourCc = *b"\xa9alb";
    /// Free-text genre.
    pub const GENRE: FourCc = *b"\xa9gen";
    /// Release date or year.
    pub const DATE: FourCc = *b"\xa9day";
    /// Composer.
    pub const COMPOSER: FourCc = *b"\xa9wrt";
    /// Grouping.
    pub const GROUPING: FourCc = *b"\xa9grp";
    /// Comment.
    pub const COMMENT: FourCc = *b"\xa9cmt";
    /// Lyrics.
    pub const LYRICS: FourCc = *b"\xa9lyr";
    /// Encoding tool.
    pub const TOOL: FourCc = *b"\xa9too";
    /// Album artist.
    pub const ALBUM_ARTIST: FourCc = *b"aART";
    /// Track number and total, packed.
    pub const TRACK: FourCc = *b"trkn";
    /// Disc number and total, packed.
    pub const DISC: FourCc = *b"disk";
    /// ID3v1 genre index plus one.
    pub const GENRE_ID3: FourCc = *b"gnre";
    /// Beats per minute.
    pub const TEMPO: FourCc = *b"tmpo";
    /// Short description.
    pub const DESCRIPTION: FourCc = *b"desc";
    /// Long description.
    pub const LONG_DESCRIPTION: FourCc = *b"ldes";
    /// Copyright notice.
    pub const COPYRIGHT: FourCc = *b"cprt";
    /// Part of a compilation.
    pub const COMPILATION: FourCc = *b"cpil";
    /// Cover art.
    pub const ARTWORK: FourCc = *b"covr";
    /// Sort order of the album artist.
    pub const ALBUM_ARTIST_SORT: FourCc = *b"soaa";
    /// Sort order of the album.
    pub const ALBUM_SORT: FourCc = *b"soal";
    /// Sort order of the artist.
    pub const ARTIST_SORT: FourCc = *b"soar";
    /// Sort order of the composer.
    pub const COMPOSER_SORT: FourCc = *b"soco";
    /// Sort order of the title.
    pub const TITLE_SORT: FourCc = *b"sonm";
    /// Free-form item, identified by name.
    pub const FREE_FORM: FourCc = *b"----";
}

/// Name-table code for a track total given on its own. It is never written:
/// [`tag_from_text`] turns it into a [`Tag::Track`] without a number, which
/// [`merge_numbering`] folds into the track number.
pub const TRACK_TOTAL: FourCc = *b"\0trt";
/// Name-table code for a disc total given on its own. See [`TRACK_TOTAL`].
pub const DISC_TOTAL: FourCc = *b"\0dst";

/// Well-known `data` box type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TypeCode {
    /// Layout defined by the item code.
    Implicit = 0,
    /// UTF-8 text without terminator.
    Utf8 = 1,
    /// GIF image.
    Gif = 12,
    /// JPEG image.
    Jpeg = 13,
    /// PNG image.
    Png = 14,
    /// Big-endian signed integer of 1, 2, 4 or 8 bytes.
    Integer = 21,
}

/// What an entry is keyed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagId {
    /// A reserved four-character code.
    FourCc(FourCc),
    /// A `----` item with this name, in the `com.apple.iTunes` namespace.
    FreeForm(String),
}

/// An encoded `ilst` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    /// Key of the entry.
    pub id: TagId,
    /// Type of `data`.
    pub type_code: TypeCode,
    /// Payload bytes.
    pub data: Vec<u8>,
}

/// A tag value, before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag<'a> {
    /// UTF-8 text.
    String(FourCc, &'a str),
    /// 8-bit integer.
    Int8(FourCc, u8),
    /// 16-bit integer.
    Int16(FourCc, u16),
    /// 32-bit integer.
    Int32(FourCc, u32),
    /// 64-bit integer.
    Int64(FourCc, u64),
    /// Track number and total.
    Track {
        /// Track number.
        number: u16,
        /// Track count, zero if unknown.
        total: u16,
    },
    /// Disc number and total.
    Disc {
        /// Disc number.
        number: u16,
        /// Disc count, zero if unknown.
        total: u16,
    },
    /// ID3v1 genre index plus one.
    Genre(u16),
    /// A GIF, JPEG or PNG image. The format is detected from its signature.
    Artwork(&'a [u8]),
    /// A named free-form text item.
    FreeForm {
        /// Item name, such as `iTunSMPB`.
        name: &'a str,
        /// Text value.
        value: &'a str,
    },
    /// Any other item with an explicit type.
    Raw {
        /// Item code.
        fcc: FourCc,
        /// Payload type.
        type_code: TypeCode,
        /// Payload.
        data: &'a [u8],
    },
}

fn image_type(data: &[u8]) -> Option<TypeCode> {
    if data.starts_with(b"GIF8") {
        Some(TypeCode::Gif)
    } else if data.starts_with(b"\xff\xd8\xff") {
        Some(TypeCode::Jpeg)
    } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(TypeCode::Png)
    } else {
        None
    }
}

fn short_code(fcc: FourCc) -> Result<TagId> {
    if fcc == tag::FREE_FORM {
        return Err(Error::Unsupported("free-form items need a name".to_string()));
    }
    if fcc == TRACK_TOTAL || fcc == DISC_TOTAL {
        return Err(Error::Unsupported(
            "a bare total must be merged into trkn or disk".to_string(),
        ));
    }
    Ok(TagId::FourCc(fcc))
}

impl Tag<'_> {
    /// Encodes the tag. Returns `None` for tags with an empty value, which
    /// are not stored.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for artwork in an unknown format, or a
    /// short tag using the free-form code.
    pub fn encode(&self) -> Result<Option<MetadataEntry>> {
        let (id, type_code, data) = match *self {
            Self::String(fcc, value) => {
                (short_code(fcc)?, TypeCode::Utf8, value.as_bytes().to_vec())
            }
            Self::Int8(fcc, value) => (short_code(fcc)?, TypeCode::Integer, vec![value]),
            Self::Int16(fcc, value) => {
                (short_code(fcc)?, TypeCode::Integer, value.to_be_bytes().to_vec())
            }
            Self::Int32(fcc, value) => {
                (short_code(fcc)?, TypeCode::Integer, value.to_be_bytes().to_vec())
            }
            Self::Int64(fcc, value) => {
                (short_code(fcc)?, TypeCode::Integer, value.to_be_bytes().to_vec())
            }
            Self::Track { number, total } => {
                let data = [0, number, total, 0]
                    .iter()
                    .flat_map(|x| x.to_be_bytes())
                    .collect::<Vec<u8>>();
                (TagId::FourCc(tag::TRACK), TypeCode::Implicit, data)
            }
            Self::Disc { number, total } => {
                let data = [0, number, total]
                    .iter()
                    .flat_map(|x| x.to_be_bytes())
                    .collect::<Vec<u8>>();
                (TagId::FourCc(tag::DISC), TypeCode::Implicit, data)
            }
            Self::Genre(index) => (
                TagId::FourCc(tag::GENRE_ID3),
                TypeCode::Implicit,
                index.to_be_bytes().to_vec(),
            ),
            Self::Artwork(image) => {
                if image.is_empty() {
                    return Ok(None);
                }
                let type_code = image_type(image).ok_or_else(|| {
                    Error::Unsupported("artwork is not a GIF, JPEG or PNG image".to_string())
                })?;
                (TagId::FourCc(tag::ARTWORK), type_code, image.to_vec())
            }
            Self::FreeForm { name, value } => {
                if name.is_empty() {
                    return Ok(None);
                }
                (
                    TagId::FreeForm(name.to_string()),
                    TypeCode::Utf8,
                    value.as_bytes().to_vec(),
                )
            }
            Self::Raw {
                fcc,
                type_code,
                data,
            } => (short_code(fcc)?, type_code, data.to_vec()),
        };
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(MetadataEntry {
            id,
            type_code,
            data,
        }))
    }
}

/// Insertion-ordered tag storage.
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    entries: Vec<MetadataEntry>,
}

impl MetadataTable {
    /// Encodes and stores a tag.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] if the tag is invalid (see [`Tag::encode`]) or
    /// [`Error::OutOfMemory`] if the table cannot grow.
    pub fn add(&mut self, tag: Tag<'_>) -> Result<()> {
        match tag.encode()? {
            Some(entry) => self.insert(entry),
            None => Ok(()),
        }
    }

    /// Stores an encoded entry, replacing an entry with the same key unless
    /// it is artwork.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the table cannot grow.
    pub fn insert(&mut self, entry: MetadataEntry) -> Result<()> {
        if entry.id != TagId::FourCc(tag::ARTWORK) {
            if let Some(slot) = self.entries.iter_mut().find(|e| e.id == entry.id) {
                *slot = entry;
                return Ok(());
            }
        }
        self.entries
            .try_reserve(1)
            .map_err(|_| Error::OutOfMemory)?;
        self.entries.push(entry);
        Ok(())
    }

    /// First entry with this key.
    pub fn get(&self, id: &TagId) -> Option<&MetadataEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// Entries in insertion order.
    pub fn as_slice(&self) -> &[MetadataEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `ilst` box for the table.
    pub fn item_list(&self) -> ItemListBox {
        let items = self
            .entries
            .iter()
            .map(|entry| {
                let data = DataBox {
                    type_code: entry.type_code as u32,
                    locale: 0,
                    payload: entry.data.clone(),
                };
                match &entry.id {
                    TagId::FourCc(fcc) => MetadataItem::Data { fcc: *fcc, data },
                    TagId::FreeForm(name) => MetadataItem::FreeForm {
                        name: NameBox { name: name.clone() },
                        data,
                    },
                }
            })
            .collect();
        ItemListBox { items }
    }
}

/// Name of the legacy gapless tag.
pub const ITUNSMPB: &str = "iTunSMPB";

/// Formats an `iTunSMPB` value: priming, padding and the number of valid
/// samples, in fixed-width hexadecimal.
pub fn itunsmpb(delay: u32, padding: u32, length: u64) -> String {
    format!(
        " 00000000 {delay:08X} {padding:08X} {length:016X} \
         00000000 00000000 00000000 00000000 00000000 00000000 00000000 00000000"
    )
}

/// Looks up the item code for a generic tag name such as `title`,
/// `Album Artist` or `TRACKNUMBER`. Case, spaces, `-` and `_` are ignored.
pub fn tag_from_name(name: &str) -> Option<FourCc> {
    let key = name
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .to_lowercase();
    let fcc = match key.as_str() {
        "album" => tag::ALBUM,
        "albumartist" | "band" => tag::ALBUM_ARTIST,
        "albumartistsort" | "albumartistsortorder" => tag::ALBUM_ARTIST_SORT,
        "albumsort" | "albumsortorder" => tag::ALBUM_SORT,
        "artist" => tag::ARTIST,
        "artistsort" | "artistsortorder" => tag::ARTIST_SORT,
        "bpm" | "tempo" => tag::TEMPO,
        "comment" => tag::COMMENT,
        "compilation" | "itunescompilation" => tag::COMPILATION,
        "composer" => tag::COMPOSER,
        "composersort" | "composersortorder" => tag::COMPOSER_SORT,
        "contentgroup" | "grouping" => tag::GROUPING,
        "copyright" => tag::COPYRIGHT,
        "date" | "recordeddate" | "year" => tag::DATE,
        "description" => tag::DESCRIPTION,
        "disc" | "discnumber" | "disk" => tag::DISC,
        "disctotal" | "totaldiscs" => DISC_TOTAL,
        "genre" => tag::GENRE,
        "lyrics" | "unsyncedlyrics" => tag::LYRICS,
        "title" => tag::TITLE,
        "titlesort" | "titlesortorder" => tag::TITLE_SORT,
        "track" | "tracknumber" => tag::TRACK,
        "tracktotal" | "totaltracks" => TRACK_TOTAL,
        "encodedby" | "encoder" | "tool" => tag::TOOL,
        _ => return None,
    };
    Some(fcc)
}

fn parse_pair(value: &str) -> Option<(u16, u16)> {
    let (number, total) = value.split_once('/').unwrap_or((value, "0"));
    Some((number.trim().parse().ok()?, total.trim().parse().ok()?))
}

fn parse_number<T: std::str::FromStr>(fcc: FourCc, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Unsupported(format!(
            "{} expects a number, got {:?}",
            String::from_utf8_lossy(&fcc),
            value
        ))
    })
}

/// Interprets a textual value for the item `fcc`, choosing the encoding the
/// item requires: `n` or `n/total` for track and disc, a bare total for
/// [`TRACK_TOTAL`] and [`DISC_TOTAL`], integers for tempo, genre index and
/// flags, text otherwise.
///
/// # Errors
///
/// [`Error::Unsupported`] if a numeric item gets a non-numeric value.
pub fn tag_from_text(fcc: FourCc, value: &str) -> Result<Tag<'_>> {
    if fcc == TRACK_TOTAL {
        let total = parse_number(tag::TRACK, value)?;
        return Ok(Tag::Track { number: 0, total });
    }
    if fcc == DISC_TOTAL {
        let total = parse_number(tag::DISC, value)?;
        return Ok(Tag::Disc { number: 0, total });
    }
    let tag = match &fcc {
        b"trkn" | b"disk" => {
            let (number, total) = parse_pair(value).ok_or_else(|| {
                Error::Unsupported(format!("expected `n` or `n/total`, got {value:?}"))
            })?;
            if fcc == tag::TRACK {
                Tag::Track { number, total }
            } else {
                Tag::Disc { number, total }
            }
        }
        b"gnre" => Tag::Genre(parse_number(fcc, value)?),
        b"tmpo" => Tag::Int16(fcc, parse_number(fcc, value)?),
        b"cpil" | b"akID" | b"hdvd" | b"pcst" | b"pgap" | b"rtng" | b"stik" => {
            Tag::Int8(fcc, parse_number(fcc, value)?)
        }
        b"atID" | b"cmID" | b"cnID" | b"geID" | b"sfID" | b"tvsn" | b"tvss" => {
            Tag::Int32(fcc, parse_number(fcc, value)?)
        }
        b"plID" => Tag::Int64(fcc, parse_number(fcc, value)?),
        _ => Tag::String(fcc, value),
    };
    Ok(tag)
}

/// Folds all [`Tag::Track`] tags into one, and all [`Tag::Disc`] tags into
/// one, kept where the first of each appeared. A later nonzero number or
/// total replaces an earlier one, so `3` and a separate total of `12` give
/// `3/12`.
pub fn merge_numbering<'a>(tags: impl IntoIterator<Item = Tag<'a>>) -> Vec<Tag<'a>> {
    let mut merged: Vec<Tag<'a>> = Vec::new();
    for tag in tags {
        let (n, t) = match tag {
            Tag::Track { number, total } | Tag::Disc { number, total } => (number, total),
            _ => {
                merged.push(tag);
                continue;
            }
        };
        let kind = std::mem::discriminant(&tag);
        let Some(pos) = merged.iter().position(|m| std::mem::discriminant(m) == kind) else {
            merged.push(tag);
            continue;
        };
        if let Tag::Track { number, total } | Tag::Disc { number, total } = &mut merged[pos] {
            if n != 0 {
                *number = n;
            }
            if t != 0 {
                *total = t;
            }
        }
    }
    merged
}
