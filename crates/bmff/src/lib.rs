//! Low-level definitions for the ISO Base Media File Format boxes needed to
//! describe a single audio track with optional iTunes-style metadata.
//!
//! Every box is a plain struct. [`BmffBox::size`] reports the full encoded
//! size (header included) without serializing anything, and
//! [`write_to`]/[`write_to_full`] emit the header followed by the payload.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::dbg_macro)]

pub mod descriptor;
mod ilst;
mod moov;
mod stbl;

pub use ilst::*;
pub use moov::*;
pub use stbl::*;

use chrono::{DateTime, Utc};
use std::io::{self, prelude::*};

/// Seconds between 1904-01-01 (the MP4 epoch) and the Unix epoch.
pub const MP4_EPOCH_OFFSET: i64 = ((1970 - 1904) * 365 + 17) * 24 * 60 * 60;

/// Converts a wall-clock time into seconds since 1904-01-01.
pub fn mp4_time(time: DateTime<Utc>) -> u64 {
    (time.timestamp() + MP4_EPOCH_OFFSET).max(0) as u64
}

pub trait BmffBox {
    const TYPE: [u8; 4];
    const EXTENDED_TYPE: Option<[u8; 16]> = None;
    fn size(&self) -> u64;
    fn write_box(&self, writer: impl Write) -> io::Result<()>;
}

pub trait FullBox: BmffBox {
    fn version(&self) -> u8;
    #[inline]
    fn flags(&self) -> [u8; 3] {
        [0; 3]
    }
}

pub trait WriteTo {
    fn write_to(&self, writer: impl Write) -> io::Result<()>;
}

/// Writes a box header for a box of `size` bytes (32-bit header included).
///
/// Sizes that do not fit in 32 bits switch to the extended form, which is
/// 8 bytes longer.
pub fn write_header(mut w: impl Write, box_type: [u8; 4], size: u64) -> io::Result<()> {
    if u32::try_from(size).is_ok() {
        w.write_all(&(size as u32).to_be_bytes())?;
        w.write_all(&box_type)?;
    } else {
        w.write_all(&1u32.to_be_bytes())?;
        w.write_all(&box_type)?;
        w.write_all(&(size + 8).to_be_bytes())?;
    }
    Ok(())
}

pub fn write_to<T: BmffBox>(bmff_box: &T, mut w: impl Write) -> io::Result<()> {
    write_header(&mut w, T::TYPE, bmff_box.size())?;
    if let Some(ext_type) = T::EXTENDED_TYPE {
        w.write_all(&ext_type)?;
    }
    bmff_box.write_box(&mut w)?;
    Ok(())
}

pub fn write_to_full<T: FullBox>(bmff_box: &T, mut w: impl Write) -> io::Result<()> {
    write_header(&mut w, T::TYPE, bmff_box.size())?;
    if let Some(ext_type) = T::EXTENDED_TYPE {
        w.write_all(&ext_type)?;
    }
    w.write_all(&[bmff_box.version()])?;
    w.write_all(&bmff_box.flags())?;
    bmff_box.write_box(&mut w)?;
    Ok(())
}

/// `true` when any of the values needs a version 1 (64-bit) field layout.
#[inline]
pub(crate) fn needs_wide_fields(values: &[u64]) -> bool {
    values.iter().any(|&x| x > u32::MAX as u64)
}

#[inline]
pub(crate) fn flag_bytes(bits: u32) -> [u8; 3] {
    let flags = bits.to_be_bytes();
    [flags[1], flags[2], flags[3]]
}

#[cfg(test)]
pub(crate) fn encode<T: BmffBox>(bmff_box: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    write_to(bmff_box, &mut buf).unwrap();
    assert_eq!(buf.len() as u64, bmff_box.size());
    buf
}

#[cfg(test)]
pub(crate) fn encode_full<T: FullBox>(bmff_box: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    write_to_full(bmff_box, &mut buf).unwrap();
    assert_eq!(buf.len() as u64, bmff_box.size());
    buf
}
