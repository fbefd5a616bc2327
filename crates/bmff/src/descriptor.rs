//! MPEG-4 Systems object descriptors (ISO/IEC 14496-1 §7.2) as carried in
//! an `esds` box.
//!
//! Descriptor headers always use the 5-byte form: a tag byte followed by a
//! 4-byte base-128 size with the continuation bit set on the first three
//! bytes, even when the size would fit in fewer bytes. Sizes are therefore
//! limited to 28 bits.

use std::io::{self, prelude::*};

/// Encoded size of a descriptor header.
pub const HEADER_SIZE: u64 = 5;

pub const ES_DESCRIPTOR_TAG: u8 = 0x03;
pub const DECODER_CONFIG_DESCRIPTOR_TAG: u8 = 0x04;
pub const DECODER_SPECIFIC_INFO_TAG: u8 = 0x05;
pub const SL_CONFIG_DESCRIPTOR_TAG: u8 = 0x06;

/// objectTypeIndication for ISO/IEC 14496-3 audio.
pub const OBJECT_TYPE_AUDIO_ISO_14496_3: u8 = 0x40;
/// streamType 0x05 (audio) shifted into place, upStream 0, reserved 1.
pub const STREAM_TYPE_AUDIO: u8 = 0x15;

/// Encodes a descriptor header for a payload of `size` bytes.
pub fn encode_header(tag: u8, size: u32) -> [u8; 5] {
    [
        tag,
        ((size >> 21) & 0x7f) as u8 | 0x80,
        ((size >> 14) & 0x7f) as u8 | 0x80,
        ((size >> 7) & 0x7f) as u8 | 0x80,
        (size & 0x7f) as u8,
    ]
}

pub fn write_header(mut w: impl Write, tag: u8, size: u32) -> io::Result<()> {
    w.write_all(&encode_header(tag, size))
}

/// `DecoderConfigDescriptor` with a nested `DecoderSpecificInfo`.
#[derive(Debug, Clone, Default)]
pub struct DecoderConfigDescriptor {
    /// Largest access unit, in bytes. Only the low 24 bits are stored.
    pub buffer_size_db: u32,
    pub max_bitrate: u32,
    /// Zero for variable bitrate streams.
    pub avg_bitrate: u32,
    pub decoder_specific_info: Vec<u8>,
}

impl DecoderConfigDescriptor {
    fn payload_size(&self) -> u64 {
        1 + 1 + 3 + 4 + 4 + HEADER_SIZE + self.decoder_specific_info.len() as u64
    }

    /// Size including the descriptor header.
    pub fn size(&self) -> u64 {
        HEADER_SIZE + self.payload_size()
    }

    pub fn write_to(&self, mut w: impl Write) -> io::Result<()> {
        write_header(&mut w, DECODER_CONFIG_DESCRIPTOR_TAG, self.payload_size() as u32)?;
        w.write_all(&[OBJECT_TYPE_AUDIO_ISO_14496_3, STREAM_TYPE_AUDIO])?;
        w.write_all(&self.buffer_size_db.to_be_bytes()[1..])?;
        w.write_all(&self.max_bitrate.to_be_bytes())?;
        w.write_all(&self.avg_bitrate.to_be_bytes())?;
        write_header(
            &mut w,
            DECODER_SPECIFIC_INFO_TAG,
            self.decoder_specific_info.len() as u32,
        )?;
        w.write_all(&self.decoder_specific_info)?;
        Ok(())
    }
}

/// `ES_Descriptor` with ES_ID 0, no optional fields, the decoder
/// configuration, and the predefined MP4 `SLConfigDescriptor`.
#[derive(Debug, Clone, Default)]
pub struct EsDescriptor {
    pub decoder_config: DecoderConfigDescriptor,
}

impl EsDescriptor {
    fn payload_size(&self) -> u64 {
        // ES_ID + flags, then SLConfigDescriptor (header + predefined byte)
        3 + self.decoder_config.size() + HEADER_SIZE + 1
    }

    pub fn size(&self) -> u64 {
        HEADER_SIZE + self.payload_size()
    }

    pub fn write_to(&self, mut w: impl Write) -> io::Result<()> {
        write_header(&mut w, ES_DESCRIPTOR_TAG, self.payload_size() as u32)?;
        w.write_all(&[0; 3])?;
        self.decoder_config.write_to(&mut w)?;
        write_header(&mut w, SL_CONFIG_DESCRIPTOR_TAG, 1)?;
        w.write_all(&[0x02])?;
        Ok(())
    }
}
