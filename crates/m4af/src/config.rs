//! Muxer configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The codec of a track's samples.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
#[repr(u32)]
pub enum Codec {
    /// MPEG-4 AAC, described by an `esds` box.
    Aac = u32::from_be_bytes(*b"mp4a"),
    /// Apple Lossless, described by its magic cookie.
    Alac = u32::from_be_bytes(*b"alac"),
    /// Timed text. Only accepted for a secondary track.
    Text = u32::from_be_bytes(*b"text"),
}

impl From<Codec> for [u8; 4] {
    fn from(codec: Codec) -> Self {
        (codec as u32).to_be_bytes()
    }
}

/// How encoder delay and padding are signaled to players.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq)]
pub enum GaplessMode {
    /// No gapless information is written.
    None,
    /// The `iTunSMPB` free-form tag understood by iTunes.
    #[default]
    Legacy,
    /// An edit list plus a `roll` sample group.
    Iso,
    /// Both of the above.
    Both,
}

impl GaplessMode {
    /// Whether the `iTunSMPB` tag is written.
    pub fn legacy(self) -> bool {
        matches!(self, Self::Legacy | Self::Both)
    }

    /// Whether an edit list and sample grouping are written.
    pub fn iso(self) -> bool {
        matches!(self, Self::Iso | Self::Both)
    }
}

impl std::str::FromStr for GaplessMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "legacy" => Ok(Self::Legacy),
            "iso" => Ok(Self::Iso),
            "both" => Ok(Self::Both),
            _ => Err(crate::Error::Unsupported(format!(
                "unknown gapless mode {s:?}, expected none, legacy, iso or both"
            ))),
        }
    }
}

/// Everything needed to create a [`Muxer`](crate::Muxer).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxerConfig {
    /// Codec of the primary track.
    pub codec: Codec,
    /// Timescale of the primary track, and of the movie.
    pub timescale: u32,
    /// Gapless signaling method.
    pub gapless: GaplessMode,
    /// Place the movie box before the media data on finalization.
    pub optimize: bool,
    /// Write zero creation and modification times.
    pub no_timestamp: bool,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            codec: Codec::Aac,
            timescale: 44100,
            gapless: GaplessMode::default(),
            optimize: false,
            no_timestamp: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gapless_mode_bits() {
        assert!(!GaplessMode::None.legacy() && !GaplessMode::None.iso());
        assert!(GaplessMode::Legacy.legacy() && !GaplessMode::Legacy.iso());
        assert!(!GaplessMode::Iso.legacy() && GaplessMode::Iso.iso());
        assert!(GaplessMode::Both.legacy() && GaplessMode::Both.iso());
    }

    #[test]
    fn gapless_mode_from_str() {
        assert_eq!("ISO".parse::<GaplessMode>().unwrap(), GaplessMode::Iso);
        assert_eq!("both".parse::<GaplessMode>().unwrap(), GaplessMode::Both);
        assert!("itunes".parse::<GaplessMode>().is_err());
    }

    #[test]
    fn codec_fourcc() {
        assert_eq!(<[u8; 4]>::from(Codec::Aac), *b"mp4a");
        assert_eq!(<[u8; 4]>::from(Codec::Alac), *b"alac");
    }
}
