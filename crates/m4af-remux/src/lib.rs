#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::dbg_macro)]

pub mod adts;
pub mod config;

use crate::{
    adts::{AdtsReader, FRAME_LENGTH},
    config::Settings,
};
use anyhow::Context;
use m4af::{config::Codec, metadata, tag, Muxer, Sink, Tag};
use std::io::Read;

/// What [`remux`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub frames: u64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Payload bytes, headers excluded.
    pub bytes: u64,
}

impl Summary {
    /// Playing time in seconds, priming included.
    pub fn seconds(&self) -> f64 {
        (self.frames * u64::from(FRAME_LENGTH)) as f64 / f64::from(self.sample_rate)
    }
}

/// Turns a generic tag name and a text value into a tag.
///
/// # Errors
///
/// The name is unknown or the value does not fit the tag.
pub fn parse_tag<'a>(name: &str, value: &'a str) -> anyhow::Result<Tag<'a>> {
    let fcc = metadata::tag_from_name(name).with_context(|| format!("Unknown tag {name:?}"))?;
    metadata::tag_from_text(fcc, value).with_context(|| format!("Invalid value for {name}"))
}

/// Turns `(name, value)` pairs into tags with [`parse_tag`]. Track and disc
/// numbers are merged with totals given separately (`tracktotal`,
/// `totaldiscs`, ...) into one tag each.
///
/// # Errors
///
/// Any pair fails [`parse_tag`].
pub fn parse_tags(pairs: &[(String, String)]) -> anyhow::Result<Vec<Tag<'_>>> {
    let tags = pairs
        .iter()
        .map(|(name, value)| parse_tag(name, value))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(metadata::merge_numbering(tags))
}

/// Splits a `NAME=VALUE` argument.
///
/// # Errors
///
/// There is no `=`.
pub fn split_assignment(arg: &str) -> anyhow::Result<(&str, &str)> {
    arg.split_once('=')
        .with_context(|| format!("Expected NAME=VALUE, got {arg:?}"))
}

/// Remuxes an ADTS stream into an M4A file.
///
/// The timescale is taken from the stream. Every other muxer setting comes
/// from `settings`.
///
/// # Errors
///
/// The input is not a consistent ADTS stream, or writing the output failed.
pub fn remux<R: Read, S: Sink>(
    input: R,
    output: S,
    settings: &Settings,
    tags: &[Tag<'_>],
) -> anyhow::Result<Summary> {
    let mut reader = AdtsReader::new(input);
    let first_frame = reader
        .next_frame()?
        .context("Input contains no ADTS frames")?;
    let first = first_frame.header;
    let sample_rate = first
        .sample_rate()
        .with_context(|| format!("Reserved sampling index {}", first.sampling_index))?;
    let channels = match first.channel_config {
        0 => {
            log::warn!("Channel layout is given in-band, assuming stereo");
            2
        }
        7 => 8,
        n => u16::from(n),
    };

    let mut muxer_config = settings.muxer.clone();
    muxer_config.codec = Codec::Aac;
    if muxer_config.timescale != sample_rate {
        log::debug!("Using the stream's sample rate of {sample_rate} Hz as the timescale");
        muxer_config.timescale = sample_rate;
    }

    let mut muxer = Muxer::with_config(&muxer_config, output)?;
    muxer.set_decoder_specific_info(0, &first.audio_specific_config())?;
    muxer.set_num_channels(0, channels)?;
    muxer.set_fixed_frame_duration(0, FRAME_LENGTH)?;
    muxer.set_vbr(0, true)?;
    for tag in tags {
        muxer.add_tag(*tag)?;
    }
    let tool = format!("m4af-remux {}", env!("CARGO_PKG_VERSION"));
    if settings.tool_tag {
        muxer.add_tag(Tag::String(tag::TOOL, &tool))?;
    }
    muxer.begin_write()?;

    let mut summary = Summary {
        frames: 0,
        sample_rate,
        channels,
        bytes: 0,
    };
    for frame in std::iter::once(Ok(first_frame)).chain(reader) {
        let frame = frame?;
        if !frame.header.same_stream(&first) {
            anyhow::bail!(
                "Stream parameters change at byte {}, which a single track cannot hold",
                frame.offset
            );
        }
        muxer
            .append_sample(0, &frame.payload, FRAME_LENGTH)
            .with_context(|| format!("Failed to write frame at byte {}", frame.offset))?;
        summary.frames += 1;
        summary.bytes += frame.payload.len() as u64;
    }

    muxer.set_priming(0, settings.delay, settings.padding)?;
    muxer
        .finalize(muxer_config.optimize)
        .context("Failed to finalize output")?;
    log::debug!(
        "Average bitrate {} bps, peak {} bps",
        muxer.track(0).map_or(0, |t| t.avg_bitrate()),
        muxer.track(0).map_or(0, |t| t.max_bitrate()),
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adts::frame;
    use m4af::config::GaplessMode;
    use std::io::Cursor;

    fn stream(frames: usize) -> Vec<u8> {
        (0..frames).flat_map(|i| frame(&vec![i as u8; 100 + i % 50])).collect()
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn remux_stream() {
        let mut out = Cursor::new(Vec::new());
        let settings = Settings {
            delay: 2112,
            padding: 300,
            ..Settings::default()
        };
        let tags = [parse_tag("title", "Test").unwrap()];
        let summary = remux(Cursor::new(stream(200)), &mut out, &settings, &tags).unwrap();
        assert_eq!(summary.frames, 200);
        assert_eq!(summary.sample_rate, 44100);
        assert_eq!(summary.channels, 2);
        assert!((summary.seconds() - 200.0 * 1024.0 / 44100.0).abs() < 1e-9);

        let file = out.into_inner();
        assert_eq!(&file[4..8], b"ftyp");
        assert!(contains(&file, b"iTunSMPB"));
        assert!(contains(&file, b"\xa9too"));
        assert!(contains(&file, b"Test"));
        // AudioSpecificConfig inside the esds
        assert!(contains(&file, &[0x05, 0x80, 0x80, 0x80, 0x02, 0x12, 0x10]));
    }

    #[test]
    fn remux_optimized() {
        let mut out = Cursor::new(Vec::new());
        let mut settings = Settings::default();
        settings.muxer.optimize = true;
        settings.muxer.gapless = GaplessMode::Iso;
        settings.tool_tag = false;
        remux(Cursor::new(stream(50)), &mut out, &settings, &[]).unwrap();
        let file = out.into_inner();
        assert_eq!(&file[36..40], b"moov");
        assert!(!contains(&file, b"\xa9too"));
    }

    #[test]
    fn rejects_bad_input() {
        let settings = Settings::default();
        let empty = remux(Cursor::new(Vec::new()), Cursor::new(Vec::new()), &settings, &[]);
        assert!(empty.is_err());
        let garbage = remux(
            Cursor::new(b"not an adts stream".to_vec()),
            Cursor::new(Vec::new()),
            &settings,
            &[],
        );
        assert!(garbage.is_err());

        let mut mixed = stream(3);
        mixed.extend({
            let mut mono = frame(&[0; 10]);
            mono[3] = (1 << 6) | (mono[3] & 0x3f);
            mono
        });
        let err = remux(Cursor::new(mixed), Cursor::new(Vec::new()), &settings, &[]).unwrap_err();
        assert!(err.to_string().contains("change"));
    }

    #[test]
    fn tag_arguments() {
        assert_eq!(split_assignment("a=b=c").unwrap(), ("a", "b=c"));
        assert!(split_assignment("abc").is_err());
        assert_eq!(
            parse_tag("Track Number", "4/9").unwrap(),
            Tag::Track { number: 4, total: 9 }
        );
        assert!(parse_tag("nonsense", "1").is_err());
        assert!(parse_tag("bpm", "fast").is_err());
    }

    #[test]
    fn totals_merge_into_numbers() {
        let pairs = [
            ("TRACKTOTAL", "12"),
            ("title", "Song"),
            ("track", "3"),
            ("disc", "1"),
            ("totaldiscs", "2"),
        ]
        .map(|(name, value)| (name.to_string(), value.to_string()));
        assert_eq!(
            parse_tags(&pairs).unwrap(),
            [
                Tag::Track { number: 3, total: 12 },
                Tag::String(tag::TITLE, "Song"),
                Tag::Disc { number: 1, total: 2 },
            ]
        );
        let bad = [("tracktotal".to_string(), "many".to_string())];
        assert!(parse_tags(&bad).is_err());
    }
}
