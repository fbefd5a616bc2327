#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::dbg_macro)]

use anyhow::Context;
use m4af::{config::GaplessMode, Tag};
use m4af_remux::{config, parse_tags, remux, split_assignment};
use std::{
    fs::{self, File},
    io::{self, BufReader, Read},
    path::PathBuf,
};

fn main() -> anyhow::Result<()> {
    xflags::xflags! {
        cmd m4af-remux {
            /// Raw ADTS AAC stream to read, or `-` for standard input
            optional input: PathBuf
            /// M4A file to write
            optional output: PathBuf
            /// Print version
            optional -V, --version
            /// Path to the configuration file to use
            optional -c, --config path: PathBuf
            /// Place the movie box before the media data for progressive playback
            optional --moov-before-mdat
            /// How to signal encoder delay: none, legacy, iso or both
            optional --gapless mode: GaplessMode
            /// Encoder delay, in samples
            optional --delay samples: u32
            /// Padding after the last sample, in samples
            optional --padding samples: u32
            /// Write zero creation and modification times
            optional --no-timestamp
            /// Track title
            optional --title title: String
            /// Track artist
            optional --artist artist: String
            /// Album title
            optional --album album: String
            /// Track number, as N or N/TOTAL
            optional --track track: String
            /// Disc number, as N or N/TOTAL
            optional --disc disc: String
            /// Set a tag by generic name, as NAME=VALUE (eg. `albumartist=Someone`)
            repeated --tag tag: String
            /// Set a free-form iTunes tag, as NAME=VALUE
            repeated --long-tag tag: String
            /// Attach a JPEG, PNG or GIF image as cover art
            optional --artwork path: PathBuf
        }
    };
    let cmd = M4afRemux::from_env_or_exit();

    if cmd.version {
        println!("m4af-remux {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    env_logger::init();

    let (input, output) = match (cmd.input, cmd.output) {
        (Some(input), Some(output)) => (input, output),
        _ => anyhow::bail!("Both an input and an output path are required, see --help"),
    };

    let mut settings = config::load(cmd.config)?;
    if cmd.moov_before_mdat {
        settings.muxer.optimize = true;
    }
    if let Some(gapless) = cmd.gapless {
        settings.muxer.gapless = gapless;
    }
    if let Some(delay) = cmd.delay {
        settings.delay = delay;
    }
    if let Some(padding) = cmd.padding {
        settings.padding = padding;
    }
    if cmd.no_timestamp {
        settings.muxer.no_timestamp = true;
    }
    if settings.muxer.gapless == GaplessMode::None && (settings.delay, settings.padding) != (0, 0) {
        log::warn!("Delay and padding are set but gapless signaling is disabled");
    }

    let mut named: Vec<(String, String)> = settings.tags.clone().into_iter().collect();
    for (name, value) in [
        ("title", cmd.title),
        ("artist", cmd.artist),
        ("album", cmd.album),
        ("track", cmd.track),
        ("disc", cmd.disc),
    ] {
        if let Some(value) = value {
            named.push((name.to_string(), value));
        }
    }
    for arg in &cmd.tag {
        let (name, value) = split_assignment(arg)?;
        named.push((name.to_string(), value.to_string()));
    }
    let free_form = cmd
        .long_tag
        .iter()
        .map(|arg| split_assignment(arg))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let artwork = cmd
        .artwork
        .map(|path| {
            fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))
        })
        .transpose()?;

    let mut tags = parse_tags(&named)?;
    tags.extend(
        free_form
            .iter()
            .map(|&(name, value)| Tag::FreeForm { name, value }),
    );
    if let Some(artwork) = &artwork {
        tags.push(Tag::Artwork(artwork));
    }

    let reader: Box<dyn Read> = if input.as_os_str() == "-" {
        Box::new(io::stdin().lock())
    } else {
        Box::new(File::open(&input).with_context(|| format!("Failed to open {}", input.display()))?)
    };
    let file = File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let summary = remux(BufReader::new(reader), file, &settings, &tags)
        .with_context(|| format!("Failed to remux into {}", output.display()))?;
    log::info!(
        "Wrote {} frames ({:.2} s, {} Hz, {} channels) to {}",
        summary.frames,
        summary.seconds(),
        summary.sample_rate,
        summary.channels,
        output.display(),
    );
    Ok(())
}
