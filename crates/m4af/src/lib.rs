//! An incremental M4A (MPEG-4 audio) muxer.
//!
//! m4af writes encoded AAC or ALAC access units into an MPEG-4 container as
//! they arrive. Samples are grouped into chunks of roughly half a second and
//! written straight to the sink, so memory use does not grow with the length
//! of the stream beyond the per-sample index. On finalization the movie box
//! is either appended after the media data, or the media data is shifted
//! back to place the movie box at the front of the file for progressive
//! playback.
//!
//! # Example
//!
//! ```rust,no_run
//! use m4af::{config::Codec, Muxer, Tag};
//! use std::fs::File;
//!
//! let file = File::options().read(true).write(true).create(true).open("out.m4a")?;
//! let mut muxer = Muxer::new(Codec::Aac, 44100, file, false)?;
//! muxer.set_decoder_specific_info(0, &[0x12, 0x10])?;
//! muxer.set_fixed_frame_duration(0, 1024)?;
//! muxer.set_priming(0, 2112, 576)?;
//! muxer.add_tag(Tag::String(m4af::tag::TITLE, "Untitled"))?;
//! muxer.begin_write()?;
//! # let frames: Vec<Vec<u8>> = Vec::new();
//! for frame in &frames {
//!     muxer.append_sample(0, frame, 1024)?;
//! }
//! muxer.finalize(true)?;
//! # Ok::<(), m4af::Error>(())
//! ```
//!
//! # Errors
//!
//! I/O failures and allocation failures are latched: once one has been
//! returned, every later call on the same [`Muxer`] fails with
//! [`Error::Faulted`], including [`Muxer::finalize`]. Invalid arguments are
//! rejected with [`Error::Unsupported`] and leave the muxer usable.
//!
//! # Cargo Features
//!
//! - `serde`: Add implementations of [`Serialize`](serde::Serialize) and [`Deserialize`](serde::Deserialize)
//!   for types in the [`config`] module.
//! - `log`: Log chunk flushes, layout decisions, and faults with the [`log`] crate.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::dbg_macro)]
#![warn(missing_docs)]
#![warn(clippy::missing_panics_doc)]
#![warn(clippy::missing_errors_doc)]

mod assemble;
pub mod config;
mod finalize;
pub mod metadata;
mod muxer;
pub mod sink;
pub mod table;
mod track;

pub use metadata::{tag, Tag};
pub use muxer::{Muxer, MAX_TRACKS};
pub use sink::{Probe, Sink};
pub use track::Track;

use quick_error::quick_error;

quick_error! {
    /// The error type for `m4af`.
    #[derive(Debug)]
    #[non_exhaustive]
    pub enum Error {
        /// I/O error. This wraps an [`std::io::Error`].
        Io(err: std::io::Error) {
            source(err)
            display("{}", err)
            from()
        }
        /// A sample or chunk table could not grow.
        OutOfMemory {
            display("Out of memory")
        }
        /// The request cannot be represented or is not allowed in the
        /// muxer's current state.
        Unsupported(err: String) {
            display("Unsupported: {}", err)
        }
        /// An earlier I/O or allocation failure left the muxer unusable.
        Faulted {
            display("Muxer is faulted by an earlier error")
        }
    }
}

/// A `Result` type alias for `m4af`'s [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
