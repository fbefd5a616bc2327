//! Building the `moov` tree from the muxer state.

use crate::{config::Codec, muxer::Muxer, Track};
use bmff::{
    descriptor::{DecoderConfigDescriptor, EsDescriptor},
    AlacSpecificBox, AudioSampleEntry, DataInformationBox, EditBox, EditListBox, EsdsBox,
    HandlerBox, HandlerType, MediaBox, MediaHeaderBox, MediaInformationBox, MetaBox, MovieBox,
    MovieHeaderBox, SampleDescriptionBox, SampleEntry, SampleGroupDescriptionBox,
    SampleTableBox, SampleToGroupBox, SoundMediaHeaderBox, TextSampleEntry, TrackBox,
    TrackHeaderBox, TrackHeaderFlags, UserDataBox, MATRIX_0,
};
use fixed::types::{I16F16, I8F8, U16F16};

/// ISO-639-2/T "undetermined".
const LANGUAGE_UNDETERMINED: [u8; 3] = *b"und";

/// Converts `value` between timescales, rounding to nearest.
pub(crate) fn rescale(value: u64, from: u32, to: u32) -> u64 {
    if from == to || from == 0 {
        return value;
    }
    let from = u128::from(from);
    ((u128::from(value) * u128::from(to) + from / 2) / from) as u64
}

impl<S> Muxer<S> {
    /// The movie box for the current state, with every chunk offset moved
    /// `shift` bytes further into the file.
    pub(crate) fn movie_box(&self, shift: u64) -> MovieBox {
        let trak: Vec<TrackBox> = self
            .tracks
            .iter()
            .enumerate()
            .map(|(idx, track)| self.track_box(idx, track, shift))
            .collect();
        let duration = trak.iter().map(|t| t.tkhd.duration).max().unwrap_or(0);

        let udta = (!self.metadata.is_empty()).then(|| UserDataBox {
            meta: MetaBox::itunes(self.metadata.item_list()),
        });

        MovieBox {
            mvhd: MovieHeaderBox {
                creation_time: self.creation_time,
                modification_time: self.modification_time,
                timescale: self.timescale,
                duration,
                rate: I16F16::ONE,
                volume: I8F8::ONE,
                matrix: MATRIX_0,
                next_track_id: self.tracks.len() as u32 + 1,
            },
            trak,
            udta,
        }
    }

    fn track_box(&self, idx: usize, track: &Track, shift: u64) -> TrackBox {
        let iso_priming = self.gapless.iso() && track.has_priming();
        let edts = iso_priming.then(|| EditBox {
            elst: EditListBox {
                entries: vec![(
                    rescale(track.presentation_duration(), track.timescale, self.timescale),
                    i64::from(track.delay),
                )],
                media_rate_integer: 1,
                media_rate_fraction: 0,
            },
        });

        let handler_type = match track.codec {
            Codec::Text => HandlerType::Text,
            Codec::Aac | Codec::Alac => HandlerType::Audio,
        };

        TrackBox {
            tkhd: TrackHeaderBox {
                flags: TrackHeaderFlags::all(),
                creation_time: self.creation_time,
                modification_time: self.modification_time,
                track_id: idx as u32 + 1,
                duration: rescale(track.duration(), track.timescale, self.timescale),
                volume: I8F8::ONE,
                matrix: MATRIX_0,
            },
            edts,
            mdia: MediaBox {
                mdhd: MediaHeaderBox {
                    creation_time: self.creation_time,
                    modification_time: self.modification_time,
                    timescale: track.timescale,
                    duration: track.duration(),
                    language: LANGUAGE_UNDETERMINED,
                },
                hdlr: HandlerBox::new(handler_type),
                minf: MediaInformationBox {
                    smhd: (handler_type == HandlerType::Audio)
                        .then(SoundMediaHeaderBox::default),
                    dinf: DataInformationBox::self_contained(),
                    stbl: SampleTableBox {
                        stsd: SampleDescriptionBox {
                            entry: sample_entry(track),
                        },
                        sbgp: iso_priming
                            .then(|| SampleToGroupBox::roll(track.samples.len() as u32)),
                        sgpd: iso_priming.then(|| SampleGroupDescriptionBox::roll(-1)),
                        stts: track.samples.time_to_sample(),
                        stsc: track.chunks.sample_to_chunk(),
                        stsz: track.samples.sample_sizes(),
                        stco: {
                            let stco = track.chunks.offsets(shift);
                            #[cfg(feature = "log")]
                            if stco.is_large() {
                                log::debug!("Track {} needs 64-bit chunk offsets", idx + 1);
                            }
                            stco
                        },
                    },
                },
            },
        }
    }
}

fn sample_entry(track: &Track) -> SampleEntry {
    // rates past 65535 Hz do not fit the 16.16 field
    let sample_rate = U16F16::checked_from_num(track.timescale).unwrap_or(U16F16::ZERO);
    match track.codec {
        Codec::Aac => SampleEntry::Mp4a(AudioSampleEntry {
            data_reference_index: 1,
            channel_count: track.channels,
            sample_size: 16,
            sample_rate,
            config: EsdsBox {
                es: EsDescriptor {
                    decoder_config: DecoderConfigDescriptor {
                        buffer_size_db: track.samples.max_size(),
                        max_bitrate: track.max_bitrate,
                        avg_bitrate: if track.vbr { 0 } else { track.avg_bitrate },
                        decoder_specific_info: track.decoder_specific_info.clone(),
                    },
                },
            },
        }),
        Codec::Alac => SampleEntry::Alac(AudioSampleEntry {
            data_reference_index: 1,
            channel_count: track.channels,
            sample_size: 16,
            sample_rate,
            config: AlacSpecificBox {
                cookie: track.decoder_specific_info.clone(),
            },
        }),
        Codec::Text => SampleEntry::Text(TextSampleEntry {
            data_reference_index: 1,
            config: track.decoder_specific_info.clone(),
        }),
    }
}
