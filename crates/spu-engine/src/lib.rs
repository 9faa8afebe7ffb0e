//! Pull-based audio engine emulating the PSX SPU.
//!
//! Audio flows through a graph of [`Module`]s, each producing a lazy,
//! finite sequence of mono or stereo samples. Sources sit at the leaves
//! (ADPCM decoder, envelope generator); transformers wrap a source and
//! rework its output (resamplers, filters, reverb, silencer, normaliser);
//! composites drive several sources at once (voice channels, track and
//! song players). The outermost module is drained by a sink.

mod adpcm;
mod channel;
mod envelope;
mod filter;
mod module;
mod music_stream;
mod normalizer;
mod resampler;
mod reverb;
mod silencer;
mod song_player;
mod splitter;
mod statistics;
mod track_player;
mod volume;

pub use adpcm::AdpcmDecoder;
pub use channel::{maximum_channels, reset_maximum_channels, spu_max_frequency, Channel};
pub use envelope::{Envelope, ENVELOPE_SAMPLE_RATE};
pub use filter::{Filter, FilterType};
pub use module::Module;
pub use music_stream::MusicStream;
pub use normalizer::Normalizer;
pub use resampler::{LinearResampler, SincResampler, SincTable};
pub use reverb::{Reverb, ReverbCore, ReverbPreset, REVERB_SAMPLE_RATE};
pub use silencer::Silencer;
pub use song_player::SongPlayer;
pub use splitter::Splitter;
pub use statistics::{ProgressCallback, Statistics, StatisticsMode};
pub use track_player::{adjust_stereo_width, TrackOptions, TrackPlayer};
pub use volume::Volume;
