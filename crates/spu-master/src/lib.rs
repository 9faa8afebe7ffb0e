//! Headless extraction driver.
//!
//! Assembles the audio module graph for a song, track, or patch
//! extraction, drives it into a WAV file, and reports what happened.

mod names;
mod options;
mod render;
mod wav;

pub use names::default_song_name;
pub use options::{ExtractOptions, PATCH_SAMPLE_RATE, SONG_SAMPLE_RATE};
pub use render::{
    default_reverb, extract_patches, extract_song, extract_track, ExtractSummary, ProgressFn,
};
pub use wav::WavWriter;

// Callers mostly need these alongside the extract functions.
pub use spu_engine::ReverbPreset;
pub use spu_ir::Error;
