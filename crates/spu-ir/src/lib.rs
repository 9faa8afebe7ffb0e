//! Core data model for spurip.
//!
//! This crate defines the types shared by the format parsers and the
//! playback engine: audio sample kinds, patches (ADPCM sample data),
//! instruments, songs, music events, and the error taxonomy.

mod error;
mod event;
mod frame;
mod instrument;
mod patch;
mod song;

pub use error::Error;
pub use event::MusicEvent;
pub use frame::{
    amplitude_to_decibels, decibels_to_amplitude, Frame, Sample, DENORM_LIMIT, SILENCE_THRESHOLD,
};
pub use instrument::{note_to_frequency, Instrument, SubInstrument};
pub use patch::{
    block_is_final, block_is_loop_start, block_is_repeat_jump, edit_adpcm, repeat_offset, Patch,
    PatchBank, ADPCM_BLOCK_SIZE, ADPCM_SAMPLES_PER_BLOCK, PATCH_SAMPLE_RATE,
};
pub use song::{Song, SongBank, Track, MAX_TRACKS};
