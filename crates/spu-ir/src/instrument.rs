//! Instrument and sub-instrument definitions.

/// A polyphonic voice definition: one or more sub-instruments covering
/// ranges of the MIDI note numbers 0..=127.
#[derive(Clone, Debug, Default)]
pub struct Instrument {
    /// Sub-instruments in file order.
    pub sub_instruments: Vec<SubInstrument>,
}

impl Instrument {
    /// Find the sub-instrument covering a note, if any. Every note a song
    /// actually plays is covered by one; a miss means corrupt data.
    pub fn sub_instrument(&self, note: u8) -> Option<&SubInstrument> {
        debug_assert!(note < 0x80);
        self.sub_instruments
            .iter()
            .find(|sub| note >= sub.first_note && note <= sub.last_note)
    }
}

/// Per-note-range record binding a patch, tuning, pan, ADSR, and
/// pitch-bend sensitivity. Field order follows the 16-byte WMD record.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubInstrument {
    /// Voice priority (not used during extraction).
    pub priority: u8,
    /// Flag byte (not used during extraction).
    pub flags: u8,
    /// Base volume, 0..=127.
    pub volume: u8,
    /// Pan, 0 = full left, 64 = centre, 127 = full right.
    pub pan: u8,
    /// Note number that plays the patch at 44.1 kHz.
    pub tuning: u8,
    /// Fine tuning in 1/256ths of a semitone.
    pub fine_tuning: u8,
    /// First note covered.
    pub first_note: u8,
    /// Last note covered.
    pub last_note: u8,
    /// Pitch-bend range in semitones at full downward deflection.
    pub bend_sensitivity_down: u8,
    /// Pitch-bend range in semitones at full upward deflection.
    pub bend_sensitivity_up: u8,
    /// Patch played by this sub-instrument.
    pub patch: u16,
    /// SPU attack/decay/sustain-level register.
    pub spu_ads: u16,
    /// SPU sustain-rate/release register.
    pub spu_sr: u16,
}

/// Convert a note to a playback frequency in Hz, taking the
/// sub-instrument's tuning and the track's current pitch bend into
/// account. `unit_pitch_bend` is the bend at a sensitivity of one
/// semitone (bend / 0x2000 / 12).
pub fn note_to_frequency(sub: &SubInstrument, note: u8, unit_pitch_bend: f32) -> u32 {
    let tuning = sub.tuning as f64 + sub.fine_tuning as f64 / 256.0;
    let adjusted = (note as f64 - tuning) / 12.0
        + sub.bend_sensitivity_down as f64 * unit_pitch_bend as f64;
    let frequency = (44100.0 * 2f64.powf(adjusted) + 0.5) as i64;
    frequency.max(1) as u32
}
