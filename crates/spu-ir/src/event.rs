//! Music events decoded from a track's byte stream.

/// One decoded music event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MusicEvent {
    /// Start a note at the given velocity. Both values are 0..=0x7f.
    NoteOn { note: u8, velocity: u8 },
    /// Release a note.
    NoteOff { note: u8 },
    /// Select an instrument. The track header already names the
    /// instrument, so playback ignores this.
    SetInstrument(u16),
    /// Bend the pitch of every playing note, -0x2000..=0x2000.
    PitchBend(i16),
    /// Set the track master volume, 0..=0x7f. Applies to future notes.
    TrackVolume(u8),
    /// Set the track pan offset, 0..=0x7f. Applies to future notes.
    PanOffset(u8),
    /// Mark a position; the payload is the stream offset of the opcode.
    /// Playback uses the repeat offset from the track header instead.
    SetMarker(u32),
    /// Jump back to a marker if more plays are wanted.
    JumpToMarker(u16),
    /// Opcode 0x0b. Appears once in the data; no audible effect found.
    Unknown0b(u8),
    /// Opcode 0x0e. Appears in a handful of songs, always in pairs; no
    /// audible effect found.
    Unknown0e(u8),
    /// End of the event stream.
    EndOfStream,
}
