//! Song, track, and song-bank records.

use arrayvec::ArrayVec;

use crate::instrument::Instrument;

/// Maximum number of tracks a song may carry. Every song in Doom and
/// Final Doom mixes between one and three tracks.
pub const MAX_TRACKS: usize = 3;

/// One MIDI-like event stream with its own tempo.
#[derive(Clone, Debug, Default)]
pub struct Track {
    /// Six bytes of unknown purpose preceding the instrument index,
    /// preserved for round-tripping.
    pub unknown_0: [u8; 6],
    /// Index of the instrument used by this track.
    pub instrument: u16,
    /// Six more unknown bytes, preserved.
    pub unknown_1: [u8; 6],
    /// Tempo in beats per minute.
    pub beats_per_minute: u16,
    /// Resolution in ticks per beat.
    pub ticks_per_beat: u16,
    /// Whether the track repeats.
    pub repeat: bool,
    /// Absolute offset into `data` where a repeat resumes. Only
    /// meaningful when `repeat` is set.
    pub repeat_start: u32,
    /// Opaque music event bytes.
    pub data: Vec<u8>,
}

/// An ordered set of 1–3 tracks mixed together.
#[derive(Clone, Debug, Default)]
pub struct Song {
    /// Two bytes of unknown purpose from the song header, preserved.
    pub unknown: [u8; 2],
    /// The tracks, in file order.
    pub tracks: ArrayVec<Track, MAX_TRACKS>,
}

/// Everything read from a WMD file: instruments and songs, plus the
/// unknown header bytes that must survive a rewrite.
#[derive(Clone, Debug, Default)]
pub struct SongBank {
    /// 14 unknown bytes following the song count.
    pub unknown_0: [u8; 14],
    /// 8 unknown bytes following the record counts.
    pub unknown_1: [u8; 8],
    /// All instruments.
    pub instruments: Vec<Instrument>,
    /// All songs.
    pub songs: Vec<Song>,
}

impl SongBank {
    /// Look up an instrument by index.
    pub fn instrument(&self, index: usize) -> Option<&Instrument> {
        self.instruments.get(index)
    }

    /// Look up a song by index.
    pub fn song(&self, index: usize) -> Option<&Song> {
        self.songs.get(index)
    }
}
