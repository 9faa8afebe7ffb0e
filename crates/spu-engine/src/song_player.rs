//! Mixes the track players of one song.

use arrayvec::ArrayVec;

use spu_ir::{Error, Frame, PatchBank, Sample, Song, SongBank, MAX_TRACKS};

use crate::module::Module;
use crate::track_player::{TrackOptions, TrackPlayer};

/// Plays every track of a song and sums them into one stereo stream.
pub struct SongPlayer<'a> {
    tracks: ArrayVec<TrackPlayer<'a>, MAX_TRACKS>,
}

impl<'a> SongPlayer<'a> {
    pub fn new(
        bank: &'a SongBank,
        patches: &'a PatchBank,
        song: &'a Song,
        options: TrackOptions,
    ) -> Result<Self, Error> {
        let mut tracks = ArrayVec::new();
        for track in &song.tracks {
            tracks.push(TrackPlayer::new(bank, patches, track, options)?);
        }
        Ok(Self { tracks })
    }

    /// True when any track wanted more repeats than its event stream
    /// delivered.
    pub fn failed_to_repeat(&self) -> bool {
        self.tracks.iter().any(|t| t.failed_to_repeat())
    }
}

impl Module for SongPlayer<'_> {
    type Frame = Frame;

    fn is_running(&self) -> bool {
        self.tracks.iter().any(|t| t.is_running())
    }

    fn next(&mut self) -> Result<Option<Frame>, Error> {
        let mut mixed = Frame::ZERO;
        let mut live = false;
        for track in &mut self.tracks {
            if let Some(sample) = track.next()? {
                mixed += sample;
                live = true;
            }
        }
        if live {
            Ok(Some(mixed))
        } else {
            Ok(None)
        }
    }
}
