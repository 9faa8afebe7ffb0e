//! Playback of a single track: event dispatch and voice lifecycle.

use slotmap::{new_key_type, SlotMap};

use spu_ir::{
    note_to_frequency, Error, Frame, Instrument, MusicEvent, PatchBank, Sample, SongBank, Track,
};

use crate::channel::Channel;
use crate::module::Module;
use crate::music_stream::MusicStream;

new_key_type! {
    struct VoiceKey;
}

/// Playback parameters a track player needs from the caller.
#[derive(Clone, Copy, Debug)]
pub struct TrackOptions {
    pub sample_rate: u32,
    pub sinc_window: u32,
    pub limit_frequency: bool,
    pub repair_patches: bool,
    /// Number of times to play a repeating track; 0 plays forever.
    pub play_count: u32,
    /// Stereo width adjustment in [-1, 1]; 0 leaves pans alone.
    pub stereo_width: f32,
}

/// Plays one track's event stream, creating a voice channel per note-on
/// and mixing every live channel into each output sample.
pub struct TrackPlayer<'a> {
    instrument: &'a Instrument,
    patches: &'a PatchBank,
    stream: MusicStream<'a>,
    channels: SlotMap<VoiceKey, Channel<'a>>,
    options: TrackOptions,
    repeat: bool,
    repeat_start: usize,
    play_count: u32,
    track_volume: f32,
    pan_offset: i32,
    unit_pitch_bend: f32,
}

impl<'a> TrackPlayer<'a> {
    /// The song bank and patch bank must outlive the player; channels
    /// read patch bytes in place.
    pub fn new(
        bank: &'a SongBank,
        patches: &'a PatchBank,
        track: &'a Track,
        options: TrackOptions,
    ) -> Result<Self, Error> {
        debug_assert!(options.sample_rate > 0);
        debug_assert!((-1.0..=1.0).contains(&options.stereo_width));
        let instrument = bank.instrument(track.instrument as usize).ok_or_else(|| {
            Error::MissingResource(format!(
                "instrument {} referenced by track is out of range",
                track.instrument
            ))
        })?;
        // One minute of audio is sample_rate * 60 caller ticks, which
        // lets the stream count in per-minute units without rounding.
        let stream = MusicStream::new(track, options.sample_rate * 60)?;
        Ok(Self {
            instrument,
            patches,
            stream,
            channels: SlotMap::with_key(),
            options,
            repeat: track.repeat,
            repeat_start: track.repeat_start as usize,
            play_count: options.play_count,
            track_volume: 1.0,
            pan_offset: 0,
            unit_pitch_bend: 0.0,
        })
    }

    /// True when a repeat was requested but the event stream never
    /// reached its jump-to-marker.
    pub fn failed_to_repeat(&self) -> bool {
        self.play_count > 1
    }

    fn handle_event(&mut self, event: MusicEvent) -> Result<(), Error> {
        match event {
            MusicEvent::NoteOn { note, velocity } => {
                if note > 0x7f {
                    return Err(Error::MalformedInput(
                        "invalid note number in note on event".into(),
                    ));
                }
                if velocity > 0x7f {
                    return Err(Error::MalformedInput(
                        "invalid volume in note on event".into(),
                    ));
                }
                self.start_note(note, velocity)?;
            }
            MusicEvent::NoteOff { note } => {
                if note > 0x7f {
                    return Err(Error::MalformedInput(
                        "invalid note number in note off event".into(),
                    ));
                }
                // Several channels can carry the same note when releases
                // overlap; all of them get the note-off.
                for (_, channel) in self.channels.iter_mut() {
                    if channel.note == note {
                        channel.release();
                    }
                }
            }
            MusicEvent::PitchBend(bend) => {
                if !(-0x2000..=0x2000).contains(&bend) {
                    return Err(Error::MalformedInput(
                        "invalid bend in pitch bend event".into(),
                    ));
                }
                self.unit_pitch_bend = bend as f32 / 0x2000 as f32 / 12.0;
                let keys: Vec<VoiceKey> = self.channels.keys().collect();
                for key in keys {
                    let note = self.channels[key].note;
                    let sub = self.instrument.sub_instrument(note).ok_or_else(|| {
                        Error::MissingResource(format!(
                            "missing a sub-instrument for note ${:02x}",
                            note
                        ))
                    })?;
                    let frequency = note_to_frequency(sub, note, self.unit_pitch_bend);
                    self.channels[key].set_frequency(frequency);
                }
            }
            MusicEvent::TrackVolume(volume) => {
                if volume > 0x7f {
                    return Err(Error::MalformedInput(
                        "invalid volume in track volume event".into(),
                    ));
                }
                // Applies to future notes only; the songs set this
                // before any note plays.
                self.track_volume = volume as f32 / 127.0;
            }
            MusicEvent::PanOffset(pan) => {
                if pan > 0x7f {
                    return Err(Error::MalformedInput(
                        "invalid pan in track pan event".into(),
                    ));
                }
                self.pan_offset = pan as i32 - 0x40;
            }
            MusicEvent::JumpToMarker(_) => {
                if self.play_count != 1 {
                    if self.play_count > 0 {
                        self.play_count -= 1;
                    }
                    if self.repeat {
                        self.stream.seek(self.repeat_start)?;
                    }
                }
            }
            // The instrument comes from the track header and the repeat
            // point from the jump event, so these carry nothing new.
            MusicEvent::SetInstrument(_) | MusicEvent::SetMarker(_) => {}
            MusicEvent::Unknown0b(_) | MusicEvent::Unknown0e(_) => {}
            MusicEvent::EndOfStream => {}
        }
        Ok(())
    }

    fn start_note(&mut self, note: u8, velocity: u8) -> Result<(), Error> {
        let sub = self.instrument.sub_instrument(note).ok_or_else(|| {
            Error::MissingResource(format!("missing a sub-instrument for note ${:02x}", note))
        })?;
        let patch = self.patches.patch_by_id(sub.patch).ok_or_else(|| {
            Error::MissingResource(format!(
                "unable to locate patch with id {} in any LCD file",
                sub.patch
            ))
        })?;

        let volume =
            self.track_volume * (sub.volume as f32 / 127.0) * (velocity as f32 / 127.0);
        let frequency = note_to_frequency(sub, note, self.unit_pitch_bend);
        let pan = (sub.pan as i32 + self.pan_offset).clamp(0x00, 0x7f) as u8;
        let pan = adjust_stereo_width(pan, self.options.stereo_width);

        let mut channel = Channel::new(
            patch,
            frequency,
            volume,
            pan,
            sub.spu_ads,
            sub.spu_sr,
            self.options.sample_rate,
            self.options.sinc_window,
            self.options.limit_frequency,
            self.options.repair_patches,
        )?;
        channel.note = note;
        self.channels.insert(channel);
        Ok(())
    }
}

impl Module for TrackPlayer<'_> {
    type Frame = Frame;

    fn is_running(&self) -> bool {
        !self.channels.is_empty()
            || (self.repeat && (self.play_count == 0 || self.play_count > 1))
            || self.stream.is_running()
    }

    fn next(&mut self) -> Result<Option<Frame>, Error> {
        let mut live = !self.channels.is_empty() || self.stream.is_running();

        // Dispatch everything due now; multiple events can share a tick.
        while let Some(event) = self.stream.get_event()? {
            live = true;
            self.handle_event(event)?;
        }
        if self.stream.is_running() {
            self.stream.tick();
        }

        // Mix the live channels, dropping the ones that finished.
        let mut mixed = Frame::ZERO;
        let keys: Vec<VoiceKey> = self.channels.keys().collect();
        for key in keys {
            match self.channels[key].next()? {
                Some(sample) => mixed += sample,
                None => {
                    self.channels.remove(key);
                }
            }
        }
        if live {
            Ok(Some(mixed))
        } else {
            Ok(None)
        }
    }
}

/// Warp a pan position for stereo width adjustment.
///
/// Width 0 is the identity. Positive widths push off-centre sounds
/// outward (1.0 pins most of them near the edges); negative widths pull
/// everything toward centre (-1.0 is near-mono). Pan 64 is centre and
/// always maps to itself, even though the numeric midpoint of 0..=127
/// is 63.5; the songs use 64 for centre and the remapping honours that.
pub fn adjust_stereo_width(pan: u8, width: f32) -> u8 {
    debug_assert!(pan <= 0x7f);
    if width == 0.0 {
        return pan;
    }
    let centre = 64.0f32;
    let left_range = centre;
    let right_range = 127.0 - centre;
    let range = if (pan as f32) < centre {
        left_range
    } else {
        right_range
    };
    let mut remap = (pan as f32 - centre) / range;

    let strength = 4.0f32.powf(-width);
    remap = remap.signum() * remap.abs().powf(strength);
    if remap.is_nan() {
        remap = 0.0;
    }

    let back_range = if remap < 0.0 { left_range } else { right_range };
    let new_pan = (remap * back_range + centre + 0.5).floor() as i32;
    new_pan.clamp(0x00, 0x7f) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::test_support::drain;
    use spu_ir::{SubInstrument, ADPCM_BLOCK_SIZE};

    fn one_block_patch(id: u16) -> spu_ir::Patch {
        let mut block = [0x23u8; ADPCM_BLOCK_SIZE];
        block[0] = 0x00;
        block[1] = 0x01;
        spu_ir::Patch::new(id, block.to_vec())
    }

    fn fixture(track_data: &[u8]) -> (SongBank, PatchBank) {
        let mut bank = SongBank::default();
        bank.instruments.push(Instrument {
            sub_instruments: vec![SubInstrument {
                volume: 127,
                pan: 64,
                tuning: 60,
                first_note: 0,
                last_note: 127,
                bend_sensitivity_down: 2,
                bend_sensitivity_up: 2,
                patch: 1,
                spu_ads: 0x0000,
                spu_sr: 0x0000,
                ..Default::default()
            }],
        });
        let mut song = spu_ir::Song::default();
        song.tracks.push(Track {
            beats_per_minute: 120,
            ticks_per_beat: 480,
            data: track_data.to_vec(),
            ..Default::default()
        });
        bank.songs.push(song);

        let mut patches = PatchBank::new();
        let patch = one_block_patch(1);
        patches.set_patch(1, patch.adpcm);
        (bank, patches)
    }

    fn options() -> TrackOptions {
        TrackOptions {
            sample_rate: 44100,
            sinc_window: 3,
            limit_frequency: true,
            repair_patches: false,
            play_count: 1,
            stereo_width: 0.0,
        }
    }

    fn player<'a>(
        bank: &'a SongBank,
        patches: &'a PatchBank,
        opts: TrackOptions,
    ) -> TrackPlayer<'a> {
        TrackPlayer::new(bank, patches, &bank.songs[0].tracks[0], opts).unwrap()
    }

    #[test]
    fn note_on_produces_audio() {
        let (bank, patches) = fixture(&[0x00, 0x11, 60, 127, 0x00, 0x22]);
        let mut p = player(&bank, &patches, options());
        let out = drain(&mut p);
        assert!(out.iter().any(|f| f.magnitude() > 0.0));
        assert!(!p.is_running());
    }

    #[test]
    fn missing_sub_instrument_is_fatal() {
        let (mut bank, patches) = fixture(&[0x00, 0x11, 60, 127, 0x00, 0x22]);
        bank.instruments[0].sub_instruments[0].last_note = 10;
        let mut p = player(&bank, &patches, options());
        let mut failed = false;
        for _ in 0..10 {
            if p.next().is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
    }

    #[test]
    fn missing_patch_is_fatal() {
        let (mut bank, patches) = fixture(&[0x00, 0x11, 60, 127, 0x00, 0x22]);
        bank.instruments[0].sub_instruments[0].patch = 99;
        let mut p = player(&bank, &patches, options());
        assert!(p.next().is_err());
    }

    #[test]
    fn empty_track_ends_immediately() {
        let (bank, patches) = fixture(&[0x00, 0x22]);
        let mut p = player(&bank, &patches, options());
        let out = drain(&mut p);
        // The end-of-stream event is consumed on the first pull, which
        // still counts as a live sample.
        assert_eq!(out.len(), 1);
        assert!(!p.is_running());
    }

    #[test]
    fn note_off_releases_only_matching_channels() {
        // Two notes on, then note 60 off.
        let (bank, patches) = fixture(&[
            0x00, 0x11, 60, 127, 0x00, 0x11, 64, 127, 0x00, 0x12, 60, 0x00, 0x22,
        ]);
        let mut p = player(&bank, &patches, options());
        p.next().unwrap();
        assert_eq!(p.channels.len(), 2);
    }

    #[test]
    fn repeat_jump_honours_play_count() {
        // Volume, then jump at time 0. The jump is not taken when
        // play_count is 1. The repeat offset points at the volume
        // opcode: the delta that follows a jump is consumed before the
        // seek happens.
        let data = [0x00, 0x0c, 0x7f, 0x00, 0x20, 0x00, 0x00, 0x00, 0x22];
        let (bank, patches) = {
            let (mut bank, patches) = fixture(&data);
            bank.songs[0].tracks[0].repeat = true;
            bank.songs[0].tracks[0].repeat_start = 1;
            (bank, patches)
        };

        let mut p = player(&bank, &patches, options());
        let out = drain(&mut p);
        assert_eq!(out.len(), 1);

        // With a play count of 2 the jump is taken once: the stream
        // seeks back and runs to the jump again before ending.
        let mut opts = options();
        opts.play_count = 2;
        let mut p = player(&bank, &patches, opts);
        let out = drain(&mut p);
        assert_eq!(out.len(), 1);
        assert!(!p.failed_to_repeat());
    }

    #[test]
    fn failed_repeat_reported() {
        // Repeat requested but the stream has no jump event.
        let (bank, patches) = fixture(&[0x00, 0x0c, 0x7f, 0x00, 0x22]);
        let mut opts = options();
        opts.play_count = 3;
        let mut p = player(&bank, &patches, opts);
        drain(&mut p);
        assert!(p.failed_to_repeat());
    }

    #[test]
    fn track_volume_scales_future_notes() {
        let loud_data = [0x00, 0x0c, 0x7f, 0x00, 0x11, 60, 127, 0x00, 0x22];
        let quiet_data = [0x00, 0x0c, 0x20, 0x00, 0x11, 60, 127, 0x00, 0x22];
        let (bank_l, patches_l) = fixture(&loud_data);
        let (bank_q, patches_q) = fixture(&quiet_data);
        let mut loud = player(&bank_l, &patches_l, options());
        let mut quiet = player(&bank_q, &patches_q, options());
        let loud_peak = drain(&mut loud)
            .iter()
            .fold(0.0f32, |m, f| m.max(f.magnitude()));
        let quiet_peak = drain(&mut quiet)
            .iter()
            .fold(0.0f32, |m, f| m.max(f.magnitude()));
        assert!(loud_peak > quiet_peak * 2.0);
    }

    // --- stereo width warping ---

    #[test]
    fn width_zero_is_identity() {
        for pan in 0..=0x7f {
            assert_eq!(adjust_stereo_width(pan, 0.0), pan);
        }
    }

    #[test]
    fn centre_is_fixed_for_all_widths() {
        for width in [-1.0f32, -0.5, 0.0, 0.25, 1.0] {
            assert_eq!(adjust_stereo_width(64, width), 64);
        }
    }

    #[test]
    fn warped_pan_stays_in_range() {
        for width in [-1.0f32, -0.7, -0.1, 0.1, 0.7, 1.0] {
            for pan in 0..=0x7f {
                assert!(adjust_stereo_width(pan, width) <= 0x7f);
            }
        }
    }

    #[test]
    fn full_width_pushes_sounds_outward() {
        // width 1: strength = 4^-1 = 0.25, |r|^0.25 grows |r|.
        // pan 32: r = -0.5 → -0.8409 → round(-0.8409·64 + 64) = 10.
        assert_eq!(adjust_stereo_width(0, 1.0), 0);
        assert_eq!(adjust_stereo_width(32, 1.0), 10);
        assert!(adjust_stereo_width(96, 1.0) > 96);
    }

    #[test]
    fn negative_width_narrows() {
        // width -1: strength = 4, |r|^4 crushes toward centre.
        // pan 32: r = -0.5 → -0.0625 → round(-0.0625·64 + 64) = 60.
        assert_eq!(adjust_stereo_width(32, -1.0), 60);
        let narrowed = adjust_stereo_width(96, -1.0);
        assert!(narrowed < 96 && narrowed >= 64, "should pull toward centre: {}", narrowed);
    }
}
