//! Pull-parser for the MIDI-like event bytes of a track.

use spu_ir::{Error, MusicEvent, Track};

/// Decodes `(delta, event)` pairs from a track's opaque bytes, keeping a
/// fine-grained clock the caller advances once per output sample.
///
/// The caller's tick rate is expressed per minute (sample rate × 60), so
/// the track's own rate (`beats_per_minute × ticks_per_beat`) divides
/// into it without rounding: each caller tick adds the track rate to a
/// fractional accumulator and whole track ticks fall out of it.
pub struct MusicStream<'a> {
    data: &'a [u8],
    position: usize,
    caller_ticks_per_minute: u32,
    track_ticks_per_minute: u32,
    tick_position: u32,
    tick_fraction: u32,
    next_event_time: u32,
}

impl<'a> MusicStream<'a> {
    pub fn new(track: &'a Track, caller_ticks_per_minute: u32) -> Result<Self, Error> {
        let mut stream = Self {
            data: &track.data,
            position: 0,
            caller_ticks_per_minute,
            track_ticks_per_minute: track.beats_per_minute as u32 * track.ticks_per_beat as u32,
            tick_position: 0,
            tick_fraction: 0,
            next_event_time: 0,
        };
        stream.next_event_time = stream.get_delta()?;
        Ok(stream)
    }

    /// Whether any events remain. False once end-of-stream has been
    /// consumed (or the data ran out).
    pub fn is_running(&self) -> bool {
        self.position < self.data.len()
    }

    /// Advance the clock by one caller tick.
    pub fn tick(&mut self) {
        self.tick_fraction += self.track_ticks_per_minute;
        while self.tick_fraction >= self.caller_ticks_per_minute {
            self.tick_fraction -= self.caller_ticks_per_minute;
            self.tick_position += 1;
        }
    }

    /// Whether an event is due at the current time.
    pub fn have_event(&self) -> bool {
        self.position < self.data.len() && self.next_event_time <= self.tick_position
    }

    /// Extract one due event. Several events can share a time, so call
    /// until `Ok(None)`.
    pub fn get_event(&mut self) -> Result<Option<MusicEvent>, Error> {
        if !self.have_event() {
            return Ok(None);
        }
        let code = self.get_byte()?;
        let event = match code {
            0x11 => MusicEvent::NoteOn {
                note: self.get_byte()?,
                velocity: self.get_byte()?,
            },
            0x12 => MusicEvent::NoteOff {
                note: self.get_byte()?,
            },
            0x07 => MusicEvent::SetInstrument(self.get_word()?),
            0x09 => MusicEvent::PitchBend(self.get_word()? as i16),
            0x0c => MusicEvent::TrackVolume(self.get_byte()?),
            0x0d => MusicEvent::PanOffset(self.get_byte()?),
            0x23 => MusicEvent::SetMarker((self.position - 1) as u32),
            0x20 => MusicEvent::JumpToMarker(self.get_word()?),
            0x0b => MusicEvent::Unknown0b(self.get_byte()?),
            0x0e => MusicEvent::Unknown0e(self.get_byte()?),
            0x22 => {
                // Snap to the end so is_running turns false.
                self.position = self.data.len();
                MusicEvent::EndOfStream
            }
            _ => {
                return Err(Error::MalformedInput(format!(
                    "unsupported music stream event code ${:02x}",
                    code
                )))
            }
        };
        if self.position < self.data.len() {
            let delta = self.get_delta()?;
            self.next_event_time += delta;
        }
        Ok(Some(event))
    }

    /// Reposition the stream (used for repeats).
    pub fn seek(&mut self, position: usize) -> Result<(), Error> {
        if position > self.data.len() {
            return Err(Error::MalformedInput(
                "invalid seek position in music stream".into(),
            ));
        }
        self.position = position;
        Ok(())
    }

    fn get_byte(&mut self) -> Result<u8, Error> {
        if self.position >= self.data.len() {
            return Err(Error::MalformedInput(
                "corrupt music data: read beyond the end of the stream".into(),
            ));
        }
        let byte = self.data[self.position];
        self.position += 1;
        Ok(byte)
    }

    fn get_word(&mut self) -> Result<u16, Error> {
        let low = self.get_byte()? as u16;
        let high = self.get_byte()? as u16;
        Ok(low | (high << 8))
    }

    /// Variable-length delta: 7 bits per byte, high bit continues.
    fn get_delta(&mut self) -> Result<u32, Error> {
        let mut delta = 0u32;
        loop {
            let byte = self.get_byte()?;
            delta = (delta << 7) | (byte & 0x7f) as u32;
            if byte & 0x80 == 0 {
                return Ok(delta);
            }
        }
    }
}
