//! A single playing voice.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicI32, Ordering};

use spu_ir::{Error, Frame, Patch, Sample};

use crate::adpcm::AdpcmDecoder;
use crate::envelope::{Envelope, ENVELOPE_SAMPLE_RATE};
use crate::filter::{Filter, FilterType};
use crate::module::Module;
use crate::resampler::{LinearResampler, SincResampler};

/// Maximum playback frequency of the PSX SPU.
pub fn spu_max_frequency() -> u32 {
    4 * 44100
}

/// Low-pass cut-off applied to every decoded patch before resampling.
const ADPCM_FILTER_CUTOFF: f64 = 0.33;

/// Alternate cut-offs for patches with high-pitched noise, applied when
/// repair is enabled.
const FILTER_FIXES: [(u16, f64); 4] = [
    (104, 0.15), // Song 98.
    (112, 0.15), // Song 102. Duplicates of this patch appear in other
                 // songs, but the noise isn't apparent there.
    (128, 0.20), // Song 113.
    (130, 0.20), // Song 114.
];

// Concurrent channel count, current and high-water. Diagnostic only, so
// relaxed ordering is enough.
static CURRENT_CHANNELS: AtomicI32 = AtomicI32::new(0);
static MAXIMUM_CHANNELS: AtomicI32 = AtomicI32::new(0);

/// Most channels alive at once since the last reset.
pub fn maximum_channels() -> i32 {
    MAXIMUM_CHANNELS.load(Ordering::Relaxed)
}

/// Reset the high-water mark (start of a new extraction).
pub fn reset_maximum_channels() {
    MAXIMUM_CHANNELS.store(0, Ordering::Relaxed);
}

type VoiceChain<'a> = SincResampler<Filter<AdpcmDecoder<'a>>>;

enum EnvelopeStream {
    /// Output rate is 44.1 kHz: read the envelope directly.
    Direct(Rc<RefCell<Envelope>>),
    /// Other rates adapt the envelope with a linear resampler, which is
    /// fine for its piecewise-linear output and never overshoots.
    Resampled(LinearResampler<Rc<RefCell<Envelope>>>),
}

impl Module for Rc<RefCell<Envelope>> {
    type Frame = f32;

    fn is_running(&self) -> bool {
        self.borrow().is_running()
    }

    fn next(&mut self) -> Result<Option<f32>, Error> {
        self.borrow_mut().next()
    }
}

impl Module for EnvelopeStream {
    type Frame = f32;

    fn is_running(&self) -> bool {
        match self {
            EnvelopeStream::Direct(e) => e.is_running(),
            EnvelopeStream::Resampled(r) => r.is_running(),
        }
    }

    fn next(&mut self) -> Result<Option<f32>, Error> {
        match self {
            EnvelopeStream::Direct(e) => e.next(),
            EnvelopeStream::Resampled(r) => r.next(),
        }
    }
}

/// One note being played: an ADPCM stream low-pass filtered, resampled
/// to the playback frequency, shaped by the ADSR envelope, and panned.
///
/// The channel runs until the envelope finishes its release or the
/// patch data ends (for non-repeating patches), whichever comes first.
pub struct Channel<'a> {
    resampler: Option<VoiceChain<'a>>,
    envelope: EnvelopeStream,
    envelope_control: Rc<RefCell<Envelope>>,
    pan: u8,
    volume: Frame,
    limit_frequency: bool,
    /// Note number that started this channel, for note-off lookup.
    pub note: u8,
}

impl<'a> Channel<'a> {
    /// Start a note. `volume` is 0..=1, `pan` 0..=0x7f, `frequency` the
    /// target playback rate of the patch data in Hz.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        patch: &'a Patch,
        frequency: u32,
        volume: f32,
        pan: u8,
        spu_ads: u16,
        spu_sr: u16,
        sample_rate: u32,
        sinc_window: u32,
        limit_frequency: bool,
        repair: bool,
    ) -> Result<Self, Error> {
        debug_assert!(pan <= 0x7f);
        let current = CURRENT_CHANNELS.fetch_add(1, Ordering::Relaxed) + 1;
        MAXIMUM_CHANNELS.fetch_max(current, Ordering::Relaxed);

        // Filtering the decoder output before resampling knocks the
        // worst artifacts out of the low-quality patches; a handful of
        // patches need a lower cut-off still.
        let decoder = AdpcmDecoder::new(&patch.adpcm, 0)?;
        let mut cutoff = ADPCM_FILTER_CUTOFF;
        if repair {
            if let Some(&(_, fixed)) = FILTER_FIXES.iter().find(|&&(id, _)| id == patch.id) {
                cutoff = fixed;
            }
        }
        let filtered = Filter::new(decoder, FilterType::LowPass, cutoff);
        let clamped = limit(frequency, limit_frequency);
        let resampler = SincResampler::new(filtered, sinc_window, clamped, sample_rate)?;

        let envelope_control = Rc::new(RefCell::new(Envelope::new(spu_ads, spu_sr)));
        let envelope = if sample_rate != ENVELOPE_SAMPLE_RATE {
            EnvelopeStream::Resampled(LinearResampler::new(
                Rc::clone(&envelope_control),
                ENVELOPE_SAMPLE_RATE,
                sample_rate,
            )?)
        } else {
            EnvelopeStream::Direct(Rc::clone(&envelope_control))
        };

        let mut channel = Self {
            resampler: Some(resampler),
            envelope,
            envelope_control,
            pan,
            volume: Frame::ZERO,
            limit_frequency,
            note: 0,
        };
        channel.set_master_volume(volume);
        Ok(channel)
    }

    /// Set the master volume, recomputing the per-side gains. The PSX
    /// sound driver pans with a plain linear blend rather than the MIDI
    /// cosine/sine curve, which leaves centre pan very slightly
    /// right-heavy; that bias is part of the sound.
    pub fn set_master_volume(&mut self, volume: f32) {
        self.volume = Frame::new(
            volume * (128 - self.pan as i32) as f32 / 128.0,
            volume * (self.pan as i32 + 1) as f32 / 128.0,
        );
    }

    /// Begin the envelope's release phase (note-off).
    pub fn release(&mut self) {
        self.envelope_control.borrow_mut().release();
    }

    /// Change the playback frequency mid-note (pitch bend).
    pub fn set_frequency(&mut self, frequency: u32) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.set_rate_in(limit(frequency, self.limit_frequency));
        }
    }
}

/// Clamp a frequency to what the hardware can play: at least 1 Hz, and
/// no more than 4 × 44.1 kHz unless the limit is lifted.
fn limit(frequency: u32, apply_limit: bool) -> u32 {
    if frequency == 0 {
        1
    } else if apply_limit && frequency > spu_max_frequency() {
        spu_max_frequency()
    } else {
        frequency
    }
}

impl Drop for Channel<'_> {
    fn drop(&mut self) {
        CURRENT_CHANNELS.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Module for Channel<'_> {
    type Frame = Frame;

    fn is_running(&self) -> bool {
        self.resampler.is_some()
    }

    fn next(&mut self) -> Result<Option<Frame>, Error> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(None);
        };
        let waveform = resampler.next()?;
        let envelope = self.envelope.next()?;
        let sample = waveform.unwrap_or(0.0) * envelope.unwrap_or(0.0);
        let out = Frame::new(sample * self.volume.left, sample * self.volume.right);

        // Once either side ends the product is zero forever, so the
        // whole chain can be torn down.
        if waveform.is_none() || envelope.is_none() {
            self.resampler = None;
            return Ok(Some(out));
        }
        Ok(Some(out))
    }
}
