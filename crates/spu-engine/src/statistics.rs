//! Passive metering of a stream as it flows by.

use std::time::Instant;

use spu_ir::{amplitude_to_decibels, Error, Sample};

use crate::module::Module;

/// What to measure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatisticsMode {
    /// Only progress reporting.
    Progress,
    /// Progress plus peak and RMS levels.
    Detailed,
}

/// Progress callback: (whole seconds of audio produced, extraction rate
/// as song-seconds per wall-second, 0 until there is enough data).
pub type ProgressCallback = Box<dyn FnMut(u32, f64)>;

/// Pass-through that records peak magnitude, accumulates the RMS total,
/// and fires a progress callback once per second of produced audio.
pub struct Statistics<M: Module> {
    source: M,
    mode: StatisticsMode,
    rate: u32,
    callback: Option<ProgressCallback>,
    start_time: Option<Instant>,
    last_rate_half_seconds: u64,
    extraction_rate: f64,
    samples: u64,
    samples_until_next_second: u32,
    maximum: f32,
    rms_total: f64,
}

impl<M: Module> Statistics<M> {
    pub fn new(
        source: M,
        mode: StatisticsMode,
        rate: u32,
        callback: Option<ProgressCallback>,
    ) -> Self {
        debug_assert!(rate > 0);
        Self {
            source,
            mode,
            rate,
            callback,
            start_time: None,
            last_rate_half_seconds: 0,
            extraction_rate: 0.0,
            samples: 0,
            samples_until_next_second: rate,
            maximum: 0.0,
            rms_total: 0.0,
        }
    }

    /// The wrapped module.
    pub fn source(&self) -> &M {
        &self.source
    }

    /// Song-seconds produced per wall-second; 0 until measured.
    pub fn extraction_rate(&self) -> f64 {
        self.extraction_rate
    }

    /// Peak magnitude seen so far (detailed mode).
    pub fn maximum_amplitude(&self) -> f32 {
        debug_assert_eq!(self.mode, StatisticsMode::Detailed);
        self.maximum
    }

    /// Peak level in dB (detailed mode).
    pub fn maximum_db(&self) -> f64 {
        amplitude_to_decibels(self.maximum_amplitude() as f64)
    }

    /// RMS level in dB (detailed mode).
    pub fn rms_db(&self) -> f64 {
        debug_assert_eq!(self.mode, StatisticsMode::Detailed);
        if self.samples > 0 {
            amplitude_to_decibels((self.rms_total / self.samples as f64).sqrt())
        } else {
            0.0
        }
    }
}

impl<M: Module> Module for Statistics<M> {
    type Frame = M::Frame;

    fn is_running(&self) -> bool {
        self.source.is_running()
    }

    fn next(&mut self) -> Result<Option<M::Frame>, Error> {
        if self.samples == 0 {
            self.start_time = Some(Instant::now());
        }
        self.samples += 1;
        let sample = self.source.next()?;

        if self.mode == StatisticsMode::Detailed {
            if let Some(s) = sample {
                let magnitude = s.magnitude();
                self.maximum = self.maximum.max(magnitude);
                self.rms_total += (magnitude as f64) * (magnitude as f64);
            }
        }

        // Once per second of produced audio, refresh the rate estimate
        // (at most twice per wall second) and report progress.
        self.samples_until_next_second -= 1;
        if self.samples_until_next_second == 0 {
            self.samples_until_next_second = self.rate;
            let song_seconds = (self.samples / self.rate as u64) as u32;
            let elapsed = self.start_time.expect("timer started").elapsed();
            let half_seconds = (elapsed.as_millis() / 500) as u64;
            if half_seconds != self.last_rate_half_seconds {
                let wall = elapsed.as_secs_f64();
                self.extraction_rate = (song_seconds as f64 / wall).clamp(0.0, 1_000_000.0);
                self.last_rate_half_seconds = half_seconds;
            }
            if let Some(callback) = self.callback.as_mut() {
                callback(song_seconds, self.extraction_rate);
            }
        }
        Ok(sample)
    }
}
