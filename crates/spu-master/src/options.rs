//! Options consumed when building an extraction graph.

use spu_engine::ReverbPreset;
use spu_ir::{decibels_to_amplitude, Error};

/// Default sample rate for songs and tracks.
pub const SONG_SAMPLE_RATE: u32 = 44100;

/// Default sample rate for raw patches (their native rate).
pub const PATCH_SAMPLE_RATE: u32 = 11025;

/// Everything the graph builder needs to know.
#[derive(Clone, Copy, Debug)]
pub struct ExtractOptions {
    /// Amplitude factor applied after any normalisation.
    pub volume: f32,
    /// Rescale so the peak magnitude is 1.
    pub normalize: bool,
    /// Reverb preset; `Auto` picks the game's own setting per song.
    pub reverb_preset: ReverbPreset,
    /// Reverb output amplitude.
    pub reverb_volume: f32,
    /// Times to play repeating material; 0 repeats forever.
    pub play_count: u32,
    /// Exact leading silence in seconds; negative leaves it alone.
    pub lead_in: f64,
    /// Exact trailing silence in seconds; negative leaves it alone.
    pub lead_out: f64,
    /// Cap on silent gaps in seconds; negative leaves them alone.
    pub maximum_gap: f64,
    /// Stereo width adjustment in [-1, 1].
    pub stereo_width: f32,
    /// Mend the patches that ship with clicks and pops.
    pub repair_patches: bool,
    /// Lift the 4 × 44.1 kHz frequency clamp of real hardware.
    pub unlimited_frequency: bool,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Post-mix high-pass cut-off in Hz; 0 disables.
    pub high_pass: u32,
    /// Post-mix low-pass cut-off in Hz; 0 disables.
    pub low_pass: u32,
    /// Half-width of the sinc resampling kernel.
    pub sinc_window: u32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            volume: 1.0,
            normalize: false,
            reverb_preset: ReverbPreset::Auto,
            reverb_volume: decibels_to_amplitude(-6.0) as f32,
            play_count: 1,
            lead_in: -1.0,
            lead_out: -1.0,
            maximum_gap: -1.0,
            stereo_width: 0.0,
            repair_patches: false,
            unlimited_frequency: false,
            sample_rate: SONG_SAMPLE_RATE,
            high_pass: 30,
            low_pass: 15000,
            sinc_window: 7,
        }
    }
}

impl ExtractOptions {
    /// Check the option combination makes sense before any work starts.
    pub fn validate(&self) -> Result<(), Error> {
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(Error::InvariantViolation(format!(
                "sample rate {} is outside 8000..192000",
                self.sample_rate
            )));
        }
        if self.sinc_window < 1 {
            return Err(Error::InvariantViolation(
                "sinc window must be at least 1".into(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.stereo_width) {
            return Err(Error::InvariantViolation(
                "stereo width must be within [-1, 1]".into(),
            ));
        }
        let nyquist = self.sample_rate / 2;
        if self.high_pass != 0 && self.high_pass >= nyquist {
            return Err(Error::InvariantViolation(format!(
                "high-pass frequency {} must be below half the sample rate",
                self.high_pass
            )));
        }
        if self.low_pass != 0 && self.low_pass >= nyquist {
            return Err(Error::InvariantViolation(format!(
                "low-pass frequency {} must be below half the sample rate",
                self.low_pass
            )));
        }
        if self.high_pass != 0 && self.low_pass != 0 && self.high_pass >= self.low_pass {
            return Err(Error::InvariantViolation(
                "high-pass frequency must be below the low-pass frequency".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ExtractOptions::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_sample_rate() {
        let mut opts = ExtractOptions::default();
        opts.sample_rate = 4000;
        assert!(opts.validate().is_err());
        opts.sample_rate = 200_000;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_filters_at_or_above_nyquist() {
        let mut opts = ExtractOptions::default();
        opts.sample_rate = 8000;
        opts.low_pass = 4000;
        assert!(opts.validate().is_err());
        opts.low_pass = 3999;
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn rejects_crossed_filters() {
        let mut opts = ExtractOptions::default();
        opts.high_pass = 16000;
        opts.low_pass = 15000;
        assert!(opts.validate().is_err());
        // Disabling one side lifts the constraint.
        opts.low_pass = 0;
        opts.high_pass = 300;
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn rejects_zero_sinc_window() {
        let mut opts = ExtractOptions::default();
        opts.sinc_window = 0;
        assert!(opts.validate().is_err());
    }
}
