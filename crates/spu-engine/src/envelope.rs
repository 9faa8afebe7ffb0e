//! PSX SPU ADSR envelope generator.

use spu_ir::Error;

use crate::module::Module;

/// The envelope hardware ticks at this rate regardless of the output
/// sample rate; callers resample when they run at anything else.
pub const ENVELOPE_SAMPLE_RATE: u32 = 44100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Attack,
    Decay,
    Sustain,
    Release,
    Stopped,
}

impl Phase {
    fn advance(self) -> Phase {
        match self {
            Phase::Attack => Phase::Decay,
            Phase::Decay => Phase::Sustain,
            Phase::Sustain => Phase::Release,
            Phase::Release | Phase::Stopped => Phase::Stopped,
        }
    }

    fn index(self) -> usize {
        match self {
            Phase::Attack => 0,
            Phase::Decay => 1,
            Phase::Sustain => 2,
            Phase::Release => 3,
            Phase::Stopped => unreachable!("stopped phase has no config"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct PhaseConfig {
    exponential: bool,
    increase: bool,
    shift: i32,
    step: i32,
    /// Volume level that ends the phase. Sustain uses an unreachable
    /// value since only an explicit release ends it.
    target: i32,
}

/// Emulation of the SPU envelope generator, producing a mono gain stream
/// in [0, 1] at a fixed 44.1 kHz tick rate.
///
/// The generator computes a series of (wait, step) cycles: after `wait`
/// ticks the step is added to the volume, and phases advance when the
/// volume reaches the phase target. Release is entered only via
/// [`Envelope::release`].
pub struct Envelope {
    configs: [PhaseConfig; 4],
    phase: Phase,
    volume: i32,
    cycle_repeats: u32,
    cycle_wait: u32,
    cycle_current_wait: u32,
    cycle_step: i32,
}

impl Envelope {
    /// Decode the two SPU register words into the four phase configs.
    pub fn new(spu_ads: u16, spu_sr: u16) -> Self {
        let attack = PhaseConfig {
            exponential: spu_ads & 0x8000 != 0,
            increase: true,
            shift: ((spu_ads >> 10) & 0x1f) as i32,
            step: 7 - ((spu_ads >> 8) & 0x03) as i32,
            target: 0x7fff,
        };
        let decay = PhaseConfig {
            exponential: true,
            increase: false,
            shift: ((spu_ads >> 4) & 0x0f) as i32,
            step: -8,
            target: ((spu_ads & 0x0f) as i32 + 1) * 0x800,
        };
        let sustain_increase = spu_sr & 0x4000 == 0;
        let sustain = PhaseConfig {
            exponential: spu_sr & 0x8000 != 0,
            increase: sustain_increase,
            shift: ((spu_sr >> 8) & 0x1f) as i32,
            step: if sustain_increase {
                7 - ((spu_sr >> 6) & 0x03) as i32
            } else {
                -8 + ((spu_sr >> 6) & 0x03) as i32
            },
            target: if sustain_increase { 0x8000 } else { -1 },
        };
        let release = PhaseConfig {
            exponential: spu_sr & 0x20 != 0,
            increase: false,
            shift: (spu_sr & 0x1f) as i32,
            step: -8,
            target: 0,
        };

        let mut envelope = Self {
            configs: [attack, decay, sustain, release],
            phase: Phase::Attack,
            volume: 0,
            cycle_repeats: 1,
            cycle_wait: 1,
            cycle_current_wait: 1,
            cycle_step: 0,
        };
        envelope.calculate_cycle();
        envelope
    }

    /// Sample rate the envelope runs at.
    pub fn sample_rate(&self) -> u32 {
        ENVELOPE_SAMPLE_RATE
    }

    /// Start the release phase (note-off).
    pub fn release(&mut self) {
        if self.phase != Phase::Stopped {
            self.phase = Phase::Release;
            self.calculate_cycle();
        }
    }

    /// Compute the next (wait, step) cycle for the current phase.
    fn calculate_cycle(&mut self) {
        let config = self.configs[self.phase.index()];
        self.cycle_wait = 1u32 << (config.shift - 11).max(0);
        self.cycle_step = ((config.step as u32) << (11 - config.shift).max(0)) as i32;
        if config.exponential {
            // Exponential increase isn't really exponential: the rate
            // just drops by four above 0x6000.
            if config.increase && self.volume > 0x6000 {
                self.cycle_wait *= 4;
            } else if !config.increase {
                self.cycle_step = (self.cycle_step * self.volume) >> 15;
            }
        }

        // The raw wait and step can be coarse. Split them by common
        // powers of two to get a smoother curve out of the same slope.
        self.cycle_repeats = 1;
        while self.cycle_wait & 0x01 == 0 && self.cycle_step != 0 && self.cycle_step & 0x01 == 0 {
            self.cycle_repeats <<= 1;
            self.cycle_wait >>= 1;
            self.cycle_step >>= 1;
        }
        self.cycle_current_wait = self.cycle_wait;
    }
}

impl Module for Envelope {
    type Frame = f32;

    fn is_running(&self) -> bool {
        self.phase != Phase::Stopped
    }

    fn next(&mut self) -> Result<Option<f32>, Error> {
        if self.phase == Phase::Stopped {
            return Ok(None);
        }
        let level = self.volume as f32 / 0x7fff as f32;

        self.cycle_current_wait -= 1;
        if self.cycle_current_wait == 0 {
            self.volume = (self.volume + self.cycle_step).clamp(0, 0x7fff);
            self.cycle_repeats -= 1;
            if self.cycle_repeats > 0 {
                self.cycle_current_wait = self.cycle_wait;
            } else {
                let config = self.configs[self.phase.index()];
                let reached = if config.increase {
                    self.volume >= config.target
                } else {
                    self.volume <= config.target
                };
                if reached {
                    self.phase = self.phase.advance();
                }
                if self.phase != Phase::Stopped {
                    self.calculate_cycle();
                }
            }
        }
        Ok(Some(level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_until_phase_end(env: &mut Envelope, limit: usize) -> Vec<f32> {
        let mut out = Vec::new();
        for _ in 0..limit {
            match env.next().unwrap() {
                Some(v) => out.push(v),
                None => break,
            }
        }
        out
    }

    #[test]
    fn attack_reaches_full_volume() {
        // Linear attack, shift 0, step 7: reaches 0x7fff within 32768
        // ticks.
        let mut env = Envelope::new(0x0000, 0x0000);
        let mut ticks = 0;
        while env.volume < 0x7fff && ticks < 32768 {
            env.next().unwrap();
            ticks += 1;
        }
        assert_eq!(env.volume, 0x7fff);
        assert!(ticks <= 32768, "attack took {} ticks", ticks);
    }

    #[test]
    fn output_is_monotonic_during_attack() {
        let mut env = Envelope::new(0x0000, 0x0000);
        let mut previous = 0.0f32;
        for _ in 0..5000 {
            let v = env.next().unwrap().unwrap();
            assert!(v >= previous, "attack must not decrease");
            assert!((0.0..=1.0).contains(&v));
            previous = v;
            if env.volume >= 0x7fff {
                break;
            }
        }
    }

    #[test]
    fn decay_falls_to_sustain_level() {
        // ADS 0x0000: decay target = (0 + 1) * 0x800 = 0x800.
        let mut env = Envelope::new(0x0000, 0x0000);
        // Run through attack.
        while env.phase == Phase::Attack {
            env.next().unwrap();
        }
        assert_eq!(env.phase, Phase::Decay);
        let mut previous = env.volume;
        while env.phase == Phase::Decay {
            env.next().unwrap();
            assert!(env.volume <= previous, "decay must not increase");
            previous = env.volume;
        }
        assert!(env.volume <= 0x800);
        assert_eq!(env.phase, Phase::Sustain);
    }

    #[test]
    fn sustain_increase_never_ends_on_its_own() {
        // SR 0x0000: sustain direction increase, target 0x8000 which the
        // clamp at 0x7fff can never reach.
        let mut env = Envelope::new(0x0000, 0x0000);
        for _ in 0..200_000 {
            assert!(env.next().unwrap().is_some());
        }
        assert!(env.is_running());
    }

    #[test]
    fn release_drives_to_zero_and_stops() {
        let mut env = Envelope::new(0x0000, 0x0000);
        for _ in 0..10_000 {
            env.next().unwrap();
        }
        env.release();
        let out = run_until_phase_end(&mut env, 40_000);
        assert!(out.len() <= 32768 + 1, "release took {} ticks", out.len());
        assert!(!env.is_running());
        assert!(env.next().unwrap().is_none());
        // Release must be non-increasing.
        for pair in out.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
    }

    #[test]
    fn release_on_stopped_envelope_is_harmless() {
        let mut env = Envelope::new(0x0000, 0x0000);
        env.release();
        while env.next().unwrap().is_some() {}
        env.release();
        assert!(env.next().unwrap().is_none());
    }

    #[test]
    fn exponential_attack_slows_above_three_quarters() {
        // Exponential attack (bit 15), shift 4, step 7.
        let mut env = Envelope::new(0x8000 | (4 << 10), 0x0000);
        let mut below_ticks = 0u32;
        let mut above_ticks = 0u32;
        let mut last = 0;
        while env.phase == Phase::Attack && (below_ticks + above_ticks) < 1_000_000 {
            env.next().unwrap();
            let delta = env.volume - last;
            if delta > 0 {
                if last <= 0x6000 {
                    below_ticks += 1;
                } else {
                    above_ticks += 1;
                }
            }
            if env.volume > last {
                last = env.volume;
            }
        }
        // The climb from 0x6000 to 0x7fff covers a quarter of the range
        // but at a four-times-slower rate, so it needs more steps
        // proportionally than the first three quarters.
        assert!(above_ticks * 3 > below_ticks,
            "expected slow-down above 0x6000: below={} above={}", below_ticks, above_ticks);
    }

    #[test]
    fn envelope_output_normalised() {
        let mut env = Envelope::new(0x8fe0, 0xc7e0);
        for _ in 0..100_000 {
            match env.next().unwrap() {
                Some(v) => assert!((0.0..=1.0).contains(&v)),
                None => break,
            }
        }
    }
}
