//! Second-order Butterworth IIR filtering.

use std::f64::consts::{PI, SQRT_2};

use spu_ir::{Error, Sample, DENORM_LIMIT};

use crate::module::Module;

/// Filter response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterType {
    LowPass,
    HighPass,
}

/// Direct-form-1 biquad with Butterworth response.
///
/// Attenuates by -3.01 dB at the cut-off; one octave into the stop band
/// the response is down -12 dB, two octaves -24 dB.
pub struct Filter<M: Module> {
    source: M,
    filter_type: FilterType,
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
    x1: M::Frame,
    x2: M::Frame,
    y1: M::Frame,
    y2: M::Frame,
    source_done: bool,
}

impl<M: Module> Filter<M> {
    /// `cut_off` is the -3 dB frequency as a fraction of the sample
    /// rate, in [0, 0.5).
    pub fn new(source: M, filter_type: FilterType, cut_off: f64) -> Self {
        let mut filter = Self {
            source,
            filter_type,
            a0: 0.0,
            a1: 0.0,
            a2: 0.0,
            b1: 0.0,
            b2: 0.0,
            x1: M::Frame::ZERO,
            x2: M::Frame::ZERO,
            y1: M::Frame::ZERO,
            y2: M::Frame::ZERO,
            source_done: false,
        };
        filter.adjust(cut_off);
        filter
    }

    /// Set a new cut-off without clearing the filter state.
    pub fn adjust(&mut self, cut_off: f64) {
        debug_assert!((0.0..0.5).contains(&cut_off));
        let w0 = 2.0 * PI * cut_off;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / SQRT_2;
        let b0 = 1.0 + alpha;
        let b1 = -2.0 * cos_w0;
        let b2 = 1.0 - alpha;
        let (a0, a1) = match self.filter_type {
            FilterType::LowPass => (0.5 * (1.0 - cos_w0), 1.0 - cos_w0),
            FilterType::HighPass => (0.5 * (1.0 + cos_w0), -1.0 - cos_w0),
        };

        // Normalise for 0 dB passband gain: with b0 scaled to 1.0 the
        // coefficients satisfy a0 + a1 + a2 + b1 + b2 = 1.
        self.a0 = (a0 / b0) as f32;
        self.a1 = (a1 / b0) as f32;
        self.a2 = (a0 / b0) as f32;
        self.b1 = (b1 / b0) as f32;
        self.b2 = (b2 / b0) as f32;
    }

    fn state_is_quiet(&self) -> bool {
        self.x1.magnitude() <= DENORM_LIMIT
            && self.x2.magnitude() <= DENORM_LIMIT
            && self.y1.magnitude() <= DENORM_LIMIT
            && self.y2.magnitude() <= DENORM_LIMIT
    }
}

impl<M: Module> Module for Filter<M> {
    type Frame = M::Frame;

    fn is_running(&self) -> bool {
        (!self.source_done && self.source.is_running()) || !self.state_is_quiet()
    }

    fn next(&mut self) -> Result<Option<M::Frame>, Error> {
        if self.source_done && self.state_is_quiet() {
            return Ok(None);
        }
        // Once the source ends the filter keeps ringing on zero input
        // until its state decays away.
        let x = match self.source.next()? {
            Some(s) => s,
            None => {
                self.source_done = true;
                M::Frame::ZERO
            }
        };
        let y = (x * self.a0 + self.x1 * self.a1 + self.x2 * self.a2
            + self.y1 * (-self.b1)
            + self.y2 * (-self.b2))
            .flush_denorm();
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        Ok(Some(y))
    }
}
