//! Arbitrary-rate resampling: linear (envelopes) and windowed sinc
//! (audio), plus the process-wide sinc table cache.

use std::f64::consts::PI;
use std::sync::Mutex;

use spu_ir::{Error, Sample};

use crate::module::Module;

/// Linear interpolation between successive source samples.
///
/// Not suitable for audio (it attenuates and aliases), but exactly right
/// for the envelope stream, which is piecewise linear and must not
/// overshoot.
pub struct LinearResampler<M: Module> {
    source: M,
    rate_in: u32,
    rate_out: u32,
    /// Fractional position between window samples, denominated in
    /// `rate_out` steps.
    fractional_position: u32,
    window: [M::Frame; 2],
    /// Index of the last window slot holding a real source sample;
    /// negative once every real sample has slid out.
    last_live_sample: i32,
}

impl<M: Module> LinearResampler<M> {
    /// The rates only matter as a ratio: source audio at `rate_in` keeps
    /// its pitch when pulled from this module at `rate_out`.
    pub fn new(mut source: M, rate_in: u32, rate_out: u32) -> Result<Self, Error> {
        debug_assert!(rate_in > 0 && rate_out > 0);
        let first = source.next()?.unwrap_or(M::Frame::ZERO);
        let second = source.next()?.unwrap_or(M::Frame::ZERO);
        Ok(Self {
            source,
            rate_in,
            rate_out,
            fractional_position: 0,
            window: [first, second],
            last_live_sample: 1,
        })
    }
}

impl<M: Module> Module for LinearResampler<M> {
    type Frame = M::Frame;

    fn is_running(&self) -> bool {
        self.last_live_sample >= 0
    }

    fn next(&mut self) -> Result<Option<M::Frame>, Error> {
        if self.last_live_sample < 0 {
            return Ok(None);
        }

        let step = self.rate_out;
        let sample = if self.fractional_position == 0 {
            self.window[0]
        } else {
            let pos = self.fractional_position as f32 / step as f32;
            self.window[0] * (1.0 - pos) + self.window[1] * pos
        };

        self.fractional_position += self.rate_in;
        while self.fractional_position >= step && self.last_live_sample >= 0 {
            self.fractional_position -= step;
            self.window[0] = self.window[1];
            match self.source.next()? {
                Some(s) => self.window[1] = s,
                None => self.last_live_sample -= 1,
            }
        }
        Ok(Some(sample))
    }
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -

/// Pre-computed Lanczos-windowed sinc coefficients for one
/// (window, rate_out) pair.
///
/// The values are grouped by fractional offset so that the 2W
/// coefficients a single interpolation needs are contiguous; striding
/// through a plain sinc curve by `rate_out` would miss cache on every
/// access.
pub struct SincTable {
    window: u32,
    rate_out: u32,
    table: Vec<f32>,
}

/// Cached tables, never freed. A render normally needs at most two: one
/// for the output rate and one for the reverb rate.
static SINC_CACHE: Mutex<Vec<&'static SincTable>> = Mutex::new(Vec::new());

impl SincTable {
    /// Fetch the table for a (window, rate_out) pair, computing it on
    /// first use.
    pub fn obtain(window: u32, rate_out: u32) -> &'static SincTable {
        let mut cache = SINC_CACHE.lock().expect("sinc cache poisoned");
        if let Some(&table) = cache
            .iter()
            .find(|t| t.window == window && t.rate_out == rate_out)
        {
            return table;
        }
        let table: &'static SincTable = Box::leak(Box::new(SincTable::build(window, rate_out)));
        cache.push(table);
        table
    }

    /// Compute the table values covering positions in
    /// (-pi * window, pi * window]. At distance x (in rate_out steps) the
    /// value is `window * sin(pi_x) * sin(pi_x / window) / pi_x^2` with
    /// `pi_x = pi * x / rate_out`, and 1.0 at x = 0.
    fn build(window: u32, rate_out: u32) -> SincTable {
        debug_assert!(window >= 1);
        debug_assert!(rate_out > 0);
        let mut table = Vec::with_capacity((rate_out * window * 2) as usize);
        let base_pos = -(((window - 1) * rate_out) as i64);
        let scale = PI / rate_out as f64;
        for offset in 0..rate_out as i64 {
            let mut pos = base_pos - offset;
            let end_pos = pos + (rate_out * window * 2) as i64;
            while pos < end_pos {
                if pos != 0 {
                    let pi_x = scale * pos as f64;
                    let value = window as f64 * pi_x.sin() * (pi_x / window as f64).sin()
                        / (pi_x * pi_x);
                    table.push((value as f32).flush_denorm());
                } else {
                    table.push(1.0);
                }
                pos += rate_out as i64;
            }
        }
        debug_assert_eq!(table.len(), (rate_out * window * 2) as usize);
        SincTable {
            window,
            rate_out,
            table,
        }
    }

    /// Starting index of the 2W coefficients for a fractional offset in
    /// [0, rate_out).
    fn index_for_offset(&self, offset: i32) -> usize {
        debug_assert!(offset >= 0 && (offset as u32) < self.rate_out);
        offset as usize * self.window as usize * 2
    }
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -

/// Lanczos-windowed sinc resampling of half-width `window`.
///
/// A window of 7 is transparent; 3 is serviceable with audible artifacts
/// on some material. Cost per output sample is proportional to the
/// window. When downsampling, the source should be low-pass filtered to
/// half the output rate first; that is the caller's job.
pub struct SincResampler<M: Module> {
    source: M,
    rate_in: u32,
    rate_out: u32,
    window: i32,
    /// 2W samples; `head` marks the oldest. Always full.
    buffer: Vec<M::Frame>,
    head: usize,
    /// Offset of the head sample from the interpolation position, in
    /// fractions of a sample with `rate_out` steps per sample.
    offset: i32,
    /// Real source samples still inside the window; the resampler stops
    /// when the last one rolls out.
    live_samples: i32,
    table: &'static SincTable,
}

impl<M: Module> SincResampler<M> {
    pub fn new(mut source: M, window: u32, rate_in: u32, rate_out: u32) -> Result<Self, Error> {
        debug_assert!(window >= 1);
        debug_assert!(rate_in > 0 && rate_out > 0);
        let size = (window * 2) as usize;
        let mut buffer = Vec::with_capacity(size);

        // Pre-fill: repeat the first sample up to where the virtual
        // position crosses zero, then pull real samples. This gives the
        // resampler output from the very first call instead of a
        // window's worth of silence.
        let first = source.next()?.unwrap_or(M::Frame::ZERO);
        buffer.push(first);
        let mut pos = -(rate_out as i64) * (window as i64 - 1);
        for _ in 1..size {
            if pos <= 0 {
                buffer.push(first);
            } else {
                buffer.push(source.next()?.unwrap_or(M::Frame::ZERO));
            }
            pos += rate_out as i64;
        }

        Ok(Self {
            source,
            rate_in,
            rate_out,
            window: window as i32,
            buffer,
            head: 0,
            offset: 0,
            live_samples: size as i32,
            table: SincTable::obtain(window, rate_out),
        })
    }

    /// Input rate currently in effect.
    pub fn rate_in(&self) -> u32 {
        self.rate_in
    }

    /// Change the input rate mid-stream (pitch bends).
    pub fn set_rate_in(&mut self, rate_in: u32) {
        debug_assert!(rate_in > 0);
        self.rate_in = rate_in;
    }
}

impl<M: Module> Module for SincResampler<M> {
    type Frame = M::Frame;

    fn is_running(&self) -> bool {
        self.live_samples > 0
    }

    fn next(&mut self) -> Result<Option<M::Frame>, Error> {
        if self.live_samples <= 0 {
            return Ok(None);
        }

        // Convolve the window with the kernel row for this offset.
        let mut sample = M::Frame::ZERO;
        let mut buffer_index = self.head;
        let table_start = self.table.index_for_offset(self.offset);
        for coefficient in &self.table.table[table_start..table_start + self.window as usize * 2] {
            sample += self.buffer[buffer_index] * *coefficient;
            buffer_index += 1;
            if buffer_index >= self.buffer.len() {
                buffer_index = 0;
            }
        }
        let sample = sample.flush_denorm();

        // Advance, pulling new source samples as the position crosses
        // sample boundaries. Once the source is done, the last live
        // sample is repeated while the window drains.
        self.offset += self.rate_in as i32;
        let limit = self.rate_out as i32;
        while self.offset >= limit {
            self.offset -= limit;
            match self.source.next()? {
                Some(s) => self.buffer[self.head] = s,
                None => {
                    let previous = if self.head > 0 {
                        self.head - 1
                    } else {
                        self.buffer.len() - 1
                    };
                    self.buffer[self.head] = self.buffer[previous];
                    self.live_samples -= 1;
                }
            }
            self.head += 1;
            if self.head >= self.buffer.len() {
                self.head = 0;
            }
        }
        Ok(Some(sample))
    }
}
