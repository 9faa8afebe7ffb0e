//! Silence adjustment: lead-in, lead-out, and gap limiting.

use std::cell::RefCell;

use spu_ir::{Error, Sample};

use crate::module::Module;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    LeadIn,
    Gaps,
    LeadOut,
    Finished,
}

/// Buffering state. `is_running` must be able to top the buffers up
/// without a `&mut` receiver — answering it accurately requires running
/// the same capping logic `next` uses — so everything that moves lives
/// behind a `RefCell`.
struct Buffers<M: Module> {
    source: M,
    state: State,
    /// Queued silence, emitted before the queued non-silent sample.
    buffered_silence: u64,
    unsilent_sample: Option<M::Frame>,
    /// Failure hit while topping up from `is_running`, surfaced by the
    /// next `next` call.
    pending_error: Option<Error>,
}

impl<M: Module> Buffers<M> {
    fn is_empty(&self) -> bool {
        self.buffered_silence == 0 && self.unsilent_sample.is_none()
    }
}

/// Rewrites the silent stretches of a stream.
///
/// `lead_in` and `lead_out` are exact sample counts of silence to
/// enforce at the start and end; `gap` caps the length of silent runs in
/// between. Negative values leave the respective stretch as observed.
/// A configured gap must be at least 1, otherwise ordinary zero
/// crossings would be collapsed.
pub struct Silencer<M: Module> {
    lead_in: i64,
    lead_out: i64,
    gap: i64,
    buffers: RefCell<Buffers<M>>,
}

impl<M: Module> Silencer<M> {
    pub fn new(source: M, lead_in: i64, lead_out: i64, gap: i64) -> Self {
        debug_assert!(gap != 0);
        Self {
            lead_in,
            lead_out,
            gap,
            buffers: RefCell::new(Buffers {
                source,
                state: State::LeadIn,
                buffered_silence: 0,
                unsilent_sample: None,
                pending_error: None,
            }),
        }
    }

    /// Refill the buffers if they are dry, remembering any source
    /// failure for the next `next` call.
    fn top_up(&self) {
        let buffers = &mut *self.buffers.borrow_mut();
        if buffers.pending_error.is_some()
            || !buffers.is_empty()
            || buffers.state == State::Finished
        {
            return;
        }
        if let Err(err) = self.process_audio(buffers) {
            buffers.pending_error = Some(err);
        }
    }

    /// Count silence up to the next non-silent sample (or the end of
    /// the source), then apply the rule for the current state.
    fn process_audio(&self, buffers: &mut Buffers<M>) -> Result<(), Error> {
        debug_assert!(buffers.is_empty());
        while buffers.unsilent_sample.is_none() {
            match buffers.source.next()? {
                Some(s) if s.is_silent() => buffers.buffered_silence += 1,
                Some(s) => buffers.unsilent_sample = Some(s),
                None => break,
            }
        }

        // Between sounds: cap the silent run. A run that ends the source
        // becomes the lead-out instead.
        if buffers.state == State::Gaps {
            if buffers.unsilent_sample.is_some() {
                if self.gap >= 0 && buffers.buffered_silence > self.gap as u64 {
                    buffers.buffered_silence = self.gap as u64;
                }
            } else {
                buffers.state = State::LeadOut;
            }
        }

        if buffers.state == State::LeadOut {
            if self.lead_out >= 0 {
                buffers.buffered_silence = self.lead_out as u64;
            }
            buffers.state = State::Finished;
        }

        // Only reachable on the first fill, before any sound was seen.
        if buffers.state == State::LeadIn {
            if self.lead_in >= 0 {
                buffers.buffered_silence = self.lead_in as u64;
            }
            buffers.state = if buffers.unsilent_sample.is_some() {
                State::Gaps
            } else {
                State::LeadOut
            };
        }
        Ok(())
    }
}

impl<M: Module> Module for Silencer<M> {
    type Frame = M::Frame;

    fn is_running(&self) -> bool {
        // Topping up first means the answer reflects what `next` will
        // actually produce, not just whether the source has samples
        // left (they may all be absorbed by the gap or lead-out caps).
        self.top_up();
        let buffers = self.buffers.borrow();
        buffers.pending_error.is_some() || !buffers.is_empty()
    }

    fn next(&mut self) -> Result<Option<M::Frame>, Error> {
        self.top_up();
        let buffers = self.buffers.get_mut();
        if let Some(err) = buffers.pending_error.take() {
            return Err(err);
        }
        if buffers.buffered_silence > 0 {
            buffers.buffered_silence -= 1;
            return Ok(Some(M::Frame::ZERO));
        }
        if let Some(sample) = buffers.unsilent_sample.take() {
            return Ok(Some(sample));
        }
        debug_assert_eq!(buffers.state, State::Finished);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::test_support::{drain, SliceSource};

    fn source(samples: &[f32]) -> SliceSource<f32> {
        SliceSource::new(samples.to_vec())
    }

    #[test]
    fn lead_in_replaces_observed_silence() {
        let mut s = Silencer::new(source(&[0.0, 0.0, 0.0, 0.5, 0.2]), 2, -1, -1);
        assert_eq!(drain(&mut s), vec![0.0, 0.0, 0.5, 0.2]);
    }

    #[test]
    fn lead_in_extends_short_silence() {
        let mut s = Silencer::new(source(&[0.5]), 3, -1, -1);
        assert_eq!(drain(&mut s), vec![0.0, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn unset_lead_in_keeps_observed_silence() {
        let mut s = Silencer::new(source(&[0.0, 0.0, 0.5]), -1, -1, -1);
        assert_eq!(drain(&mut s), vec![0.0, 0.0, 0.5]);
    }

    #[test]
    fn trailing_silence_kept_when_lead_out_unset() {
        let mut s = Silencer::new(source(&[0.0, 0.0, 0.5, 0.0, 0.2, 0.0, 0.0]), 5, -1, -1);
        let out = drain(&mut s);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.2, 0.0, 0.0]);
    }

    #[test]
    fn lead_out_replaces_trailing_silence() {
        let mut s = Silencer::new(source(&[0.5, 0.0, 0.0, 0.0]), -1, 1, -1);
        assert_eq!(drain(&mut s), vec![0.5, 0.0]);
    }

    #[test]
    fn gap_caps_internal_silence() {
        let mut s = Silencer::new(source(&[0.5, 0.0, 0.0, 0.0, 0.0, 0.4]), -1, -1, 2);
        assert_eq!(drain(&mut s), vec![0.5, 0.0, 0.0, 0.4]);
    }

    #[test]
    fn gap_leaves_short_runs_alone() {
        let mut s = Silencer::new(source(&[0.5, 0.0, 0.4]), -1, -1, 2);
        assert_eq!(drain(&mut s), vec![0.5, 0.0, 0.4]);
    }

    #[test]
    fn all_silent_source_with_lead_in_and_out() {
        let mut s = Silencer::new(source(&[0.0, 0.0, 0.0]), 2, 1, -1);
        // Never any sound: lead-in silence, then lead-out silence.
        assert_eq!(drain(&mut s), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn empty_source_emits_only_configured_silence() {
        let mut s = Silencer::new(source(&[]), 2, 2, -1);
        assert_eq!(drain(&mut s), vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn near_silent_samples_count_as_silence() {
        // Below 1/32767 counts as silent and is replaced by exact zeros.
        let tiny = 0.5 / 32767.0;
        let mut s = Silencer::new(source(&[tiny, 0.5]), 1, -1, -1);
        assert_eq!(drain(&mut s), vec![0.0, 0.5]);
    }

    #[test]
    fn stereo_silence_requires_both_channels_quiet() {
        use spu_ir::Frame;
        let input = vec![
            Frame::new(0.0, 0.0),
            Frame::new(0.0, 0.5),
            Frame::new(0.0, 0.0),
        ];
        let mut s = Silencer::new(SliceSource::new(input), 0, 0, -1);
        let out = drain(&mut s);
        assert_eq!(out, vec![Frame::new(0.0, 0.5)]);
    }

    #[test]
    fn is_running_accounts_for_absorbed_trailing_silence() {
        // One sound then one trailing silent sample that a lead-out of 0
        // absorbs entirely. After the sound is taken the source still
        // holds a sample, but it can never become output.
        let mut s = Silencer::new(source(&[0.5, 0.0]), -1, 0, -1);
        assert!(s.is_running());
        assert_eq!(s.next().unwrap(), Some(0.5));
        assert!(!s.is_running());
        assert_eq!(s.next().unwrap(), None);
    }

    #[test]
    fn is_running_does_not_discard_buffered_audio() {
        // Asking repeatedly must not consume anything the caller would
        // have received.
        let mut s = Silencer::new(source(&[0.0, 0.5, 0.0, 0.3]), -1, -1, -1);
        for _ in 0..5 {
            assert!(s.is_running());
        }
        assert_eq!(drain(&mut s), vec![0.0, 0.5, 0.0, 0.3]);
    }

    #[test]
    fn is_running_true_while_lead_out_pending() {
        let mut s = Silencer::new(source(&[0.5]), -1, 2, -1);
        assert_eq!(s.next().unwrap(), Some(0.5));
        // Two lead-out samples are still owed.
        assert!(s.is_running());
        assert_eq!(s.next().unwrap(), Some(0.0));
        assert_eq!(s.next().unwrap(), Some(0.0));
        assert!(!s.is_running());
    }
}
