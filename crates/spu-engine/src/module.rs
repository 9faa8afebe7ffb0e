//! The pull contract every audio node implements.

use spu_ir::{Error, Sample};

/// A lazy, finite stream of audio samples.
///
/// `next` yields `Ok(Some(sample))` while the module is live and
/// `Ok(None)` once it is permanently exhausted; after the first `None`
/// every later call must also return `None`. `is_running` asks whether a
/// future `next` could still produce a sample without consuming anything.
///
/// A module exclusively owns its upstream source; dropping the module
/// drops the source.
pub trait Module {
    /// Element kind flowing out of this module.
    type Frame: Sample;

    /// Whether a future `next` call could still yield a sample.
    fn is_running(&self) -> bool;

    /// Produce the next sample.
    fn next(&mut self) -> Result<Option<Self::Frame>, Error>;
}

impl<M: Module + ?Sized> Module for Box<M> {
    type Frame = M::Frame;

    fn is_running(&self) -> bool {
        (**self).is_running()
    }

    fn next(&mut self) -> Result<Option<Self::Frame>, Error> {
        (**self).next()
    }
}
