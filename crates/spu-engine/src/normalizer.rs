//! Two-pass level normalisation through a spill file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use spu_ir::{amplitude_to_decibels, decibels_to_amplitude, Error, Sample};

use crate::module::Module;

/// Rescales a stream so its peak magnitude is exactly 1.
///
/// The first pull drains the entire source into a temporary spill file
/// (native byte order) while tracking the peak; later pulls stream the
/// samples back scaled by the reciprocal of the peak. A near-silent
/// source is never amplified by more than `limit_db` (default 30 dB).
/// The spill file is removed when the normaliser is dropped.
pub struct Normalizer<M: Module> {
    source: M,
    spill_path: PathBuf,
    spill_created: bool,
    reader: Option<BufReader<File>>,
    scale: f32,
    samples: u64,
    current_sample: u64,
}

impl<M: Module> Normalizer<M> {
    pub fn new(source: M, spill_path: PathBuf) -> Self {
        Self::with_limit(source, spill_path, 30.0)
    }

    pub fn with_limit(source: M, spill_path: PathBuf, limit_db: f64) -> Self {
        Self {
            source,
            spill_path,
            spill_created: false,
            reader: None,
            scale: decibels_to_amplitude(limit_db) as f32,
            samples: 0,
            current_sample: 0,
        }
    }

    /// Applied adjustment in dB. Meaningful once output has started.
    pub fn adjustment_db(&self) -> f64 {
        amplitude_to_decibels(self.scale as f64)
    }

    /// Drain the source into the spill file and compute the scale.
    fn buffer_source(&mut self) -> Result<(), Error> {
        let mut max_level = 1.0f32 / self.scale;
        let file = File::create(&self.spill_path)?;
        self.spill_created = true;
        let mut writer = BufWriter::new(file);
        while let Some(sample) = self.source.next()? {
            sample.write_raw(&mut writer)?;
            self.samples += 1;
            max_level = max_level.max(sample.magnitude());
        }
        writer.flush()?;
        drop(writer);

        self.scale = 1.0 / max_level;
        log::debug!(
            "normalizer spilled {} samples, scale {:.4}",
            self.samples,
            self.scale
        );
        self.reader = Some(BufReader::new(File::open(&self.spill_path)?));
        Ok(())
    }
}

impl<M: Module> Drop for Normalizer<M> {
    fn drop(&mut self) {
        // Best-effort cleanup; a failing remove has nowhere to report.
        self.reader.take();
        if self.spill_created {
            let _ = std::fs::remove_file(&self.spill_path);
        }
    }
}

impl<M: Module> Module for Normalizer<M> {
    type Frame = M::Frame;

    fn is_running(&self) -> bool {
        self.current_sample < self.samples || self.source.is_running()
    }

    fn next(&mut self) -> Result<Option<M::Frame>, Error> {
        if self.reader.is_none() {
            self.buffer_source()?;
        }
        if self.current_sample >= self.samples {
            return Ok(None);
        }
        self.current_sample += 1;
        let reader = self.reader.as_mut().expect("spill file open");
        let sample = M::Frame::read_raw(reader)?;
        Ok(Some(sample * self.scale))
    }
}
