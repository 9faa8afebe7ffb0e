//! Streaming WAV sink.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use spu_engine::Module;
use spu_ir::{Error, Sample};

/// Samples are buffered in batches of this many 16-bit values before
/// hitting the file.
const BUFFER_SAMPLES: usize = 4096;

/// Writes a module's output as a canonical RIFF/WAVE file: PCM, 16-bit
/// little-endian, mono or stereo according to the module's frame kind.
///
/// The RIFF and data chunk sizes are patched when the file is closed. A
/// render that fails or is aborted removes the partial file.
pub struct WavWriter {
    path: PathBuf,
    file: Option<File>,
    riff_length_offset: u64,
    data_length_offset: u64,
    samples: u32,
}

impl WavWriter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
            riff_length_offset: 0,
            data_length_offset: 0,
            samples: 0,
        }
    }

    /// Drain `source` into the file. Returns the number of samples
    /// written. The abort flag is polled between samples; once set, the
    /// render stops, the partial file is removed, and `Error::Aborted`
    /// comes back.
    pub fn write<M: Module>(
        &mut self,
        source: &mut M,
        sample_rate: u32,
        abort: &AtomicBool,
    ) -> Result<u32, Error> {
        debug_assert!(sample_rate > 0);
        match self.write_inner(source, sample_rate, abort) {
            Ok(samples) => Ok(samples),
            Err(err) => {
                self.remove_partial_output();
                Err(err)
            }
        }
    }

    fn write_inner<M: Module>(
        &mut self,
        source: &mut M,
        sample_rate: u32,
        abort: &AtomicBool,
    ) -> Result<u32, Error> {
        let channels = M::Frame::CHANNELS;
        // A WAV file cannot exceed 4 GiB.
        let max_samples = (u32::MAX - 44) / (2 * channels as u32);
        self.open(sample_rate, channels)?;

        let mut buffer: Vec<i16> = Vec::with_capacity(BUFFER_SAMPLES + 2);
        loop {
            buffer.clear();
            while buffer.len() < BUFFER_SAMPLES {
                if abort.load(Ordering::Relaxed) {
                    return Err(Error::Aborted);
                }
                match source.next()? {
                    Some(sample) => {
                        sample.write_pcm(&mut buffer);
                        self.samples += 1;
                        if self.samples > max_samples {
                            return Err(Error::Io("maximum WAV file size exceeded".into()));
                        }
                    }
                    None => break,
                }
            }
            if buffer.is_empty() {
                break;
            }
            let file = self.file.as_mut().expect("file open");
            let mut bytes = Vec::with_capacity(buffer.len() * 2);
            for value in &buffer {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
            file.write_all(&bytes)?;
        }

        self.close(channels)?;
        Ok(self.samples)
    }

    fn open(&mut self, sample_rate: u32, channels: u16) -> Result<(), Error> {
        debug_assert!(self.file.is_none());
        let mut file = File::create(&self.path)?;

        file.write_all(b"RIFF")?;
        self.riff_length_offset = file.stream_position()?;
        file.write_all(&0u32.to_le_bytes())?;

        file.write_all(b"WAVEfmt ")?;
        file.write_all(&16u32.to_le_bytes())?;
        file.write_all(&1u16.to_le_bytes())?;
        file.write_all(&channels.to_le_bytes())?;
        file.write_all(&sample_rate.to_le_bytes())?;
        file.write_all(&(2 * sample_rate * channels as u32).to_le_bytes())?;
        file.write_all(&(2 * channels).to_le_bytes())?;
        file.write_all(&16u16.to_le_bytes())?;

        file.write_all(b"data")?;
        self.data_length_offset = file.stream_position()?;
        file.write_all(&0u32.to_le_bytes())?;

        self.file = Some(file);
        Ok(())
    }

    /// Patch the chunk sizes and close the file.
    fn close(&mut self, channels: u16) -> Result<(), Error> {
        if let Some(mut file) = self.file.take() {
            let sample_bytes = self.samples * 2 * channels as u32;
            file.seek(SeekFrom::Start(self.riff_length_offset))?;
            file.write_all(&(36 + sample_bytes).to_le_bytes())?;
            file.seek(SeekFrom::Start(self.data_length_offset))?;
            file.write_all(&sample_bytes.to_le_bytes())?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Drop the half-written file after a failure.
    fn remove_partial_output(&mut self) {
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
