//! Graph assembly and the extraction entry points.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;

use log::{info, warn};

use spu_engine::{
    maximum_channels, reset_maximum_channels, AdpcmDecoder, Filter, FilterType, Module,
    Normalizer, Reverb, ReverbPreset, Silencer, SongPlayer, Statistics, StatisticsMode,
    TrackPlayer, Volume,
};
use spu_ir::{amplitude_to_decibels, Error, Frame, PatchBank, SongBank};

use crate::options::ExtractOptions;
use crate::wav::WavWriter;

/// Callback reporting (seconds of audio produced, extraction rate,
/// operation label).
pub type ProgressFn = Box<dyn FnMut(u32, f64, &str)>;

/// What an extraction produced.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExtractSummary {
    /// Samples written to the WAV file.
    pub samples: u32,
    /// Wall-relative extraction rate (song seconds per second); 0 when
    /// the render was too quick to measure.
    pub extraction_rate: f64,
    /// Peak output level, 0..=1.
    pub maximum_amplitude: f32,
    /// RMS output level in dB.
    pub rms_db: f64,
    /// Applied normalisation in dB, when normalisation ran.
    pub normalization_db: Option<f64>,
    /// High-water mark of simultaneously sounding voices.
    pub maximum_channels: i32,
    /// A repeat was requested but the song has no repeat point.
    pub failed_to_repeat: bool,
}

/// The game's per-level reverb settings. They live in the level data
/// rather than the audio files, so the table is fixed here; songs
/// outside 90..=119 play dry.
pub fn default_reverb(song_index: u16) -> (ReverbPreset, f32) {
    const TABLE: [(ReverbPreset, u16); 30] = [
        (ReverbPreset::SpaceEcho, 0x0fff),    // 90
        (ReverbPreset::SpaceEcho, 0x0fff),    // 91
        (ReverbPreset::StudioMedium, 0x27ff), // 92
        (ReverbPreset::Hall, 0x17ff),         // 93
        (ReverbPreset::StudioSmall, 0x23ff),  // 94
        (ReverbPreset::Hall, 0x1fff),         // 95
        (ReverbPreset::StudioLarge, 0x26ff),  // 96
        (ReverbPreset::StudioMedium, 0x2dff), // 97
        (ReverbPreset::StudioLarge, 0x2fff),  // 98
        (ReverbPreset::SpaceEcho, 0x0fff),    // 99
        (ReverbPreset::Hall, 0x1fff),         // 100
        (ReverbPreset::Hall, 0x1fff),         // 101
        (ReverbPreset::SpaceEcho, 0x0fff),    // 102
        (ReverbPreset::Hall, 0x1fff),         // 103
        (ReverbPreset::StudioMedium, 0x27ff), // 104
        (ReverbPreset::SpaceEcho, 0x0fff),    // 105
        (ReverbPreset::Hall, 0x1fff),         // 106
        (ReverbPreset::SpaceEcho, 0x0fff),    // 107
        (ReverbPreset::Hall, 0x1fff),         // 108
        (ReverbPreset::StudioLarge, 0x2fff),  // 109
        (ReverbPreset::SpaceEcho, 0x1fff),    // 110
        (ReverbPreset::SpaceEcho, 0x1fff),    // 111
        (ReverbPreset::Hall, 0x1fff),         // 112
        (ReverbPreset::SpaceEcho, 0x1fff),    // 113
        (ReverbPreset::SpaceEcho, 0x0fff),    // 114
        (ReverbPreset::SpaceEcho, 0x0fff),    // 115
        (ReverbPreset::Hall, 0x1fff),         // 116
        (ReverbPreset::Hall, 0x1fff),         // 117
        (ReverbPreset::StudioLarge, 0x26ff),  // 118
        (ReverbPreset::SpaceEcho, 0x0fff),    // 119
    ];

    let first_song = 90;
    match TABLE.get(song_index.wrapping_sub(first_song) as usize) {
        Some(&(preset, depth)) if song_index >= first_song => {
            (preset, depth as f32 / 0x7fff as f32)
        }
        _ => (ReverbPreset::Off, 0.0),
    }
}

fn track_options(opts: &ExtractOptions) -> spu_engine::TrackOptions {
    spu_engine::TrackOptions {
        sample_rate: opts.sample_rate,
        sinc_window: opts.sinc_window,
        limit_frequency: !opts.unlimited_frequency,
        repair_patches: opts.repair_patches,
        play_count: opts.play_count,
        stereo_width: opts.stereo_width,
    }
}

/// Extract one song to a WAV file.
pub fn extract_song(
    bank: &SongBank,
    patches: &PatchBank,
    song_index: u16,
    wav_path: &Path,
    opts: &ExtractOptions,
    abort: &AtomicBool,
    progress: Option<ProgressFn>,
) -> Result<ExtractSummary, Error> {
    opts.validate()?;
    let song = bank.song(song_index as usize).ok_or_else(|| {
        Error::MissingResource(format!("song index {} is out of range", song_index))
    })?;
    let player = SongPlayer::new(bank, patches, song, track_options(opts))?;
    extract_music(player, song_index, wav_path, opts, abort, progress)
}

/// Extract a single track of a song to a WAV file.
pub fn extract_track(
    bank: &SongBank,
    patches: &PatchBank,
    song_index: u16,
    track_index: u16,
    wav_path: &Path,
    opts: &ExtractOptions,
    abort: &AtomicBool,
    progress: Option<ProgressFn>,
) -> Result<ExtractSummary, Error> {
    opts.validate()?;
    let song = bank.song(song_index as usize).ok_or_else(|| {
        Error::MissingResource(format!("song index {} is out of range", song_index))
    })?;
    let track = song.tracks.get(track_index as usize).ok_or_else(|| {
        Error::MissingResource(format!("track index {} is out of range", track_index))
    })?;
    let player = TrackPlayer::new(bank, patches, track, track_options(opts))?;
    extract_music(player, song_index, wav_path, opts, abort, progress)
}

/// Decode raw patches straight to mono WAV files, one per id. Missing
/// ids are fatal for a single-id request and a warning otherwise.
/// Returns the ids actually extracted.
pub fn extract_patches(
    patches: &PatchBank,
    ids: &[u16],
    output_name: Option<&Path>,
    opts: &ExtractOptions,
    abort: &AtomicBool,
) -> Result<Vec<u16>, Error> {
    opts.validate()?;
    let mut extracted = Vec::new();
    for &id in ids {
        let Some(patch) = patches.patch_by_id(id) else {
            let message = format!("invalid patch ID {}", id);
            if ids.len() == 1 {
                return Err(Error::MissingResource(message));
            }
            warn!("{}", message);
            continue;
        };
        let path = match output_name {
            Some(path) => path.to_path_buf(),
            None => std::path::PathBuf::from(format!("Patch {}.wav", id)),
        };
        let mut decoder = AdpcmDecoder::new(&patch.adpcm, opts.play_count)?;
        let mut writer = WavWriter::new(&path);
        let samples = writer.write(&mut decoder, opts.sample_rate, abort)?;
        info!(
            "extracted patch {}: {} samples ({:.3} seconds)",
            id,
            samples,
            samples as f64 / opts.sample_rate as f64
        );
        extracted.push(id);
    }
    Ok(extracted)
}

/// Shared tail of song and track extraction: wrap the player in the
/// processing graph, drive the WAV sink, and gather the summary.
fn extract_music<'a, P>(
    player: P,
    song_index: u16,
    wav_path: &Path,
    opts: &ExtractOptions,
    abort: &AtomicBool,
    progress: Option<ProgressFn>,
) -> Result<ExtractSummary, Error>
where
    P: Module<Frame = Frame> + RepeatCheck + 'a,
{
    reset_maximum_channels();

    // The player is queried for failed repeats after the render, so the
    // graph gets a shared handle and the driver keeps another.
    let player = Rc::new(RefCell::new(player));
    let mut graph: Box<dyn Module<Frame = Frame> + 'a> = Box::new(SharedModule(Rc::clone(&player)));

    // Gap trimming runs before reverb so echoes don't stretch the gaps
    // back out.
    if opts.maximum_gap >= 0.0 {
        let gap = ((opts.maximum_gap * opts.sample_rate as f64) as i64).max(1);
        graph = Box::new(Silencer::new(graph, -1, -1, gap));
    }

    // Reverb, resolving the automatic preset for this song.
    let (preset, reverb_volume) = match opts.reverb_preset {
        ReverbPreset::Auto => {
            let (preset, volume) = default_reverb(song_index);
            if preset != ReverbPreset::Off {
                info!(
                    "reverb defaulted to {} at {:.1} dB",
                    preset.name(),
                    amplitude_to_decibels(volume as f64)
                );
            }
            (preset, volume)
        }
        preset => (preset, opts.reverb_volume),
    };
    if preset != ReverbPreset::Off {
        graph = Box::new(Reverb::new(
            graph,
            opts.sample_rate,
            preset,
            Frame::splat(reverb_volume),
            opts.sinc_window,
        )?);
    }

    // Lead-in/lead-out runs after reverb so the tail isn't cut off.
    if opts.lead_in >= 0.0 || opts.lead_out >= 0.0 {
        let lead_in = if opts.lead_in >= 0.0 {
            ((opts.lead_in * opts.sample_rate as f64) as i64).max(1)
        } else {
            -1
        };
        let lead_out = if opts.lead_out >= 0.0 {
            ((opts.lead_out * opts.sample_rate as f64) as i64).max(1)
        } else {
            -1
        };
        graph = Box::new(Silencer::new(graph, lead_in, lead_out, -1));
    }

    if opts.high_pass != 0 {
        graph = Box::new(Filter::new(
            graph,
            FilterType::HighPass,
            opts.high_pass as f64 / opts.sample_rate as f64,
        ));
    }
    if opts.low_pass != 0 {
        graph = Box::new(Filter::new(
            graph,
            FilterType::LowPass,
            opts.low_pass as f64 / opts.sample_rate as f64,
        ));
    }

    // Progress reporting comes from the outermost statistics module;
    // when normalising, a second one upstream of the normaliser reports
    // the (slower) extraction pass.
    let shared_progress = progress.map(|p| Rc::new(RefCell::new(p)));

    let mut summary = ExtractSummary::default();
    let samples;
    let rate = opts.sample_rate;
    if opts.normalize {
        if let Some(shared) = shared_progress.clone() {
            let callback: spu_engine::ProgressCallback = Box::new(move |seconds, measured_rate| {
                (*shared.borrow_mut())(seconds, measured_rate, "extracted")
            });
            graph = Box::new(Statistics::new(
                graph,
                StatisticsMode::Progress,
                rate,
                Some(callback),
            ));
        }
        let spill = wav_path.with_extension("wav.tmp");
        let normalizer = Normalizer::new(graph, spill);
        let volume = Volume::new(normalizer, opts.volume);
        let callback = shared_progress.map(|shared| -> spu_engine::ProgressCallback {
            Box::new(move |seconds, measured_rate| {
                (*shared.borrow_mut())(seconds, measured_rate, "normalized")
            })
        });
        let mut statistics = Statistics::new(volume, StatisticsMode::Detailed, rate, callback);

        let mut writer = WavWriter::new(wav_path);
        samples = writer.write(&mut statistics, rate, abort)?;
        summary.normalization_db = Some(statistics.source().source().adjustment_db());
        summary.extraction_rate = statistics.extraction_rate();
        summary.maximum_amplitude = statistics.maximum_amplitude();
        summary.rms_db = statistics.rms_db();
    } else {
        let volume = Volume::new(graph, opts.volume);
        let callback = shared_progress.map(|shared| -> spu_engine::ProgressCallback {
            Box::new(move |seconds, measured_rate| {
                (*shared.borrow_mut())(seconds, measured_rate, "extracted")
            })
        });
        let mut statistics = Statistics::new(volume, StatisticsMode::Detailed, rate, callback);

        let mut writer = WavWriter::new(wav_path);
        samples = writer.write(&mut statistics, rate, abort)?;
        summary.extraction_rate = statistics.extraction_rate();
        summary.maximum_amplitude = statistics.maximum_amplitude();
        summary.rms_db = statistics.rms_db();
    }

    summary.samples = samples;
    summary.maximum_channels = maximum_channels();
    summary.failed_to_repeat = player.borrow().failed();
    if summary.failed_to_repeat {
        warn!("song does not contain a repeat point; play-count ignored");
    }
    Ok(summary)
}

/// Adapter letting the graph own a shared handle to the player while
/// the driver keeps one for post-render queries.
struct SharedModule<P>(Rc<RefCell<P>>);

impl<P: Module> Module for SharedModule<P> {
    type Frame = P::Frame;

    fn is_running(&self) -> bool {
        self.0.borrow().is_running()
    }

    fn next(&mut self) -> Result<Option<P::Frame>, Error> {
        self.0.borrow_mut().next()
    }
}

/// The repeat query both player kinds answer.
trait RepeatCheck {
    fn failed(&self) -> bool;
}

impl RepeatCheck for SongPlayer<'_> {
    fn failed(&self) -> bool {
        self.failed_to_repeat()
    }
}

impl RepeatCheck for TrackPlayer<'_> {
    fn failed(&self) -> bool {
        self.failed_to_repeat()
    }
}
