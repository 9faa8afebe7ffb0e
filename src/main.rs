//! spurip — extract music, tracks, and patches from PSX Doom data.
//!
//! Usage:
//!   spurip song <file.wmd> <lcd-file-or-dir> [range] [options]
//!   spurip track <file.wmd> <lcd-file-or-dir> <song> <track> <out.wav> [options]
//!   spurip patch <lcd-file-or-dir> <range> [options]
//!   spurip pack <music-dir> <out.wmd> <out.lcd>

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};

use spu_ir::{decibels_to_amplitude, PatchBank, SongBank};
use spu_master::{
    default_song_name, extract_patches, extract_song, extract_track, ExtractOptions, ReverbPreset,
    PATCH_SAMPLE_RATE,
};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        return Ok(());
    }

    let (positional, mut options, sample_rate_given) = parse_arguments(&args[1..])?;
    let abort = install_abort_handler()?;

    match args[0].as_str() {
        "song" => {
            if positional.len() < 2 || positional.len() > 3 {
                bail!("usage: spurip song <file.wmd> <lcd-file-or-dir> [range] [options]");
            }
            let bank = load_song_bank(Path::new(&positional[0]))?;
            let patches = load_patches(Path::new(&positional[1]), &options)?;
            let song_limit = bank.songs.len() as u16;
            let indexes = match positional.get(2) {
                Some(range) => parse_range(range, song_limit).context("bad song range")?,
                None => (0..song_limit).collect(),
            };
            for &index in &indexes {
                let name = options
                    .output
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(default_song_name(index)));
                println!("Extracting song {} ({})", index, name.display());
                let summary = extract_song(
                    &bank,
                    &patches,
                    index,
                    &name,
                    &options.extract,
                    &abort,
                    Some(progress_printer()),
                )?;
                report_summary(&summary, options.extract.sample_rate);
            }
        }
        "track" => {
            if positional.len() != 5 {
                bail!(
                    "usage: spurip track <file.wmd> <lcd-file-or-dir> <song> <track> <out.wav> [options]"
                );
            }
            let bank = load_song_bank(Path::new(&positional[0]))?;
            let patches = load_patches(Path::new(&positional[1]), &options)?;
            let song: u16 = positional[2].parse().context("bad song index")?;
            let track: u16 = positional[3].parse().context("bad track index")?;
            let out = PathBuf::from(&positional[4]);
            println!("Extracting song {} track {} ({})", song, track, out.display());
            let summary = extract_track(
                &bank,
                &patches,
                song,
                track,
                &out,
                &options.extract,
                &abort,
                Some(progress_printer()),
            )?;
            report_summary(&summary, options.extract.sample_rate);
        }
        "patch" => {
            if positional.len() != 2 {
                bail!("usage: spurip patch <lcd-file-or-dir> <range> [options]");
            }
            if !sample_rate_given {
                options.extract.sample_rate = PATCH_SAMPLE_RATE;
            }
            let patches = load_patches(Path::new(&positional[0]), &options)?;
            let ids = parse_range(&positional[1], patches.maximum_id().saturating_add(1))
                .context("bad patch range")?;
            let extracted = extract_patches(
                &patches,
                &ids,
                options.output.as_deref(),
                &options.extract,
                &abort,
            )?;
            println!("Extracted {} patch(es).", extracted.len());
        }
        "pack" => {
            if positional.len() != 3 {
                bail!("usage: spurip pack <music-dir> <out.wmd> <out.lcd>");
            }
            pack_music_dir(
                Path::new(&positional[0]),
                Path::new(&positional[1]),
                Path::new(&positional[2]),
                &options,
            )?;
        }
        "help" | "--help" | "-h" => print_usage(),
        action => bail!("unknown action '{}'; try 'spurip help'", action),
    }
    Ok(())
}

struct CliOptions {
    extract: ExtractOptions,
    output: Option<PathBuf>,
}

/// Split flags from positional arguments. Returns whether --sample-rate
/// was given explicitly so the patch action can pick its own default.
fn parse_arguments(args: &[String]) -> Result<(Vec<String>, CliOptions, bool)> {
    let mut positional = Vec::new();
    let mut options = CliOptions {
        extract: ExtractOptions::default(),
        output: None,
    };
    let mut sample_rate_given = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if !arg.starts_with("--") {
            positional.push(arg.clone());
            continue;
        }
        let mut value = || {
            iter.next()
                .ok_or_else(|| anyhow!("option {} needs a value", arg))
        };
        match arg.as_str() {
            "--volume" => {
                let db: f64 = value()?.parse().context("bad --volume")?;
                options.extract.volume = decibels_to_amplitude(db) as f32;
            }
            "--normalize" => options.extract.normalize = true,
            "--reverb" => {
                let name = value()?;
                options.extract.reverb_preset = ReverbPreset::from_name(name)
                    .ok_or_else(|| anyhow!("unknown reverb preset '{}'", name))?;
            }
            "--reverb-volume" => {
                let db: f64 = value()?.parse().context("bad --reverb-volume")?;
                options.extract.reverb_volume = decibels_to_amplitude(db) as f32;
            }
            "--play-count" => {
                options.extract.play_count = value()?.parse().context("bad --play-count")?;
            }
            "--lead-in" => {
                options.extract.lead_in = value()?.parse().context("bad --lead-in")?;
            }
            "--lead-out" => {
                options.extract.lead_out = value()?.parse().context("bad --lead-out")?;
            }
            "--max-gap" => {
                options.extract.maximum_gap = value()?.parse().context("bad --max-gap")?;
            }
            "--stereo-width" => {
                options.extract.stereo_width = value()?.parse().context("bad --stereo-width")?;
            }
            "--repair" => options.extract.repair_patches = true,
            "--unlimited-frequency" => options.extract.unlimited_frequency = true,
            "--sample-rate" => {
                options.extract.sample_rate = value()?.parse().context("bad --sample-rate")?;
                sample_rate_given = true;
            }
            "--high-pass" => {
                options.extract.high_pass = value()?.parse().context("bad --high-pass")?;
            }
            "--low-pass" => {
                options.extract.low_pass = value()?.parse().context("bad --low-pass")?;
            }
            "--sinc-window" => {
                options.extract.sinc_window = value()?.parse().context("bad --sinc-window")?;
            }
            "--output" => options.output = Some(PathBuf::from(value()?)),
            _ => bail!("unknown option '{}'; try 'spurip help'", arg),
        }
    }
    Ok((positional, options, sample_rate_given))
}

/// Parse "3", "3-7", or "1,4,9-11" into indexes below `limit`.
fn parse_range(spec: &str, limit: u16) -> Result<Vec<u16>> {
    let mut indexes = Vec::new();
    for part in spec.split(',') {
        let (first, last) = match part.split_once('-') {
            Some((a, b)) => (
                a.trim().parse::<u16>().context("bad range start")?,
                b.trim().parse::<u16>().context("bad range end")?,
            ),
            None => {
                let single = part.trim().parse::<u16>().context("bad range value")?;
                (single, single)
            }
        };
        if first > last {
            bail!("range {}-{} is backwards", first, last);
        }
        if last >= limit {
            bail!("index {} is out of range (limit {})", last, limit);
        }
        indexes.extend(first..=last);
    }
    if indexes.is_empty() {
        bail!("empty range");
    }
    Ok(indexes)
}

fn install_abort_handler() -> Result<Arc<AtomicBool>> {
    let abort = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&abort);
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
        .context("failed to install interrupt handler")?;
    Ok(abort)
}

fn progress_printer() -> Box<dyn FnMut(u32, f64, &str)> {
    Box::new(|seconds, rate, operation| {
        if rate > 0.0 {
            print!(
                "  {}: {:2}:{:02} ({:.1}x)    \r",
                operation,
                seconds / 60,
                seconds % 60,
                rate
            );
        } else {
            print!("  {}: {:2}:{:02}           \r", operation, seconds / 60, seconds % 60);
        }
        let _ = std::io::stdout().flush();
    })
}

fn report_summary(summary: &spu_master::ExtractSummary, sample_rate: u32) {
    let seconds = summary.samples / sample_rate;
    let millis = (summary.samples % sample_rate) as u64 * 1000 / sample_rate as u64;
    if summary.extraction_rate > 0.0 {
        println!(
            "Extracted: {}:{:02}.{:03} ({:.1}x)    ",
            seconds / 60,
            seconds % 60,
            millis,
            summary.extraction_rate
        );
    } else {
        println!("Extracted: {}:{:02}.{:03}            ", seconds / 60, seconds % 60, millis);
    }
    if let Some(db) = summary.normalization_db {
        log::info!("normalization: {:.1} dB", db);
    }
    log::info!("maximum channels: {}", summary.maximum_channels);
    log::info!(
        "maximum level: {:.1}%  rms: {:.1} dB",
        summary.maximum_amplitude * 100.0,
        summary.rms_db
    );
    if summary.failed_to_repeat {
        eprintln!("Warning: song does not contain a repeat point; play-count ignored.");
    }
}

/// Read a WMD, accepting a directory holding one.
fn load_song_bank(path: &Path) -> Result<SongBank> {
    let file = if path.is_dir() {
        find_files(path, "wmd")?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no .wmd file under {}", path.display()))?
    } else {
        path.to_path_buf()
    };
    let data = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
    spu_formats::load_song_bank(&data).with_context(|| format!("parsing {}", file.display()))
}

/// Read one LCD file, or merge every LCD under a directory.
fn load_patches(path: &Path, options: &CliOptions) -> Result<PatchBank> {
    let mut bank = PatchBank::new();
    if path.is_dir() {
        let files = find_files(path, "lcd")?;
        if files.is_empty() {
            bail!("no .lcd files under {}", path.display());
        }
        for file in files {
            let data =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let parsed = spu_formats::load_patch_bank(&data)
                .with_context(|| format!("parsing {}", file.display()))?;
            bank.merge(&parsed);
        }
    } else {
        let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        bank = spu_formats::load_patch_bank(&data)
            .with_context(|| format!("parsing {}", path.display()))?;
    }
    if options.extract.repair_patches {
        bank.repair_patches()?;
    }
    Ok(bank)
}

/// Recursively collect files with the given extension, sorted for a
/// deterministic merge order.
fn find_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in
            std::fs::read_dir(&current).with_context(|| format!("listing {}", current.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(extension))
            {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Merge the audio data under a directory into one WMD + LCD pair.
fn pack_music_dir(dir: &Path, wmd_out: &Path, lcd_out: &Path, options: &CliOptions) -> Result<()> {
    let bank = load_song_bank(dir)?;
    let mut patches = load_patches(dir, options)?;
    patches.sort();

    std::fs::write(wmd_out, spu_formats::write_song_bank(&bank))
        .with_context(|| format!("writing {}", wmd_out.display()))?;
    std::fs::write(lcd_out, spu_formats::write_patch_bank(&patches))
        .with_context(|| format!("writing {}", lcd_out.display()))?;
    println!(
        "Packed {} songs and {} patches.",
        bank.songs.len(),
        patches.patches().len()
    );
    Ok(())
}

fn print_usage() {
    println!(
        "spurip - extract music and sound from PSX Doom / Final Doom data files

Usage:
  spurip song <file.wmd> <lcd-file-or-dir> [range] [options]
  spurip track <file.wmd> <lcd-file-or-dir> <song> <track> <out.wav> [options]
  spurip patch <lcd-file-or-dir> <range> [options]
  spurip pack <music-dir> <out.wmd> <out.lcd>

Ranges are comma lists of indexes or spans, e.g. 90 or 90-119 or 1,4,9-11.

Options:
  --volume <dB>            output amplification (default 0)
  --normalize              rescale so the peak level is 0 dB
  --reverb <preset>        off, room, studio-small, studio-medium,
                           studio-large, hall, half-echo, space-echo,
                           auto (default auto)
  --reverb-volume <dB>     reverb level (default -6)
  --play-count <n>         times to play repeating material, 0 = forever
                           (default 1)
  --lead-in <seconds>      enforce exact leading silence
  --lead-out <seconds>     enforce exact trailing silence
  --max-gap <seconds>      cap silent gaps within the audio
  --stereo-width <w>       -1 (mono) to 1 (wide), default 0
  --repair                 mend patches with known clicks and pops
  --unlimited-frequency    lift the 4x44.1 kHz hardware pitch clamp
  --sample-rate <hz>       8000-192000 (default 44100; patches 11025)
  --high-pass <hz>         post-mix high-pass, 0 disables (default 30)
  --low-pass <hz>          post-mix low-pass, 0 disables (default 15000)
  --sinc-window <n>        resampling quality, >= 1 (default 7)
  --output <file>          output file name (song/patch actions)"
    );
}
