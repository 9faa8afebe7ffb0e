//! End-to-end extraction over synthetic WMD/LCD fixtures.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use spu_ir::{Instrument, PatchBank, Song, SongBank, SubInstrument, Track, ADPCM_BLOCK_SIZE};
use spu_master::{extract_patches, extract_song, extract_track, ExtractOptions, ReverbPreset};

fn temp(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("spurip-e2e-{}.wav", name))
}

fn no_abort() -> AtomicBool {
    AtomicBool::new(false)
}

/// A loud looping patch: one loop-start block and a final block, both
/// decoding to a strong positive level.
fn looping_patch() -> Vec<u8> {
    let mut first = [0x77u8; ADPCM_BLOCK_SIZE];
    first[0] = 0x00;
    first[1] = 0x04;
    let mut last = [0x77u8; ADPCM_BLOCK_SIZE];
    last[0] = 0x00;
    last[1] = 0x03;
    [first, last].concat()
}

/// One instrument covering all notes, one song with the given tracks.
fn fixture(track_datas: &[&[u8]]) -> (SongBank, PatchBank) {
    let mut bank = SongBank::default();
    bank.instruments.push(Instrument {
        sub_instruments: vec![SubInstrument {
            volume: 100,
            pan: 64,
            tuning: 60,
            first_note: 0,
            last_note: 127,
            bend_sensitivity_down: 2,
            bend_sensitivity_up: 2,
            patch: 1,
            spu_ads: 0x0000,
            spu_sr: 0x0000,
            ..Default::default()
        }],
    });
    let mut song = Song::default();
    for data in track_datas {
        song.tracks.push(Track {
            beats_per_minute: 120,
            ticks_per_beat: 480,
            data: data.to_vec(),
            ..Default::default()
        });
    }
    bank.songs.push(song);

    let mut patches = PatchBank::new();
    patches.set_patch(1, looping_patch());
    (bank, patches)
}

/// Fast options: no filters or reverb unless a test turns them on.
fn options() -> ExtractOptions {
    ExtractOptions {
        reverb_preset: ReverbPreset::Off,
        high_pass: 0,
        low_pass: 0,
        sinc_window: 3,
        ..Default::default()
    }
}

fn read_wav(path: &PathBuf) -> Vec<u8> {
    let data = std::fs::read(path).unwrap();
    std::fs::remove_file(path).unwrap();
    data
}

/// Note on at time zero, note off one bar (57600/30 ticks... 1920 track
/// ticks = 1 beat at 480 tpb) later, end after another delta.
fn one_note_track() -> Vec<u8> {
    vec![
        0x00, 0x11, 60, 127, // note on C5 full velocity
        0x8e, 0x00, // delta 0x700 = 1792 ticks
        0x12, 60, // note off
        0x00, 0x22, // end of stream
    ]
}

#[test]
fn song_extraction_writes_a_valid_wav() {
    let (bank, patches) = fixture(&[&one_note_track()]);
    let path = temp("basic");
    let summary = extract_song(
        &bank,
        &patches,
        0,
        &path,
        &options(),
        &no_abort(),
        None,
    )
    .unwrap();

    let data = read_wav(&path);
    assert_eq!(&data[0..4], b"RIFF");
    assert_eq!(&data[8..12], b"WAVE");
    // Stereo, 16-bit at the requested rate.
    assert_eq!(u16::from_le_bytes(data[22..24].try_into().unwrap()), 2);
    assert_eq!(u32::from_le_bytes(data[24..28].try_into().unwrap()), 44100);
    // Sizes patched to match the sample count.
    let expected_bytes = summary.samples * 4;
    assert_eq!(
        u32::from_le_bytes(data[40..44].try_into().unwrap()),
        expected_bytes
    );
    assert_eq!(data.len() as u32, 44 + expected_bytes);
    assert!(summary.samples > 0);
    assert!(summary.maximum_amplitude > 0.0);
    assert!(!summary.failed_to_repeat);
}

#[test]
fn held_note_lasts_about_a_second() {
    // 1792 track ticks at 57600 ticks/minute is 1.8667 s of held note;
    // with the release tail the result must land near that.
    let (bank, patches) = fixture(&[&one_note_track()]);
    let path = temp("duration");
    let summary = extract_song(
        &bank,
        &patches,
        0,
        &path,
        &options(),
        &no_abort(),
        None,
    )
    .unwrap();
    read_wav(&path);

    let seconds = summary.samples as f64 / 44100.0;
    assert!(
        (1.8..2.1).contains(&seconds),
        "expected about 1.87 s, got {:.3}",
        seconds
    );
}

#[test]
fn lead_in_prepends_exact_silence() {
    let (bank, patches) = fixture(&[&one_note_track()]);
    let path = temp("leadin");
    let mut opts = options();
    opts.lead_in = 0.1; // 4410 samples
    extract_song(&bank, &patches, 0, &path, &opts, &no_abort(), None).unwrap();

    let data = read_wav(&path);
    let samples: Vec<i16> = data[44..]
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes(c.try_into().unwrap()))
        .collect();
    // 4410 stereo frames of silence then sound.
    let first_sound = samples.iter().position(|&s| s != 0).unwrap();
    assert_eq!(first_sound / 2, 4410);
}

#[test]
fn reverb_extends_the_output() {
    let (bank, patches) = fixture(&[&one_note_track()]);
    let dry_path = temp("dry");
    let dry = extract_song(&bank, &patches, 0, &dry_path, &options(), &no_abort(), None).unwrap();
    read_wav(&dry_path);

    let wet_path = temp("wet");
    let mut opts = options();
    opts.reverb_preset = ReverbPreset::Hall;
    opts.reverb_volume = 0.25;
    let wet = extract_song(&bank, &patches, 0, &wet_path, &opts, &no_abort(), None).unwrap();
    read_wav(&wet_path);

    assert!(
        wet.samples > dry.samples,
        "reverb tail should extend the render: {} vs {}",
        wet.samples,
        dry.samples
    );
}

#[test]
fn normalization_brings_peak_to_full_scale() {
    let (mut bank, patches) = fixture(&[&one_note_track()]);
    // Quiet instrument so normalisation has something to do.
    bank.instruments[0].sub_instruments[0].volume = 20;
    let path = temp("normalize");
    let mut opts = options();
    opts.normalize = true;
    let summary = extract_song(&bank, &patches, 0, &path, &opts, &no_abort(), None).unwrap();

    let data = read_wav(&path);
    let peak = data[44..]
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes(c.try_into().unwrap()).unsigned_abs())
        .max()
        .unwrap();
    assert!(peak >= 32700, "peak after normalisation: {}", peak);
    assert!(summary.normalization_db.unwrap() > 0.0);
    // The spill file is gone.
    assert!(!path.with_extension("wav.tmp").exists());
}

#[test]
fn track_extraction_matches_single_track_song() {
    let (bank, patches) = fixture(&[&one_note_track()]);
    let song_path = temp("song-vs-track-a");
    let track_path = temp("song-vs-track-b");
    extract_song(&bank, &patches, 0, &song_path, &options(), &no_abort(), None).unwrap();
    extract_track(
        &bank,
        &patches,
        0,
        0,
        &track_path,
        &options(),
        &no_abort(),
        None,
    )
    .unwrap();
    assert_eq!(read_wav(&song_path), read_wav(&track_path));
}

#[test]
fn two_track_song_mixes_both() {
    let (bank, patches) = fixture(&[&one_note_track(), &one_note_track()]);
    let both_path = temp("mix-two");
    let both = extract_song(&bank, &patches, 0, &both_path, &options(), &no_abort(), None).unwrap();
    read_wav(&both_path);

    let (bank_one, patches_one) = fixture(&[&one_note_track()]);
    let one_path = temp("mix-one");
    let one = extract_song(
        &bank_one,
        &patches_one,
        0,
        &one_path,
        &options(),
        &no_abort(),
        None,
    )
    .unwrap();
    read_wav(&one_path);

    assert!(both.maximum_amplitude > one.maximum_amplitude * 1.8);
}

#[test]
fn aborted_extraction_leaves_no_file() {
    let (bank, patches) = fixture(&[&one_note_track()]);
    let path = temp("aborted");
    let abort = AtomicBool::new(true);
    let err = extract_song(&bank, &patches, 0, &path, &options(), &abort, None).unwrap_err();
    assert!(matches!(err, spu_master::Error::Aborted));
    assert!(!path.exists());
}

#[test]
fn out_of_range_song_index_is_missing_resource() {
    let (bank, patches) = fixture(&[&one_note_track()]);
    let path = temp("missing");
    let err = extract_song(&bank, &patches, 9, &path, &options(), &no_abort(), None).unwrap_err();
    assert!(matches!(err, spu_master::Error::MissingResource(_)));
    assert!(!path.exists());
}

#[test]
fn patch_extraction_writes_mono_wav() {
    let (_, patches) = fixture(&[&one_note_track()]);
    let path = temp("patch");
    let mut opts = options();
    opts.sample_rate = 11025;
    let extracted = extract_patches(&patches, &[1], Some(&path), &opts, &no_abort()).unwrap();
    assert_eq!(extracted, vec![1]);

    let data = read_wav(&path);
    // Mono at the patch rate; 2 blocks of 28 samples, played once.
    assert_eq!(u16::from_le_bytes(data[22..24].try_into().unwrap()), 1);
    assert_eq!(u32::from_le_bytes(data[24..28].try_into().unwrap()), 11025);
    assert_eq!(data.len(), 44 + 2 * 28 * 2);
}

#[test]
fn missing_patch_in_multi_extraction_is_skipped() {
    let (_, patches) = fixture(&[&one_note_track()]);
    let path = temp("patch-multi");
    let opts = options();
    let extracted = extract_patches(&patches, &[1, 7], Some(&path), &opts, &no_abort()).unwrap();
    assert_eq!(extracted, vec![1]);
    read_wav(&path);

    // A single missing id is fatal instead.
    assert!(extract_patches(&patches, &[7], Some(&path), &opts, &no_abort()).is_err());
}

#[test]
fn round_trip_through_container_formats() {
    // Serialise the fixture through the writers and parse it back; the
    // rendered audio must be identical.
    let (bank, patches) = fixture(&[&one_note_track()]);
    let wmd = spu_formats::write_song_bank(&bank);
    let lcd = spu_formats::write_patch_bank(&patches);
    let bank2 = spu_formats::load_song_bank(&wmd).unwrap();
    let patches2 = spu_formats::load_patch_bank(&lcd).unwrap();

    let a_path = temp("roundtrip-a");
    let b_path = temp("roundtrip-b");
    extract_song(&bank, &patches, 0, &a_path, &options(), &no_abort(), None).unwrap();
    extract_song(&bank2, &patches2, 0, &b_path, &options(), &no_abort(), None).unwrap();
    assert_eq!(read_wav(&a_path), read_wav(&b_path));
}

#[test]
fn determinism_across_runs() {
    let (bank, patches) = fixture(&[&one_note_track()]);
    let mut opts = options();
    opts.reverb_preset = ReverbPreset::Room;
    opts.high_pass = 30;
    opts.low_pass = 15000;

    let a_path = temp("det-a");
    let b_path = temp("det-b");
    extract_song(&bank, &patches, 0, &a_path, &opts, &no_abort(), None).unwrap();
    extract_song(&bank, &patches, 0, &b_path, &opts, &no_abort(), None).unwrap();
    assert_eq!(read_wav(&a_path), read_wav(&b_path));
}
