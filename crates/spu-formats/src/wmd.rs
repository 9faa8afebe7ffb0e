//! WMD (SPSX) container parsing and writing.

use spu_ir::{Error, Instrument, Song, SongBank, SubInstrument, Track, MAX_TRACKS};

use crate::Reader;

/// Signature identifying SPSX files ("SPSX").
const SPSX_SIGNATURE: u32 = 0x5853_5053;

/// SPSX version supported.
const SPSX_VERSION: u32 = 1;

/// Record sizes the parser insists on.
const INSTRUMENT_RECORD_SIZE: u16 = 4;
const SUB_INSTRUMENT_RECORD_SIZE: u16 = 16;
const PATCH_RECORD_SIZE: u16 = 12;

/// Parse a WMD file into a [`SongBank`].
pub fn load_song_bank(data: &[u8]) -> Result<SongBank, Error> {
    let mut r = Reader::new(data);
    if r.u32()? != SPSX_SIGNATURE {
        return Err(Error::MalformedInput("not a WMD file (bad signature)".into()));
    }
    if r.u32()? != SPSX_VERSION {
        return Err(Error::MalformedInput(
            "WMD file uses an unsupported SPSX version".into(),
        ));
    }

    let song_count = r.u16()? as usize;
    let unknown_0 = r.array::<14>()?;

    let instrument_count = r.u16()? as usize;
    if r.u16()? != INSTRUMENT_RECORD_SIZE {
        return Err(Error::MalformedInput(
            "corrupt WMD file (bad instrument record size)".into(),
        ));
    }
    let sub_instrument_count = r.u16()? as usize;
    if r.u16()? != SUB_INSTRUMENT_RECORD_SIZE {
        return Err(Error::MalformedInput(
            "corrupt WMD file (bad sub-instrument record size)".into(),
        ));
    }
    let patch_count = r.u16()? as usize;
    if r.u16()? != PATCH_RECORD_SIZE {
        return Err(Error::MalformedInput(
            "corrupt WMD file (bad patch record size)".into(),
        ));
    }
    let unknown_1 = r.array::<8>()?;

    // Instrument headers: sub-instrument count + first index. The
    // sub-instruments must be contiguous and account for the full table.
    let mut sub_counts = Vec::with_capacity(instrument_count);
    let mut expected_first = 0usize;
    for _ in 0..instrument_count {
        let subs = r.u16()? as usize;
        let first = r.u16()? as usize;
        if first != expected_first {
            return Err(Error::MalformedInput(
                "corrupt WMD file (non-contiguous sub-instruments)".into(),
            ));
        }
        expected_first += subs;
        sub_counts.push(subs);
    }
    if expected_first != sub_instrument_count {
        return Err(Error::MalformedInput(
            "corrupt WMD file (wrong number of sub-instruments)".into(),
        ));
    }

    // Sub-instrument records, contiguous in instrument order.
    let mut instruments = Vec::with_capacity(instrument_count);
    for subs in sub_counts {
        let mut instrument = Instrument::default();
        for _ in 0..subs {
            instrument.sub_instruments.push(SubInstrument {
                priority: r.u8()?,
                flags: r.u8()?,
                volume: r.u8()?,
                pan: r.u8()?,
                tuning: r.u8()?,
                fine_tuning: r.u8()?,
                first_note: r.u8()?,
                last_note: r.u8()?,
                bend_sensitivity_down: r.u8()?,
                bend_sensitivity_up: r.u8()?,
                patch: r.u16()?,
                spu_ads: r.u16()?,
                spu_sr: r.u16()?,
            });
        }
        instruments.push(instrument);
    }

    // The patch records hold load addresses that aren't needed to read the
    // LCD data, so they are skipped.
    r.skip(patch_count * PATCH_RECORD_SIZE as usize)?;

    // Songs and their tracks.
    let mut songs = Vec::with_capacity(song_count);
    for _ in 0..song_count {
        let track_count = r.u16()? as usize;
        if track_count == 0 || track_count > MAX_TRACKS {
            return Err(Error::MalformedInput(format!(
                "corrupt WMD file (song has {} tracks)",
                track_count
            )));
        }
        let mut song = Song {
            unknown: r.array::<2>()?,
            ..Default::default()
        };
        for _ in 0..track_count {
            let unknown_0 = r.array::<6>()?;
            let instrument = r.u16()?;
            let unknown_1 = r.array::<6>()?;
            let beats_per_minute = r.u16()?;
            let ticks_per_beat = r.u16()?;
            let repeat = r.u16()? != 0;
            let data_length = r.u32()? as usize;
            let repeat_start = if repeat { r.u32()? } else { 0 };
            let data = r.bytes(data_length)?.to_vec();
            song.tracks.push(Track {
                unknown_0,
                instrument,
                unknown_1,
                beats_per_minute,
                ticks_per_beat,
                repeat,
                repeat_start,
                data,
            });
        }
        songs.push(song);
    }

    Ok(SongBank {
        unknown_0,
        unknown_1,
        instruments,
        songs,
    })
}

/// Serialise a [`SongBank`] back into WMD bytes. Preserved unknown byte
/// runs are written verbatim, so a parse/write cycle round-trips.
pub fn write_song_bank(bank: &SongBank) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&SPSX_SIGNATURE.to_le_bytes());
    out.extend_from_slice(&SPSX_VERSION.to_le_bytes());
    out.extend_from_slice(&(bank.songs.len() as u16).to_le_bytes());
    out.extend_from_slice(&bank.unknown_0);

    let sub_instruments: usize = bank
        .instruments
        .iter()
        .map(|i| i.sub_instruments.len())
        .sum();
    out.extend_from_slice(&(bank.instruments.len() as u16).to_le_bytes());
    out.extend_from_slice(&INSTRUMENT_RECORD_SIZE.to_le_bytes());
    out.extend_from_slice(&(sub_instruments as u16).to_le_bytes());
    out.extend_from_slice(&SUB_INSTRUMENT_RECORD_SIZE.to_le_bytes());
    // The patch table isn't retained, so the rewritten file carries none.
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&PATCH_RECORD_SIZE.to_le_bytes());
    out.extend_from_slice(&bank.unknown_1);

    let mut first_sub = 0u16;
    for instrument in &bank.instruments {
        out.extend_from_slice(&(instrument.sub_instruments.len() as u16).to_le_bytes());
        out.extend_from_slice(&first_sub.to_le_bytes());
        first_sub += instrument.sub_instruments.len() as u16;
    }
    for instrument in &bank.instruments {
        for sub in &instrument.sub_instruments {
            out.push(sub.priority);
            out.push(sub.flags);
            out.push(sub.volume);
            out.push(sub.pan);
            out.push(sub.tuning);
            out.push(sub.fine_tuning);
            out.push(sub.first_note);
            out.push(sub.last_note);
            out.push(sub.bend_sensitivity_down);
            out.push(sub.bend_sensitivity_up);
            out.extend_from_slice(&sub.patch.to_le_bytes());
            out.extend_from_slice(&sub.spu_ads.to_le_bytes());
            out.extend_from_slice(&sub.spu_sr.to_le_bytes());
        }
    }

    for song in &bank.songs {
        out.extend_from_slice(&(song.tracks.len() as u16).to_le_bytes());
        out.extend_from_slice(&song.unknown);
        for track in &song.tracks {
            out.extend_from_slice(&track.unknown_0);
            out.extend_from_slice(&track.instrument.to_le_bytes());
            out.extend_from_slice(&track.unknown_1);
            out.extend_from_slice(&track.beats_per_minute.to_le_bytes());
            out.extend_from_slice(&track.ticks_per_beat.to_le_bytes());
            out.extend_from_slice(&(track.repeat as u16).to_le_bytes());
            out.extend_from_slice(&(track.data.len() as u32).to_le_bytes());
            if track.repeat {
                out.extend_from_slice(&track.repeat_start.to_le_bytes());
            }
            out.extend_from_slice(&track.data);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal WMD: one instrument with one full-range
    /// sub-instrument, one song with one track.
    fn tiny_wmd(track_data: &[u8]) -> Vec<u8> {
        let mut bank = SongBank {
            unknown_0: [0xAA; 14],
            unknown_1: [0xBB; 8],
            ..Default::default()
        };
        bank.instruments.push(Instrument {
            sub_instruments: vec![SubInstrument {
                volume: 127,
                pan: 64,
                tuning: 60,
                last_note: 127,
                bend_sensitivity_down: 2,
                bend_sensitivity_up: 2,
                patch: 1,
                ..Default::default()
            }],
        });
        let mut song = Song::default();
        song.tracks.push(Track {
            beats_per_minute: 120,
            ticks_per_beat: 480,
            data: track_data.to_vec(),
            ..Default::default()
        });
        bank.songs.push(song);
        write_song_bank(&bank)
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = tiny_wmd(&[0x22]);
        data[0] = b'X';
        assert!(load_song_bank(&data).is_err());
    }

    #[test]
    fn rejects_bad_version() {
        let mut data = tiny_wmd(&[0x22]);
        data[4] = 9;
        assert!(load_song_bank(&data).is_err());
    }

    #[test]
    fn rejects_truncated_file() {
        let data = tiny_wmd(&[0x22]);
        assert!(load_song_bank(&data[..data.len() - 1]).is_err());
    }

    #[test]
    fn parses_tiny_bank() {
        let bank = load_song_bank(&tiny_wmd(&[0x22])).unwrap();
        assert_eq!(bank.instruments.len(), 1);
        assert_eq!(bank.songs.len(), 1);
        assert_eq!(bank.unknown_0, [0xAA; 14]);
        assert_eq!(bank.unknown_1, [0xBB; 8]);

        let sub = &bank.instruments[0].sub_instruments[0];
        assert_eq!(sub.volume, 127);
        assert_eq!(sub.tuning, 60);
        assert_eq!(sub.patch, 1);

        let track = &bank.songs[0].tracks[0];
        assert_eq!(track.beats_per_minute, 120);
        assert_eq!(track.ticks_per_beat, 480);
        assert!(!track.repeat);
        assert_eq!(track.data, vec![0x22]);
    }

    #[test]
    fn round_trips_through_write() {
        let original = tiny_wmd(&[0x11, 60, 100, 0x82, 0x00, 0x12, 60, 0x00, 0x22]);
        let bank = load_song_bank(&original).unwrap();
        let rewritten = write_song_bank(&bank);
        assert_eq!(original, rewritten);
    }

    #[test]
    fn repeat_start_read_only_when_repeating() {
        let mut bank = load_song_bank(&tiny_wmd(&[0x22])).unwrap();
        bank.songs[0].tracks[0].repeat = true;
        bank.songs[0].tracks[0].repeat_start = 5;
        let rewritten = write_song_bank(&bank);
        let reparsed = load_song_bank(&rewritten).unwrap();
        assert!(reparsed.songs[0].tracks[0].repeat);
        assert_eq!(reparsed.songs[0].tracks[0].repeat_start, 5);
    }

    #[test]
    fn rejects_non_contiguous_sub_instruments() {
        let mut data = tiny_wmd(&[0x22]);
        // The single instrument header lives right after the 8 unknown
        // bytes at offset 4+4+2+14+12+8 = 44; its first_sub field is at
        // offset 46. Point it somewhere wrong.
        data[46] = 7;
        let err = load_song_bank(&data).unwrap_err();
        assert!(err.to_string().contains("non-contiguous"));
    }
}
