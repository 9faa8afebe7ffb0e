//! LCD container parsing and writing.
//!
//! Layout: a `u16` patch count, that many `u16` patch ids, zero padding
//! to offset 0x800 (one CD sector), then each patch as 16 zero bytes
//! followed by its ADPCM blocks, padded until the next patch header.

use spu_ir::{block_is_final, Error, PatchBank, ADPCM_BLOCK_SIZE};

use crate::Reader;

/// Offset where patch data begins: the size of one CD sector.
const DATA_START: usize = 0x800;

const ZERO_BLOCK: [u8; ADPCM_BLOCK_SIZE] = [0; ADPCM_BLOCK_SIZE];

/// Parse an LCD file into a [`PatchBank`].
pub fn load_patch_bank(data: &[u8]) -> Result<PatchBank, Error> {
    let mut r = Reader::new(data);
    let patch_count = r.u16()? as usize;
    let mut ids = Vec::with_capacity(patch_count);
    for _ in 0..patch_count {
        ids.push(r.u16()?);
    }

    // Patch data starts on the first CD sector boundary.
    r.seek(DATA_START)?;
    let mut bank = PatchBank::new();
    for id in ids {
        // Each patch is preceded by a 16-zero-byte marker.
        if r.bytes(ADPCM_BLOCK_SIZE)? != ZERO_BLOCK {
            return Err(Error::MalformedInput(format!(
                "invalid header for patch {}",
                id
            )));
        }

        // Accumulate blocks until the final flag. The WMD's patch table
        // would give the sizes, but scanning for the flag lets an LCD be
        // loaded on its own.
        let mut adpcm = Vec::new();
        while !r.is_eof() {
            let block = r.bytes(ADPCM_BLOCK_SIZE)?;
            adpcm.extend_from_slice(block);
            if block_is_final(block) {
                break;
            }
        }
        if adpcm.is_empty() || !block_is_final(&adpcm[adpcm.len() - ADPCM_BLOCK_SIZE..]) {
            return Err(Error::MalformedInput(format!(
                "patch {} has no final block",
                id
            )));
        }
        bank.set_patch(id, adpcm);

        // Skip padding up to the next patch marker.
        while !r.is_eof() {
            let position = r.position();
            if r.bytes(ADPCM_BLOCK_SIZE)? == ZERO_BLOCK {
                r.seek(position)?;
                break;
            }
        }
    }
    Ok(bank)
}

/// Serialise a [`PatchBank`] into LCD bytes, zero-padding the header out
/// to the CD sector boundary.
pub fn write_patch_bank(bank: &PatchBank) -> Vec<u8> {
    debug_assert!(!bank.is_empty());
    let mut out = Vec::new();
    out.extend_from_slice(&(bank.patches().len() as u16).to_le_bytes());
    for patch in bank.patches() {
        out.extend_from_slice(&patch.id.to_le_bytes());
    }
    out.resize(DATA_START, 0);
    for patch in bank.patches() {
        out.extend_from_slice(&ZERO_BLOCK);
        out.extend_from_slice(&patch.adpcm);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(flags: u8, fill: u8) -> [u8; ADPCM_BLOCK_SIZE] {
        let mut b = [fill; ADPCM_BLOCK_SIZE];
        b[0] = 0;
        b[1] = flags;
        b
    }

    fn tiny_lcd() -> Vec<u8> {
        let mut bank = PatchBank::new();
        bank.set_patch(
            7,
            [block(0x00, 1), block(0x01, 2)].concat(),
        );
        bank.set_patch(9, block(0x01, 3).to_vec());
        write_patch_bank(&bank)
    }

    #[test]
    fn writer_pads_to_sector_boundary() {
        let data = tiny_lcd();
        // Header: count + 2 ids, then zeros to 0x800.
        assert_eq!(&data[0..2], &2u16.to_le_bytes());
        assert!(data[6..DATA_START].iter().all(|&b| b == 0));
        assert_eq!(data.len(), DATA_START + 16 + 32 + 16 + 16);
    }

    #[test]
    fn parses_what_it_writes() {
        let bank = load_patch_bank(&tiny_lcd()).unwrap();
        assert_eq!(bank.patches().len(), 2);
        let p7 = bank.patch_by_id(7).unwrap();
        assert_eq!(p7.adpcm.len(), 2 * ADPCM_BLOCK_SIZE);
        assert_eq!(p7.adpcm[2], 1);
        let p9 = bank.patch_by_id(9).unwrap();
        assert_eq!(p9.adpcm.len(), ADPCM_BLOCK_SIZE);
        assert_eq!(p9.adpcm[2], 3);
    }

    #[test]
    fn tolerates_padding_between_patches() {
        let mut bank = PatchBank::new();
        bank.set_patch(1, block(0x01, 1).to_vec());
        bank.set_patch(2, block(0x01, 2).to_vec());
        let mut data = write_patch_bank(&bank);
        // Inject a padding block between the first patch and the next
        // patch's zero marker.
        let insert_at = DATA_START + 16 + 16;
        let padding = block(0x00, 0xEE);
        data.splice(insert_at..insert_at, padding.iter().copied());
        let parsed = load_patch_bank(&data).unwrap();
        assert_eq!(parsed.patches().len(), 2);
        assert_eq!(parsed.patch_by_id(2).unwrap().adpcm[2], 2);
    }

    #[test]
    fn rejects_missing_patch_marker() {
        let mut data = tiny_lcd();
        data[DATA_START] = 1;
        assert!(load_patch_bank(&data).is_err());
    }

    #[test]
    fn rejects_truncated_patch_data() {
        let data = tiny_lcd();
        assert!(load_patch_bank(&data[..DATA_START + 16 + 8]).is_err());
    }
}
