//! Patches: raw ADPCM-encoded sample data and the bank that owns them.

use crate::error::Error;

/// Number of bytes per ADPCM encoded data block.
pub const ADPCM_BLOCK_SIZE: usize = 16;

/// Number of audio samples generated from each data block.
pub const ADPCM_SAMPLES_PER_BLOCK: usize = 28;

/// Sampling rate of all patch data.
pub const PATCH_SAMPLE_RATE: u32 = 11025;

/// Check if an ADPCM data block is flagged as the final block.
pub fn block_is_final(block: &[u8]) -> bool {
    block[1] & 0x01 == 0x01
}

/// Check if an ADPCM data block is flagged as the start of a loop.
pub fn block_is_loop_start(block: &[u8]) -> bool {
    block[1] & 0x04 == 0x04
}

/// Check if an ADPCM data block is flagged as repeating after this block.
pub fn block_is_repeat_jump(block: &[u8]) -> bool {
    block[1] & 0x03 == 0x03
}

/// Find the byte offset of the loop point within ADPCM data. A valid loop
/// needs a loop-start flag on some block and the repeat-jump flag on the
/// final block. Returns `None` when the data does not loop.
pub fn repeat_offset(adpcm: &[u8]) -> Option<usize> {
    debug_assert!(!adpcm.is_empty() && adpcm.len() % ADPCM_BLOCK_SIZE == 0);
    let last = adpcm.len() - ADPCM_BLOCK_SIZE;
    if !block_is_repeat_jump(&adpcm[last..]) {
        return None;
    }
    (0..=last)
        .rev()
        .step_by(ADPCM_BLOCK_SIZE)
        .find(|&offset| block_is_loop_start(&adpcm[offset..]))
}

/// Edit a stream of ADPCM data in place. The data bytes of the first
/// `silence_start` blocks are zeroed (flag and shift/filter bytes stay
/// intact), then `remove_end` trailing blocks are cut with the final
/// block's flag byte transferred onto the new last block.
pub fn edit_adpcm(adpcm: &mut Vec<u8>, silence_start: usize, remove_end: usize) {
    assert!(ADPCM_BLOCK_SIZE * (silence_start + remove_end) <= adpcm.len());
    for block in 0..silence_start {
        let start = block * ADPCM_BLOCK_SIZE + 2;
        adpcm[start..start + ADPCM_BLOCK_SIZE - 2].fill(0);
    }
    if remove_end > 0 {
        let flags = adpcm[adpcm.len() - ADPCM_BLOCK_SIZE + 1];
        let new_len = adpcm.len() - remove_end * ADPCM_BLOCK_SIZE;
        adpcm.truncate(new_len);
        adpcm[new_len - ADPCM_BLOCK_SIZE + 1] = flags;
    }
}

/// A raw sampled sound: an id and its ADPCM block stream.
#[derive(Clone, Debug)]
pub struct Patch {
    /// Patch id as referenced by sub-instruments.
    pub id: u16,
    /// ADPCM encoded audio data: 16-byte blocks, last block final-flagged.
    pub adpcm: Vec<u8>,
}

impl Patch {
    /// Create a new patch.
    pub fn new(id: u16, adpcm: Vec<u8>) -> Self {
        Self { id, adpcm }
    }
}

/// Known-bad patch and how to mend it.
struct PatchFix {
    id: u16,
    /// Expected total byte length of the patch.
    size: usize,
    /// Expected loop offset; negative for non-looping patches.
    repeat_offset: i32,
    /// Blocks to zero at the start.
    silence_start_blocks: usize,
    /// Blocks to drop from the end.
    remove_end_blocks: usize,
}

/// Patches with audible clicks or pops in the shipped data.
const PATCH_FIXES: [PatchFix; 4] = [
    // Song 94.
    PatchFix { id: 96, size: 45744, repeat_offset: 16, silence_start_blocks: 2, remove_end_blocks: 1 },
    // Song 97.
    PatchFix { id: 102, size: 86016, repeat_offset: 45248, silence_start_blocks: 2, remove_end_blocks: 0 },
    // Song 106.
    PatchFix { id: 116, size: 81520, repeat_offset: 0, silence_start_blocks: 0, remove_end_blocks: 16 },
    // Song 114.
    PatchFix { id: 130, size: 44928, repeat_offset: 16, silence_start_blocks: 0, remove_end_blocks: 2 },
];

/// The collection of patches loaded from one or more LCD files.
#[derive(Clone, Debug, Default)]
pub struct PatchBank {
    patches: Vec<Patch>,
}

impl PatchBank {
    /// Create an empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the bank holds no patches.
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// All patches in bank order.
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Highest patch id in the bank.
    pub fn maximum_id(&self) -> u16 {
        self.patches.iter().map(|p| p.id).max().unwrap_or(0)
    }

    /// Look up a patch by id.
    pub fn patch_by_id(&self, id: u16) -> Option<&Patch> {
        self.patches.iter().find(|p| p.id == id)
    }

    /// Insert or replace a patch by id.
    pub fn set_patch(&mut self, id: u16, adpcm: Vec<u8>) {
        debug_assert!(!adpcm.is_empty() && adpcm.len() % ADPCM_BLOCK_SIZE == 0);
        match self.patches.iter_mut().find(|p| p.id == id) {
            Some(patch) => patch.adpcm = adpcm,
            None => self.patches.push(Patch::new(id, adpcm)),
        }
    }

    /// Copy over any patches from another bank that this one lacks.
    pub fn merge(&mut self, other: &PatchBank) {
        for patch in &other.patches {
            if self.patch_by_id(patch.id).is_none() {
                self.patches.push(patch.clone());
            }
        }
    }

    /// Sort the patches into id order.
    pub fn sort(&mut self) {
        self.patches.sort_by_key(|p| p.id);
    }

    /// Apply repairs to patches with known clicks and pops. Each fix is
    /// validated against the measured length and loop offset of the patch
    /// before any edit is made.
    pub fn repair_patches(&mut self) -> Result<(), Error> {
        for fix in &PATCH_FIXES {
            let Some(patch) = self.patch_by_id(fix.id) else {
                continue;
            };
            let repeat = repeat_offset(&patch.adpcm);
            let repeat_matches = match repeat {
                Some(offset) => fix.repeat_offset >= 0 && offset == fix.repeat_offset as usize,
                None => fix.repeat_offset < 0,
            };
            if patch.adpcm.len() != fix.size || !repeat_matches {
                return Err(Error::InvariantViolation(format!(
                    "patch {} can't be fixed: measured details don't match the expected values",
                    fix.id
                )));
            }
            let mut edited = patch.adpcm.clone();
            edit_adpcm(&mut edited, fix.silence_start_blocks, fix.remove_end_blocks);
            self.set_patch(fix.id, edited);
        }
        Ok(())
    }
}
