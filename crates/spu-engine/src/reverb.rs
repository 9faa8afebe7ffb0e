//! PSX SPU reverb emulation.

use std::cell::Cell;

use spu_ir::{Error, Frame, Sample, SILENCE_THRESHOLD};

use crate::filter::{Filter, FilterType};
use crate::module::Module;
use crate::resampler::SincResampler;
use crate::splitter::Splitter;

/// The reverb unit always runs at this rate; the wrapper resamples to
/// and from it.
pub const REVERB_SAMPLE_RATE: u32 = 22050;

/// Reverb presets, as configured by the game per level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReverbPreset {
    Off,
    Room,
    StudioSmall,
    StudioMedium,
    StudioLarge,
    Hall,
    HalfEcho,
    SpaceEcho,
    /// Pick the preset the game uses for the song being extracted.
    Auto,
}

impl ReverbPreset {
    /// Parse a preset name as used on the command line.
    pub fn from_name(name: &str) -> Option<ReverbPreset> {
        Some(match name {
            "off" => ReverbPreset::Off,
            "room" => ReverbPreset::Room,
            "studio-small" => ReverbPreset::StudioSmall,
            "studio-medium" => ReverbPreset::StudioMedium,
            "studio-large" => ReverbPreset::StudioLarge,
            "hall" => ReverbPreset::Hall,
            "half-echo" => ReverbPreset::HalfEcho,
            "space-echo" => ReverbPreset::SpaceEcho,
            "auto" => ReverbPreset::Auto,
            _ => return None,
        })
    }

    /// Preset name.
    pub fn name(self) -> &'static str {
        match self {
            ReverbPreset::Off => "off",
            ReverbPreset::Room => "room",
            ReverbPreset::StudioSmall => "studio-small",
            ReverbPreset::StudioMedium => "studio-medium",
            ReverbPreset::StudioLarge => "studio-large",
            ReverbPreset::Hall => "hall",
            ReverbPreset::HalfEcho => "half-echo",
            ReverbPreset::SpaceEcho => "space-echo",
            ReverbPreset::Auto => "auto",
        }
    }

    /// SPU register block and work buffer size (in int16 units) for a
    /// concrete preset.
    fn config(self) -> (&'static [u16; 32], usize) {
        match self {
            ReverbPreset::Room => (&ROOM_REGISTERS, 0x026c0 / 2),
            ReverbPreset::StudioSmall => (&STUDIO_SMALL_REGISTERS, 0x01f40 / 2),
            ReverbPreset::StudioMedium => (&STUDIO_MEDIUM_REGISTERS, 0x04840 / 2),
            ReverbPreset::StudioLarge => (&STUDIO_LARGE_REGISTERS, 0x06fe0 / 2),
            ReverbPreset::Hall => (&HALL_REGISTERS, 0x0ade0 / 2),
            ReverbPreset::HalfEcho => (&HALF_ECHO_REGISTERS, 0x03c00 / 2),
            ReverbPreset::SpaceEcho => (&SPACE_ECHO_REGISTERS, 0x0f6c0 / 2),
            ReverbPreset::Off | ReverbPreset::Auto => {
                unreachable!("preset must be resolved before constructing reverb")
            }
        }
    }
}

const ROOM_REGISTERS: [u16; 32] = [
    0x007d, 0x005b, 0x6d80, 0x54b8, 0xbed0, 0x0000, 0x0000, 0xba80,
    0x5800, 0x5300, 0x04d6, 0x0333, 0x03f0, 0x0227, 0x0374, 0x01ef,
    0x0334, 0x01b5, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000,
    0x0000, 0x0000, 0x01b4, 0x0136, 0x00b8, 0x005c, 0x8000, 0x8000,
];

const STUDIO_SMALL_REGISTERS: [u16; 32] = [
    0x0033, 0x0025, 0x70f0, 0x4fa8, 0xbce0, 0x4410, 0xc0f0, 0x9c00,
    0x5280, 0x4ec0, 0x03e4, 0x031b, 0x03a4, 0x02af, 0x0372, 0x0266,
    0x031c, 0x025d, 0x025c, 0x018e, 0x022f, 0x0135, 0x01d2, 0x00b7,
    0x018f, 0x00b5, 0x00b4, 0x0080, 0x004c, 0x0026, 0x8000, 0x8000,
];

const STUDIO_MEDIUM_REGISTERS: [u16; 32] = [
    0x00b1, 0x007f, 0x70f0, 0x4fa8, 0xbce0, 0x4510, 0xbef0, 0xb4c0,
    0x5280, 0x4ec0, 0x0904, 0x076b, 0x0824, 0x065f, 0x07a2, 0x0616,
    0x076c, 0x05ed, 0x05ec, 0x042e, 0x050f, 0x0305, 0x0462, 0x02b7,
    0x042f, 0x0265, 0x0264, 0x01b2, 0x0100, 0x0080, 0x8000, 0x8000,
];

const STUDIO_LARGE_REGISTERS: [u16; 32] = [
    0x00e3, 0x00a9, 0x6f60, 0x4fa8, 0xbce0, 0x4510, 0xbef0, 0xa680,
    0x5680, 0x52c0, 0x0dfb, 0x0b58, 0x0d09, 0x0a3c, 0x0bd9, 0x0973,
    0x0b59, 0x08da, 0x08d9, 0x05e9, 0x07ec, 0x04b0, 0x06ef, 0x03d2,
    0x05ea, 0x031d, 0x031c, 0x0238, 0x0154, 0x00aa, 0x8000, 0x8000,
];

const HALL_REGISTERS: [u16; 32] = [
    0x01a5, 0x0139, 0x6000, 0x5000, 0x4c00, 0xb800, 0xbc00, 0xc000,
    0x6000, 0x5c00, 0x15ba, 0x11bb, 0x14c2, 0x10bd, 0x11bc, 0x0dc1,
    0x11c0, 0x0dc3, 0x0dc0, 0x09c1, 0x0bc4, 0x07c1, 0x0a00, 0x06cd,
    0x09c2, 0x05c1, 0x05c0, 0x041a, 0x0274, 0x013a, 0x8000, 0x8000,
];

const HALF_ECHO_REGISTERS: [u16; 32] = [
    0x0017, 0x0013, 0x70f0, 0x4fa8, 0xbce0, 0x4510, 0xbef0, 0x8500,
    0x5f80, 0x54c0, 0x0371, 0x02af, 0x02e5, 0x01df, 0x02b0, 0x01d7,
    0x0358, 0x026a, 0x01d6, 0x011e, 0x012d, 0x00b1, 0x011f, 0x0059,
    0x01a0, 0x00e3, 0x0058, 0x0040, 0x0028, 0x0014, 0x8000, 0x8000,
];

const SPACE_ECHO_REGISTERS: [u16; 32] = [
    0x033d, 0x0231, 0x7e00, 0x5000, 0xb400, 0xb000, 0x4c00, 0xb000,
    0x6000, 0x5400, 0x1ed6, 0x1a31, 0x1d14, 0x183b, 0x1bc2, 0x16b2,
    0x1a32, 0x15ef, 0x15ee, 0x1055, 0x1334, 0x0f2d, 0x11f6, 0x0c5d,
    0x1056, 0x0ae1, 0x0ae0, 0x07a2, 0x0464, 0x0232, 0x8000, 0x8000,
];

/// Convert an SPU register value into a volume.
fn reg_to_volume(v: u16) -> f32 {
    v as i16 as f32 / 32768.0
}

/// Convert an SPU register value (bytes / 8) into a buffer offset.
fn reg_to_offset(v: u16) -> usize {
    v as usize * 8 / 2
}

/// The SPU reverb network at 22.05 kHz: a ring buffer of reflections
/// with same-side and cross-side IIRs, four comb taps, and two all-pass
/// sections per channel.
///
/// Buffer values stay in float to avoid re-quantising on every pass.
/// After the source ends the core keeps running until everything left in
/// the buffer is below the silence threshold at the output volume.
pub struct ReverbCore<M: Module<Frame = Frame>> {
    source: M,
    volume: Frame,
    buffer: Vec<f32>,
    current: usize,

    dapf1: usize,
    dapf2: usize,
    viir: f32,
    vcomb1: f32,
    vcomb2: f32,
    vcomb3: f32,
    vcomb4: f32,
    vwall: f32,
    vapf1: f32,
    vapf2: f32,
    mlsame: usize,
    mrsame: usize,
    mlcomb1: usize,
    mrcomb1: usize,
    mlcomb2: usize,
    mrcomb2: usize,
    dlsame: usize,
    drsame: usize,
    mldiff: usize,
    mrdiff: usize,
    mlcomb3: usize,
    mrcomb3: usize,
    mlcomb4: usize,
    mrcomb4: usize,
    dldiff: usize,
    drdiff: usize,
    mlapf1: usize,
    mrapf1: usize,
    mlapf2: usize,
    mrapf2: usize,
    vlin: f32,
    vrin: f32,

    // Offsets derived once from the registers.
    mlsame_1: usize,
    mrsame_1: usize,
    mldiff_1: usize,
    mrdiff_1: usize,
    mlapf1_dapf1: usize,
    mrapf1_dapf1: usize,
    mlapf2_dapf2: usize,
    mrapf2_dapf2: usize,

    /// Magnitude below which the tail counts as silent at this volume.
    silence: f32,
    buffer_is_silent: Cell<bool>,
    /// Cursor for the tail scan so it isn't restarted from zero.
    last_unsilent_sample: Cell<usize>,
}

impl<M: Module<Frame = Frame>> ReverbCore<M> {
    pub fn new(source: M, preset: ReverbPreset, volume: Frame) -> Self {
        let (registers, buffer_size) = preset.config();
        let max_volume = volume.left.max(volume.right);
        let buffer = vec![0.0f32; buffer_size];

        let mut core = Self {
            source,
            volume,
            buffer,
            current: 0,
            dapf1: reg_to_offset(registers[0x00]),
            dapf2: reg_to_offset(registers[0x01]),
            viir: reg_to_volume(registers[0x02]),
            vcomb1: reg_to_volume(registers[0x03]),
            vcomb2: reg_to_volume(registers[0x04]),
            vcomb3: reg_to_volume(registers[0x05]),
            vcomb4: reg_to_volume(registers[0x06]),
            vwall: reg_to_volume(registers[0x07]),
            vapf1: reg_to_volume(registers[0x08]),
            vapf2: reg_to_volume(registers[0x09]),
            mlsame: reg_to_offset(registers[0x0a]),
            mrsame: reg_to_offset(registers[0x0b]),
            mlcomb1: reg_to_offset(registers[0x0c]),
            mrcomb1: reg_to_offset(registers[0x0d]),
            mlcomb2: reg_to_offset(registers[0x0e]),
            mrcomb2: reg_to_offset(registers[0x0f]),
            dlsame: reg_to_offset(registers[0x10]),
            drsame: reg_to_offset(registers[0x11]),
            mldiff: reg_to_offset(registers[0x12]),
            mrdiff: reg_to_offset(registers[0x13]),
            mlcomb3: reg_to_offset(registers[0x14]),
            mrcomb3: reg_to_offset(registers[0x15]),
            mlcomb4: reg_to_offset(registers[0x16]),
            mrcomb4: reg_to_offset(registers[0x17]),
            dldiff: reg_to_offset(registers[0x18]),
            drdiff: reg_to_offset(registers[0x19]),
            mlapf1: reg_to_offset(registers[0x1a]),
            mrapf1: reg_to_offset(registers[0x1b]),
            mlapf2: reg_to_offset(registers[0x1c]),
            mrapf2: reg_to_offset(registers[0x1d]),
            vlin: reg_to_volume(registers[0x1e]),
            vrin: reg_to_volume(registers[0x1f]),
            mlsame_1: 0,
            mrsame_1: 0,
            mldiff_1: 0,
            mrdiff_1: 0,
            mlapf1_dapf1: 0,
            mrapf1_dapf1: 0,
            mlapf2_dapf2: 0,
            mrapf2_dapf2: 0,
            silence: SILENCE_THRESHOLD / max_volume.max(0.001),
            buffer_is_silent: Cell::new(false),
            last_unsilent_sample: Cell::new(0),
        };
        let size = core.buffer.len();
        core.mlsame_1 = core.wrap(core.mlsame + size - 1);
        core.mrsame_1 = core.wrap(core.mrsame + size - 1);
        core.mldiff_1 = core.wrap(core.mldiff + size - 1);
        core.mrdiff_1 = core.wrap(core.mrdiff + size - 1);
        core.mlapf1_dapf1 = core.wrap(core.mlapf1 + size - core.dapf1);
        core.mrapf1_dapf1 = core.wrap(core.mrapf1 + size - core.dapf1);
        core.mlapf2_dapf2 = core.wrap(core.mlapf2 + size - core.dapf2);
        core.mrapf2_dapf2 = core.wrap(core.mrapf2 + size - core.dapf2);
        core
    }

    fn wrap(&self, offset: usize) -> usize {
        debug_assert!(offset < 2 * self.buffer.len());
        if offset < self.buffer.len() {
            offset
        } else {
            offset - self.buffer.len()
        }
    }

    fn read(&self, offset: usize) -> f32 {
        self.buffer[self.wrap(self.current + offset)]
    }

    fn write(&mut self, offset: usize, value: f32) {
        let index = self.wrap(self.current + offset);
        self.buffer[index] = value.flush_denorm();
    }
}

impl<M: Module<Frame = Frame>> Module for ReverbCore<M> {
    type Frame = Frame;

    fn is_running(&self) -> bool {
        if self.source.is_running() {
            return true;
        }
        if self.buffer_is_silent.get() {
            return false;
        }

        // Hunt for a sample still above the silence threshold, starting
        // where one was last seen so repeated calls stay cheap.
        let start = self.last_unsilent_sample.get();
        let mut index = start;
        loop {
            if self.buffer[index].abs() > self.silence {
                break;
            }
            index = (index + 1) % self.buffer.len();
            if index == start {
                break;
            }
        }
        self.last_unsilent_sample.set(index);
        let silent = self.buffer[index].abs() <= self.silence;
        self.buffer_is_silent.set(silent);
        !silent
    }

    fn next(&mut self) -> Result<Option<Frame>, Error> {
        let (input, source_live) = match self.source.next()? {
            Some(s) => (s, true),
            None => (Frame::ZERO, false),
        };
        if !source_live && !self.is_running() {
            return Ok(None);
        }

        let lin = self.vlin * input.left;
        let rin = self.vrin * input.right;

        // Same-side reflection.
        let prev_mlsame = self.read(self.mlsame_1);
        let prev_mrsame = self.read(self.mrsame_1);
        let mlsame_value =
            (lin + self.read(self.dlsame) * self.vwall - prev_mlsame) * self.viir + prev_mlsame;
        self.write(self.mlsame, mlsame_value);
        let mrsame_value =
            (rin + self.read(self.drsame) * self.vwall - prev_mrsame) * self.viir + prev_mrsame;
        self.write(self.mrsame, mrsame_value);

        // Cross-side reflection.
        let prev_mldiff = self.read(self.mldiff_1);
        let prev_mrdiff = self.read(self.mrdiff_1);
        let mldiff_value =
            (lin + self.read(self.drdiff) * self.vwall - prev_mldiff) * self.viir + prev_mldiff;
        self.write(self.mldiff, mldiff_value);
        let mrdiff_value =
            (rin + self.read(self.dldiff) * self.vwall - prev_mrdiff) * self.viir + prev_mrdiff;
        self.write(self.mrdiff, mrdiff_value);

        // Early echo: four comb taps.
        let mut lout = self.vcomb1 * self.read(self.mlcomb1)
            + self.vcomb2 * self.read(self.mlcomb2)
            + self.vcomb3 * self.read(self.mlcomb3)
            + self.vcomb4 * self.read(self.mlcomb4);
        let mut rout = self.vcomb1 * self.read(self.mrcomb1)
            + self.vcomb2 * self.read(self.mrcomb2)
            + self.vcomb3 * self.read(self.mrcomb3)
            + self.vcomb4 * self.read(self.mrcomb4);

        // Late reverb all-pass 1.
        lout -= self.vapf1 * self.read(self.mlapf1_dapf1);
        self.write(self.mlapf1, lout);
        lout = lout * self.vapf1 + self.read(self.mlapf1_dapf1);
        rout -= self.vapf1 * self.read(self.mrapf1_dapf1);
        self.write(self.mrapf1, rout);
        rout = rout * self.vapf1 + self.read(self.mrapf1_dapf1);

        // Late reverb all-pass 2.
        lout -= self.vapf2 * self.read(self.mlapf2_dapf2);
        self.write(self.mlapf2, lout);
        lout = lout * self.vapf2 + self.read(self.mlapf2_dapf2);
        rout -= self.vapf2 * self.read(self.mrapf2_dapf2);
        self.write(self.mrapf2, rout);
        rout = rout * self.vapf2 + self.read(self.mrapf2_dapf2);

        let out = Frame::new(lout, rout).scale(self.volume).flush_denorm();

        self.current += 1;
        if self.current >= self.buffer.len() {
            self.current = 0;
        }
        Ok(Some(out))
    }
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -

/// Wrapper that splits the input, runs the wet arm through the core at
/// 22.05 kHz (resampling as needed), and mixes it back with the dry arm.
pub struct Reverb<'a, M: Module<Frame = Frame> + 'a> {
    dry: Splitter<M>,
    wet: Box<dyn Module<Frame = Frame> + 'a>,
}

impl<'a, M: Module<Frame = Frame> + 'a> Reverb<'a, M> {
    /// `preset` must be a concrete preset (not `Off` or `Auto`).
    pub fn new(
        source: M,
        sample_rate: u32,
        preset: ReverbPreset,
        volume: Frame,
        sinc_window: u32,
    ) -> Result<Self, Error> {
        debug_assert!(sample_rate > 0);
        let dry = Splitter::new(source);

        // The wet arm runs at exactly the reverb rate. When downsampling
        // toward it, pre-filter to keep aliases out of the audible band;
        // the cut-off is capped below Nyquist so the filter stays sane.
        let max_cut_off = 0.45;
        let mut wet: Box<dyn Module<Frame = Frame> + 'a> = Box::new(dry.split());
        if sample_rate != REVERB_SAMPLE_RATE {
            if sample_rate > REVERB_SAMPLE_RATE {
                let cut_off = (REVERB_SAMPLE_RATE as f64 / sample_rate as f64).min(max_cut_off);
                wet = Box::new(Filter::new(wet, FilterType::LowPass, cut_off));
            }
            wet = Box::new(SincResampler::new(
                wet,
                sinc_window,
                sample_rate,
                REVERB_SAMPLE_RATE,
            )?);
        }
        wet = Box::new(ReverbCore::new(wet, preset, volume));
        if sample_rate != REVERB_SAMPLE_RATE {
            if sample_rate < REVERB_SAMPLE_RATE {
                let cut_off = (sample_rate as f64 / REVERB_SAMPLE_RATE as f64).min(max_cut_off);
                wet = Box::new(Filter::new(wet, FilterType::LowPass, cut_off));
            }
            wet = Box::new(SincResampler::new(
                wet,
                sinc_window,
                REVERB_SAMPLE_RATE,
                sample_rate,
            )?);
        }

        Ok(Self { dry, wet })
    }
}

impl<'a, M: Module<Frame = Frame> + 'a> Module for Reverb<'a, M> {
    type Frame = Frame;

    fn is_running(&self) -> bool {
        self.dry.is_running() || self.wet.is_running()
    }

    fn next(&mut self) -> Result<Option<Frame>, Error> {
        let dry = self.dry.next()?;
        let wet = self.wet.next()?;
        match (dry, wet) {
            (None, None) => Ok(None),
            (d, w) => Ok(Some(d.unwrap_or(Frame::ZERO) + w.unwrap_or(Frame::ZERO))),
        }
    }
}
