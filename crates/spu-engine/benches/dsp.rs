//! Benchmarks for the hot per-sample loops.

use criterion::{criterion_group, criterion_main, Criterion};

use spu_engine::{
    AdpcmDecoder, Envelope, Filter, FilterType, Module, ReverbCore, ReverbPreset, SincResampler,
};
use spu_ir::{Error, Frame, ADPCM_BLOCK_SIZE};

/// Endless mono sine source for feeding transformers.
struct SineSource {
    phase: f32,
}

impl Module for SineSource {
    type Frame = f32;

    fn is_running(&self) -> bool {
        true
    }

    fn next(&mut self) -> Result<Option<f32>, Error> {
        self.phase += 0.0371;
        Ok(Some(self.phase.sin() * 0.5))
    }
}

struct StereoSineSource {
    inner: SineSource,
}

impl Module for StereoSineSource {
    type Frame = Frame;

    fn is_running(&self) -> bool {
        true
    }

    fn next(&mut self) -> Result<Option<Frame>, Error> {
        let s = self.inner.next()?.unwrap();
        Ok(Some(Frame::new(s, -s)))
    }
}

fn looping_patch_data() -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..64 {
        let mut block = [0u8; ADPCM_BLOCK_SIZE];
        block[0] = 0x12;
        block[1] = match i {
            0 => 0x04,
            63 => 0x03,
            _ => 0x00,
        };
        for (j, byte) in block[2..].iter_mut().enumerate() {
            *byte = ((i * 7 + j * 3) & 0xff) as u8;
        }
        data.extend_from_slice(&block);
    }
    data
}

fn bench_adpcm(c: &mut Criterion) {
    let data = looping_patch_data();
    c.bench_function("adpcm_decode_64_blocks", |b| {
        b.iter(|| {
            let mut decoder = AdpcmDecoder::new(&data, 1).unwrap();
            let mut total = 0.0f32;
            while let Some(s) = decoder.next().unwrap() {
                total += s;
            }
            total
        })
    });
}

fn bench_envelope(c: &mut Criterion) {
    c.bench_function("envelope_10k_ticks", |b| {
        b.iter(|| {
            let mut envelope = Envelope::new(0x8fe0, 0xc7e0);
            let mut total = 0.0f32;
            for _ in 0..10_000 {
                total += envelope.next().unwrap().unwrap_or(0.0);
            }
            total
        })
    });
}

fn bench_sinc(c: &mut Criterion) {
    c.bench_function("sinc_resample_10k", |b| {
        let mut resampler =
            SincResampler::new(SineSource { phase: 0.0 }, 7, 11025, 44100).unwrap();
        b.iter(|| {
            let mut total = 0.0f32;
            for _ in 0..10_000 {
                total += resampler.next().unwrap().unwrap();
            }
            total
        })
    });
}

fn bench_filter(c: &mut Criterion) {
    c.bench_function("butterworth_10k", |b| {
        let mut filter = Filter::new(SineSource { phase: 0.0 }, FilterType::LowPass, 0.33);
        b.iter(|| {
            let mut total = 0.0f32;
            for _ in 0..10_000 {
                total += filter.next().unwrap().unwrap();
            }
            total
        })
    });
}

fn bench_reverb(c: &mut Criterion) {
    c.bench_function("reverb_core_10k", |b| {
        let source = StereoSineSource {
            inner: SineSource { phase: 0.0 },
        };
        let mut core = ReverbCore::new(source, ReverbPreset::Hall, Frame::splat(0.25));
        b.iter(|| {
            let mut total = 0.0f32;
            for _ in 0..10_000 {
                total += core.next().unwrap().unwrap().left;
            }
            total
        })
    });
}

criterion_group!(
    benches,
    bench_adpcm,
    bench_envelope,
    bench_sinc,
    bench_filter,
    bench_reverb
);
criterion_main!(benches);
