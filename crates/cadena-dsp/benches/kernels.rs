//! Criterion benchmarks for the hot kernels.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cadena_dsp::{AlignedBuf, Biquad, BiquadKind, Convolver, Dsp};

fn bench_mix_gain(c: &mut Criterion) {
    let dsp = Dsp::new();
    let n = 1024;
    let mut srcs = Vec::new();
    for s in 0..4 {
        let mut buf = AlignedBuf::new(n);
        for (i, v) in buf.as_mut_slice().iter_mut().enumerate() {
            *v = ((i + s) as f32 * 0.01).sin();
        }
        srcs.push(buf);
    }
    let mut dst = AlignedBuf::new(n);

    c.bench_function("mix_gain_4src_1024", |b| {
        b.iter(|| {
            let views: Vec<&[f32]> = srcs.iter().map(AlignedBuf::as_slice).collect();
            dsp.mix_gain(
                black_box(dst.as_mut_slice()),
                black_box(&views),
                &[0.25, 0.5, 0.75, 1.0],
            );
        });
    });
}

fn bench_biquad(c: &mut Criterion) {
    let dsp = Dsp::new();
    let n = 1024;
    let mut bq = Biquad::design(BiquadKind::Lowpass, 0.1, 0.707, 0.0);
    let mut input = AlignedBuf::new(n);
    for (i, v) in input.as_mut_slice().iter_mut().enumerate() {
        *v = (i as f32 * 0.02).sin();
    }
    let mut out = AlignedBuf::new(n);

    c.bench_function("biquad_1024", |b| {
        b.iter(|| {
            dsp.biquad_run(
                black_box(&mut bq),
                black_box(out.as_mut_slice()),
                black_box(input.as_slice()),
            );
        });
    });
}

fn bench_convolver(c: &mut Criterion) {
    let ir: Vec<f32> = (0..4096).map(|i| 1.0 / (i + 1) as f32).collect();
    let mut conv = Convolver::new(64, 1024, &ir).unwrap();
    let input: Vec<f32> = (0..256).map(|i| (i as f32 * 0.05).sin()).collect();
    let mut output = vec![0.0f32; 256];

    c.bench_function("convolver_4096tap_256", |b| {
        b.iter(|| {
            conv.run(black_box(&input), black_box(&mut output));
        });
    });
}

criterion_group!(benches, bench_mix_gain, bench_biquad, bench_convolver);
criterion_main!(benches);
