//! Real-to-complex FFT wrapper and spectral multiply kernels.
//!
//! Transforms are planned once and reused; the planner caches twiddles per
//! size. Both directions are unnormalized, matching the convolver's
//! explicit `1/seg_size` scaling. The wrapper keeps internal scratch so
//! callers' buffers are never clobbered, which the convolver relies on
//! (its input accumulation buffer is transformed repeatedly).

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use std::sync::Arc;

use crate::Complex32;

/// A planned real FFT of one size, usable in both directions.
pub struct Fft {
    size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    scratch_real: Vec<f32>,
    scratch_complex: Vec<Complex32>,
}

impl std::fmt::Debug for Fft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft").field("size", &self.size).finish()
    }
}

impl Fft {
    /// Plan transforms for `size` real samples.
    ///
    /// `size` must be non-zero; powers of two give the fastest plans.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        Self {
            size,
            forward,
            inverse,
            scratch_real: vec![0.0; size],
            scratch_complex: vec![Complex32::default(); size / 2 + 1],
        }
    }

    /// Transform size in real samples.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of complex bins produced by the forward transform.
    #[must_use]
    pub fn complex_len(&self) -> usize {
        self.size / 2 + 1
    }

    /// Allocate a zeroed spectrum of the right length.
    #[must_use]
    pub fn make_spectrum(&self) -> Vec<Complex32> {
        vec![Complex32::default(); self.complex_len()]
    }

    /// Forward transform; `input.len() == size`, `output.len() == size/2+1`.
    ///
    /// The input is left untouched.
    pub fn forward(&mut self, input: &[f32], output: &mut [Complex32]) {
        self.scratch_real.copy_from_slice(input);
        // realfft reports length mismatches as errors; lengths are fixed by
        // construction here, so a failure is a caller bug.
        self.forward
            .process(&mut self.scratch_real, output)
            .expect("forward FFT with planned lengths");
    }

    /// Inverse transform; `input.len() == size/2+1`, `output.len() == size`.
    ///
    /// The output is unnormalized (scaled by `size`); the input is left
    /// untouched. The DC and Nyquist bins must be real; their imaginary
    /// parts are forced to zero, which the backend requires.
    pub fn inverse(&mut self, input: &[Complex32], output: &mut [f32]) {
        self.scratch_complex.copy_from_slice(input);
        if let Some(first) = self.scratch_complex.first_mut() {
            first.im = 0.0;
        }
        if let Some(last) = self.scratch_complex.last_mut() {
            last.im = 0.0;
        }
        self.inverse
            .process(&mut self.scratch_complex, output)
            .expect("inverse FFT with planned lengths");
    }
}

/// `dst[i] = a[i] * b[i] * scale` over complex spectra.
pub fn spectrum_mul(dst: &mut [Complex32], a: &[Complex32], b: &[Complex32], scale: f32) {
    for ((d, x), y) in dst.iter_mut().zip(a).zip(b) {
        *d = x * y * scale;
    }
}

/// `dst[i] += a[i] * b[i] * scale` over complex spectra.
pub fn spectrum_mul_acc(dst: &mut [Complex32], a: &[Complex32], b: &[Complex32], scale: f32) {
    for ((d, x), y) in dst.iter_mut().zip(a).zip(b) {
        *d += x * y * scale;
    }
}
