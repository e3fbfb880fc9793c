//! Cadena DSP - kernels, filters and convolution for the filter graph.
//!
//! This crate provides the numeric building blocks the graph engine runs on
//! the real-time thread, designed for zero allocation and no branching in
//! the per-sample loops.
//!
//! # Kernel dispatch
//!
//! [`Dsp`] holds a kernel table chosen once at startup from CPU features.
//! Every kernel is safe on any length/alignment combination: the optimized
//! path is entered only when all involved buffers are block-aligned and the
//! length is a multiple of the block, and the scalar path is the reference
//! for correctness. Within one kernel the summation order is fixed, so
//! results across paths differ at most by IEEE-754 reassociation.
//!
//! # Components
//!
//! - [`Dsp`] - clear/copy/mix/sum/mult/linear/delay/biquad kernels
//! - [`Biquad`]/[`BiquadKind`] - second-order sections with the designer
//!   formulas (normalized coefficients, denormal-flushed state)
//! - [`Fft`] - real-to-complex transforms plus spectral multiply kernels
//! - [`Convolver`] - uniform-partitioned FFT convolution with a head/tail
//!   split for low-latency long impulse responses
//! - [`AlignedBuf`] - audio buffers aligned to the widest vector unit
//!
//! # Example
//!
//! ```
//! use cadena_dsp::Dsp;
//!
//! let dsp = Dsp::new();
//! let a = [1.0f32, 2.0, 3.0, 4.0];
//! let b = [0.5f32, 0.5, 0.5, 0.5];
//! let mut out = [0.0f32; 4];
//! dsp.mix_gain(&mut out, &[&a, &b], &[1.0, 2.0]);
//! assert_eq!(out, [2.0, 3.0, 4.0, 5.0]);
//! ```

pub mod biquad;
pub mod buffer;
pub mod convolver;
pub mod error;
pub mod fft;
pub mod ops;

pub use biquad::{Biquad, BiquadKind};
pub use buffer::AlignedBuf;
pub use convolver::Convolver;
pub use error::DspError;
pub use fft::{spectrum_mul, spectrum_mul_acc, Fft};
pub use ops::Dsp;

/// Complex spectral sample type used by the FFT kernels.
pub type Complex32 = rustfft::num_complex::Complex<f32>;
