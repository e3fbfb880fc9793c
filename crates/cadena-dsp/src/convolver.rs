//! Uniform-partitioned FFT convolution with a head/tail split.
//!
//! The impulse response is cut into equal partitions; each partition is
//! convolved in the frequency domain and the results overlap-add into the
//! output. A short head partition keeps latency at one block, while up to
//! two tail stages run on larger blocks to amortize FFT cost over long
//! responses: `tail0` covers the second `T` samples at the head block
//! size, `tail` the remainder at the tail block size, both precomputed a
//! block ahead so the real-time cost per sample stays flat.

use crate::error::DspError;
use crate::fft::{spectrum_mul, spectrum_mul_acc, Fft};
use crate::Complex32;

/// Trailing IR samples below this magnitude are trimmed.
const TRIM_THRESHOLD: f32 = 1e-6;

fn next_power_of_two(v: usize) -> usize {
    let mut r = 1;
    while r < v {
        r *= 2;
    }
    r
}

fn trim_ir(ir: &[f32]) -> &[f32] {
    let mut len = ir.len();
    while len > 0 && ir[len - 1].abs() < TRIM_THRESHOLD {
        len -= 1;
    }
    &ir[..len]
}

/// Single-rate partitioned convolver (one block size for all partitions).
#[derive(Debug)]
struct Segmented {
    block_size: usize,
    seg_size: usize,
    seg_count: usize,
    fft: Fft,
    fft_buffer: Vec<f32>,
    segments: Vec<Vec<Complex32>>,
    segments_ir: Vec<Vec<Complex32>>,
    pre_mult: Vec<Complex32>,
    conv: Vec<Complex32>,
    overlap: Vec<f32>,
    input_buffer: Vec<f32>,
    input_buffer_fill: usize,
    current: usize,
    scale: f32,
}

/// One partition stage; an empty impulse response produces silence.
#[derive(Debug)]
struct Stage {
    inner: Option<Segmented>,
}

impl Stage {
    fn new(block: usize, ir: &[f32]) -> Result<Self, DspError> {
        if block == 0 {
            return Err(DspError::BadConfig("convolver block size is zero"));
        }
        let ir = trim_ir(ir);
        if ir.is_empty() {
            return Ok(Self { inner: None });
        }

        let block_size = next_power_of_two(block);
        let seg_size = 2 * block_size;
        let seg_count = ir.len().div_ceil(block_size);
        let mut fft = Fft::new(seg_size);
        let mut fft_buffer = vec![0.0f32; seg_size];

        let mut segments = Vec::with_capacity(seg_count);
        let mut segments_ir = Vec::with_capacity(seg_count);
        for i in 0..seg_count {
            let start = i * block_size;
            let copy = (ir.len() - start).min(block_size);
            fft_buffer[..copy].copy_from_slice(&ir[start..start + copy]);
            fft_buffer[copy..].fill(0.0);

            let mut spectrum = fft.make_spectrum();
            fft.forward(&fft_buffer, &mut spectrum);
            segments_ir.push(spectrum);
            segments.push(fft.make_spectrum());
        }
        fft_buffer.fill(0.0);

        let pre_mult = fft.make_spectrum();
        let conv = fft.make_spectrum();
        Ok(Self {
            inner: Some(Segmented {
                block_size,
                seg_size,
                seg_count,
                fft,
                fft_buffer,
                segments,
                segments_ir,
                pre_mult,
                conv,
                overlap: vec![0.0; block_size],
                input_buffer: vec![0.0; seg_size],
                input_buffer_fill: 0,
                current: 0,
                scale: 1.0 / seg_size as f32,
            }),
        })
    }

    fn reset(&mut self) {
        let Some(s) = self.inner.as_mut() else {
            return;
        };
        for seg in &mut s.segments {
            seg.fill(Complex32::default());
        }
        s.pre_mult.fill(Complex32::default());
        s.conv.fill(Complex32::default());
        s.overlap.fill(0.0);
        s.input_buffer.fill(0.0);
        s.input_buffer_fill = 0;
        s.current = 0;
    }

    fn run(&mut self, input: &[f32], output: &mut [f32]) {
        let Some(s) = self.inner.as_mut() else {
            output.fill(0.0);
            return;
        };
        let len = input.len().min(output.len());
        let mut processed = 0;

        while processed < len {
            let pos = s.input_buffer_fill;
            let processing = (len - processed).min(s.block_size - pos);

            s.input_buffer[pos..pos + processing]
                .copy_from_slice(&input[processed..processed + processing]);
            if pos == 0 && processing < s.block_size {
                s.input_buffer[processing..s.block_size].fill(0.0);
            }
            s.fft
                .forward(&s.input_buffer, &mut s.segments[s.current]);

            if s.seg_count > 1 {
                if s.input_buffer_fill == 0 {
                    // The bulk of the ring is folded once per block; only
                    // the two youngest partitions change inside the block.
                    let idx = (s.current + 1) % s.seg_count;
                    spectrum_mul(
                        &mut s.pre_mult,
                        &s.segments_ir[1],
                        &s.segments[idx],
                        s.scale,
                    );
                    for i in 2..s.seg_count {
                        let idx = (s.current + i) % s.seg_count;
                        spectrum_mul_acc(
                            &mut s.pre_mult,
                            &s.segments_ir[i],
                            &s.segments[idx],
                            s.scale,
                        );
                    }
                }
                s.conv.copy_from_slice(&s.pre_mult);
                spectrum_mul_acc(
                    &mut s.conv,
                    &s.segments[s.current],
                    &s.segments_ir[0],
                    s.scale,
                );
            } else {
                spectrum_mul(
                    &mut s.conv,
                    &s.segments[s.current],
                    &s.segments_ir[0],
                    s.scale,
                );
            }

            s.fft.inverse(&s.conv, &mut s.fft_buffer);

            for i in 0..processing {
                output[processed + i] = s.fft_buffer[pos + i] + s.overlap[pos + i];
            }

            s.input_buffer_fill += processing;
            if s.input_buffer_fill == s.block_size {
                s.input_buffer_fill = 0;
                s.overlap
                    .copy_from_slice(&s.fft_buffer[s.block_size..s.seg_size]);
                s.current = if s.current > 0 {
                    s.current - 1
                } else {
                    s.seg_count - 1
                };
            }
            processed += processing;
        }
    }
}

/// Head/tail partitioned convolver.
///
/// Built from an impulse response with a head block size `B` and a tail
/// block size `T >= B` (both rounded up to powers of two). Latency is `B`
/// samples of block buffering; arbitrarily long responses run at the cost
/// of the large-block tail transforms, which are spread across head-block
/// boundaries.
#[derive(Debug)]
pub struct Convolver {
    head_block: usize,
    tail_block: usize,
    head: Stage,
    tail0: Option<TailStage>,
    tail: Option<TailStage>,
    tail_input: Vec<f32>,
    tail_input_fill: usize,
    precalc_pos: usize,
}

#[derive(Debug)]
struct TailStage {
    conv: Stage,
    output: Vec<f32>,
    precalculated: Vec<f32>,
}

impl TailStage {
    fn new(block: usize, tail_block: usize, ir: &[f32]) -> Result<Self, DspError> {
        Ok(Self {
            conv: Stage::new(block, ir)?,
            output: vec![0.0; tail_block],
            precalculated: vec![0.0; tail_block],
        })
    }

    fn reset(&mut self) {
        self.conv.reset();
        self.output.fill(0.0);
        self.precalculated.fill(0.0);
    }
}

impl Convolver {
    /// Build a convolver from an impulse response.
    ///
    /// Trailing near-zero samples are trimmed first; an IR that trims to
    /// nothing yields a valid convolver that outputs silence.
    pub fn new(
        head_block: usize,
        tail_block: usize,
        ir: &[f32],
    ) -> Result<Self, DspError> {
        if head_block == 0 || tail_block == 0 {
            return Err(DspError::BadConfig("convolver block size is zero"));
        }
        let mut head_block = head_block.max(1);
        let mut tail_block = tail_block;
        if head_block > tail_block {
            std::mem::swap(&mut head_block, &mut tail_block);
        }
        let head_block = next_power_of_two(head_block);
        let tail_block = next_power_of_two(tail_block);

        let ir = trim_ir(ir);
        tracing::debug!(
            ir_len = ir.len(),
            head_block,
            tail_block,
            "building convolver"
        );

        let head_len = ir.len().min(tail_block);
        let head = Stage::new(head_block, &ir[..head_len])?;

        let tail0 = if ir.len() > tail_block {
            let len = (ir.len() - tail_block).min(tail_block);
            Some(TailStage::new(
                head_block,
                tail_block,
                &ir[tail_block..tail_block + len],
            )?)
        } else {
            None
        };

        let tail = if ir.len() > 2 * tail_block {
            Some(TailStage::new(
                tail_block,
                tail_block,
                &ir[2 * tail_block..],
            )?)
        } else {
            None
        };

        let needs_tail_input = tail0.is_some() || tail.is_some();
        Ok(Self {
            head_block,
            tail_block,
            head,
            tail0,
            tail,
            tail_input: if needs_tail_input {
                vec![0.0; tail_block]
            } else {
                Vec::new()
            },
            tail_input_fill: 0,
            precalc_pos: 0,
        })
    }

    /// Head partition block size after power-of-two rounding.
    #[must_use]
    pub fn head_block(&self) -> usize {
        self.head_block
    }

    /// Clear all state; the next run starts from silence.
    pub fn reset(&mut self) {
        self.head.reset();
        if let Some(t) = self.tail0.as_mut() {
            t.reset();
        }
        if let Some(t) = self.tail.as_mut() {
            t.reset();
        }
        self.tail_input.fill(0.0);
        self.tail_input_fill = 0;
        self.precalc_pos = 0;
    }

    /// Convolve `input` into `output` (equal lengths, any size).
    pub fn run(&mut self, input: &[f32], output: &mut [f32]) {
        self.head.run(input, output);

        if self.tail_input.is_empty() {
            return;
        }

        let length = input.len().min(output.len());
        let mut processed = 0;
        while processed < length {
            let remaining = length - processed;
            let processing =
                remaining.min(self.head_block - (self.tail_input_fill % self.head_block));

            // Sum the tails that were precomputed one block ago.
            if let Some(t) = self.tail0.as_ref() {
                for i in 0..processing {
                    output[processed + i] += t.precalculated[self.precalc_pos + i];
                }
            }
            if let Some(t) = self.tail.as_ref() {
                for i in 0..processing {
                    output[processed + i] += t.precalculated[self.precalc_pos + i];
                }
            }
            self.precalc_pos += processing;

            self.tail_input[self.tail_input_fill..self.tail_input_fill + processing]
                .copy_from_slice(&input[processed..processed + processing]);
            self.tail_input_fill += processing;

            if let Some(t) = self.tail0.as_mut() {
                if self.tail_input_fill % self.head_block == 0 {
                    let block_offset = self.tail_input_fill - self.head_block;
                    t.conv.run(
                        &self.tail_input[block_offset..self.tail_input_fill],
                        &mut t.output[block_offset..block_offset + self.head_block],
                    );
                    if self.tail_input_fill == self.tail_block {
                        std::mem::swap(&mut t.precalculated, &mut t.output);
                    }
                }
            }

            if let Some(t) = self.tail.as_mut() {
                if self.tail_input_fill == self.tail_block {
                    std::mem::swap(&mut t.precalculated, &mut t.output);
                    t.conv.run(&self.tail_input, &mut t.output);
                }
            }

            if self.tail_input_fill == self.tail_block {
                self.tail_input_fill = 0;
                self.precalc_pos = 0;
            }
            processed += processing;
        }
    }
}
