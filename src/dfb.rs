/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Weighted-overlap-add polyphase filter bank plus FFT. Each worker owns one
//! `DfbKernel`; kernels never share FFT plans or scratch memory so
//! concurrent iterations never contend.

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Per-iteration sample counts, resolved so that
/// `threshold - consumed == total_channels * oversampling * channel_samples`
/// holds exactly (the overlap region retained between iterations).
pub fn consumed(total_channels: usize, overlap: usize, channel_samples: usize) -> usize {
    (total_channels - overlap) * channel_samples
}

pub fn threshold(total_channels: usize, channel_samples: usize) -> usize {
    total_channels * channel_samples
}

pub struct DfbKernel {
    total_channels: usize,
    overlap: usize,
    channel_samples: usize,
    /// `foldings` polyphase branches of `total_channels` taps each, applied
    /// to the rolling history window before each FFT.
    coeff: Vec<f32>,
    foldings: usize,
    /// Rolling WOLA history, `foldings * total_channels` samples, carried
    /// across `iterate` calls so a kernel's pipeline fills in gradually
    /// rather than requiring the full history up front on every call.
    history: Vec<Complex32>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
}

impl DfbKernel {
    pub fn new(total_channels: usize, overlap: usize, foldings: usize, channel_samples: usize) -> Self {
        assert_eq!(overlap % 2, 0, "overlap must be even");
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(total_channels);
        let scratch_len = fft.get_inplace_scratch_len();
        Self {
            total_channels,
            overlap,
            channel_samples,
            coeff: default_prototype_filter(total_channels, foldings),
            foldings,
            history: vec![Complex32::default(); foldings * total_channels],
            fft,
            scratch: vec![Complex32::default(); scratch_len],
        }
    }

    /// Replaces the prototype filter coefficients. `coeff.len()` must equal
    /// `foldings * total_channels`. Loading from a filter-coefficient file is
    /// an external collaborator; this accepts already-loaded coefficients.
    pub fn set_coeff(&mut self, coeff: Vec<f32>, foldings: usize) {
        assert_eq!(coeff.len(), foldings * self.total_channels);
        self.foldings = foldings;
        self.coeff = coeff;
        self.history = vec![Complex32::default(); foldings * self.total_channels];
    }

    pub fn hop(&self) -> usize {
        self.total_channels - self.overlap
    }

    /// Consumes `threshold(total_channels, channel_samples)` input samples
    /// and writes `channel_samples` natural-FFT-order bins for each usable
    /// channel index into `out`. `usable_indices` lists the natural-FFT-order
    /// bin indices considered usable (negative frequencies first, then DC
    /// and positive frequencies); `out.len()` must equal
    /// `usable_indices.len()`, and each `out[k]` must have length
    /// `channel_samples`.
    pub fn iterate(&mut self, input: &[Complex32], usable_indices: &[usize], out: &mut [Vec<Complex32>]) {
        assert_eq!(input.len(), threshold(self.total_channels, self.channel_samples));
        assert_eq!(out.len(), usable_indices.len());
        let hop = self.hop();
        let mut fft_buf = vec![Complex32::default(); self.total_channels];

        for h in 0..self.channel_samples {
            let new_samples = &input[h * hop..h * hop + hop];
            self.shift_history(new_samples);
            self.apply_filter(&mut fft_buf);
            self.fft.process_with_scratch(&mut fft_buf, &mut self.scratch);
            for (k, &bin) in usable_indices.iter().enumerate() {
                out[k][h] = fft_buf[bin];
            }
        }
    }

    fn shift_history(&mut self, new_samples: &[Complex32]) {
        let hop = new_samples.len();
        self.history.rotate_left(hop);
        let len = self.history.len();
        self.history[len - hop..].copy_from_slice(new_samples);
    }

    fn apply_filter(&self, fft_buf: &mut [Complex32]) {
        for bin in fft_buf.iter_mut() {
            *bin = Complex32::default();
        }
        for fold in 0..self.foldings {
            let base = fold * self.total_channels;
            for c in 0..self.total_channels {
                fft_buf[c] += self.history[base + c] * self.coeff[base + c];
            }
        }
    }
}

fn default_prototype_filter(total_channels: usize, foldings: usize) -> Vec<f32> {
    let len = foldings * total_channels;
    (0..len)
        .map(|i| {
            let x = i as f32 / (len - 1).max(1) as f32;
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn threshold_consumed_relationship_holds() {
        let total = 16;
        let overlap = 4;
        let samples = 8;
        let t = threshold(total, samples);
        let c = consumed(total, overlap, samples);
        assert_eq!(t - c, overlap * samples);
    }

    #[test]
    fn iterate_produces_requested_shape() {
        let total = 8;
        let overlap = 2;
        let foldings = 2;
        let channel_samples = 4;
        let mut kernel = DfbKernel::new(total, overlap, foldings, channel_samples);
        let input = vec![Complex32::new(1.0, 0.0); threshold(total, channel_samples)];
        let usable = vec![0usize, 1, total - 1];
        let mut out: Vec<Vec<Complex32>> = usable.iter().map(|_| vec![Complex32::default(); channel_samples]).collect();
        kernel.iterate(&input, &usable, &mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].len(), channel_samples);
    }

    #[test]
    fn dc_bin_tracks_constant_input() {
        let total = 4;
        let overlap = 0;
        let foldings = 1;
        let channel_samples = 2;
        let mut kernel = DfbKernel::new(total, overlap, foldings, channel_samples);
        kernel.set_coeff(vec![1.0; total], foldings);
        let input = vec![Complex32::new(1.0, 0.0); threshold(total, channel_samples)];
        let usable = vec![0usize];
        let mut out = vec![vec![Complex32::default(); channel_samples]];
        kernel.iterate(&input, &usable, &mut out);
        assert!(out[0][channel_samples - 1].re > 0.0);
    }
}
