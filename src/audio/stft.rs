use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use std::sync::Arc;

use super::features::Spectrogram;
use super::params::SpectrogramParams;

/// First-order pre-emphasis `y[t] = x[t] - k * x[t-1]`, with `y[0] = x[0]`.
pub fn preemphasis(samples: &[f32], k: f32) -> Vec<f32> {
    let mut out = Vec::with_capacity(samples.len());
    let mut prev = 0.0f32;
    for &s in samples {
        out.push(s - k * prev);
        prev = s;
    }
    out
}

/// Periodic Hann window of `win_size`, centred inside `n_fft` zeros.
pub fn hann_window(win_size: usize, n_fft: usize) -> Vec<f32> {
    let mut window = vec![0.0f32; n_fft];
    let offset = (n_fft - win_size) / 2;
    for i in 0..win_size {
        let angle = 2.0 * std::f64::consts::PI * i as f64 / win_size as f64;
        window[offset + i] = (0.5 - 0.5 * angle.cos()) as f32;
    }
    window
}

/// Frame count of a centred STFT: `1 + floor(len / hop)`.
pub fn num_frames(len: usize, hop_size: usize) -> usize {
    1 + len / hop_size
}

/// Mirror an out-of-range index back into `0..len` without repeating the edge sample.
fn reflect_index(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let m = i.rem_euclid(period);
    if m < len as isize {
        m as usize
    } else {
        (period - m) as usize
    }
}

/// Centred, reflect-padded short-time Fourier transform.
///
/// Holds the window and the FFT plan so one instance serves every
/// waveform of a run.
pub struct Stft {
    n_fft: usize,
    hop_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn rustfft::Fft<f32>>,
}

impl Stft {
    pub fn new(params: &SpectrogramParams) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(params.n_fft);
        Self {
            n_fft: params.n_fft,
            hop_size: params.hop_size,
            window: hann_window(params.win_size, params.n_fft),
            fft,
        }
    }

    pub fn num_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Pad `samples` by `n_fft / 2` on both sides by reflection.
    ///
    /// The result is long enough for every frame `num_frames` promises;
    /// anything past the reflected tail is zero.
    fn pad(&self, samples: &[f32]) -> Vec<f32> {
        let pad = self.n_fft / 2;
        let frames = num_frames(samples.len(), self.hop_size);
        let needed = (frames - 1) * self.hop_size + self.n_fft;
        let len = samples.len();

        let mut padded = vec![0.0f32; needed.max(len + 2 * pad)];
        if len == 0 {
            return padded;
        }
        for (j, slot) in padded.iter_mut().enumerate().take(len + 2 * pad) {
            let i = j as isize - pad as isize;
            *slot = samples[reflect_index(i, len)];
        }
        padded
    }

    /// Magnitude spectrogram with shape `[n_fft / 2 + 1, num_frames]`.
    pub fn magnitude(&self, samples: &[f32]) -> Spectrogram {
        let padded = self.pad(samples);
        let frames = num_frames(samples.len(), self.hop_size);
        let bins = self.num_bins();

        let columns: Vec<Vec<f32>> = (0..frames)
            .into_par_iter()
            .map(|t| {
                let start = t * self.hop_size;
                let mut buffer: Vec<Complex<f32>> = padded[start..start + self.n_fft]
                    .iter()
                    .zip(self.window.iter())
                    .map(|(&s, &w)| Complex::new(s * w, 0.0))
                    .collect();
                self.fft.process(&mut buffer);
                buffer[..bins].iter().map(|c| c.norm()).collect()
            })
            .collect();

        Spectrogram::from_columns(bins, &columns)
    }
}
