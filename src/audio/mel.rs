//! Mel filterbank and decibel normalization.
//!
//! The filterbank uses the Slaney mel scale (linear below 1 kHz,
//! logarithmic above) with area-normalized triangles.

use super::features::Spectrogram;
use super::params::SpectrogramParams;

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn logstep() -> f64 {
    6.4f64.ln() / 27.0
}

pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / logstep()
    } else {
        hz / F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (logstep() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular mel filters laid out as `[num_mels][num_freq]`.
#[derive(Clone, Debug)]
pub struct MelFilterbank {
    num_mels: usize,
    num_freq: usize,
    weights: Vec<f32>,
}

/// `num_mels + 2` filter edges in Hz, equally spaced on the mel axis.
fn filter_edges(params: &SpectrogramParams) -> Vec<f64> {
    let num_mels = params.num_mels;
    let mel_min = hz_to_mel(params.fmin as f64);
    let mel_max = hz_to_mel(params.fmax as f64);
    (0..num_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (num_mels + 1) as f64))
        .collect()
}

impl MelFilterbank {
    pub fn new(params: &SpectrogramParams) -> Self {
        let num_mels = params.num_mels;
        let num_freq = params.num_freq();
        let sr = params.sample_rate as f64;

        let fft_freqs: Vec<f64> = (0..num_freq)
            .map(|k| k as f64 * sr / params.n_fft as f64)
            .collect();

        let edges = filter_edges(params);

        let mut weights = vec![0.0f32; num_mels * num_freq];
        for m in 0..num_mels {
            let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            let enorm = 2.0 / (hi - lo);
            for (k, &f) in fft_freqs.iter().enumerate() {
                let lower = (f - lo) / (center - lo);
                let upper = (hi - f) / (hi - center);
                let w = lower.min(upper).max(0.0);
                weights[m * num_freq + k] = (w * enorm) as f32;
            }
        }

        Self {
            num_mels,
            num_freq,
            weights,
        }
    }

    /// Project a linear magnitude spectrogram onto the mel axis.
    pub fn project(&self, linear: &Spectrogram) -> Spectrogram {
        debug_assert_eq!(linear.rows, self.num_freq);
        let mut out = Spectrogram::zeros(self.num_mels, linear.cols);
        for m in 0..self.num_mels {
            let filter = &self.weights[m * self.num_freq..(m + 1) * self.num_freq];
            for (k, &w) in filter.iter().enumerate() {
                if w == 0.0 {
                    continue;
                }
                let row = linear.row(k);
                let dst = out.row_mut(m);
                for (d, &s) in dst.iter_mut().zip(row) {
                    *d += w * s;
                }
            }
        }
        out
    }
}

/// `20 * log10(max(x, floor))`.
pub fn amp_to_db(x: f32, floor: f32) -> f32 {
    20.0 * x.max(floor).log10()
}

/// Map decibels from `[min_level_db, 0]` onto the configured output range.
pub fn normalize(db: f32, params: &SpectrogramParams) -> f32 {
    let max_abs = params.max_abs_value;
    let scaled = (db - params.min_level_db) / -params.min_level_db;
    if params.symmetric_mels {
        let v = 2.0 * max_abs * scaled - max_abs;
        if params.allow_clipping_in_normalization {
            v.clamp(-max_abs, max_abs)
        } else {
            v
        }
    } else {
        let v = max_abs * scaled;
        if params.allow_clipping_in_normalization {
            v.clamp(0.0, max_abs)
        } else {
            v
        }
    }
}
