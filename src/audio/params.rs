use serde::{Deserialize, Serialize};

use crate::error::{PrepareError, PrepareResult};

/// Numeric parameters shared by every segment of one run.
///
/// Sizes are in samples. The defaults reproduce the parameters the
/// dataset was originally published with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramParams {
    pub sample_rate: u32,
    pub preemphasize: bool,
    pub preemphasis: f32,
    pub hop_size: usize,
    pub win_size: usize,
    pub n_fft: usize,
    pub fmax: f32,
    pub fmin: f32,
    pub num_mels: usize,
    pub signal_normalization: bool,
    pub min_level_db: f32,
    pub ref_level_db: f32,
    pub max_abs_value: f32,
    pub use_alternate_stft_backend: bool,
    pub symmetric_mels: bool,
    pub allow_clipping_in_normalization: bool,
}

impl Default for SpectrogramParams {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            preemphasize: true,
            preemphasis: 0.97,
            hop_size: 200,
            win_size: 800,
            n_fft: 800,
            fmax: 7600.0,
            fmin: 55.0,
            num_mels: 80,
            signal_normalization: true,
            min_level_db: -100.0,
            ref_level_db: 20.0,
            max_abs_value: 4.0,
            use_alternate_stft_backend: false,
            symmetric_mels: true,
            allow_clipping_in_normalization: true,
        }
    }
}

impl SpectrogramParams {
    /// Number of frequency bins of the linear spectrogram.
    pub fn num_freq(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Amplitude floor applied before the decibel conversion.
    pub fn amplitude_floor(&self) -> f32 {
        10f32.powf(self.min_level_db / 20.0)
    }

    pub fn validate(&self) -> PrepareResult<()> {
        let fail = |msg: String| Err(PrepareError::InvalidConfig(msg));

        if self.sample_rate == 0 {
            return fail("sample_rate must be positive".into());
        }
        if self.hop_size == 0 || self.win_size == 0 || self.n_fft == 0 {
            return fail(format!(
                "hop_size ({}), win_size ({}) and n_fft ({}) must be positive",
                self.hop_size, self.win_size, self.n_fft
            ));
        }
        if self.win_size > self.n_fft {
            return fail(format!(
                "win_size ({}) must not exceed n_fft ({})",
                self.win_size, self.n_fft
            ));
        }
        if self.num_mels == 0 {
            return fail("num_mels must be positive".into());
        }
        if self.fmin < 0.0 || self.fmin >= self.fmax {
            return fail(format!(
                "expected 0 <= fmin < fmax, got fmin={} fmax={}",
                self.fmin, self.fmax
            ));
        }
        if self.fmax > self.sample_rate as f32 / 2.0 {
            return fail(format!(
                "fmax ({}) exceeds the Nyquist frequency of {} Hz",
                self.fmax, self.sample_rate
            ));
        }
        if !(self.min_level_db < 0.0) {
            return fail(format!("min_level_db must be negative, got {}", self.min_level_db));
        }
        if !(self.max_abs_value > 0.0) {
            return fail(format!("max_abs_value must be positive, got {}", self.max_abs_value));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let params = SpectrogramParams::default();
        params.validate().unwrap();
        assert_eq!(params.num_freq(), 401);
        assert!((params.amplitude_floor() - 1e-5).abs() < 1e-10);
    }

    #[test]
    fn rejects_fmax_above_nyquist() {
        let params = SpectrogramParams {
            fmax: 9000.0,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(PrepareError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_zero_min_level() {
        let params = SpectrogramParams {
            min_level_db: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let params: SpectrogramParams = toml::from_str("num_mels = 40\nsymmetric_mels = false").unwrap();
        assert_eq!(params.num_mels, 40);
        assert!(!params.symmetric_mels);
        assert_eq!(params.hop_size, 200);
    }
}
