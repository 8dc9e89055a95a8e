use super::decode::Waveform;
use super::mel::{self, MelFilterbank};
use super::params::SpectrogramParams;
use super::stft::{preemphasis, Stft};

/// Row-major 2-D array, `rows` frequency bins by `cols` frames.
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrogram {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl Spectrogram {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build from per-frame columns of length `rows`.
    pub fn from_columns(rows: usize, columns: &[Vec<f32>]) -> Self {
        let cols = columns.len();
        let mut out = Self::zeros(rows, cols);
        for (t, column) in columns.iter().enumerate() {
            for (r, &v) in column.iter().enumerate().take(rows) {
                out.data[r * cols + t] = v;
            }
        }
        out
    }

    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn row_mut(&mut self, r: usize) -> &mut [f32] {
        let cols = self.cols;
        &mut self.data[r * cols..(r + 1) * cols]
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn map_in_place(&mut self, f: impl Fn(f32) -> f32) {
        for v in &mut self.data {
            *v = f(*v);
        }
    }
}

/// Mel and linear spectrograms of one segment, persisted together.
#[derive(Clone, Debug)]
pub struct SpectrogramPair {
    /// `[num_mels, num_frames]`
    pub mel: Spectrogram,
    /// `[n_fft / 2 + 1, num_frames]`
    pub linear: Spectrogram,
}

impl SpectrogramPair {
    pub fn num_frames(&self) -> usize {
        self.mel.cols
    }
}

/// Computes [`SpectrogramPair`]s for one configuration.
///
/// The STFT plan and the mel filterbank are built once and reused for every
/// waveform of the run.
pub struct SpectrogramExtractor {
    params: SpectrogramParams,
    stft: Stft,
    filterbank: MelFilterbank,
}

impl SpectrogramExtractor {
    pub fn new(params: SpectrogramParams) -> crate::error::PrepareResult<Self> {
        params.validate()?;
        if params.use_alternate_stft_backend {
            log::warn!("use_alternate_stft_backend is set but only the built-in STFT is available");
        }
        let stft = Stft::new(&params);
        let filterbank = MelFilterbank::new(&params);
        Ok(Self {
            params,
            stft,
            filterbank,
        })
    }

    pub fn params(&self) -> &SpectrogramParams {
        &self.params
    }

    /// STFT magnitude of the (optionally pre-emphasized) waveform.
    fn magnitude(&self, samples: &[f32]) -> Spectrogram {
        if self.params.preemphasize {
            self.stft.magnitude(&preemphasis(samples, self.params.preemphasis))
        } else {
            self.stft.magnitude(samples)
        }
    }

    pub fn compute(&self, waveform: &Waveform) -> SpectrogramPair {
        if waveform.sample_rate != self.params.sample_rate {
            log::warn!(
                "Waveform is {}Hz but spectrogram parameters assume {}Hz",
                waveform.sample_rate,
                self.params.sample_rate
            );
        }

        let magnitude = self.magnitude(&waveform.samples);
        let mut mel = self.filterbank.project(&magnitude);
        let mut linear = magnitude;

        self.to_decibels(&mut mel);
        self.to_decibels(&mut linear);

        SpectrogramPair { mel, linear }
    }

    fn to_decibels(&self, spec: &mut Spectrogram) {
        let params = &self.params;
        let floor = params.amplitude_floor();
        let ref_db = params.ref_level_db;
        if params.signal_normalization {
            spec.map_in_place(|x| mel::normalize(mel::amp_to_db(x, floor) - ref_db, params));
        } else {
            spec.map_in_place(|x| mel::amp_to_db(x, floor) - ref_db);
        }
    }
}
