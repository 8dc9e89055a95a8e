use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lipprep", about = "Prepare face crops and spectrograms for a lip-to-speech dataset")]
pub struct Cli {
    /// Detection tables named <speaker>-<split>.csv
    pub detections: Vec<PathBuf>,

    /// Dataset root holding <speaker>/<split>.txt and <speaker>/intervals/
    #[arg(long, default_value = "Dataset")]
    pub root: PathBuf,

    /// Path to config file (default: auto-detect lipprep.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Rebuild each detection table from per-segment detection.csv files first
    #[arg(long)]
    pub collect: bool,

    /// Extract audio but skip the spectrograms
    #[arg(long)]
    pub no_spec: bool,

    /// Audio sample rate in Hz
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// STFT hop size in samples
    #[arg(long)]
    pub hop_size: Option<usize>,

    /// STFT window size in samples
    #[arg(long)]
    pub win_size: Option<usize>,

    /// FFT size in samples
    #[arg(long)]
    pub n_fft: Option<usize>,

    /// Number of mel bands
    #[arg(long)]
    pub num_mels: Option<usize>,

    /// Lowest mel filter frequency in Hz
    #[arg(long)]
    pub fmin: Option<f32>,

    /// Highest mel filter frequency in Hz
    #[arg(long)]
    pub fmax: Option<f32>,

    /// Image format of the face crops (jpg or png)
    #[arg(long)]
    pub image_ext: Option<String>,

    /// Print the effective spectrogram parameters as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}
