use serde::Deserialize;
use std::path::Path;

use crate::audio::params::SpectrogramParams;
use crate::video::crop::ImageSettings;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub spectrogram: SpectrogramParams,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_image_ext")]
    pub image_ext: String,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default)]
    pub no_spec: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FfmpegConfig {
    #[serde(default = "default_ffmpeg")]
    pub binary: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    #[serde(default)]
    pub threads: Option<u32>,
    #[serde(default = "default_expected_version")]
    pub expected_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spectrogram: SpectrogramParams::default(),
            output: OutputConfig::default(),
            ffmpeg: FfmpegConfig::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            image_ext: default_image_ext(),
            jpeg_quality: default_jpeg_quality(),
            no_spec: false,
        }
    }
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            threads: None,
            expected_version: default_expected_version(),
        }
    }
}

impl OutputConfig {
    pub fn image_settings(&self) -> ImageSettings {
        ImageSettings {
            ext: self.image_ext.clone(),
            jpeg_quality: self.jpeg_quality,
        }
    }
}

fn default_image_ext() -> String { "jpg".into() }
fn default_jpeg_quality() -> u8 { 95 }
fn default_ffmpeg() -> String { "ffmpeg".into() }
fn default_ffprobe() -> String { "ffprobe".into() }
fn default_expected_version() -> String { "2.8.15".into() }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            log::warn!("Invalid config {}: {}", path.display(), err);
            None
        }
    }
}
