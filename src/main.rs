mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use cli::Cli;
use lipprep::audio::features::SpectrogramExtractor;
use lipprep::config::{self, Config};
use lipprep::dataset::table_name;
use lipprep::detection::detect::collect_table;
use lipprep::encode::ffmpeg::Ffmpeg;
use lipprep::pipeline::Pipeline;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect lipprep.toml / global config
    let config_path = cli.config.clone().or_else(|| {
        let local = PathBuf::from("lipprep.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("lipprep").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("lipprep").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });
    let mut cfg = match config_path {
        Some(ref path) => match config::load_config(path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            None => {
                log::warn!("Failed to load config from {}", path.display());
                Config::default()
            }
        },
        None => Config::default(),
    };
    apply_overrides(&cli, &mut cfg);

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg.spectrogram)?);
        return Ok(());
    }

    if cli.detections.is_empty() {
        anyhow::bail!("No detection tables given, expected e.g. detection/chess-train.csv");
    }

    let extractor =
        SpectrogramExtractor::new(cfg.spectrogram.clone()).context("Invalid spectrogram parameters")?;
    let images = cfg.output.image_settings();
    images.validate()?;

    let ffmpeg = Ffmpeg::new(&cfg.ffmpeg);
    ffmpeg.check_version(&cfg.ffmpeg.expected_version);

    log::info!("lipprep - lip-to-speech dataset preparation");
    log::info!("Root: {}", cli.root.display());
    log::info!(
        "Spectrogram: {}Hz, hop {}, window {}, n_fft {}, {} mels ({}-{}Hz)",
        cfg.spectrogram.sample_rate,
        cfg.spectrogram.hop_size,
        cfg.spectrogram.win_size,
        cfg.spectrogram.n_fft,
        cfg.spectrogram.num_mels,
        cfg.spectrogram.fmin,
        cfg.spectrogram.fmax
    );

    if cli.collect {
        for path in &cli.detections {
            let Some((speaker, split)) = table_name(path) else {
                log::warn!("Cannot infer speaker and split from {}, not collected", path.display());
                continue;
            };
            match collect_table(&cli.root, &speaker, &split, path) {
                Ok(Some(_)) => {}
                Ok(None) => log::warn!("No detection is found for {speaker}/{split}. Skipped."),
                Err(err) => log::error!("Collecting {speaker}/{split} failed: {err}"),
            }
        }
    }

    let no_spec = cli.no_spec || cfg.output.no_spec;
    let pipeline = Pipeline::new(cli.root.clone(), extractor, ffmpeg, images, no_spec);

    let total = cli.detections.len();
    let mut failed = 0;
    for (i, path) in cli.detections.iter().enumerate() {
        log::info!("[{}/{}] {}", i + 1, total, path.display());
        if let Err(err) = pipeline.prepare_table(path) {
            log::warn!("{}: {:#}. Skipped.", path.display(), err);
            failed += 1;
        }
    }

    if failed > 0 {
        log::warn!("{} of {} detection tables were skipped", failed, total);
    }
    log::info!("Done");
    Ok(())
}

/// CLI values win over the config file.
fn apply_overrides(cli: &Cli, cfg: &mut Config) {
    let spec = &mut cfg.spectrogram;
    if let Some(v) = cli.sample_rate {
        spec.sample_rate = v;
    }
    if let Some(v) = cli.hop_size {
        spec.hop_size = v;
    }
    if let Some(v) = cli.win_size {
        spec.win_size = v;
    }
    if let Some(v) = cli.n_fft {
        spec.n_fft = v;
    }
    if let Some(v) = cli.num_mels {
        spec.num_mels = v;
    }
    if let Some(v) = cli.fmin {
        spec.fmin = v;
    }
    if let Some(v) = cli.fmax {
        spec.fmax = v;
    }
    if let Some(ref ext) = cli.image_ext {
        cfg.output.image_ext = ext.clone();
    }
}
