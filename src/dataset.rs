//! On-disk layout of the dataset.
//!
//! ```text
//! <root>/<speaker>/<split>.txt                          youtube ids, one per line
//! <root>/<speaker>/intervals/<youtube_id>/cut-<n>.mp4   time-trimmed segments
//! <root>/<speaker>/preprocessed/<youtube_id>/cut-<n>/   per-segment outputs
//! ```

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::error::{PrepareError, PrepareResult};

pub const INTERVALS_DIR: &str = "intervals";
pub const PREPROCESSED_DIR: &str = "preprocessed";
pub const AUDIO_FILE: &str = "audio.wav";
pub const MELS_FILE: &str = "mels.npz";
pub const DETECTION_FILE: &str = "detection.csv";

/// One time-trimmed cut of a source video.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub youtube_id: String,
    pub cut: u32,
    pub video: PathBuf,
}

impl Segment {
    /// Identify a segment from `.../<youtube_id>/cut-<n>.mp4`.
    pub fn from_video(path: &Path) -> Option<Self> {
        let youtube_id = path.parent()?.file_name()?.to_str()?.to_string();
        let stem = path.file_stem()?.to_str()?;
        let cut = stem.rsplit('-').next()?.parse().ok()?;
        Some(Self {
            youtube_id,
            cut,
            video: path.to_path_buf(),
        })
    }

    pub fn out_dir(&self) -> PathBuf {
        output_dir_for(&self.video)
    }

    pub fn audio_path(&self) -> PathBuf {
        self.out_dir().join(AUDIO_FILE)
    }

    pub fn mels_path(&self) -> PathBuf {
        self.out_dir().join(MELS_FILE)
    }

    pub fn detection_path(&self) -> PathBuf {
        self.out_dir().join(DETECTION_FILE)
    }

    pub fn label(&self) -> String {
        format!("{}/cut-{}", self.youtube_id, self.cut)
    }
}

/// `…/intervals/<id>/cut-<n>.mp4` → `…/preprocessed/<id>/cut-<n>`.
pub fn output_dir_for(video: &Path) -> PathBuf {
    let stripped = video.with_extension("");
    let components: Vec<Component> = stripped.components().collect();
    let Some(pos) = components.iter().rposition(|c| c.as_os_str() == INTERVALS_DIR) else {
        return stripped;
    };
    components
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == pos {
                OsStr::new(PREPROCESSED_DIR)
            } else {
                c.as_os_str()
            }
        })
        .collect()
}

/// Speaker and split encoded in a detection table name, e.g. `chess-train.csv`.
pub fn table_name(path: &Path) -> Option<(String, String)> {
    let stem = path.file_stem()?.to_str()?;
    let (speaker, split) = stem.split_once('-')?;
    if speaker.is_empty() || split.is_empty() || split.contains('-') {
        return None;
    }
    Some((speaker.to_string(), split.to_string()))
}

/// Youtube ids listed in `<root>/<speaker>/<split>.txt`.
pub fn read_manifest(root: &Path, speaker: &str, split: &str) -> PrepareResult<Vec<String>> {
    let path = root.join(speaker).join(format!("{split}.txt"));
    let text = std::fs::read_to_string(&path).map_err(|e| PrepareError::io(&path, e))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

fn collect_videos(dir: &Path, out: &mut Vec<PathBuf>) -> PrepareResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| PrepareError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PrepareError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| PrepareError::io(&path, e))?;
        if file_type.is_dir() {
            collect_videos(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "mp4") {
            out.push(path);
        }
    }
    Ok(())
}

/// Every segment video of the manifest's youtube ids, in manifest order.
pub fn list_segments(root: &Path, speaker: &str, split: &str) -> PrepareResult<Vec<Segment>> {
    let mut segments = Vec::new();
    for youtube_id in read_manifest(root, speaker, split)? {
        let dir = root.join(speaker).join(INTERVALS_DIR).join(&youtube_id);
        if !dir.is_dir() {
            log::debug!("No intervals for {} in {}", youtube_id, dir.display());
            continue;
        }
        let mut videos = Vec::new();
        collect_videos(&dir, &mut videos)?;
        videos.sort();
        for video in videos {
            match Segment::from_video(&video) {
                Some(segment) => segments.push(segment),
                None => log::warn!("Cannot parse segment name {}, skipped", video.display()),
            }
        }
    }
    Ok(segments)
}
