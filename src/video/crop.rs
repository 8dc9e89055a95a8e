use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use std::collections::HashMap;
use std::io::BufWriter;
use std::path::Path;

use super::source::FrameSource;
use crate::detection::record::{DetectionRecord, PixelBox};
use crate::error::{PrepareError, PrepareResult};

/// How crops are written to disk.
#[derive(Clone, Debug)]
pub struct ImageSettings {
    /// File extension, also selects the encoder (`jpg`/`jpeg` or `png`).
    pub ext: String,
    pub jpeg_quality: u8,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            ext: "jpg".into(),
            jpeg_quality: 95,
        }
    }
}

impl ImageSettings {
    pub fn file_name(&self, frame_id: u64) -> String {
        format!("{}.{}", frame_id, self.ext)
    }

    fn format(&self) -> PrepareResult<ImageFormat> {
        match self.ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            other => Err(PrepareError::InvalidConfig(format!(
                "unsupported image extension '{other}'"
            ))),
        }
    }

    pub fn validate(&self) -> PrepareResult<()> {
        self.format().map(|_| ())
    }

    pub fn save(&self, image: &RgbImage, path: &Path) -> PrepareResult<()> {
        match self.format()? {
            ImageFormat::Jpeg => {
                let file = std::fs::File::create(path).map_err(|e| PrepareError::io(path, e))?;
                let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), self.jpeg_quality);
                encoder
                    .encode_image(image)
                    .map_err(|e| PrepareError::encode(path, e))
            }
            format => image
                .save_with_format(path, format)
                .map_err(|e| PrepareError::encode(path, e)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CropSummary {
    pub decoded: u64,
    pub written: usize,
    pub skipped_empty: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CropOutcome {
    /// The output directory already existed.
    AlreadyDone,
    Cropped(CropSummary),
}

/// Crop one frame to a detection's stored box.
///
/// Returns `None` when the box is empty after clamping to the frame.
pub fn crop_frame(frame: &RgbImage, record: &DetectionRecord) -> PrepareResult<Option<RgbImage>> {
    let expected = (record.resolution.width, record.resolution.height);
    let actual = frame.dimensions();
    if expected != actual {
        return Err(PrepareError::ResolutionMismatch {
            frame_id: record.frame_id,
            expected,
            actual,
        });
    }

    let PixelBox { x1, y1, x2, y2 } = record.pixel_box().clamp_to(actual.0, actual.1);
    if x2 <= x1 || y2 <= y1 {
        return Ok(None);
    }
    Ok(Some(
        image::imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image(),
    ))
}

/// Decode `source` front to back and save a crop for every frame listed in
/// `records`.
///
/// Frames without a record are decoded and dropped. The output directory is
/// created lazily before the first crop is written.
pub fn align_crops<S: FrameSource + ?Sized>(
    source: &mut S,
    records: &HashMap<u64, DetectionRecord>,
    out_dir: &Path,
    images: &ImageSettings,
) -> PrepareResult<CropSummary> {
    let mut summary = CropSummary::default();
    let last_wanted = records.keys().copied().max();
    let mut dir_ready = false;

    while let Some(frame) = source.next_frame()? {
        let frame_id = summary.decoded;
        summary.decoded += 1;

        let Some(record) = records.get(&frame_id) else {
            continue;
        };

        match crop_frame(&frame, record)? {
            Some(face) => {
                if !dir_ready {
                    std::fs::create_dir_all(out_dir).map_err(|e| PrepareError::io(out_dir, e))?;
                    dir_ready = true;
                }
                let path = out_dir.join(images.file_name(frame_id));
                images.save(&face, &path)?;
                summary.written += 1;
                log::debug!("Saved crop {} ({}x{})", path.display(), face.width(), face.height());
            }
            None => {
                summary.skipped_empty += 1;
                log::warn!("Frame {} of {}: empty crop box, skipped", frame_id, out_dir.display());
            }
        }
    }

    if let Some(last) = last_wanted {
        if last >= summary.decoded {
            log::warn!(
                "{}: detections reference frame {} but the video has only {} frames",
                out_dir.display(),
                last,
                summary.decoded
            );
        }
    }

    Ok(summary)
}

/// Run [`align_crops`] unless `out_dir` already exists.
///
/// When cropping fails part way, the crops written so far are removed so
/// the next run does not take the segment for finished.
pub fn prepare_video<S: FrameSource + ?Sized>(
    source: &mut S,
    records: &HashMap<u64, DetectionRecord>,
    out_dir: &Path,
    images: &ImageSettings,
) -> PrepareResult<CropOutcome> {
    if out_dir.exists() {
        log::debug!("{} exists, crops already done", out_dir.display());
        return Ok(CropOutcome::AlreadyDone);
    }
    let result = align_crops(source, records, out_dir, images);
    if result.is_err() && out_dir.exists() {
        match std::fs::remove_dir_all(out_dir) {
            Ok(()) => log::debug!("Removed partial crops in {}", out_dir.display()),
            Err(err) => log::warn!("Could not remove partial crops in {}: {}", out_dir.display(), err),
        }
    }
    result.map(CropOutcome::Cropped)
}
