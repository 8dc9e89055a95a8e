//! Detector-facing stage: runs a [`FaceDetector`] over every frame of a
//! segment and writes the crops plus `detection.csv`.

use image::RgbImage;
use std::path::Path;

use super::record::{write_records_file, DetectionRecord, DetectionTable, PixelBox, Resolution};
use super::region::{relative_to_frame, CropRegion, CropRegions, FaceBox};
use crate::dataset::{list_segments, Segment};
use crate::error::{PrepareError, PrepareResult};
use crate::pipeline::MediaBackend;
use crate::video::crop::ImageSettings;
use crate::video::source::{next_batch, FrameSource, Prefetch};

/// A face detection model.
pub trait FaceDetector {
    /// One entry per input image: its most confident face, if any.
    fn detect(&mut self, batch: &[RgbImage]) -> PrepareResult<Vec<Option<FaceBox>>>;
}

#[derive(Clone, Debug)]
pub struct DetectSettings {
    pub batch_size: usize,
    /// Capacity of the decoded-frame queue.
    pub prefetch: usize,
}

impl Default for DetectSettings {
    fn default() -> Self {
        Self {
            batch_size: 16,
            prefetch: 128,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectOutcome {
    /// `detection.csv` already existed.
    AlreadyDone,
    Detected { frames: u64, faces: usize },
}

fn full_frame(frame: &RgbImage) -> PixelBox {
    PixelBox {
        x1: 0,
        y1: 0,
        x2: frame.width(),
        y2: frame.height(),
    }
}

fn face_pixels(face: &FaceBox, width: u32, height: u32) -> PixelBox {
    let px = |v: f32| v.max(0.0) as u32;
    PixelBox {
        x1: px(face.x1),
        y1: px(face.y1),
        x2: px(face.x2),
        y2: px(face.y2),
    }
    .clamp_to(width, height)
}

fn crop(image: &RgbImage, b: &PixelBox) -> RgbImage {
    image::imageops::crop_imm(image, b.x1, b.y1, b.width(), b.height()).to_image()
}

/// Detect faces in every frame of `segment`.
///
/// Frames are decoded on a prefetch thread, pre-cropped to `region` when one
/// is given, and handed to `detector` in batches. For each detected face the
/// patch is saved as `<frame_id>.<ext>` and a Detection Record relative to
/// the full frame is kept. `detection.csv` is always written, header-only
/// when nothing was found, so a finished segment is never detected twice.
pub fn detect_segment<S, D>(
    source: S,
    detector: &mut D,
    segment: &Segment,
    region: Option<&CropRegion>,
    settings: &DetectSettings,
    images: &ImageSettings,
) -> PrepareResult<DetectOutcome>
where
    S: FrameSource + Send + 'static,
    D: FaceDetector + ?Sized,
{
    let csv_path = segment.detection_path();
    if csv_path.exists() {
        log::debug!("{} exists, skipping detection", csv_path.display());
        return Ok(DetectOutcome::AlreadyDone);
    }

    let out_dir = segment.out_dir();
    std::fs::create_dir_all(&out_dir).map_err(|e| PrepareError::io(&out_dir, e))?;

    let mut frames = Prefetch::spawn(source, settings.prefetch);
    let mut records = Vec::new();
    let mut frame_id: u64 = 0;

    loop {
        let batch = next_batch(&mut frames, settings.batch_size)?;
        if batch.is_empty() {
            break;
        }

        let regions: Vec<PixelBox> = batch
            .iter()
            .map(|frame| match region {
                Some(r) => r.resolve(frame.width(), frame.height()),
                None => full_frame(frame),
            })
            .collect();
        let inputs: Vec<RgbImage> = batch.iter().zip(&regions).map(|(f, r)| crop(f, r)).collect();

        let faces = detector.detect(&inputs)?;
        if faces.len() != inputs.len() {
            return Err(PrepareError::Detector(format!(
                "{} results for a batch of {} frames",
                faces.len(),
                inputs.len()
            )));
        }

        for (((frame, region), input), face) in batch.iter().zip(&regions).zip(&inputs).zip(faces) {
            let id = frame_id;
            frame_id += 1;
            let Some(face) = face else {
                continue;
            };

            let patch_box = face_pixels(&face, input.width(), input.height());
            if patch_box.is_empty() {
                log::warn!("{}: frame {} face box outside the frame, skipped", segment.label(), id);
                continue;
            }
            let path = out_dir.join(images.file_name(id));
            images.save(&crop(input, &patch_box), &path)?;

            let (width, height) = frame.dimensions();
            let (y1, y2, x1, x2) = relative_to_frame(&face, region, width, height);
            records.push(DetectionRecord {
                youtube_id: segment.youtube_id.clone(),
                cut: segment.cut,
                frame_id: id,
                y1,
                y2,
                x1,
                x2,
                resolution: Resolution::new(width, height),
            });
        }
    }

    write_records_file(&csv_path, &records)?;
    log::info!(
        "{}: {} faces in {} frames",
        segment.label(),
        records.len(),
        frame_id
    );
    Ok(DetectOutcome::Detected {
        frames: frame_id,
        faces: records.len(),
    })
}

/// Counters for one detected manifest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DetectReport {
    pub detected: usize,
    pub existing: usize,
    pub faces: usize,
    pub failed: usize,
}

/// Run [`detect_segment`] over every segment of `<speaker>/<split>.txt`.
///
/// The speaker's entry in `regions` pre-crops the frames; speakers without
/// one use the full frame. A failing segment is logged and counted.
#[allow(clippy::too_many_arguments)]
pub fn detect_manifest<B, D>(
    root: &Path,
    speaker: &str,
    split: &str,
    backend: &B,
    detector: &mut D,
    regions: &CropRegions,
    settings: &DetectSettings,
    images: &ImageSettings,
) -> PrepareResult<DetectReport>
where
    B: MediaBackend + ?Sized,
    D: FaceDetector + ?Sized,
{
    let region = regions.get(speaker);
    if region.is_none() {
        log::info!("No crop region for {speaker}, detecting on full frames");
    }

    let mut report = DetectReport::default();
    for segment in list_segments(root, speaker, split)? {
        if segment.detection_path().exists() {
            report.existing += 1;
            continue;
        }
        let result = backend
            .open_frames(&segment.video)
            .and_then(|frames| detect_segment(frames, detector, &segment, region, settings, images));
        match result {
            Ok(DetectOutcome::AlreadyDone) => report.existing += 1,
            Ok(DetectOutcome::Detected { faces, .. }) => {
                report.detected += 1;
                report.faces += faces;
            }
            Err(err) => {
                log::error!("{}: detection failed: {}", segment.label(), err);
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Merge the per-segment `detection.csv` files of a manifest into one
/// detection table at `out`.
///
/// Unreadable per-segment files are logged and skipped. Returns the number
/// of records written, or `None` when no segment has been detected yet, in
/// which case nothing is written.
pub fn collect_table(root: &Path, speaker: &str, split: &str, out: &Path) -> PrepareResult<Option<usize>> {
    let mut records = Vec::new();
    let mut found = 0usize;
    for segment in list_segments(root, speaker, split)? {
        let path = segment.detection_path();
        if !path.exists() {
            continue;
        }
        match DetectionTable::read(&path) {
            Ok(table) => {
                found += 1;
                records.extend(table.records().cloned());
            }
            Err(err) => log::warn!("Skipping {}: {}", path.display(), err),
        }
    }

    if found == 0 {
        return Ok(None);
    }

    // Validates uniqueness across segments before anything is written.
    DetectionTable::from_records(records.iter().cloned()).map_err(|reason| PrepareError::malformed(out, reason))?;

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PrepareError::io(parent, e))?;
    }
    write_records_file(out, &records)?;
    log::info!(
        "Collected {} records from {} segments into {}",
        records.len(),
        found,
        out.display()
    );
    Ok(Some(records.len()))
}
