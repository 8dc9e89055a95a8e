use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::audio::decode::load_wav;
use crate::audio::features::SpectrogramExtractor;
use crate::dataset::{list_segments, table_name, Segment};
use crate::detection::record::{DetectionRecord, DetectionTable};
use crate::encode::ffmpeg::Ffmpeg;
use crate::encode::npz::write_spectrograms;
use crate::error::PrepareResult;
use crate::video::crop::{prepare_video, CropOutcome, ImageSettings};
use crate::video::source::FrameSource;

/// Where frames and audio tracks come from.
pub trait MediaBackend {
    fn open_frames(&self, video: &Path) -> PrepareResult<Box<dyn FrameSource + Send>>;
    /// Write a mono 16-bit PCM WAV of `video`'s audio track at `sample_rate`.
    fn extract_audio(&self, video: &Path, wav: &Path, sample_rate: u32) -> PrepareResult<()>;
}

impl MediaBackend for Ffmpeg {
    fn open_frames(&self, video: &Path) -> PrepareResult<Box<dyn FrameSource + Send>> {
        Ok(Box::new(Ffmpeg::open_frames(self, video)?))
    }

    fn extract_audio(&self, video: &Path, wav: &Path, sample_rate: u32) -> PrepareResult<()> {
        Ffmpeg::extract_audio(self, video, wav, sample_rate)
    }
}

/// Counters for one detection table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableReport {
    /// Segments left after skipping finished ones and unknown youtube ids.
    pub pending: usize,
    pub no_face: usize,
    pub cropped: usize,
    pub crops_existing: usize,
    pub audio: usize,
    pub failed: usize,
}

pub struct Pipeline<B> {
    root: PathBuf,
    extractor: SpectrogramExtractor,
    backend: B,
    images: ImageSettings,
    no_spec: bool,
}

impl<B: MediaBackend> Pipeline<B> {
    pub fn new(root: PathBuf, extractor: SpectrogramExtractor, backend: B, images: ImageSettings, no_spec: bool) -> Self {
        Self {
            root,
            extractor,
            backend,
            images,
            no_spec,
        }
    }

    /// Prepare every pending segment of one `<speaker>-<split>.csv` table.
    ///
    /// A table that cannot be read fails as a whole. Failures of a single
    /// segment are logged and counted, and the remaining segments still run.
    pub fn prepare_table(&self, path: &Path) -> Result<TableReport> {
        let (speaker, split) = table_name(path)
            .with_context(|| format!("Cannot infer speaker and split from {}", path.display()))?;
        let table = DetectionTable::read(path)?;
        log::info!(
            "{}: {} records in {} segments",
            path.display(),
            table.num_records(),
            table.num_segments()
        );

        let youtube_ids = table.youtube_ids();
        let segments: Vec<Segment> = list_segments(&self.root, &speaker, &split)
            .with_context(|| format!("Failed to list {speaker}/{split} segments"))?
            .into_iter()
            .filter(|s| !s.audio_path().exists() && youtube_ids.contains(s.youtube_id.as_str()))
            .collect();

        let mut report = TableReport {
            pending: segments.len(),
            ..Default::default()
        };
        if segments.is_empty() {
            log::info!("{speaker}/{split}: nothing to do");
            return Ok(report);
        }

        let pb = ProgressBar::new(segments.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} segments {msg}")?
                .progress_chars("=>-"),
        );

        for segment in &segments {
            pb.set_message(segment.label());
            match table.segment(&segment.youtube_id, segment.cut) {
                Some(records) if !records.is_empty() => self.prepare_segment(segment, records, &mut report),
                _ => {
                    log::info!("{}: No face detected, skipped", segment.label());
                    report.no_face += 1;
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        log::info!(
            "{speaker}/{split}: {} cropped, {} audio tracks, {} without faces, {} failures",
            report.cropped,
            report.audio,
            report.no_face,
            report.failed
        );
        Ok(report)
    }

    fn prepare_segment(&self, segment: &Segment, records: &HashMap<u64, DetectionRecord>, report: &mut TableReport) {
        match self.crop_segment(segment, records) {
            Ok(CropOutcome::AlreadyDone) => report.crops_existing += 1,
            Ok(CropOutcome::Cropped(summary)) => {
                log::debug!(
                    "{}: {} crops from {} frames",
                    segment.label(),
                    summary.written,
                    summary.decoded
                );
                report.cropped += 1;
            }
            Err(err) => {
                log::error!("{}: cropping failed: {:#}", segment.label(), err);
                report.failed += 1;
            }
        }

        match self.prepare_audio(segment) {
            Ok(()) => report.audio += 1,
            Err(err) => {
                log::error!("{}: audio failed: {:#}", segment.label(), err);
                report.failed += 1;
            }
        }
    }

    fn crop_segment(&self, segment: &Segment, records: &HashMap<u64, DetectionRecord>) -> PrepareResult<CropOutcome> {
        let out_dir = segment.out_dir();
        // Checked before decoding starts; prepare_video repeats it.
        if out_dir.exists() {
            return Ok(CropOutcome::AlreadyDone);
        }
        let mut frames = self.backend.open_frames(&segment.video)?;
        prepare_video(&mut frames, records, &out_dir, &self.images)
    }

    /// Extract `audio.wav` and, unless disabled, write `mels.npz` next to it.
    ///
    /// On failure the WAV is removed again so the segment stays pending.
    fn prepare_audio(&self, segment: &Segment) -> Result<()> {
        let wav = segment.audio_path();
        let result = self.extract_and_compute(segment, &wav);
        if result.is_err() && wav.exists() {
            if let Err(err) = std::fs::remove_file(&wav) {
                log::warn!("Could not remove {}: {}", wav.display(), err);
            }
        }
        result
    }

    fn extract_and_compute(&self, segment: &Segment, wav: &Path) -> Result<()> {
        let out_dir = segment.out_dir();
        std::fs::create_dir_all(&out_dir).with_context(|| format!("Failed to create {}", out_dir.display()))?;

        let sample_rate = self.extractor.params().sample_rate;
        self.backend.extract_audio(&segment.video, wav, sample_rate)?;
        if self.no_spec {
            return Ok(());
        }

        let waveform = load_wav(wav, sample_rate)?;
        let pair = self.extractor.compute(&waveform);
        write_spectrograms(&segment.mels_path(), &pair)?;
        log::debug!(
            "{}: {:.2}s audio, {} spectrogram frames",
            segment.label(),
            waveform.duration(),
            pair.num_frames()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::params::SpectrogramParams;
    use crate::error::PrepareError;
    use crate::video::source::tests::{numbered_frames, VecFrames};
    use std::cell::Cell;
    use std::io::Read;

    struct FakeBackend {
        width: u32,
        height: u32,
        fail_audio: bool,
        opened: Cell<usize>,
        extracted: Cell<usize>,
    }

    impl FakeBackend {
        fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                fail_audio: false,
                opened: Cell::new(0),
                extracted: Cell::new(0),
            }
        }
    }

    impl MediaBackend for FakeBackend {
        fn open_frames(&self, _video: &Path) -> PrepareResult<Box<dyn FrameSource + Send>> {
            self.opened.set(self.opened.get() + 1);
            Ok(Box::new(VecFrames::new(numbered_frames(10, self.width, self.height))))
        }

        fn extract_audio(&self, video: &Path, wav: &Path, sample_rate: u32) -> PrepareResult<()> {
            self.extracted.set(self.extracted.get() + 1);
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut writer = hound::WavWriter::create(wav, spec).unwrap();
            // half a second, so a failure below leaves a partial file behind
            for i in 0..sample_rate / 2 {
                let t = i as f32 / sample_rate as f32;
                let v = (t * 440.0 * std::f32::consts::TAU).sin() * 0.5;
                writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
            }
            writer.finalize().unwrap();
            if self.fail_audio {
                return Err(PrepareError::Extract {
                    tool: "ffmpeg".into(),
                    reason: format!("{} has no audio stream", video.display()),
                });
            }
            Ok(())
        }
    }

    const HEADER: &str = "youtube_id,cut,frame_id,y1,y2,x1,x2,resolution\n";

    /// `hs/test.txt` lists `abc` and `zzz`; `abc` has cuts 0 and 1.
    fn dataset(table_rows: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("hs")).unwrap();
        std::fs::write(root.join("hs/test.txt"), "abc\nzzz\n").unwrap();
        for rel in [
            "hs/intervals/abc/cut-0.mp4",
            "hs/intervals/abc/cut-1.mp4",
            "hs/intervals/zzz/cut-0.mp4",
        ] {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"").unwrap();
        }
        let table = root.join("detection/hs-test.csv");
        std::fs::create_dir_all(table.parent().unwrap()).unwrap();
        std::fs::write(&table, format!("{HEADER}{table_rows}")).unwrap();
        (tmp, table)
    }

    fn pipeline(root: &Path, backend: FakeBackend, no_spec: bool) -> Pipeline<FakeBackend> {
        let extractor = SpectrogramExtractor::new(SpectrogramParams::default()).unwrap();
        Pipeline::new(root.to_path_buf(), extractor, backend, ImageSettings::default(), no_spec)
    }

    fn out_dir(root: &Path, cut: u32) -> PathBuf {
        root.join(format!("hs/preprocessed/abc/cut-{cut}"))
    }

    #[test]
    fn prepares_detected_segments() {
        let (tmp, table) = dataset("abc,0,5,0.1,0.5,0.2,0.6,\"(640, 480)\"\n");
        let root = tmp.path();
        let p = pipeline(root, FakeBackend::new(640, 480), false);

        let report = p.prepare_table(&table).unwrap();
        assert_eq!(
            report,
            TableReport {
                pending: 2,
                no_face: 1,
                cropped: 1,
                crops_existing: 0,
                audio: 1,
                failed: 0
            }
        );
        assert_eq!(p.backend.opened.get(), 1);

        let out = out_dir(root, 0);
        let mut names: Vec<String> = std::fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["5.jpg", "audio.wav", "mels.npz"]);
        assert!(!out_dir(root, 1).exists());
        assert!(!root.join("hs/preprocessed/zzz").exists());

        let file = std::fs::File::open(out.join("mels.npz")).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut header = [0u8; 10];
        archive.by_name("spec.npy").unwrap().read_exact(&mut header).unwrap();
        assert_eq!(&header[..6], b"\x93NUMPY");
        assert!(archive.by_name("lspec.npy").is_ok());
    }

    #[test]
    fn second_run_does_no_work() {
        let (tmp, table) = dataset("abc,0,5,0.1,0.5,0.2,0.6,\"(640, 480)\"\n");
        let root = tmp.path();
        let p = pipeline(root, FakeBackend::new(640, 480), false);
        p.prepare_table(&table).unwrap();

        let out = out_dir(root, 0);
        let snapshot: Vec<Vec<u8>> = ["5.jpg", "audio.wav", "mels.npz"]
            .iter()
            .map(|name| std::fs::read(out.join(name)).unwrap())
            .collect();

        let report = p.prepare_table(&table).unwrap();
        assert_eq!(report.pending, 1);
        assert_eq!(report.no_face, 1);
        assert_eq!(report.audio, 0);
        assert_eq!(p.backend.opened.get(), 1);
        assert_eq!(p.backend.extracted.get(), 1);

        for (name, before) in ["5.jpg", "audio.wav", "mels.npz"].iter().zip(snapshot) {
            assert_eq!(std::fs::read(out.join(name)).unwrap(), before, "{name}");
        }
    }

    #[test]
    fn resolution_mismatch_fails_only_that_segment() {
        let (tmp, table) = dataset(
            "abc,0,1,0.1,0.5,0.2,0.6,\"(1280, 720)\"\n\
             abc,1,2,0.1,0.5,0.2,0.6,\"(640, 480)\"\n",
        );
        let root = tmp.path();
        let p = pipeline(root, FakeBackend::new(640, 480), true);

        let report = p.prepare_table(&table).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.cropped, 1);
        // audio is independent of cropping
        assert_eq!(report.audio, 2);

        assert!(!out_dir(root, 0).join("1.jpg").exists());
        assert!(out_dir(root, 0).join("audio.wav").exists());
        assert!(out_dir(root, 1).join("2.jpg").exists());
        assert!(!out_dir(root, 1).join("mels.npz").exists());
    }

    #[test]
    fn failed_audio_stays_pending() {
        let (tmp, table) = dataset("abc,0,5,0.1,0.5,0.2,0.6,\"(640, 480)\"\n");
        let root = tmp.path();
        let mut backend = FakeBackend::new(640, 480);
        backend.fail_audio = true;
        let p = pipeline(root, backend, false);

        let report = p.prepare_table(&table).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.cropped, 1);
        assert!(!out_dir(root, 0).join("audio.wav").exists());

        // crops are kept, the segment is picked up again
        let report = p.prepare_table(&table).unwrap();
        assert_eq!(report.pending, 2);
        assert_eq!(report.crops_existing, 1);
        assert_eq!(p.backend.opened.get(), 1);
    }

    #[test]
    fn table_without_records_does_nothing() {
        let (tmp, table) = dataset("");
        let p = pipeline(tmp.path(), FakeBackend::new(640, 480), false);

        let report = p.prepare_table(&table).unwrap();
        assert_eq!(report, TableReport::default());
        assert_eq!(p.backend.extracted.get(), 0);
    }

    #[test]
    fn unreadable_tables_are_errors() {
        let (tmp, _) = dataset("");
        let root = tmp.path();
        let p = pipeline(root, FakeBackend::new(640, 480), false);

        let bad = root.join("detection/hs-val.csv");
        std::fs::write(&bad, "youtube_id,cut\nabc,0\n").unwrap();
        let err = p.prepare_table(&bad).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PrepareError>(),
            Some(PrepareError::MalformedRecord { .. })
        ));

        let unnamed = root.join("detection/hs.csv");
        std::fs::write(&unnamed, HEADER).unwrap();
        assert!(p.prepare_table(&unnamed).is_err());
    }
}
