use image::RgbImage;
use serde::Deserialize;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use crate::config::FfmpegConfig;
use crate::error::{PrepareError, PrepareResult};
use crate::video::source::FrameSource;

/// Thin wrapper around the `ffmpeg` / `ffprobe` executables.
#[derive(Clone, Debug)]
pub struct Ffmpeg {
    binary: String,
    ffprobe: String,
    threads: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

impl Ffmpeg {
    pub fn new(config: &FfmpegConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            ffprobe: config.ffprobe.clone(),
            threads: config.threads,
        }
    }

    fn extract_error(&self, tool: &str, reason: impl Into<String>) -> PrepareError {
        PrepareError::Extract {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    /// First line of `ffmpeg -version`.
    pub fn version(&self) -> PrepareResult<String> {
        let output = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.extract_error(&self.binary, format!("failed to spawn: {e}. Is ffmpeg installed?")))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    /// Warn when the installed ffmpeg is not the version the dataset was built with.
    pub fn check_version(&self, expected: &str) {
        match self.version() {
            Ok(banner) if banner.contains(expected) => {
                log::info!("Using {}", banner);
            }
            Ok(banner) => {
                log::warn!(
                    "Expected ffmpeg {} but found: {}. Extracted audio may differ slightly from the published dataset.",
                    expected,
                    banner
                );
            }
            Err(err) => log::warn!("Could not determine ffmpeg version: {}", err),
        }
    }

    /// Extract a mono 16-bit PCM WAV track at `sample_rate`.
    pub fn extract_audio(&self, video: &Path, wav: &Path, sample_rate: u32) -> PrepareResult<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        if let Some(threads) = self.threads {
            cmd.args(["-threads", &threads.to_string()]);
        }
        cmd.arg("-y")
            .arg("-i")
            .arg(video)
            .args(["-vn", "-ac", "1", "-acodec", "pcm_s16le", "-ar"])
            .arg(sample_rate.to_string())
            .args(["-f", "wav"])
            .arg(wav);

        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| self.extract_error(&self.binary, format!("failed to spawn: {e}. Is ffmpeg installed?")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.extract_error(
                &self.binary,
                format!("{} exited with {}:\n{}", video.display(), output.status, stderr.trim()),
            ));
        }

        log::debug!("Extracted {} -> {}", video.display(), wav.display());
        Ok(())
    }

    /// Width and height of the first video stream.
    pub fn probe_resolution(&self, video: &Path) -> PrepareResult<(u32, u32)> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height", "-of", "json"])
            .arg(video)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| self.extract_error(&self.ffprobe, format!("failed to spawn: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PrepareError::decode(video, stderr.trim().to_string()));
        }

        parse_probe(&output.stdout).ok_or_else(|| PrepareError::decode(video, "no video stream found"))
    }

    /// Start decoding `video` to raw RGB frames.
    ///
    /// Frames are written in stored orientation (`-noautorotate`) so their size
    /// matches what ffprobe reports. Stderr is drained on a helper thread.
    pub fn open_frames(&self, video: &Path) -> PrepareResult<FfmpegFrames> {
        if !video.exists() {
            return Err(PrepareError::io(
                video,
                std::io::Error::new(std::io::ErrorKind::NotFound, "video file not found"),
            ));
        }
        let (width, height) = self.probe_resolution(video)?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        if let Some(threads) = self.threads {
            cmd.args(["-threads", &threads.to_string()]);
        }
        let mut child = cmd
            .arg("-noautorotate")
            .arg("-i")
            .arg(video)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-vsync", "passthrough", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.extract_error(&self.binary, format!("failed to spawn: {e}. Is ffmpeg installed?")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.extract_error(&self.binary, "stdout not available"))?;
        let stderr = child
            .stderr
            .take()
            .map(|mut pipe| {
                std::thread::spawn(move || {
                    let mut buf = Vec::new();
                    let _ = pipe.read_to_end(&mut buf);
                    buf
                })
            });

        log::debug!("Decoding {} at {}x{}", video.display(), width, height);

        Ok(FfmpegFrames {
            child: Some(child),
            stdout: BufReader::new(stdout),
            stderr,
            width,
            height,
            video: video.to_path_buf(),
        })
    }
}

fn parse_probe(json: &[u8]) -> Option<(u32, u32)> {
    let probe: ProbeOutput = serde_json::from_slice(json).ok()?;
    probe
        .streams
        .into_iter()
        .find_map(|s| Some((s.width?, s.height?)))
}

/// Raw RGB frames read from an `ffmpeg` pipe, in decode order.
pub struct FfmpegFrames {
    child: Option<Child>,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    width: u32,
    height: u32,
    video: PathBuf,
}

impl FfmpegFrames {
    fn collect_stderr(&mut self) -> String {
        match self.stderr.take().map(JoinHandle::join) {
            Some(Ok(buf)) => String::from_utf8_lossy(&buf).trim().to_string(),
            _ => String::new(),
        }
    }

    fn finish(&mut self) -> PrepareResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().map_err(|e| PrepareError::io(&self.video, e))?;
        let stderr = self.collect_stderr();
        if !status.success() {
            return Err(PrepareError::decode(&self.video, stderr));
        }
        if !stderr.is_empty() {
            log::debug!("{}: ffmpeg reported: {}", self.video.display(), stderr);
        }
        Ok(())
    }
}

impl FrameSource for FfmpegFrames {
    fn next_frame(&mut self) -> PrepareResult<Option<RgbImage>> {
        if self.child.is_none() {
            return Ok(None);
        }

        let frame_len = self.width as usize * self.height as usize * 3;
        let mut buf = vec![0u8; frame_len];
        let mut filled = 0;
        while filled < frame_len {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PrepareError::io(&self.video, e)),
            }
        }

        if filled == 0 {
            self.finish()?;
            return Ok(None);
        }
        if filled < frame_len {
            self.finish()?;
            return Err(PrepareError::decode(
                &self.video,
                format!("truncated frame: got {filled} of {frame_len} bytes"),
            ));
        }

        RgbImage::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| PrepareError::decode(&self.video, "frame buffer size mismatch"))
    }
}

impl Drop for FfmpegFrames {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        // the pipe is closed once the child is gone
        let _ = self.collect_stderr();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_json() {
        let json = br#"{"programs": [], "streams": [{"width": 1280, "height": 720}]}"#;
        assert_eq!(parse_probe(json), Some((1280, 720)));
    }

    #[test]
    fn probe_without_video_stream() {
        assert_eq!(parse_probe(br#"{"streams": []}"#), None);
        assert_eq!(parse_probe(br#"{}"#), None);
        assert_eq!(parse_probe(b"not json"), None);
    }

    #[test]
    fn missing_binary_is_extract_error() {
        let ffmpeg = Ffmpeg::new(&FfmpegConfig {
            binary: "/nonexistent/ffmpeg-binary".into(),
            ..Default::default()
        });
        let tmp = tempfile::tempdir().unwrap();
        let err = ffmpeg
            .extract_audio(&tmp.path().join("in.mp4"), &tmp.path().join("out.wav"), 16000)
            .unwrap_err();
        assert!(matches!(err, PrepareError::Extract { .. }));
    }

    #[test]
    fn missing_video_is_io_error() {
        let ffmpeg = Ffmpeg::new(&FfmpegConfig::default());
        let err = ffmpeg.open_frames(Path::new("/no/such/video.mp4")).err().unwrap();
        assert!(matches!(err, PrepareError::Io { .. }));
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Stand-in tools: ffprobe reports 4x4, ffmpeg records its arguments,
    /// floods stderr and then writes `frames` raw frames.
    #[cfg(unix)]
    fn fake_tools(dir: &Path, frames: usize, exit: u8) -> Ffmpeg {
        let args = dir.join("args.txt");
        let ffprobe = script(dir, "ffprobe", r#"echo '{"streams": [{"width": 4, "height": 4}]}'"#);
        let binary = script(
            dir,
            "ffmpeg",
            &format!(
                "echo \"$@\" > '{}'\nhead -c 200000 /dev/zero | tr '\\0' x >&2\nhead -c {} /dev/zero\nexit {}",
                args.display(),
                frames * 48,
                exit
            ),
        );
        Ffmpeg::new(&FfmpegConfig {
            binary,
            ffprobe,
            ..Default::default()
        })
    }

    #[cfg(unix)]
    fn drain(ffmpeg: Ffmpeg, video: PathBuf) -> PrepareResult<usize> {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = ffmpeg.open_frames(&video).and_then(|mut frames| {
                let mut count = 0;
                while let Some(frame) = frames.next_frame()? {
                    assert_eq!(frame.dimensions(), (4, 4));
                    count += 1;
                }
                Ok(count)
            });
            let _ = tx.send(result);
        });
        rx.recv_timeout(std::time::Duration::from_secs(20))
            .expect("frame pipe stalled")
    }

    #[cfg(unix)]
    #[test]
    fn noisy_stderr_does_not_block_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("cut-0.mp4");
        std::fs::write(&video, b"").unwrap();

        let count = drain(fake_tools(tmp.path(), 2, 0), video).unwrap();
        assert_eq!(count, 2);

        let args = std::fs::read_to_string(tmp.path().join("args.txt")).unwrap();
        let noautorotate = args.find("-noautorotate").unwrap();
        assert!(noautorotate < args.find("-i ").unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn failing_decoder_reports_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("cut-0.mp4");
        std::fs::write(&video, b"").unwrap();

        match drain(fake_tools(tmp.path(), 1, 1), video) {
            Err(PrepareError::Decode { reason, .. }) => assert!(reason.starts_with("xxx")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
