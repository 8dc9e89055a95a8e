use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{PrepareError, PrepareResult};

/// Mono waveform held in memory for one spectrogram computation.
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Load `path` as a mono waveform at `target_rate`.
///
/// Multichannel audio is averaged down to one channel. Audio stored at a
/// different rate is resampled.
pub fn load_wav(path: &Path, target_rate: u32) -> PrepareResult<Waveform> {
    let file = std::fs::File::open(path).map_err(|e| PrepareError::io(path, e))?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| PrepareError::decode(path, format!("failed to probe audio format: {e}")))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PrepareError::decode(path, "no audio tracks found"))?;

    let track_id = track.id;
    let channels = track.codec_params.channels.map_or(1, |c| c.count());
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PrepareError::decode(path, "unknown sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PrepareError::decode(path, format!("failed to create audio decoder: {e}")))?;

    let mut all_samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(PrepareError::decode(path, e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(PrepareError::decode(path, e.to_string())),
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let samples = sample_buf.samples();

        // Downmix to mono
        if channels == 1 {
            all_samples.extend_from_slice(samples);
        } else {
            for frame_samples in samples.chunks(channels) {
                let mono: f32 = frame_samples.iter().sum::<f32>() / channels as f32;
                all_samples.push(mono);
            }
        }
    }

    let samples = if sample_rate == target_rate {
        all_samples
    } else {
        log::debug!("Resampling {} from {}Hz to {}Hz", path.display(), sample_rate, target_rate);
        resample(&all_samples, sample_rate, target_rate)
            .map_err(|reason| PrepareError::decode(path, reason))?
    };

    let waveform = Waveform {
        samples,
        sample_rate: target_rate,
    };

    log::debug!(
        "Loaded {}: {} samples, {}Hz, {:.2}s",
        path.display(),
        waveform.samples.len(),
        waveform.sample_rate,
        waveform.duration()
    );

    Ok(waveform)
}

/// Band-limited resampling of a mono signal with rubato.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, String> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let expected_len = (samples.len() as f64 * ratio).ceil() as usize;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, samples.len(), 1)
        .map_err(|e| format!("failed to create resampler: {e}"))?;

    let delay = resampler.output_delay();
    let input = vec![samples.to_vec()];
    let mut output = resampler
        .process(&input, None)
        .map_err(|e| format!("resampling failed: {e}"))?
        .into_iter()
        .next()
        .unwrap_or_default();

    // Flush the filter tail so the delay can be trimmed without losing samples.
    let tail = resampler
        .process_partial::<Vec<f32>>(None, None)
        .map_err(|e| format!("resampling failed: {e}"))?;
    if let Some(channel) = tail.into_iter().next() {
        output.extend(channel);
    }

    Ok(output.into_iter().skip(delay).take(expected_len).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, rate: u32, channels: u16, frames: &[Vec<i16>]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for &s in frame {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn loads_mono_pcm16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.wav");
        let frames: Vec<Vec<i16>> = (0..1600).map(|i| vec![(i % 100) as i16 * 100]).collect();
        write_wav(&path, 16000, 1, &frames);

        let wav = load_wav(&path, 16000).unwrap();
        assert_eq!(wav.sample_rate, 16000);
        assert_eq!(wav.samples.len(), 1600);
        assert!((wav.samples[1] - 100.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn downmixes_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let frames: Vec<Vec<i16>> = (0..800).map(|_| vec![16384, 0]).collect();
        write_wav(&path, 16000, 2, &frames);

        let wav = load_wav(&path, 16000).unwrap();
        assert_eq!(wav.samples.len(), 800);
        assert!(wav.samples.iter().all(|&s| (s - 0.25).abs() < 1e-4));
    }

    #[test]
    fn resamples_to_target_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hi.wav");
        let frames: Vec<Vec<i16>> = (0..32000)
            .map(|i| {
                let t = i as f32 / 32000.0;
                vec![((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 8000.0) as i16]
            })
            .collect();
        write_wav(&path, 32000, 1, &frames);

        let wav = load_wav(&path, 16000).unwrap();
        assert_eq!(wav.sample_rate, 16000);
        assert_eq!(wav.samples.len(), 16000);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_wav(Path::new("/definitely/not/here.wav"), 16000).err().unwrap();
        assert!(matches!(err, PrepareError::Io { .. }));
    }

    #[test]
    fn garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"this is not a riff container at all").unwrap();
        let err = load_wav(&path, 16000).err().unwrap();
        assert!(matches!(err, PrepareError::Decode { .. }));
    }
}
