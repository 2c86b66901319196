//! WAV encoding and decoding, and the scratch directory for utterance audio.

use crate::defaults::{SAMPLE_RATE, SCRATCH_DIR_NAME};
use crate::error::{ParlanceError, Result};
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, warn};

fn mono_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Encodes mono 16-bit samples as an in-memory WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    write_samples(&mut cursor, samples, sample_rate).map_err(|e| ParlanceError::Other(
        format!("Failed to encode WAV: {e}"),
    ))?;
    Ok(cursor.into_inner())
}

fn write_samples<W: std::io::Write + Seek>(
    writer: W,
    samples: &[i16],
    sample_rate: u32,
) -> std::result::Result<(), hound::Error> {
    let mut wav = hound::WavWriter::new(writer, mono_spec(sample_rate))?;
    for &sample in samples {
        wav.write_sample(sample)?;
    }
    wav.finalize()
}

/// Decodes WAV data of any rate and channel count to 16kHz mono.
///
/// Accepts 16-bit integer and 32-bit float sample formats.
pub fn decode_wav<R: Read>(reader: R) -> Result<Vec<i16>> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| ParlanceError::Other(
        format!("Failed to parse WAV data: {e}"),
    ))?;

    let spec = wav_reader.spec();
    let raw_samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>(),
        hound::SampleFormat::Float => wav_reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<std::result::Result<Vec<_>, _>>(),
    }
    .map_err(|e| ParlanceError::Other(format!("Failed to read WAV samples: {e}")))?;

    let mono = downmix(&raw_samples, spec.channels as usize);
    Ok(resample(&mono, spec.sample_rate, SAMPLE_RATE))
}

/// Averages interleaved channels into one.
pub fn downmix(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

/// A writable directory for intermediate audio files.
#[derive(Debug, Clone)]
pub struct ScratchStorage {
    dir: PathBuf,
    fallback: Option<PathBuf>,
}

/// A WAV file in scratch storage, deleted when dropped.
#[derive(Debug)]
pub struct ScratchFile {
    path: TempPath,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScratchStorage {
    /// Default primary location: `$TMPDIR/parlance`.
    pub fn default_dir() -> PathBuf {
        std::env::temp_dir().join(SCRATCH_DIR_NAME)
    }

    /// Picks the first writable directory of `primary` and `fallback`.
    ///
    /// `primary` defaults to [`ScratchStorage::default_dir`].
    ///
    /// # Errors
    /// `ScratchStorageUnavailable` if neither location can be written.
    pub fn resolve(primary: Option<&Path>, fallback: Option<&Path>) -> Result<Self> {
        let primary = primary.map(Path::to_path_buf).unwrap_or_else(Self::default_dir);
        let fallback = fallback.map(Path::to_path_buf);

        match check_writable(&primary) {
            Ok(()) => {
                return Ok(Self {
                    dir: primary,
                    fallback,
                });
            }
            Err(e) => {
                let Some(alternate) = fallback else {
                    return Err(unavailable(&primary, &e));
                };
                warn!(
                    "scratch directory {} is not writable ({e}), using {}",
                    primary.display(),
                    alternate.display()
                );
                check_writable(&alternate).map_err(|e| unavailable(&alternate, &e))?;
                Ok(Self {
                    dir: alternate,
                    fallback: None,
                })
            }
        }
    }

    /// The directory currently in use.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes samples as a 16-bit mono WAV file.
    ///
    /// Falls back to the alternate directory once if the primary stops
    /// being writable mid-session.
    pub fn write_wav(&mut self, samples: &[i16], sample_rate: u32) -> Result<ScratchFile> {
        match write_scratch_wav(&self.dir, samples, sample_rate) {
            Ok(file) => Ok(file),
            Err(e) => {
                let Some(alternate) = self.fallback.take() else {
                    return Err(unavailable(&self.dir, &e));
                };
                warn!(
                    "scratch write to {} failed ({e}), switching to {}",
                    self.dir.display(),
                    alternate.display()
                );
                self.dir = alternate;
                write_scratch_wav(&self.dir, samples, sample_rate)
                    .map_err(|e| unavailable(&self.dir, &e))
            }
        }
    }
}

fn unavailable(path: &Path, err: &std::io::Error) -> ParlanceError {
    ParlanceError::ScratchStorageUnavailable {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn check_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let marker = tempfile::Builder::new().prefix(".parlance-").tempfile_in(dir)?;
    debug!("scratch directory {} is writable", dir.display());
    marker.close()
}

fn write_scratch_wav(dir: &Path, samples: &[i16], sample_rate: u32) -> std::io::Result<ScratchFile> {
    std::fs::create_dir_all(dir)?;
    let file = tempfile::Builder::new()
        .prefix("utterance-")
        .suffix(".wav")
        .tempfile_in(dir)?;
    let (handle, path) = file.into_parts();
    write_samples(std::io::BufWriter::new(handle), samples, sample_rate)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(ScratchFile { path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_16khz_mono_is_exact() {
        let input = vec![100i16, 200, 300, 400, 500];
        let data = encode_wav(&input, 16000).unwrap();
        assert_eq!(decode_wav(Cursor::new(data)).unwrap(), input);
    }

    #[test]
    fn decode_downmixes_stereo() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 2,
            ..mono_spec(16000)
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in [100i16, 200, 300, 400, 500, 600] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let samples = decode_wav(Cursor::new(cursor.into_inner())).unwrap();
        assert_eq!(samples, vec![150i16, 350, 550]);
    }

    #[test]
    fn decode_resamples_to_16khz() {
        let data = encode_wav(&vec![1000i16; 44100], 44100).unwrap();
        let samples = decode_wav(Cursor::new(data)).unwrap();
        assert!(samples.len() >= 15900 && samples.len() <= 16100);
        assert!(samples.iter().all(|&s| (900..=1100).contains(&s)));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_wav(Cursor::new(b"not a wav".to_vec())).is_err());
    }

    #[test]
    fn resample_handles_degenerate_input() {
        assert!(resample(&[], 48000, 16000).is_empty());
        assert_eq!(resample(&[1, 2, 3], 0, 16000), vec![1, 2, 3]);
        assert_eq!(resample(&[1, 2, 3], 48000, 16000).len(), 1);
    }

    #[test]
    fn scratch_writes_readable_wav_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = ScratchStorage::resolve(Some(dir.path()), None).unwrap();

        let file = storage.write_wav(&[1, 2, 3, 4], 16000).unwrap();
        let path = file.path().to_path_buf();
        assert!(path.starts_with(dir.path()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("wav"));

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.len(), 4);

        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn scratch_falls_back_when_primary_is_unusable() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file cannot be used as a directory
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"x").unwrap();
        let fallback = dir.path().join("fallback");

        let storage = ScratchStorage::resolve(Some(&blocked), Some(&fallback)).unwrap();
        assert_eq!(storage.dir(), fallback.as_path());
    }

    #[test]
    fn scratch_without_fallback_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"x").unwrap();

        let err = ScratchStorage::resolve(Some(&blocked), None).unwrap_err();
        assert!(matches!(err, ParlanceError::ScratchStorageUnavailable { .. }));
        assert!(err.is_fatal());
    }
}
