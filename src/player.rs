use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info};
use rodio::decoder::DecoderError;
use rodio::{Decoder, OutputStreamHandle, Sink, Source};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum CueError {
    #[error("unrecognised file extension for {}", .path.display())]
    UnsupportedExtension { path: PathBuf },

    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to decode {}: {source}", .path.display())]
    Decode { path: PathBuf, source: DecoderError },

    #[error("{} contains no audio", .path.display())]
    Empty { path: PathBuf },
}

/// Pulse sent back to the coordinator once a cue has finished rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CueFinished;

/// One-shot completion handle handed to a player for a single invocation.
///
/// The signal is sent exactly once: either through [`Completion::finish`] or
/// when the handle is dropped, which covers playback threads that fail or
/// panic before finishing. Hooks added with [`Completion::then`] run first.
pub struct Completion {
    tx: Option<mpsc::UnboundedSender<CueFinished>>,
    hooks: Vec<Box<dyn FnOnce() + Send>>,
}

impl Completion {
    pub fn new(tx: mpsc::UnboundedSender<CueFinished>) -> Self {
        Completion {
            tx: Some(tx),
            hooks: Vec::new(),
        }
    }

    pub fn then(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn finish(self) {
        drop(self);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        // This can run while a playback thread unwinds; a second panic would abort.
        for hook in self.hooks.drain(..) {
            if panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
                error!("Completion hook panicked");
            }
        }
        if let Some(tx) = self.tx.take() {
            // The coordinator may already have shut down; nobody is left to tell.
            let _ = tx.send(CueFinished);
        }
    }
}

/// Something that can sound a cue without blocking the caller.
pub trait CuePlayer: Send + Sync {
    fn play(&self, done: Completion);
}

/// Runs `work` on its own thread and signals `done` when it returns.
///
/// No handle is returned; the completion channel is the only way to observe
/// the end of the work.
pub fn spawn_with_completion<F>(name: &str, done: Completion, work: F)
where
    F: FnOnce() + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name(format!("cue-{name}"))
        .spawn(move || {
            work();
            done.finish();
        });

    // On failure the closure is dropped along with `done`, which still signals.
    if let Err(err) = spawned {
        error!("Error spawning playback thread for {} cue: {:?}", name, err);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CueFormat {
    Wav,
    Flac,
    Mp3,
}

impl CueFormat {
    pub fn from_path(path: &Path) -> Result<Self, CueError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some("wav") => Ok(CueFormat::Wav),
            Some("flac") => Ok(CueFormat::Flac),
            Some("mp3") => Ok(CueFormat::Mp3),
            _ => Err(CueError::UnsupportedExtension {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// A fully decoded clip held in memory so it can be replayed from the start
/// any number of times.
#[derive(Debug, Clone)]
pub struct AudioResource {
    channels: u16,
    sample_rate: u32,
    samples: Arc<[i16]>,
}

impl AudioResource {
    pub fn open(path: &Path) -> Result<Self, CueError> {
        let format = CueFormat::from_path(path)?;
        let file = File::open(path).map_err(|source| CueError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let resource =
            Self::decode(format, BufReader::new(file)).map_err(|source| CueError::Decode {
                path: path.to_path_buf(),
                source,
            })?;

        if resource.samples.is_empty() {
            return Err(CueError::Empty {
                path: path.to_path_buf(),
            });
        }
        Ok(resource)
    }

    pub fn decode<R>(format: CueFormat, reader: R) -> Result<Self, DecoderError>
    where
        R: Read + Seek + Send + Sync + 'static,
    {
        let decoder = match format {
            CueFormat::Wav => Decoder::new_wav(reader)?,
            CueFormat::Flac => Decoder::new_flac(reader)?,
            CueFormat::Mp3 => Decoder::new_mp3(reader)?,
        };

        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        let samples: Vec<i16> = decoder.collect();

        Ok(AudioResource {
            channels,
            sample_rate,
            samples: samples.into(),
        })
    }

    /// A fresh source positioned at the first sample, sharing the decoded data.
    pub fn rewind(&self) -> CueSource {
        CueSource {
            channels: self.channels,
            sample_rate: self.sample_rate,
            samples: Arc::clone(&self.samples),
            position: 0,
        }
    }

    pub fn duration(&self) -> Duration {
        self.rewind().total_duration().unwrap_or_default()
    }
}

/// Playback cursor over an [`AudioResource`].
#[derive(Debug, Clone)]
pub struct CueSource {
    channels: u16,
    sample_rate: u32,
    samples: Arc<[i16]>,
    position: usize,
}

impl Iterator for CueSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        let sample = self.samples.get(self.position).copied()?;
        self.position += 1;
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.samples.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl Source for CueSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.samples.len() - self.position)
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        let frames = self.samples.len() as u64 / self.channels.max(1) as u64;
        Some(Duration::from_millis(
            frames * 1000 / self.sample_rate.max(1) as u64,
        ))
    }
}

/// Plays one decoded resource on the shared output device.
pub struct AudioCuePlayer {
    name: String,
    resource: AudioResource,
    output: OutputStreamHandle,
}

impl AudioCuePlayer {
    pub fn open(name: &str, path: &Path, output: OutputStreamHandle) -> Result<Self, CueError> {
        let resource = AudioResource::open(path)?;
        info!(
            "Initialised {} cue from {} ({:?})",
            name,
            path.display(),
            resource.duration()
        );

        Ok(AudioCuePlayer {
            name: name.to_string(),
            resource,
            output,
        })
    }
}

impl CuePlayer for AudioCuePlayer {
    fn play(&self, done: Completion) {
        let source = self.resource.rewind();
        let output = self.output.clone();
        let name = self.name.clone();
        let done = done.then({
            let name = name.clone();
            move || debug!("{} cue rendered", name)
        });

        spawn_with_completion(&self.name, done, move || match Sink::try_new(&output) {
            Ok(sink) => {
                sink.append(source);
                sink.sleep_until_end();
            }
            Err(err) => error!("Error opening audio sink for {} cue: {:?}", name, err),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn wav_bytes(sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&1u16.to_le_bytes()); // mono
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for sample in samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("doorbell-rs-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(CueFormat::from_path(Path::new("a/ding.wav")).unwrap(), CueFormat::Wav);
        assert_eq!(CueFormat::from_path(Path::new("dong.FLAC")).unwrap(), CueFormat::Flac);
        assert_eq!(CueFormat::from_path(Path::new("x.mp3")).unwrap(), CueFormat::Mp3);
        assert!(matches!(
            CueFormat::from_path(Path::new("x.ogg")),
            Err(CueError::UnsupportedExtension { .. })
        ));
        assert!(matches!(
            CueFormat::from_path(Path::new("noextension")),
            Err(CueError::UnsupportedExtension { .. })
        ));
    }

    #[test]
    fn test_rewind_replays_from_start() {
        let samples = [0i16, 1000, -1000, 32767, -32768, 42];
        let resource =
            AudioResource::decode(CueFormat::Wav, Cursor::new(wav_bytes(8000, &samples))).unwrap();

        let first: Vec<i16> = resource.rewind().collect();
        let second: Vec<i16> = resource.rewind().collect();
        assert_eq!(first, samples);
        assert_eq!(second, samples);
    }

    #[test]
    fn test_rewind_shares_decoded_samples() {
        let resource =
            AudioResource::decode(CueFormat::Wav, Cursor::new(wav_bytes(8000, &[1, 2, 3]))).unwrap();

        let mut partial = resource.rewind();
        assert_eq!(partial.next(), Some(1));
        assert!(Arc::ptr_eq(&partial.samples, &resource.samples));
        assert_eq!(partial.size_hint(), (2, Some(2)));

        // A press after an interrupted one still starts from the top.
        assert_eq!(resource.rewind().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(partial.collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_duration() {
        let samples = vec![0i16; 8000];
        let resource =
            AudioResource::decode(CueFormat::Wav, Cursor::new(wav_bytes(8000, &samples))).unwrap();
        assert_eq!(resource.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_open_errors() {
        let missing = std::env::temp_dir().join("doorbell-rs-definitely-missing.wav");
        assert!(matches!(
            AudioResource::open(&missing),
            Err(CueError::Open { .. })
        ));

        let garbage = temp_file("garbage.wav", b"this is not a wave file");
        assert!(matches!(
            AudioResource::open(&garbage),
            Err(CueError::Decode { .. })
        ));
        std::fs::remove_file(garbage).unwrap();

        let text = temp_file("notes.txt", b"hello");
        assert!(matches!(
            AudioResource::open(&text),
            Err(CueError::UnsupportedExtension { .. })
        ));
        std::fs::remove_file(text).unwrap();
    }

    #[test]
    fn test_open_decodes_file() {
        let path = temp_file("chime.wav", &wav_bytes(16000, &[5, 6, 7, 8]));
        let resource = AudioResource::open(&path).unwrap();
        assert_eq!(resource.rewind().collect::<Vec<_>>(), vec![5, 6, 7, 8]);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_completion_signals_once_after_hooks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hooked = Arc::new(AtomicBool::new(false));

        let done = Completion::new(tx).then({
            let hooked = hooked.clone();
            move || hooked.store(true, Ordering::SeqCst)
        });
        assert!(rx.try_recv().is_err());

        done.finish();
        assert_eq!(rx.try_recv().unwrap(), CueFinished);
        assert!(hooked.load(Ordering::SeqCst));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_completion_tolerates_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        Completion::new(tx).finish();
    }

    #[test]
    fn test_completion_survives_panicking_hook() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let later = Arc::new(AtomicBool::new(false));

        Completion::new(tx)
            .then(|| panic!("hook failed"))
            .then({
                let later = later.clone();
                move || later.store(true, Ordering::SeqCst)
            })
            .finish();

        assert!(later.load(Ordering::SeqCst));
        assert_eq!(rx.try_recv().unwrap(), CueFinished);
    }

    #[tokio::test]
    async fn test_spawn_with_completion_runs_work() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runs = Arc::new(AtomicUsize::new(0));

        spawn_with_completion("test", Completion::new(tx), {
            let runs = runs.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        let finished = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert_eq!(finished.unwrap(), Some(CueFinished));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_spawn_with_completion_signals_after_panic() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        spawn_with_completion("panics", Completion::new(tx), || panic!("device went away"));

        let finished = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert_eq!(finished.unwrap(), Some(CueFinished));
    }
}
