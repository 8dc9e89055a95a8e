use image::RgbImage;
use std::sync::mpsc::{sync_channel, Receiver};
use std::thread::JoinHandle;

use crate::error::PrepareResult;

/// A forward-only stream of decoded frames.
///
/// Frame indices are implicit: the n-th frame returned is frame `n`.
/// Sources never seek.
pub trait FrameSource {
    /// Next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> PrepareResult<Option<RgbImage>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> PrepareResult<Option<RgbImage>> {
        (**self).next_frame()
    }
}

/// Decodes frames on a background thread into a bounded queue.
///
/// The producer stops at end of stream or after forwarding the first error;
/// dropping its sender is the end-of-stream marker. There is no
/// cancellation: the stream is always drained.
pub struct Prefetch {
    rx: Receiver<PrepareResult<RgbImage>>,
    handle: Option<JoinHandle<()>>,
}

impl Prefetch {
    pub fn spawn<S>(mut source: S, capacity: usize) -> Self
    where
        S: FrameSource + Send + 'static,
    {
        let (tx, rx) = sync_channel(capacity.max(1));
        let handle = std::thread::spawn(move || loop {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    if tx.send(Ok(frame)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        });
        Self {
            rx,
            handle: Some(handle),
        }
    }
}

impl FrameSource for Prefetch {
    fn next_frame(&mut self) -> PrepareResult<Option<RgbImage>> {
        match self.rx.recv() {
            Ok(frame) => frame.map(Some),
            Err(_) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        log::error!("Frame prefetch thread panicked");
                    }
                }
                Ok(None)
            }
        }
    }
}

/// Group a frame stream into batches of at most `batch_size` frames.
pub fn next_batch<S: FrameSource>(source: &mut S, batch_size: usize) -> PrepareResult<Vec<RgbImage>> {
    let mut batch = Vec::with_capacity(batch_size);
    while batch.len() < batch_size.max(1) {
        match source.next_frame()? {
            Some(frame) => batch.push(frame),
            None => break,
        }
    }
    Ok(batch)
}
