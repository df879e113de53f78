//! A reader whose pending `read` can be abandoned on SIGINT/SIGTERM.
//!
//! The wrapped reader runs on a background thread that forwards chunks over a
//! channel. `read` waits on that channel and on a cancel channel at the same
//! time, so a signal unblocks the main loop even while stdin is idle.

use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::io::{self, Read};
use std::thread;

const CHUNK_SIZE: usize = 64 * 1024;

/// Error payload returned by [`InterruptibleReader`] once cancelled.
#[derive(Debug, thiserror::Error)]
#[error("read interrupted by signal")]
pub struct ReadInterrupted;

/// Whether `err` came from a cancelled [`InterruptibleReader`].
pub fn is_interrupted(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<ReadInterrupted>())
}

/// Install a SIGINT/SIGTERM handler and return the channel it signals.
pub fn cancel_on_signal() -> Result<Receiver<()>, ctrlc::Error> {
    let (tx, rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })?;
    Ok(rx)
}

pub struct InterruptibleReader {
    chunks: Receiver<io::Result<Vec<u8>>>,
    cancel: Receiver<()>,
    pending: Vec<u8>,
    pos: usize,
    done: bool,
    cancelled: bool,
}

impl InterruptibleReader {
    pub fn new<R: Read + Send + 'static>(inner: R, cancel: Receiver<()>) -> Self {
        let (tx, rx) = bounded(4);
        thread::spawn(move || pump(inner, tx));
        InterruptibleReader {
            chunks: rx,
            cancel,
            pending: Vec::new(),
            pos: 0,
            done: false,
            cancelled: false,
        }
    }

    fn copy_pending(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.pending.len() - self.pos);
        out[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// Runs on the reader thread. An empty chunk marks end of input.
fn pump<R: Read>(mut inner: R, tx: Sender<io::Result<Vec<u8>>>) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match inner.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(Ok(Vec::new()));
                return;
            }
            Ok(n) => {
                if tx.send(Ok(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

impl Read for InterruptibleReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.cancelled {
            return Err(io::Error::new(io::ErrorKind::Other, ReadInterrupted));
        }
        if self.pos < self.pending.len() {
            return Ok(self.copy_pending(out));
        }
        if self.done {
            return Ok(0);
        }
        let (cancel, chunks) = (self.cancel.clone(), self.chunks.clone());
        select! {
            recv(cancel) -> _ => {
                self.cancelled = true;
                Err(io::Error::new(io::ErrorKind::Other, ReadInterrupted))
            }
            recv(chunks) -> msg => match msg {
                Ok(Ok(chunk)) if chunk.is_empty() => {
                    self.done = true;
                    Ok(0)
                }
                Ok(Ok(chunk)) => {
                    self.pending = chunk;
                    self.pos = 0;
                    Ok(self.copy_pending(out))
                }
                Ok(Err(e)) => {
                    self.done = true;
                    Err(e)
                }
                Err(_) => {
                    self.done = true;
                    Ok(0)
                }
            }
        }
    }
}
