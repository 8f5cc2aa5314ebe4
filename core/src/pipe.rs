//! One-producer/one-consumer in-memory byte pipe with blocking read and
//! sticky close propagation: a `Notify`-guarded ring buffer with two sticky
//! error slots, one for each end, so whichever side closes first is
//! remembered and reported to the other.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeError {
    /// The writer side was closed; reads drain remaining bytes then return
    /// this as EOF.
    WriterClosed,
    /// The reader side was closed; further writes fail immediately.
    ReaderClosed,
}

struct Shared {
    buf: Mutex<VecDeque<u8>>,
    notify: Notify,
    /// Set once the writer closes. `None` while open.
    write_closed: Mutex<bool>,
    /// Set once the reader closes. `None` while open.
    read_closed: Mutex<bool>,
}

pub struct PipeReader {
    shared: Arc<Shared>,
}

pub struct PipeWriter {
    shared: Arc<Shared>,
}

pub fn pipe() -> (PipeReader, PipeWriter) {
    let shared = Arc::new(Shared {
        buf: Mutex::new(VecDeque::new()),
        notify: Notify::new(),
        write_closed: Mutex::new(false),
        read_closed: Mutex::new(false),
    });
    (
        PipeReader { shared: shared.clone() },
        PipeWriter { shared },
    )
}

impl PipeReader {
    /// Read up to `out.len()` bytes. Blocks (yields) until data is
    /// available, the writer closes (returns `Ok(0)`, i.e. EOF), or the
    /// reader itself was already closed.
    pub async fn read(&self, out: &mut [u8]) -> Result<usize, PipeError> {
        loop {
            // Register interest before checking the buffer, not after: a
            // write landing between the check and the await below must
            // still wake us, and `notify_waiters` wakes only waiters that
            // were already enabled when it was called.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut buf = self.shared.buf.lock();
                if !buf.is_empty() {
                    let n = out.len().min(buf.len());
                    for slot in out.iter_mut().take(n) {
                        *slot = buf.pop_front().unwrap();
                    }
                    return Ok(n);
                }
                if *self.shared.write_closed.lock() {
                    return Ok(0);
                }
            }
            notified.await;
        }
    }

    /// Read the full payload into a fresh `Vec`, or `Ok(None)` on EOF.
    pub async fn read_available(&self, max: usize) -> Result<Option<Vec<u8>>, PipeError> {
        let mut buf = vec![0u8; max];
        let n = self.read(&mut buf).await?;
        if n == 0 {
            Ok(None)
        } else {
            buf.truncate(n);
            Ok(Some(buf))
        }
    }

    pub fn close(&self) {
        *self.shared.read_closed.lock() = true;
        self.shared.notify.notify_waiters();
    }
}

impl PipeWriter {
    pub fn write(&self, data: &[u8]) -> Result<usize, PipeError> {
        if *self.shared.read_closed.lock() {
            return Err(PipeError::ReaderClosed);
        }
        if data.is_empty() {
            return Ok(0);
        }
        self.shared.buf.lock().extend(data.iter().copied());
        self.shared.notify.notify_waiters();
        Ok(data.len())
    }

    pub fn close(&self) {
        *self.shared.write_closed.lock() = true;
        self.shared.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_delivers_bytes() {
        let (r, w) = pipe();
        w.write(b"hello").unwrap();
        let mut buf = [0u8; 5];
        let n = r.read(&mut buf).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn close_propagates_as_eof() {
        let (r, w) = pipe();
        w.close();
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn blocked_reader_wakes_on_write() {
        let (r, w) = pipe();
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 3];
            r.read(&mut buf).await.unwrap();
            buf
        });
        tokio::task::yield_now().await;
        w.write(b"abc").unwrap();
        let buf = reader.await.unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn write_after_reader_closed_errors() {
        let (r, w) = pipe();
        r.close();
        assert_eq!(w.write(b"x"), Err(PipeError::ReaderClosed));
    }
}
