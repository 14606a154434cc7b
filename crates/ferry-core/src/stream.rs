//! Stream wrappers that make retries safe on one-shot streams.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Default number of source bytes kept for replay.
pub const DEFAULT_REPLAY_WINDOW: usize = 4 * 1024 * 1024;

/// Reader that remembers what it handed out so it can be replayed.
///
/// Bytes pulled from the inner reader are kept until more than `window`
/// bytes have been consumed. Until then [`ReplayReader::rewind`] makes the
/// next reads start over from the first byte, then continue with the live
/// stream. Past the window the buffer is dropped and rewinding fails.
pub struct ReplayReader<'a> {
    inner: &'a mut (dyn AsyncRead + Send + Unpin),
    window: usize,
    buffer: Vec<u8>,
    cursor: usize,
    consumed: u64,
    overflowed: bool,
}

impl<'a> ReplayReader<'a> {
    pub fn new(inner: &'a mut (dyn AsyncRead + Send + Unpin), window: usize) -> Self {
        Self {
            inner,
            window,
            buffer: Vec::new(),
            cursor: 0,
            consumed: 0,
            overflowed: false,
        }
    }

    /// Bytes pulled from the inner reader so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Whether a restart would see the same bytes again.
    pub fn can_replay(&self) -> bool {
        !self.overflowed
    }

    /// Restart from the first byte. Returns `false` if that is impossible.
    pub fn rewind(&mut self) -> bool {
        if self.overflowed {
            return false;
        }
        self.cursor = 0;
        true
    }
}

impl AsyncRead for ReplayReader<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.cursor < this.buffer.len() {
            let n = buf.remaining().min(this.buffer.len() - this.cursor);
            buf.put_slice(&this.buffer[this.cursor..this.cursor + n]);
            this.cursor += n;
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut *this.inner).poll_read(cx, buf))?;
        let fresh = &buf.filled()[before..];
        this.consumed += fresh.len() as u64;

        if !this.overflowed {
            if this.buffer.len() + fresh.len() <= this.window {
                this.buffer.extend_from_slice(fresh);
                this.cursor = this.buffer.len();
            } else {
                this.overflowed = true;
                this.buffer = Vec::new();
                this.cursor = 0;
            }
        }

        Poll::Ready(Ok(()))
    }
}

/// Writer that counts the bytes passed through to the inner writer.
pub struct CountingWriter<'a> {
    inner: &'a mut (dyn AsyncWrite + Send + Unpin),
    written: u64,
}

impl<'a> CountingWriter<'a> {
    pub fn new(inner: &'a mut (dyn AsyncWrite + Send + Unpin)) -> Self {
        Self { inner, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl AsyncWrite for CountingWriter<'_> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let n = ready!(Pin::new(&mut *this.inner).poll_write(cx, buf))?;
        this.written += n as u64;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_shutdown(cx)
    }
}
