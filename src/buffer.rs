//! Response body interception.
//!
//! [`BufferingBody`] wraps the downstream response body, forwarding every
//! frame unchanged and in order while shadowing data frames into a capped
//! [`BodyBuffer`]. Forwarding never depends on buffering state; the buffer
//! is best-effort and gives up permanently on overflow.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use http_body::{Body as HttpBody, Frame, SizeHint};

/// Size-capped side buffer shadowing a response body.
#[derive(Debug)]
pub struct BodyBuffer {
    limit: usize,
    data: BytesMut,
    enabled: bool,
}

impl BodyBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            data: BytesMut::new(),
            enabled: true,
        }
    }

    /// Shadow a chunk. Exceeding the cap permanently disables buffering and
    /// discards what was gathered; the chunk itself is untouched.
    pub fn append(&mut self, chunk: &[u8]) {
        if !self.enabled {
            return;
        }
        if self.data.len() + chunk.len() > self.limit {
            self.disable();
            return;
        }
        self.data.extend_from_slice(chunk);
    }

    /// Stop shadowing and drop what was gathered. Irreversible.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.data.clear();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy of the buffered prefix.
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }
}

/// Hook fired once when the wrapped body finishes cleanly. A body dropped
/// before end-of-stream never fires it.
pub type CompletionHook = Box<dyn FnOnce(&BodyBuffer) + Send + 'static>;

/// Write-through shim installed in place of the downstream response body.
pub struct BufferingBody {
    inner: Body,
    buffer: BodyBuffer,
    on_complete: Option<CompletionHook>,
}

impl BufferingBody {
    pub fn new(inner: Body, limit: usize, on_complete: CompletionHook) -> Self {
        Self {
            inner,
            buffer: BodyBuffer::new(limit),
            on_complete: Some(on_complete),
        }
    }

    /// Stop shadowing; forwarding continues unaffected.
    pub fn disable_buffering(&mut self) {
        self.buffer.disable();
    }

    pub fn buffering_enabled(&self) -> bool {
        self.buffer.is_enabled()
    }
}

impl HttpBody for BufferingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.buffer.append(data);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(error))) => {
                this.buffer.disable();
                this.on_complete = None;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                if let Some(hook) = this.on_complete.take() {
                    hook(&this.buffer);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        // Stay pollable until the hook has fired, even for empty bodies.
        self.on_complete.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
