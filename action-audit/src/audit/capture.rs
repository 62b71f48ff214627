//! Response capture interceptor
//!
//! [`CaptureBody`] decorates the response body on its way to the client.
//! Every frame is forwarded untouched in the same poll that produced it, and
//! data frames are also copied into a private buffer. When the stream ends
//! (or the body is dropped early) the completion callback runs exactly once
//! with the materialized body and the elapsed time.

use axum::body::{Body, Bytes};
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use super::record::CapturedBody;

/// What the interceptor hands downstream on completion
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedResponse {
    /// Concatenated data frames, or the unavailable sentinel
    pub body: CapturedBody,
    /// Request arrival to response completion
    pub duration: Duration,
}

type OnComplete = Box<dyn FnOnce(CapturedResponse) + Send + 'static>;

/// Body decorator that copies every data frame it forwards
pub struct CaptureBody {
    inner: Body,
    buffer: Vec<u8>,
    limit: usize,
    overflowed: bool,
    started: Instant,
    on_complete: Option<OnComplete>,
}

impl CaptureBody {
    /// Wrap `inner`, copying at most `limit` bytes
    ///
    /// `started` is the request arrival instant; `on_complete` receives the
    /// captured body once the stream finishes.
    pub fn new<F>(inner: Body, limit: usize, started: Instant, on_complete: F) -> Self
    where
        F: FnOnce(CapturedResponse) + Send + 'static,
    {
        Self {
            inner,
            buffer: Vec::new(),
            limit,
            overflowed: false,
            started,
            on_complete: Some(Box::new(on_complete)),
        }
    }

    /// Convert into an axum body
    pub fn into_body(self) -> Body {
        Body::new(self)
    }

    fn copy_chunk(&mut self, chunk: &[u8]) {
        if self.overflowed {
            return;
        }
        let fits = self
            .buffer
            .len()
            .checked_add(chunk.len())
            .is_some_and(|total| total <= self.limit);
        if !fits || self.buffer.try_reserve(chunk.len()).is_err() {
            self.overflowed = true;
            self.buffer = Vec::new();
            return;
        }
        self.buffer.extend_from_slice(chunk);
    }

    fn complete(&mut self, finished: bool) {
        let Some(on_complete) = self.on_complete.take() else {
            return;
        };
        let body = if finished && !self.overflowed {
            CapturedBody::Complete(std::mem::take(&mut self.buffer))
        } else {
            CapturedBody::Unavailable
        };
        on_complete(CapturedResponse {
            body,
            duration: self.started.elapsed(),
        });
    }
}

impl HttpBody for CaptureBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.copy_chunk(data);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.complete(false);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.complete(true);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CaptureBody {
    fn drop(&mut self) {
        // The server may skip polling a body that reports end-of-stream up
        // front; anything else dropped early is an aborted response.
        let finished = self.inner.is_end_stream();
        self.complete(finished);
    }
}
