//! Live relay of `text/event-stream` responses.
//!
//! Upstream chunks are written into a buffered in-memory pipe whose read half
//! is the client response body. Two tasks share one [`CancellationToken`]:
//!
//! - the forwarder copies one upstream chunk at a time into the pipe
//! - the flusher forces buffered bytes out to the client on every tick
//!
//! The body owns a drop guard of the token, so a client disconnect stops both
//! tasks and drops the upstream connection. The forwarder cancels the token
//! when it finishes for any reason.

use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncWriteExt, BufWriter, DuplexStream};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};

type SharedWriter = Arc<Mutex<BufWriter<DuplexStream>>>;

/// Relays event streams with periodic flushing.
#[derive(Debug, Clone, Copy)]
pub struct StreamRelay {
    flush_interval: Duration,
    chunk_size: usize,
}

impl StreamRelay {
    pub fn new(flush_interval: Duration, chunk_size: usize) -> Self {
        Self {
            flush_interval,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Starts relaying `upstream` and returns the client body.
    ///
    /// Must be called within a tokio runtime.
    pub fn relay<S, E>(&self, upstream: S) -> Body
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (write_half, read_half) = tokio::io::duplex(self.chunk_size);
        let writer: SharedWriter = Arc::new(Mutex::new(BufWriter::with_capacity(
            self.chunk_size,
            write_half,
        )));
        let token = CancellationToken::new();

        tokio::spawn(forward(upstream, writer.clone(), token.clone()));
        tokio::spawn(flush_periodically(writer, self.flush_interval, token.clone()));

        Body::from_stream(RelayBody {
            inner: ReaderStream::with_capacity(read_half, self.chunk_size),
            _guard: token.drop_guard(),
        })
    }
}

/// Client body; dropping it cancels the relay.
struct RelayBody {
    inner: ReaderStream<DuplexStream>,
    _guard: DropGuard,
}

impl Stream for RelayBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

async fn forward<S, E>(upstream: S, writer: SharedWriter, token: CancellationToken)
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut upstream = std::pin::pin!(upstream);

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("event stream cancelled by client");
                break;
            }
            next = upstream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                let mut out = writer.lock().await;
                let written = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    written = out.write_all(&chunk) => written,
                };
                if let Err(e) = written {
                    tracing::debug!(error = %e, "event stream client write failed");
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "event stream upstream read failed");
                finish(&writer).await;
                break;
            }
            None => {
                finish(&writer).await;
                tracing::debug!("event stream upstream finished");
                break;
            }
        }
    }

    token.cancel();
}

/// Flushes what the upstream already delivered and closes the pipe.
async fn finish(writer: &SharedWriter) {
    let mut out = writer.lock().await;
    if let Err(e) = out.shutdown().await {
        tracing::debug!(error = %e, "event stream final flush failed");
    }
}

async fn flush_periodically(writer: SharedWriter, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let flushed = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            flushed = async { writer.lock().await.flush().await } => flushed,
        };
        if let Err(e) = flushed {
            tracing::debug!(error = %e, "event stream flush failed");
            token.cancel();
            break;
        }
    }
}
