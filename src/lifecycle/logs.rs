use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};

use crate::engine::{EngineStream, LogLine};

/// Closes a [`LogStream`]. Cloneable, and safe to call any number of times
/// from anywhere, including after the stream already ended.
#[derive(Clone)]
pub struct LogCloser {
    closed: Arc<watch::Sender<bool>>,
}

impl LogCloser {
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// A live, demultiplexed log stream.
///
/// Lines arrive tagged with their source. The stream ends when the
/// container's output ends, the engine connection drops, or
/// [`close`](Self::close) is called.
pub struct LogStream {
    rx: mpsc::Receiver<LogLine>,
    closer: LogCloser,
}

/// Resolves once the closer fires, without keeping the watch guard alive.
async fn closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

impl LogStream {
    pub(crate) fn spawn(container: String, mut source: EngineStream<LogLine>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let (closed_tx, mut closed_rx) = watch::channel(false);
        let closer = LogCloser {
            closed: Arc::new(closed_tx),
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = closed(&mut closed_rx) => break,
                    item = source.next() => match item {
                        Some(Ok(line)) => {
                            tokio::select! {
                                _ = closed(&mut closed_rx) => break,
                                sent = tx.send(line) => if sent.is_err() { break },
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(container = %container, "Log stream failed: {}", e);
                            break;
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!(container = %container, "Log stream ended");
        });

        Self { rx, closer }
    }

    /// Next line, or `None` once the stream has ended.
    pub async fn next_line(&mut self) -> Option<LogLine> {
        self.rx.recv().await
    }

    pub fn close(&self) {
        self.closer.close();
    }

    pub fn closer(&self) -> LogCloser {
        self.closer.clone()
    }
}

impl Stream for LogStream {
    type Item = LogLine;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.closer.close();
    }
}
