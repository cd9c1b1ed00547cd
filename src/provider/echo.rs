use super::{Provider, Request, StreamUnit, UnitStream};
use crate::decoder::LineDecoder;
use crate::error::StreamTransportError;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Offline provider: plays the request back as if a server streamed it.
///
/// The reply is cut into fixed-size byte chunks (ignoring line and UTF-8
/// boundaries) and pushed through a [`LineDecoder`], so it behaves like a
/// real endpoint would.
#[derive(Debug, Clone)]
pub struct EchoProvider {
    chunk_size: usize,
    delay: Duration,
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new(7, Duration::from_millis(40))
    }
}

impl EchoProvider {
    pub fn new(chunk_size: usize, delay: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            delay,
        }
    }

    fn reply(req: &Request) -> String {
        format!(
            "[echo provider]\nop: {}\nendpoint: {}\n\n{}",
            req.operation, req.endpoint, req.prompt
        )
    }
}

impl Provider for EchoProvider {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn open_stream(&self, req: Request) -> UnitStream {
        let this = self.clone();

        let started = stream::once(async move {
            let (tx, rx) = mpsc::channel::<Result<StreamUnit, StreamTransportError>>(32);

            tokio::spawn(async move {
                let reply = Self::reply(&req);
                let mut decoder = LineDecoder::new();

                for chunk in reply.as_bytes().chunks(this.chunk_size) {
                    tokio::time::sleep(this.delay).await;
                    for line in decoder.feed(chunk) {
                        if tx.send(Ok(StreamUnit::new(line))).await.is_err() {
                            return;
                        }
                    }
                }
                if let Some(rest) = decoder.flush() {
                    let _ = tx.send(Ok(StreamUnit::new(rest))).await;
                }
            });

            ReceiverStream::new(rx)
        });

        Box::pin(started.flatten())
    }
}
