//! Transport seam for the push channel.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::debug;

use crate::errors::ChannelError;

/// Raw body chunks of an open channel.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ChannelError>>;

/// Opens a push channel and hands back its raw byte stream.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn open(&self, url: &str) -> Result<ByteStream, ChannelError>;
}

/// SSE over HTTP using reqwest.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelTransport for HttpTransport {
    async fn open(&self, url: &str) -> Result<ByteStream, ChannelError> {
        debug!(%url, "Opening event stream");
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|source| ChannelError::Connect {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| ChannelError::Body(e.to_string()))
            })
            .boxed())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    pub(crate) enum Step {
        Bytes(Vec<u8>),
        Fail(String),
    }

    /// Replays a fixed script of body chunks on every open.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedTransport {
        steps: Vec<Step>,
        hold_open: bool,
        refuse: bool,
        opens: AtomicUsize,
    }

    impl ScriptedTransport {
        pub(crate) fn new(steps: Vec<Step>) -> Self {
            Self {
                steps,
                ..Self::default()
            }
        }

        /// Build a script from `(event, data)` pairs, one frame per chunk.
        pub(crate) fn frames(frames: &[(&str, &str)]) -> Self {
            Self::new(
                frames
                    .iter()
                    .map(|(event, data)| {
                        Step::Bytes(format!("event: {event}\ndata: {data}\n\n").into_bytes())
                    })
                    .collect(),
            )
        }

        /// Keep the stream pending after the script runs out.
        pub(crate) fn hold_open(mut self) -> Self {
            self.hold_open = true;
            self
        }

        /// Fail every open with a 503.
        pub(crate) fn refusing() -> Self {
            Self {
                refuse: true,
                ..Self::default()
            }
        }

        pub(crate) fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChannelTransport for ScriptedTransport {
        async fn open(&self, url: &str) -> Result<ByteStream, ChannelError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(ChannelError::Status {
                    url: url.to_string(),
                    status: 503,
                });
            }
            let items = stream::iter(self.steps.clone().into_iter().map(|step| match step {
                Step::Bytes(bytes) => Ok(bytes),
                Step::Fail(message) => Err(ChannelError::Body(message)),
            }));
            if self.hold_open {
                Ok(items.chain(stream::pending()).boxed())
            } else {
                Ok(items.boxed())
            }
        }
    }
}
