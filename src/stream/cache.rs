//! Shared stream cache.
//!
//! One live channel per `(endpoint, scope)` key, shared by every handle that
//! attaches to it. Received chunks accumulate in an append-only buffer
//! (optionally capped to the most recent `max_chunks`). The cap bounds the
//! shared view only: a subscription receives every chunk delivered after it
//! was taken, evicted or not. Entries are held weakly by the registry: when
//! the last handle drops, the channel is torn down and the next attach opens
//! a fresh one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::bridge::{BridgeOptions, ChannelState, EventBridge, EventFilter};
use super::transport::ChannelTransport;
use super::EventEnvelope;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub endpoint: String,
    pub scope: String,
}

impl CacheKey {
    pub fn new(endpoint: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            scope: scope.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    pub enabled: bool,
    /// Keep only the most recent N chunks. `None` retains everything.
    pub max_chunks: Option<usize>,
    pub filter: EventFilter,
    pub channel_capacity: usize,
}

impl StreamOptions {
    fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            filter: self.filter.clone(),
            capacity: self.channel_capacity,
        }
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        let bridge = BridgeOptions::default();
        Self {
            enabled: true,
            max_chunks: None,
            filter: bridge.filter,
            channel_capacity: bridge.capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Idle,
    Fetching,
}

#[derive(Debug, Default)]
struct ChunkBuffer {
    chunks: VecDeque<EventEnvelope>,
    evicted: u64,
    max_chunks: Option<usize>,
    subscribers: Vec<mpsc::UnboundedSender<EventEnvelope>>,
    finished: bool,
}

impl ChunkBuffer {
    fn push(&mut self, chunk: EventEnvelope) {
        self.subscribers
            .retain(|subscriber| subscriber.send(chunk.clone()).is_ok());
        self.chunks.push_back(chunk);
        if let Some(max) = self.max_chunks {
            while self.chunks.len() > max {
                self.chunks.pop_front();
                self.evicted += 1;
            }
        }
    }

    /// Chunk at an absolute position, counting evicted ones.
    fn get(&self, index: u64) -> Option<&EventEnvelope> {
        let offset = index.checked_sub(self.evicted)?;
        self.chunks.get(usize::try_from(offset).ok()?)
    }

    /// Ends every subscription once the channel has stopped delivering.
    fn finish(&mut self) {
        self.finished = true;
        self.subscribers.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EntryStatus {
    version: u64,
    fetch: FetchStatus,
    error: Option<String>,
}

type EntryMap = Mutex<HashMap<CacheKey, Weak<CacheEntry>>>;

struct CacheEntry {
    key: CacheKey,
    buffer: Mutex<ChunkBuffer>,
    status: watch::Sender<EntryStatus>,
    cancel: CancellationToken,
    registry: Weak<EntryMap>,
}

impl CacheEntry {
    fn buffer(&self) -> MutexGuard<'_, ChunkBuffer> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CacheEntry {
    fn drop(&mut self) {
        self.cancel.cancel();
        debug!(endpoint = %self.key.endpoint, scope = %self.key.scope, "Stream cache entry released");
        if let Some(registry) = self.registry.upgrade() {
            let mut entries = registry.lock().unwrap_or_else(|p| p.into_inner());
            if entries
                .get(&self.key)
                .is_some_and(|entry| entry.strong_count() == 0)
            {
                entries.remove(&self.key);
            }
        }
    }
}

/// Registry of live channels.
#[derive(Clone)]
pub struct StreamCache {
    transport: Arc<dyn ChannelTransport>,
    entries: Arc<EntryMap>,
}

impl StreamCache {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self {
            transport,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attach to the channel for `key`, opening `url` if no live entry exists.
    pub fn attach(&self, key: CacheKey, url: &str, options: &StreamOptions) -> CacheHandle {
        if !options.enabled {
            return CacheHandle::detached(key);
        }

        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let existing = entries.get(&key).and_then(Weak::upgrade);
        if let Some(entry) = existing.as_ref().filter(|e| !e.cancel.is_cancelled()) {
            debug!(endpoint = %key.endpoint, scope = %key.scope, "Reusing live stream");
            return CacheHandle::attached(entry.clone());
        }

        let entry = self.open(key.clone(), url, options);
        entries.insert(key, Arc::downgrade(&entry));
        // a closed entry may release its registry slot on drop; never while locked
        drop(entries);
        drop(existing);
        CacheHandle::attached(entry)
    }

    /// Number of keys with a live channel.
    pub fn live_entries(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.values().filter(|e| e.strong_count() > 0).count()
    }

    fn open(&self, key: CacheKey, url: &str, options: &StreamOptions) -> Arc<CacheEntry> {
        let (status, _) = watch::channel(EntryStatus {
            version: 0,
            fetch: FetchStatus::Fetching,
            error: None,
        });
        let cancel = CancellationToken::new();
        let entry = Arc::new(CacheEntry {
            key,
            buffer: Mutex::new(ChunkBuffer {
                max_chunks: options.max_chunks,
                ..ChunkBuffer::default()
            }),
            status,
            cancel: cancel.clone(),
            registry: Arc::downgrade(&self.entries),
        });

        let bridge = EventBridge::spawn(
            self.transport.clone(),
            url,
            options.bridge_options(),
            cancel.child_token(),
        );
        tokio::spawn(fill(bridge, Arc::downgrade(&entry)));
        entry
    }
}

/// Drain the bridge into the entry until the channel or the entry goes away.
async fn fill(mut bridge: EventBridge, entry: Weak<CacheEntry>) {
    while let Some(chunk) = bridge.next().await {
        let Some(entry) = entry.upgrade() else {
            return;
        };
        entry.buffer().push(chunk);
        entry.status.send_modify(|s| s.version += 1);
    }

    let error = match bridge.state() {
        ChannelState::Closed { error } => error,
        _ => None,
    };
    if let Some(entry) = entry.upgrade() {
        entry.status.send_modify(|s| {
            s.version += 1;
            s.fetch = FetchStatus::Idle;
            s.error = error;
        });
        // subscribers see the final status before their stream ends
        entry.buffer().finish();
    }
}

/// Lossless feed of a cached stream.
///
/// Starts at the subscribing handle's cursor and then receives every chunk
/// as it arrives, regardless of `max_chunks`.
pub struct ChunkSubscription {
    receiver: mpsc::UnboundedReceiver<EventEnvelope>,
}

impl ChunkSubscription {
    /// Next chunk, or `None` once the channel has closed and everything was read.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        self.receiver.recv().await
    }
}

/// A consumer's view of a cached stream.
///
/// Each handle keeps its own read cursor, so several consumers can each
/// read every retained chunk in order.
pub struct CacheHandle {
    key: CacheKey,
    entry: Option<Arc<CacheEntry>>,
    status: watch::Receiver<EntryStatus>,
    cursor: u64,
}

impl CacheHandle {
    fn attached(entry: Arc<CacheEntry>) -> Self {
        Self {
            key: entry.key.clone(),
            status: entry.status.subscribe(),
            entry: Some(entry),
            cursor: 0,
        }
    }

    fn detached(key: CacheKey) -> Self {
        let (_, status) = watch::channel(EntryStatus {
            version: 0,
            fetch: FetchStatus::Idle,
            error: None,
        });
        Self {
            key,
            entry: None,
            status,
            cursor: 0,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Immutable view of every retained chunk.
    pub fn chunks(&self) -> Arc<[EventEnvelope]> {
        match &self.entry {
            Some(entry) => entry.buffer().chunks.iter().cloned().collect(),
            None => Arc::from(Vec::new()),
        }
    }

    pub fn fetch_status(&self) -> FetchStatus {
        self.status.borrow().fetch
    }

    pub fn error(&self) -> Option<String> {
        self.status.borrow().error.clone()
    }

    /// Wait for the next change to the chunk list or status.
    ///
    /// Returns `false` once no further change can happen.
    pub async fn changed(&mut self) -> bool {
        if self.entry.is_none() {
            return false;
        }
        self.status.changed().await.is_ok()
    }

    /// Next chunk after this handle's cursor, waiting if none is buffered yet.
    ///
    /// Returns `None` once the channel has closed and every retained chunk
    /// has been read.
    pub async fn next_chunk(&mut self) -> Option<EventEnvelope> {
        let entry = self.entry.clone()?;
        loop {
            let fetch = self.status.borrow_and_update().fetch;
            {
                let buffer = entry.buffer();
                if self.cursor < buffer.evicted {
                    warn!(
                        scope = %self.key.scope,
                        skipped = buffer.evicted - self.cursor,
                        "Reader fell behind the chunk cap"
                    );
                    self.cursor = buffer.evicted;
                }
                if let Some(chunk) = buffer.get(self.cursor) {
                    self.cursor += 1;
                    return Some(chunk.clone());
                }
            }
            if fetch == FetchStatus::Idle {
                return None;
            }
            if self.status.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Subscribe to every chunk from this handle's cursor onwards.
    ///
    /// Chunks already evicted before the call are not replayed.
    pub fn subscribe(&self) -> ChunkSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Some(entry) = &self.entry {
            let mut buffer = entry.buffer();
            let mut index = self.cursor.max(buffer.evicted);
            while let Some(chunk) = buffer.get(index) {
                // the receiver is alive, so sending cannot fail
                let _ = sender.send(chunk.clone());
                index += 1;
            }
            if !buffer.finished {
                buffer.subscribers.push(sender);
            }
        }
        ChunkSubscription { receiver }
    }

    /// Tear the shared channel down for every attached handle.
    pub fn close(&self) {
        if let Some(entry) = &self.entry {
            entry.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.entry
            .as_ref()
            .is_none_or(|entry| entry.cancel.is_cancelled())
    }
}

impl Clone for CacheHandle {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            entry: self.entry.clone(),
            status: self.status.clone(),
            cursor: self.cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::transport::testing::ScriptedTransport;
    use std::time::Duration;

    fn key(scope: &str) -> CacheKey {
        CacheKey::new("http://test/v1/codebase-agent-rules", scope)
    }

    async fn drain(handle: &mut CacheHandle) -> Vec<EventEnvelope> {
        let mut out = Vec::new();
        while let Some(chunk) = handle.next_chunk().await {
            out.push(chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_accumulates_chunks_and_goes_idle() {
        let transport = Arc::new(ScriptedTransport::frames(&[
            ("connected", "{}"),
            ("progress", "{}"),
            ("done", "{}"),
        ]));
        let cache = StreamCache::new(transport);
        let mut handle = cache.attach(key("acme/widgets"), "http://test", &StreamOptions::default());

        let chunks = drain(&mut handle).await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(handle.fetch_status(), FetchStatus::Idle);
        assert_eq!(handle.chunks().len(), 3);
        assert!(handle.error().is_none());
    }

    #[tokio::test]
    async fn test_max_chunks_retains_most_recent() {
        let transport = Arc::new(ScriptedTransport::frames(&[
            ("progress", r#"{"n":1}"#),
            ("progress", r#"{"n":2}"#),
            ("progress", r#"{"n":3}"#),
            ("progress", r#"{"n":4}"#),
        ]));
        let cache = StreamCache::new(transport);
        let options = StreamOptions {
            max_chunks: Some(2),
            ..StreamOptions::default()
        };
        let mut handle = cache.attach(key("a/b"), "http://test", &options);
        while handle.fetch_status() == FetchStatus::Fetching {
            handle.changed().await;
        }

        let retained: Vec<u64> = handle
            .chunks()
            .iter()
            .map(|c| c.payload["n"].as_u64().unwrap())
            .collect();
        assert_eq!(retained, [3, 4]);

        // a reader that never advanced skips to the oldest retained chunk
        let read: Vec<u64> = drain(&mut handle)
            .await
            .iter()
            .map(|c| c.payload["n"].as_u64().unwrap())
            .collect();
        assert_eq!(read, [3, 4]);
    }

    #[tokio::test]
    async fn test_subscription_is_lossless_under_cap() {
        let payloads: Vec<String> = (1..=6).map(|n| format!(r#"{{"n":{n}}}"#)).collect();
        let frames: Vec<(&str, &str)> = payloads.iter().map(|d| ("progress", d.as_str())).collect();
        let cache = StreamCache::new(Arc::new(ScriptedTransport::frames(&frames)));
        let options = StreamOptions {
            max_chunks: Some(1),
            ..StreamOptions::default()
        };
        let handle = cache.attach(key("a/b"), "http://test", &options);
        let mut subscription = handle.subscribe();

        let mut read = Vec::new();
        while let Some(chunk) = subscription.next().await {
            read.push(chunk.payload["n"].as_u64().unwrap());
        }
        assert_eq!(read, [1, 2, 3, 4, 5, 6]);
        assert_eq!(handle.chunks().len(), 1);
        assert_eq!(handle.fetch_status(), FetchStatus::Idle);
    }

    #[tokio::test]
    async fn test_subscription_after_close_replays_retained_and_ends() {
        let transport = Arc::new(ScriptedTransport::frames(&[
            ("progress", r#"{"n":1}"#),
            ("progress", r#"{"n":2}"#),
            ("progress", r#"{"n":3}"#),
        ]));
        let cache = StreamCache::new(transport);
        let options = StreamOptions {
            max_chunks: Some(2),
            ..StreamOptions::default()
        };
        let mut handle = cache.attach(key("a/b"), "http://test", &options);
        while handle.fetch_status() == FetchStatus::Fetching {
            handle.changed().await;
        }

        let mut subscription = handle.subscribe();
        let mut read = Vec::new();
        while let Some(chunk) = subscription.next().await {
            read.push(chunk.payload["n"].as_u64().unwrap());
        }
        assert_eq!(read, [2, 3]);
    }

    #[tokio::test]
    async fn test_subscription_carries_refusal_status() {
        let cache = StreamCache::new(Arc::new(ScriptedTransport::refusing()));
        let handle = cache.attach(key("a/b"), "http://test", &StreamOptions::default());
        let mut subscription = handle.subscribe();

        assert!(subscription.next().await.is_none());
        assert!(handle.error().is_some_and(|e| e.contains("503")));
    }

    #[tokio::test]
    async fn test_disabled_returns_idle_empty_handle() {
        let transport = Arc::new(ScriptedTransport::frames(&[("progress", "{}")]));
        let cache = StreamCache::new(transport.clone());
        let options = StreamOptions {
            enabled: false,
            ..StreamOptions::default()
        };
        let mut handle = cache.attach(key("a/b"), "http://test", &options);

        assert_eq!(handle.fetch_status(), FetchStatus::Idle);
        assert!(handle.chunks().is_empty());
        assert!(handle.next_chunk().await.is_none());
        assert!(handle.subscribe().next().await.is_none());
        assert_eq!(transport.opens(), 0);
    }

    #[tokio::test]
    async fn test_live_entry_is_shared() {
        let transport = Arc::new(ScriptedTransport::frames(&[("progress", "{}")]).hold_open());
        let cache = StreamCache::new(transport.clone());
        let options = StreamOptions::default();

        let mut first = cache.attach(key("a/b"), "http://test", &options);
        let mut second = cache.attach(key("a/b"), "http://test", &options);
        assert_eq!(cache.live_entries(), 1);

        assert!(first.next_chunk().await.is_some());
        assert!(second.next_chunk().await.is_some());
        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test]
    async fn test_last_handle_drop_tears_down() {
        let transport = Arc::new(ScriptedTransport::frames(&[]).hold_open());
        let cache = StreamCache::new(transport.clone());
        let options = StreamOptions::default();

        let handle = cache.attach(key("a/b"), "http://test", &options);
        assert_eq!(cache.live_entries(), 1);
        drop(handle);
        assert_eq!(cache.live_entries(), 0);

        let _again = cache.attach(key("a/b"), "http://test", &options);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test]
    async fn test_close_ends_readers_and_reopens_on_next_attach() {
        let transport = Arc::new(ScriptedTransport::frames(&[]).hold_open());
        let cache = StreamCache::new(transport.clone());
        let options = StreamOptions::default();

        let mut handle = cache.attach(key("a/b"), "http://test", &options);
        let closer = handle.clone();
        let reader = tokio::spawn(async move { handle.next_chunk().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        closer.close();

        let read = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("reader should finish")
            .unwrap();
        assert!(read.is_none());
        assert!(closer.is_closed());

        let fresh = cache.attach(key("a/b"), "http://test", &options);
        assert!(!fresh.is_closed());
    }

    #[tokio::test]
    async fn test_refused_channel_surfaces_error() {
        let cache = StreamCache::new(Arc::new(ScriptedTransport::refusing()));
        let mut handle = cache.attach(key("a/b"), "http://test", &StreamOptions::default());
        assert!(handle.next_chunk().await.is_none());
        assert_eq!(handle.fetch_status(), FetchStatus::Idle);
        assert!(handle.error().is_some_and(|e| e.contains("503")));
    }
}
