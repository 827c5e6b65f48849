//! Process-wide session registry.
//!
//! Owned by the composition root. One slot per (owner, repo); each slot
//! holds the session state, an update counter for observers and, while
//! live, the channel handle plus the task folding its events.
//!
//! Snapshot loading and live connecting exclude each other per key:
//! `connect` is refused while a snapshot is loaded unless a rerun was
//! started, and `load_snapshot` is refused while a channel is attached or a
//! rerun is in flight.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::GenerationBackend;
use super::state::{ConnectionState, GenerationSession, SessionKey};
use crate::errors::SessionError;
use crate::progress::{MatrixSettings, PersistedSnapshot, TrackedAgents};
use crate::stream::{CacheHandle, CacheKey, ChunkSubscription, StreamCache, StreamOptions};

/// Outcome of a session operation. Refusals are values, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Rejected(SessionError),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }

    pub fn rejection(&self) -> Option<&SessionError> {
        match self {
            Transition::Applied => None,
            Transition::Rejected(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub tracked: TrackedAgents,
    pub matrix: MatrixSettings,
    pub stream: StreamOptions,
}

struct LiveChannel {
    handle: CacheHandle,
    pump: JoinHandle<()>,
}

impl LiveChannel {
    fn is_active(&self) -> bool {
        !self.pump.is_finished()
    }

    /// Stop the channel and wait for the pump to go away, so nothing it
    /// still holds can write into the session afterwards.
    async fn shutdown(self) {
        self.pump.abort();
        self.handle.close();
        // cancellation is the expected outcome
        let _ = self.pump.await;
    }
}

struct SessionSlot {
    state: Arc<RwLock<GenerationSession>>,
    updates: watch::Sender<u64>,
    live: Option<LiveChannel>,
}

impl SessionSlot {
    fn has_active_channel(&mut self) -> bool {
        if self.live.as_ref().is_some_and(|live| !live.is_active()) {
            self.live = None;
        }
        self.live.is_some()
    }

    fn notify(&self) {
        self.updates.send_modify(|version| *version += 1);
    }
}

pub struct SessionRegistry {
    backend: Arc<dyn GenerationBackend>,
    cache: StreamCache,
    settings: SessionSettings,
    slots: Mutex<HashMap<SessionKey, SessionSlot>>,
}

impl SessionRegistry {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        cache: StreamCache,
        settings: SessionSettings,
    ) -> Self {
        Self {
            backend,
            cache,
            settings,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn new_slot(&self, key: &SessionKey) -> SessionSlot {
        let (updates, _) = watch::channel(0);
        SessionSlot {
            state: Arc::new(RwLock::new(GenerationSession::new(
                key.clone(),
                self.settings.tracked.clone(),
                self.settings.matrix.clone(),
            ))),
            updates,
            live: None,
        }
    }

    /// Open the live channel for a repository, replacing any prior one.
    pub async fn connect(&self, key: &SessionKey, codebase_ids: &[String]) -> Transition {
        let mut slots = self.slots.lock().await;
        let slot = slots
            .entry(key.clone())
            .or_insert_with(|| self.new_slot(key));
        {
            let session = slot.state.read().await;
            if session.has_existing_snapshot() && !session.is_rerunning {
                return Transition::Rejected(SessionError::SnapshotLoaded {
                    key: key.to_string(),
                });
            }
        }
        self.open_channel(key, slot, codebase_ids).await;
        Transition::Applied
    }

    async fn open_channel(&self, key: &SessionKey, slot: &mut SessionSlot, codebase_ids: &[String]) {
        if let Some(previous) = slot.live.take() {
            debug!(session = %key, "Closing previous channel");
            previous.shutdown().await;
        }

        let url = self.backend.channel_url(key, codebase_ids);
        slot.state.write().await.begin_live(codebase_ids, Utc::now());

        let handle = self.cache.attach(
            CacheKey::new(url.clone(), key.to_string()),
            &url,
            &self.settings.stream,
        );
        let pump = tokio::spawn(fold_events(
            handle.clone(),
            handle.subscribe(),
            slot.state.clone(),
            slot.updates.clone(),
        ));
        slot.live = Some(LiveChannel { handle, pump });
        slot.notify();
        info!(session = %key, codebases = codebase_ids.len(), "Session connected");
    }

    /// Close the channel and drop the session.
    pub async fn disconnect(&self, key: &SessionKey) -> Transition {
        let mut slots = self.slots.lock().await;
        let Some(mut slot) = slots.remove(key) else {
            return Transition::Rejected(SessionError::UnknownSession {
                key: key.to_string(),
            });
        };
        if let Some(live) = slot.live.take() {
            live.shutdown().await;
        }
        slot.state.write().await.connection = ConnectionState::Disconnected;
        slot.notify();
        info!(session = %key, "Session disconnected");
        Transition::Applied
    }

    /// Close any channel and replace the session with a blank one.
    pub async fn reset(&self, key: &SessionKey) -> Transition {
        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.get_mut(key) else {
            return Transition::Rejected(SessionError::UnknownSession {
                key: key.to_string(),
            });
        };
        if let Some(live) = slot.live.take() {
            live.shutdown().await;
        }
        {
            let mut session = slot.state.write().await;
            *session = session.blank();
        }
        slot.notify();
        debug!(session = %key, "Session reset");
        Transition::Applied
    }

    /// Fetch the stored snapshot and hydrate the session from it.
    pub async fn load_snapshot(&self, key: &SessionKey) -> Transition {
        if let Some(refusal) = self.snapshot_refusal(key).await {
            return Transition::Rejected(refusal);
        }

        match self.backend.fetch_snapshot(key).await {
            Ok(Some(snapshot)) => self.hydrate(key, snapshot).await,
            Ok(None) => Transition::Rejected(SessionError::SnapshotMissing {
                key: key.to_string(),
            }),
            Err(e) => {
                warn!(session = %key, error = %e, "Snapshot fetch failed");
                Transition::Rejected(SessionError::SnapshotUnavailable {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Hydrate from an already retrieved snapshot.
    pub async fn hydrate(&self, key: &SessionKey, snapshot: PersistedSnapshot) -> Transition {
        let mut slots = self.slots.lock().await;
        let slot = slots
            .entry(key.clone())
            .or_insert_with(|| self.new_slot(key));
        if let Some(refusal) = Self::refuse_snapshot(key, slot).await {
            return Transition::Rejected(refusal);
        }
        slot.state.write().await.hydrate(snapshot, Utc::now());
        slot.notify();
        Transition::Applied
    }

    async fn snapshot_refusal(&self, key: &SessionKey) -> Option<SessionError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(key)?;
        Self::refuse_snapshot(key, slot).await
    }

    async fn refuse_snapshot(key: &SessionKey, slot: &mut SessionSlot) -> Option<SessionError> {
        if slot.state.read().await.is_rerunning {
            return Some(SessionError::RerunInFlight {
                key: key.to_string(),
            });
        }
        if slot.has_active_channel() {
            return Some(SessionError::LiveChannelActive {
                key: key.to_string(),
            });
        }
        None
    }

    /// Discard any loaded snapshot and regenerate from a blank matrix.
    pub async fn start_rerun(&self, key: &SessionKey, codebase_ids: &[String]) -> Transition {
        let mut slots = self.slots.lock().await;
        let slot = slots
            .entry(key.clone())
            .or_insert_with(|| self.new_slot(key));
        if let Some(previous) = slot.live.take() {
            debug!(session = %key, "Closing previous channel ahead of rerun");
            previous.shutdown().await;
        }
        slot.state.write().await.begin_rerun();
        slot.notify();
        info!(session = %key, "Rerun requested");
        self.open_channel(key, slot, codebase_ids).await;
        Transition::Applied
    }

    /// Copy of the current session state.
    pub async fn snapshot(&self, key: &SessionKey) -> Option<GenerationSession> {
        let state = {
            let slots = self.slots.lock().await;
            slots.get(key)?.state.clone()
        };
        let session = state.read().await.clone();
        Some(session)
    }

    /// Counter bumped on every change to the session.
    pub async fn updates(&self, key: &SessionKey) -> Option<watch::Receiver<u64>> {
        let slots = self.slots.lock().await;
        slots.get(key).map(|slot| slot.updates.subscribe())
    }

    /// Wait until the session has no live channel.
    pub async fn wait_closed(&self, key: &SessionKey) {
        let Some(mut updates) = self.updates(key).await else {
            return;
        };
        loop {
            match self.snapshot(key).await {
                Some(session) if session.connection.is_live() => {}
                _ => return,
            }
            if updates.changed().await.is_err() {
                return;
            }
        }
    }

    pub async fn session_count(&self) -> usize {
        self.slots.lock().await.len()
    }
}

/// Fold every chunk of the channel into the session, then record how the
/// channel ended.
async fn fold_events(
    handle: CacheHandle,
    mut chunks: ChunkSubscription,
    state: Arc<RwLock<GenerationSession>>,
    updates: watch::Sender<u64>,
) {
    while let Some(envelope) = chunks.next().await {
        state.write().await.apply(&envelope);
        updates.send_modify(|version| *version += 1);
    }

    {
        let mut session = state.write().await;
        match handle.error() {
            Some(message) => session.fail(message),
            None => session.mark_closed(),
        }
    }
    updates.send_modify(|version| *version += 1);
}
