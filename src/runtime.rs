//! Runtime for executing interactions
//!
//! One task per UI session owns that session's state. Backend requests run as
//! spawned tasks that report back through the session's event channel.

mod executor;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;

use crate::backend::AgentBackend;
use crate::state_machine::{Event, InteractionContext, InteractionSnapshot, TransitionError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

/// Upper bound on the time between idle sweeps
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// An event on its way to a session runtime
#[derive(Debug)]
pub struct Dispatch {
    pub event: Event,
    /// Present for user actions; receives whether the transition was accepted
    pub reply: Option<oneshot::Sender<Result<(), TransitionError>>>,
}

impl Dispatch {
    /// Event produced by a backend request task
    pub fn internal(event: Event) -> Self {
        Self { event, reply: None }
    }
}

/// Events sent to UI clients
#[derive(Debug, Clone)]
pub enum UiEvent {
    State { snapshot: InteractionSnapshot },
    /// One reply chunk, numbered within its turn from 1
    Chunk { turn: usize, index: u64, text: String },
    AgentDone,
    Error { message: String },
}

/// Why an event could not be applied
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    #[error("Session runtime stopped")]
    Closed,
}

/// Send an event to a runtime and wait for the transition outcome
pub async fn dispatch(tx: &mpsc::Sender<Dispatch>, event: Event) -> Result<(), DispatchError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(Dispatch {
        event,
        reply: Some(reply_tx),
    })
    .await
    .map_err(|_| DispatchError::Closed)?;
    reply_rx.await.map_err(|_| DispatchError::Closed)??;
    Ok(())
}

/// Settings shared by every session a manager creates
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub app_name: String,
    pub user_id: String,
    pub request_timeout: Duration,
    /// Sessions unused for this long are removed by the idle sweep
    pub session_idle_timeout: Duration,
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionEntry {
    pub event_tx: mpsc::Sender<Dispatch>,
    pub broadcast_tx: broadcast::Sender<UiEvent>,
    pub snapshot_rx: watch::Receiver<InteractionSnapshot>,
    /// Last sweep that saw the session in use
    pub last_active: Instant,
}

/// What a client needs to follow a session
pub struct Subscription {
    /// State the client starts from
    pub snapshot: InteractionSnapshot,
    pub events: broadcast::Receiver<UiEvent>,
    /// Latest state, for clients that fall behind the broadcast
    pub snapshots: watch::Receiver<InteractionSnapshot>,
}

/// Manager for all UI session runtimes
pub struct RuntimeManager {
    backend: Arc<dyn AgentBackend>,
    settings: RuntimeSettings,
    runtimes: RwLock<HashMap<String, SessionEntry>>,
}

impl RuntimeManager {
    pub fn new(backend: Arc<dyn AgentBackend>, settings: RuntimeSettings) -> Self {
        Self {
            backend,
            settings,
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Start a new UI session and return its id with the initial snapshot
    pub async fn create(&self) -> (String, InteractionSnapshot) {
        let id = uuid::Uuid::new_v4().to_string();
        let context = InteractionContext::new(&id, &self.settings.app_name, &self.settings.user_id)
            .with_request_timeout(self.settings.request_timeout);

        let (event_tx, event_rx) = mpsc::channel(64);
        let (broadcast_tx, _) = broadcast::channel(256);

        let runtime = SessionRuntime::new(
            context,
            self.backend.clone(),
            event_rx,
            &event_tx,
            broadcast_tx.clone(),
        );
        let snapshot_rx = runtime.subscribe_snapshots();
        let snapshot = snapshot_rx.borrow().clone();

        let ui_session = id.clone();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(ui_session = %ui_session, "Session runtime finished");
        });

        self.runtimes.write().await.insert(
            id.clone(),
            SessionEntry {
                event_tx,
                broadcast_tx,
                snapshot_rx,
                last_active: Instant::now(),
            },
        );

        tracing::info!(ui_session = %id, "UI session created");
        (id, snapshot)
    }

    async fn entry(&self, id: &str) -> Result<SessionEntry, DispatchError> {
        self.runtimes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(id.to_string()))
    }

    /// Apply a user action to a session
    pub async fn send_event(&self, id: &str, event: Event) -> Result<(), DispatchError> {
        let entry = self.entry(id).await?;
        dispatch(&entry.event_tx, event).await
    }

    pub async fn snapshot(&self, id: &str) -> Result<InteractionSnapshot, DispatchError> {
        let entry = self.entry(id).await?;
        let snapshot = entry.snapshot_rx.borrow().clone();
        Ok(snapshot)
    }

    /// Subscribe to session updates, with the snapshot they start from
    pub async fn subscribe(&self, id: &str) -> Result<Subscription, DispatchError> {
        let entry = self.entry(id).await?;
        // Subscribe before reading the snapshot so no update falls in between
        let events = entry.broadcast_tx.subscribe();
        let snapshot = entry.snapshot_rx.borrow().clone();
        Ok(Subscription {
            snapshot,
            events,
            snapshots: entry.snapshot_rx,
        })
    }

    /// Forget a UI session. Its runtime stops once in-flight requests finish;
    /// open streams end with it.
    pub async fn remove(&self, id: &str) -> Result<(), DispatchError> {
        if self.runtimes.write().await.remove(id).is_none() {
            return Err(DispatchError::NotFound(id.to_string()));
        }
        tracing::info!(ui_session = %id, "UI session removed");
        Ok(())
    }

    /// Remove sessions left unused for the idle timeout, returning how many.
    ///
    /// A session is in use while it is processing, has stream subscribers, or
    /// changed state since the previous sweep.
    pub async fn evict_idle(&self) -> usize {
        let idle_timeout = self.settings.session_idle_timeout;
        let now = Instant::now();
        let mut runtimes = self.runtimes.write().await;
        let before = runtimes.len();

        runtimes.retain(|id, entry| {
            // Err means the runtime is gone
            let Ok(changed) = entry.snapshot_rx.has_changed() else {
                tracing::warn!(ui_session = %id, "Dropping session whose runtime stopped");
                return false;
            };
            let processing = entry.snapshot_rx.borrow_and_update().processing;
            if changed || processing || entry.broadcast_tx.receiver_count() > 0 {
                entry.last_active = now;
                return true;
            }

            let idle = now.duration_since(entry.last_active);
            if idle < idle_timeout {
                return true;
            }
            tracing::info!(ui_session = %id, idle_secs = idle.as_secs(), "Evicting idle UI session");
            false
        });

        before - runtimes.len()
    }

    /// Run `evict_idle` periodically until the manager is dropped
    pub fn spawn_idle_sweeper(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        let period = (self.settings.session_idle_timeout / 4)
            .clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let evicted = manager.evict_idle().await;
                if evicted > 0 {
                    let remaining = manager.session_count().await;
                    tracing::info!(
                        evicted,
                        remaining,
                        "Idle sweep finished"
                    );
                }
            }
        });
    }

    pub fn backend(&self) -> &Arc<dyn AgentBackend> {
        &self.backend
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub async fn session_count(&self) -> usize {
        self.runtimes.read().await.len()
    }
}
