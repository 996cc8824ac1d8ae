use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::EventsConfig;
use crate::engine::{ContainerEngine, ContainerEvent};
use crate::entities::{EntityKind, EntityRef};
use crate::events::debounce::Debouncer;
use crate::events::mapping::{needs_projects, route_event};
use crate::registry::ProjectRegistry;

const CHANNEL_CAPACITY: usize = 256;

/// A signal that some cached view of entity state is stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", content = "target", rename_all = "snake_case")]
pub enum Invalidation {
    /// One entity's detail/state view.
    Entity(EntityRef),
    /// Every entity of one kind. Debounced.
    Class(EntityKind),
    /// Everything. Emitted once per reconnect.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Subscription state with the consecutive failure count and the error
/// that caused the last disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempt: u32,
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Turns the engine's container event stream into [`Invalidation`]s.
pub struct EventBus {
    engine: Arc<dyn ContainerEngine>,
    projects: Arc<dyn ProjectRegistry>,
    config: EventsConfig,
    invalidations: broadcast::Sender<Invalidation>,
    status: watch::Sender<ConnectionStatus>,
}

impl EventBus {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        projects: Arc<dyn ProjectRegistry>,
        config: EventsConfig,
    ) -> Self {
        let (invalidations, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (status, _) = watch::channel(ConnectionStatus::disconnected());
        Self {
            engine,
            projects,
            config,
            invalidations,
            status,
        }
    }

    /// Subscribe before [`start`](Self::start) to observe the first events.
    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.invalidations.subscribe()
    }

    /// Spawn the subscription task. It runs until [`EventBusHandle::stop`]
    /// or until the handle is dropped.
    pub fn start(self) -> EventBusHandle {
        let invalidations = self.invalidations.clone();
        let status = self.status.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        EventBusHandle {
            invalidations,
            status,
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }

    fn set_status(&self, state: ConnectionState, attempt: u32, last_error: Option<String>) {
        let next = ConnectionStatus {
            state,
            attempt,
            last_error,
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn emit(&self, invalidation: Invalidation) {
        // No subscribers is fine.
        let _ = self.invalidations.send(invalidation);
    }

    /// Record that the current stream is established. On a reconnect
    /// everything is invalidated once.
    fn settle(&self, retry: &mut RetryState) {
        let reconnect = retry.connected_before;
        retry.reset(self.config.backoff_initial);
        self.set_status(ConnectionState::Connected, 0, None);
        tracing::info!(reconnect, "Event stream connected");
        if reconnect {
            self.emit(Invalidation::All);
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let debouncer = {
            let tx = self.invalidations.clone();
            Debouncer::new(self.config.debounce, move |kind: EntityKind| {
                let _ = tx.send(Invalidation::Class(kind));
            })
        };

        let mut retry = RetryState::new(self.config.backoff_initial);

        loop {
            self.set_status(
                ConnectionState::Connecting,
                retry.attempt,
                retry.last_error.clone(),
            );

            let error = match self.engine.ping().await {
                Err(e) => e.to_string(),
                Ok(()) => {
                    let mut events = self.engine.events();
                    // Backoff only resets once the stream proves itself, so an
                    // events endpoint that fails right after a good ping still
                    // backs off.
                    let mut stable = false;
                    let settle_timer = tokio::time::sleep(self.config.stable_after);
                    tokio::pin!(settle_timer);

                    loop {
                        tokio::select! {
                            _ = stopped(&mut shutdown) => {
                                debouncer.cancel_all();
                                self.set_status(ConnectionState::Disconnected, 0, None);
                                tracing::debug!("Event bus stopped");
                                return;
                            }
                            _ = &mut settle_timer, if !stable => {
                                stable = true;
                                self.settle(&mut retry);
                            }
                            item = events.next() => match item {
                                Some(Ok(event)) => {
                                    if !stable {
                                        stable = true;
                                        self.settle(&mut retry);
                                    }
                                    self.handle_event(event, &debouncer).await;
                                }
                                Some(Err(e)) => break e.to_string(),
                                None => break "event stream ended".to_string(),
                            },
                        }
                    }
                }
            };

            let delay = retry.fail(error.clone(), self.config.backoff_max);
            tracing::warn!(attempt = retry.attempt, retry_in = ?delay, "Event stream disconnected: {}", error);
            self.set_status(ConnectionState::Disconnected, retry.attempt, Some(error));

            tokio::select! {
                _ = stopped(&mut shutdown) => {
                    debouncer.cancel_all();
                    tracing::debug!("Event bus stopped while disconnected");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn handle_event(&self, event: ContainerEvent, debouncer: &Debouncer<EntityKind>) {
        let projects = if needs_projects(&event) {
            match self.projects.list_projects().await {
                Ok(projects) => projects,
                Err(e) => {
                    tracing::warn!("Could not read projects for event routing: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let Some(entity) = route_event(&event, &projects) else {
            tracing::trace!(container = %event.name, action = event.action.as_str(), "Unowned container event");
            return;
        };

        tracing::debug!(
            container = %event.name,
            action = event.action.as_str(),
            entity = %entity,
            "Container event"
        );
        let kind = entity.kind;
        self.emit(Invalidation::Entity(entity));
        if event.action.is_state_change() {
            debouncer.schedule(kind);
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Resolves once shutdown is requested. The watch guard is released before
/// returning, so select arms may await afterwards.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Consecutive failures since the last established stream.
#[derive(Debug)]
struct RetryState {
    attempt: u32,
    backoff: Duration,
    last_error: Option<String>,
    connected_before: bool,
}

impl RetryState {
    fn new(initial: Duration) -> Self {
        Self {
            attempt: 0,
            backoff: initial,
            last_error: None,
            connected_before: false,
        }
    }

    fn reset(&mut self, initial: Duration) {
        self.attempt = 0;
        self.backoff = initial;
        self.last_error = None;
        self.connected_before = true;
    }

    /// Count a failure and return the delay before the next attempt.
    fn fail(&mut self, error: String, max: Duration) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.last_error = Some(error);
        let delay = self.backoff;
        self.backoff = next_backoff(self.backoff, max);
        delay
    }
}

/// Handle to a running [`EventBus`].
pub struct EventBusHandle {
    invalidations: broadcast::Sender<Invalidation>,
    status: watch::Receiver<ConnectionStatus>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl EventBusHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.invalidations.subscribe()
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Invoke `callback` on every connection status transition until the
    /// bus stops.
    pub fn on_connection_status_change<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(&ConnectionStatus) + Send + 'static,
    {
        let mut status = self.status.clone();
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = status.borrow_and_update().clone();
                callback(&current);
            }
        })
    }

    /// Stop the subscription and wait for the task to exit.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!("Event bus task ended abnormally: {}", e);
        }
    }
}

impl Drop for EventBusHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let max = Duration::from_secs(30);
        let mut delay = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(delay.as_secs());
            delay = next_backoff(delay, max);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_retry_state_grows_until_reset() {
        let mut retry = RetryState::new(Duration::from_secs(1));
        let max = Duration::from_secs(4);
        let delays: Vec<u64> = (0..4)
            .map(|_| retry.fail("refused".to_string(), max).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 4]);
        assert_eq!(retry.attempt, 4);
        assert!(!retry.connected_before);

        retry.reset(Duration::from_secs(1));
        assert_eq!(retry.attempt, 0);
        assert!(retry.connected_before);
        assert_eq!(retry.fail("refused".to_string(), max), Duration::from_secs(1));
    }

    #[test]
    fn test_invalidation_serializes_with_scope() {
        let json = serde_json::to_value(Invalidation::Entity(EntityRef::project("p1"))).unwrap();
        assert_eq!(json["scope"], "entity");
        assert_eq!(json["target"]["kind"], "project");
        assert_eq!(serde_json::to_value(Invalidation::All).unwrap()["scope"], "all");
    }
}
