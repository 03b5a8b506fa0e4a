//! Observable sync state and the event stream consumers subscribe to.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::models::EntityType;

use super::change::Change;
use super::conflict::SyncConflict;

/// A snapshot of where the engine stands: connectivity, cycle activity,
/// the pending queue, and unresolved conflicts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub is_online: bool,
    pub is_syncing: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub pending_changes: Vec<Change>,
    pub conflicts: Vec<SyncConflict>,
    pub last_error: Option<String>,
}

/// Events broadcast to subscribers as a sync cycle progresses.
///
/// Entity upserts and conflicts fire immediately so the UI can repaint the
/// affected records; state snapshots are debounced.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    EntityUpserted { entity_type: EntityType, entity: Value },
    ConflictDetected(SyncConflict),
    StateChanged(SyncState),
}

/// Trailing-edge debouncer for state snapshots.
///
/// Rapid state updates during a cycle collapse into one broadcast: each
/// incoming snapshot restarts the quiet window, and only the latest one is
/// emitted once the window elapses.
pub struct StateDebouncer {
    tx: mpsc::UnboundedSender<SyncState>,
}

impl StateDebouncer {
    pub fn spawn(events: broadcast::Sender<SyncEvent>, quiet: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SyncState>();
        tokio::spawn(async move {
            while let Some(mut latest) = rx.recv().await {
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(quiet) => {
                            // Subscriber count may be zero; that is fine.
                            let _ = events.send(SyncEvent::StateChanged(latest));
                            break;
                        }
                        next = rx.recv() => match next {
                            Some(state) => latest = state,
                            None => {
                                let _ = events.send(SyncEvent::StateChanged(latest));
                                return;
                            }
                        }
                    }
                }
            }
        });
        Self { tx }
    }

    /// Queue a snapshot for broadcast after the quiet window.
    pub fn notify(&self, state: SyncState) {
        let _ = self.tx.send(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state_with_error(tag: &str) -> SyncState {
        SyncState {
            last_error: Some(tag.to_string()),
            ..SyncState::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_latest_snapshot() {
        let (events, mut rx) = broadcast::channel(16);
        let debouncer = StateDebouncer::spawn(events, Duration::from_millis(150));

        for i in 0..5 {
            debouncer.notify(state_with_error(&format!("s{i}")));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let SyncEvent::StateChanged(state) = rx.recv().await.unwrap() else {
            panic!("expected a state event");
        };
        assert_eq!(state.last_error.as_deref(), Some("s4"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn separated_updates_each_broadcast() {
        let (events, mut rx) = broadcast::channel(16);
        let debouncer = StateDebouncer::spawn(events, Duration::from_millis(150));

        debouncer.notify(state_with_error("first"));
        tokio::time::sleep(Duration::from_millis(300)).await;
        debouncer.notify(state_with_error("second"));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let SyncEvent::StateChanged(first) = rx.recv().await.unwrap() else {
            panic!("expected a state event");
        };
        let SyncEvent::StateChanged(second) = rx.recv().await.unwrap() else {
            panic!("expected a state event");
        };
        assert_eq!(first.last_error.as_deref(), Some("first"));
        assert_eq!(second.last_error.as_deref(), Some("second"));
    }
}
