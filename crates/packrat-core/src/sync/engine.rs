//! Sync orchestrator: wires the pull and push pipelines, the conflict
//! resolver, and the observable state behind one entry point.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::auth::SessionProvider;
use crate::db::{ChangeLog, ConflictStore, Database, SyncMetaStore};
use crate::error::{Error, Result};
use crate::models::EntityType;
use crate::remote::RemoteStore;
use crate::util::utc_now;

use super::pull::PullPipeline;
use super::push::PushPipeline;
use super::resolver::{ConflictResolver, FieldChoice, ResolutionStrategy};
use super::state::{StateDebouncer, SyncEvent, SyncState};

/// Tunables for a [`SyncEngine`]. The defaults suit interactive use.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Quiet window before a state snapshot broadcasts.
    pub debounce_window: Duration,
    /// Bound on session verification before a push pass is skipped.
    pub session_timeout: Duration,
    /// Bound on the connectivity probe.
    pub probe_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(150),
            session_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

/// What one sync cycle did, for callers that want a summary beyond the
/// broadcast state.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub pulled: usize,
    pub conflicts: usize,
    pub pushed: usize,
}

/// Coordinates pull, push, and conflict handling against one local
/// database and one remote store.
///
/// Cycles never overlap: a second [`force_sync`](Self::force_sync) while
/// one is running fails fast with [`Error::SyncInProgress`] rather than
/// queueing.
pub struct SyncEngine<R: RemoteStore, S: SessionProvider> {
    db: Database,
    remote: R,
    session: S,
    options: SyncOptions,
    state: Arc<Mutex<SyncState>>,
    events: broadcast::Sender<SyncEvent>,
    debouncer: StateDebouncer,
    cycle_guard: tokio::sync::Mutex<()>,
}

impl<R: RemoteStore, S: SessionProvider> SyncEngine<R, S> {
    pub fn new(db: Database, remote: R, session: S, options: SyncOptions) -> Self {
        let (events, _) = broadcast::channel(64);
        let debouncer = StateDebouncer::spawn(events.clone(), options.debounce_window);

        // Conflicts staged by an earlier process are still unresolved.
        let conflicts = ConflictStore::new(db.clone())
            .unresolved()
            .unwrap_or_else(|error| {
                tracing::warn!(%error, "failed to load staged conflicts");
                Vec::new()
            });
        let state = SyncState {
            conflicts,
            ..SyncState::default()
        };

        Self {
            db,
            remote,
            session,
            options,
            state: Arc::new(Mutex::new(state)),
            events,
            debouncer,
            cycle_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Subscribe to the engine's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Current state snapshot.
    pub fn state(&self) -> SyncState {
        lock(&self.state).clone()
    }

    /// Probe the remote and record the result.
    ///
    /// A probe that times out counts as online: pull is harmless to
    /// attempt, and push separately refuses to run without a verified
    /// session.
    pub async fn check_connectivity(&self) -> bool {
        let online =
            match tokio::time::timeout(self.options.probe_timeout, self.remote.probe()).await {
                Ok(reachable) => reachable,
                Err(_) => {
                    tracing::debug!("connectivity probe timed out, assuming online");
                    true
                }
            };
        lock(&self.state).is_online = online;
        self.publish_state();
        online
    }

    /// Flip connectivity; coming back online triggers a full cycle.
    pub async fn set_online(&self, online: bool) {
        let was_online = {
            let mut state = lock(&self.state);
            let previous = state.is_online;
            state.is_online = online;
            previous
        };
        self.publish_state();

        if online && !was_online {
            match self.force_sync().await {
                Ok(_) | Err(Error::SyncInProgress) => {}
                Err(error) => {
                    tracing::warn!(%error, "reconnect sync failed");
                }
            }
        }
    }

    /// Pull-only pass for session start: populate the local store before
    /// any local edits exist, without draining the change queue.
    pub async fn force_initial_sync(&self) -> Result<CycleReport> {
        let _guard = self
            .cycle_guard
            .try_lock()
            .map_err(|_| Error::SyncInProgress)?;
        let user_id = self.require_user()?;

        self.begin_cycle();
        let mut report = CycleReport::default();
        let result = self.run_pull(&user_id, &mut report).await;
        self.end_cycle(result.as_ref().err().map(ToString::to_string));
        result.map(|()| report)
    }

    /// Run one full cycle: pull, stage conflicts, then push pending
    /// changes.
    pub async fn force_sync(&self) -> Result<CycleReport> {
        let _guard = self
            .cycle_guard
            .try_lock()
            .map_err(|_| Error::SyncInProgress)?;
        let user_id = self.require_user()?;

        self.begin_cycle();
        let mut report = CycleReport::default();
        let result = self.run_cycle(&user_id, &mut report).await;
        let error_text = result.as_ref().err().map(ToString::to_string);
        if error_text.is_none() {
            lock(&self.state).last_sync = Some(utc_now());
        }
        self.end_cycle(error_text);
        result.map(|()| report)
    }

    async fn run_cycle(&self, user_id: &str, report: &mut CycleReport) -> Result<()> {
        self.run_pull(user_id, report).await?;

        // Entities with an unresolved conflict hold their changes back
        // until the user decides; pushing them would clobber the divergent
        // server state.
        let conflicted: HashSet<(EntityType, String)> = lock(&self.state)
            .conflicts
            .iter()
            .map(|c| (c.entity_type, c.entity_id.clone()))
            .collect();
        let push = PushPipeline::new(self.db.clone())
            .push_pending(
                &self.remote,
                &self.session,
                self.options.session_timeout,
                &conflicted,
            )
            .await?;
        report.pushed = push.pushed + push.local_only;
        if let Some(error) = push.error {
            return Err(error);
        }
        if !push.session_verified {
            return Err(Error::Auth("session could not be verified".to_string()));
        }
        Ok(())
    }

    async fn run_pull(&self, user_id: &str, report: &mut CycleReport) -> Result<()> {
        let meta = SyncMetaStore::new(self.db.clone());
        let since = meta.watermark(user_id)?;

        let outcome = PullPipeline::new(self.db.clone())
            .pull_all(&self.remote, user_id, since)
            .await;
        report.pulled = outcome.applied.len();
        report.conflicts = outcome.conflicts.len();

        for upsert in outcome.applied {
            let _ = self.events.send(SyncEvent::EntityUpserted {
                entity_type: upsert.entity_type,
                entity: upsert.entity,
            });
        }
        for conflict in outcome.conflicts {
            let _ = self.events.send(SyncEvent::ConflictDetected(conflict));
        }
        // The pull staged its conflicts durably; the state projection
        // mirrors the store.
        lock(&self.state).conflicts = ConflictStore::new(self.db.clone()).unresolved()?;

        // Advancing past a type that failed would silently drop its rows
        // forever, so the watermark only moves on a clean pull.
        if outcome.failures.is_empty() {
            if let Some(at) = outcome.watermark {
                meta.set_watermark(user_id, at)?;
            }
        } else {
            let (entity_type, error) = &outcome.failures[0];
            return Err(Error::Remote(format!("pull failed for {entity_type}: {error}")));
        }
        Ok(())
    }

    /// Settle one staged conflict. Resolution is terminal: the conflict
    /// leaves the pending set and is never re-opened.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        strategy: ResolutionStrategy,
        overrides: &HashMap<String, FieldChoice>,
    ) -> Result<Value> {
        let user_id = self.require_user()?;
        let conflict = lock(&self.state)
            .conflicts
            .iter()
            .find(|c| c.id == conflict_id)
            .cloned()
            .ok_or_else(|| Error::NotFound("conflict", conflict_id.to_string()))?;

        let resolved =
            ConflictResolver::new(self.db.clone()).resolve(&conflict, strategy, overrides, &user_id)?;

        ConflictStore::new(self.db.clone()).mark_resolved(conflict_id)?;
        lock(&self.state).conflicts.retain(|c| c.id != conflict_id);
        self.refresh_pending();
        self.publish_state();
        Ok(resolved)
    }

    fn require_user(&self) -> Result<String> {
        self.session
            .user_id()
            .ok_or_else(|| Error::Auth("no active session".to_string()))
    }

    fn begin_cycle(&self) {
        lock(&self.state).is_syncing = true;
        self.publish_state();
    }

    fn end_cycle(&self, error: Option<String>) {
        self.refresh_pending();
        let mut state = lock(&self.state);
        state.is_syncing = false;
        state.last_error = error;
        drop(state);
        self.publish_state();
    }

    fn refresh_pending(&self) {
        match ChangeLog::new(self.db.clone()).pending() {
            Ok(pending) => lock(&self.state).pending_changes = pending,
            Err(error) => tracing::warn!(%error, "failed to refresh pending changes"),
        }
    }

    fn publish_state(&self) {
        self.debouncer.notify(lock(&self.state).clone());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
