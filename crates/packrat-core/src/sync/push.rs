//! Push pipeline: apply pending changes to the remote store in causal order.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{json, Value};

use crate::auth::SessionProvider;
use crate::db::{ChangeLog, Database};
use crate::error::{Error, Result};
use crate::models::EntityType;
use crate::remote::{rows, RemoteStore};
use crate::util::utc_now;

use super::change::{Change, ChangeOperation};

/// What one push pass did.
#[derive(Debug, Default)]
pub struct PushReport {
    /// Changes successfully applied remotely and marked synced.
    pub pushed: usize,
    /// Local-only changes (rule packs) marked synced without network I/O.
    pub local_only: usize,
    /// Changes left pending because their entity has an unresolved
    /// conflict.
    pub deferred: usize,
    /// Whether an authenticated session was verified before pushing. When
    /// false, every change stayed pending.
    pub session_verified: bool,
    /// The failure that stopped the drain, if any. The failing change and
    /// everything after it stay pending for the next cycle.
    pub error: Option<Error>,
}

/// Walks pending changes FIFO and applies each to the remote store.
///
/// A change is never discarded: on any failure it stays unsynced and is
/// retried on a later cycle, indefinitely. Losing a change is treated as
/// strictly worse than a stuck retry.
pub struct PushPipeline {
    db: Database,
}

impl PushPipeline {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Drain the pending log against the remote store.
    ///
    /// The session check is time-bounded: a stalled verification counts as
    /// "cannot push", never as a hang. The drain stops at the first remote
    /// failure so later changes cannot overtake a failed earlier one for
    /// the same entity. Entities listed in `conflicted` are skipped: their
    /// changes stay pending until the user resolves the conflict, so an
    /// unreviewed local edit never clobbers the divergent server state.
    pub async fn push_pending<R: RemoteStore, S: SessionProvider>(
        &self,
        remote: &R,
        session: &S,
        session_timeout: Duration,
        conflicted: &HashSet<(EntityType, String)>,
    ) -> Result<PushReport> {
        let mut report = PushReport::default();

        report.session_verified =
            match tokio::time::timeout(session_timeout, session.verify_session()).await {
                Ok(Ok(verified)) => verified,
                Ok(Err(error)) => {
                    tracing::warn!(%error, "session verification failed, deferring push");
                    false
                }
                Err(_) => {
                    tracing::warn!("session verification timed out, deferring push");
                    false
                }
            };
        if !report.session_verified {
            return Ok(report);
        }

        let log = ChangeLog::new(self.db.clone());
        for change in log.pending()? {
            if !change.entity_type.is_remote() {
                log.mark_synced(&change.id)?;
                report.local_only += 1;
                continue;
            }
            if conflicted.contains(&(change.entity_type, change.entity_id.clone())) {
                tracing::debug!(
                    entity_type = %change.entity_type,
                    entity_id = change.entity_id,
                    "entity has an unresolved conflict, deferring push"
                );
                report.deferred += 1;
                continue;
            }

            match self.push_change(remote, &change).await {
                Ok(()) => {
                    log.mark_synced(&change.id)?;
                    report.pushed += 1;
                }
                Err(error) => {
                    if error.is_policy_rejection() {
                        // Likely a trip-ownership mismatch; log enough to
                        // re-verify, then retry like any other failure.
                        tracing::warn!(
                            entity_type = %change.entity_type,
                            entity_id = change.entity_id,
                            trip_id = change.trip_id.as_deref().unwrap_or("-"),
                            user_id = change.user_id,
                            %error,
                            "remote rejected change, will retry"
                        );
                    } else {
                        tracing::warn!(
                            entity_type = %change.entity_type,
                            entity_id = change.entity_id,
                            %error,
                            "push failed, change stays pending"
                        );
                    }
                    report.error = Some(error);
                    break;
                }
            }
        }

        tracing::debug!(
            pushed = report.pushed,
            local_only = report.local_only,
            deferred = report.deferred,
            "push pass complete"
        );
        Ok(report)
    }

    async fn push_change<R: RemoteStore>(&self, remote: &R, change: &Change) -> Result<()> {
        let table = change
            .entity_type
            .remote_table()
            .ok_or_else(|| Error::InvalidInput("local-only entity in push".to_string()))?;

        match change.operation {
            ChangeOperation::Create | ChangeOperation::Update => {
                if change.partial {
                    let patch = rows::object_to_row(change.data.clone())?;
                    remote.update(table, &change.entity_id, patch).await
                } else {
                    let row = rows::object_to_row(change.data.clone())?;
                    remote.upsert(table, row).await
                }
            }
            // Never a row delete: flag the tombstone and bump updated_at.
            ChangeOperation::Delete => {
                let updated_at = change
                    .data
                    .get("updatedAt")
                    .cloned()
                    .unwrap_or_else(|| json!(utc_now()));
                let patch: Value = json!({
                    "is_deleted": true,
                    "updated_at": updated_at,
                    "version": change.version,
                });
                remote.update(table, &change.entity_id, patch).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::FixedSession;
    use crate::models::{EntityType, RulePack, Syncable, TripItem};
    use crate::remote::MemoryRemote;
    use crate::sync::tracker::ChangeTracker;
    use pretty_assertions::assert_eq;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn setup() -> (PushPipeline, ChangeTracker, ChangeLog, MemoryRemote) {
        let db = Database::open_in_memory().unwrap();
        (
            PushPipeline::new(db.clone()),
            ChangeTracker::new(db.clone()),
            ChangeLog::new(db),
            MemoryRemote::new(),
        )
    }

    #[tokio::test]
    async fn pushes_creates_as_upserts_in_order() {
        let (pipeline, tracker, log, remote) = setup();
        let mut item = TripItem::new("t1", "Socks");
        tracker
            .track(ChangeOperation::Create, None, &mut item, "u1")
            .unwrap();

        let report = pipeline
            .push_pending(&remote, &FixedSession::new("u1"), TIMEOUT, &HashSet::new())
            .await
            .unwrap();
        assert!(report.session_verified);
        assert_eq!(report.pushed, 1);
        assert!(report.error.is_none());
        assert_eq!(log.pending_count().unwrap(), 0);

        let row = remote.row("trip_items", &item.id).unwrap();
        assert_eq!(row["trip_id"], "t1");
        assert_eq!(row["is_deleted"], false);
    }

    #[tokio::test]
    async fn partial_changes_patch_instead_of_upserting() {
        let (pipeline, tracker, _log, remote) = setup();

        // Remote row with fields a full upsert would clobber
        let mut item = TripItem::new("t1", "Socks");
        item.notes = Some("wool ones".to_string());
        remote
            .upsert("trip_items", rows::entity_to_row(&item).unwrap())
            .await
            .unwrap();

        crate::db::EntityStore::<TripItem>::new(
            pipeline.db.clone(),
        )
        .save(&item)
        .unwrap();
        tracker.track_packed_status(&item.id, true, "u1").unwrap();

        pipeline
            .push_pending(&remote, &FixedSession::new("u1"), TIMEOUT, &HashSet::new())
            .await
            .unwrap();

        let row = remote.row("trip_items", &item.id).unwrap();
        assert_eq!(row["packed"], true);
        // Untouched column survives the patch
        assert_eq!(row["notes"], "wool ones");
    }

    #[tokio::test]
    async fn delete_is_soft_remotely() {
        let (pipeline, tracker, _log, remote) = setup();
        let mut item = TripItem::new("t1", "Socks");
        remote
            .upsert("trip_items", rows::entity_to_row(&item).unwrap())
            .await
            .unwrap();
        crate::db::EntityStore::<TripItem>::new(pipeline.db.clone())
            .save(&item)
            .unwrap();

        let before = item.clone();
        tracker
            .track(ChangeOperation::Delete, Some(&before), &mut item, "u1")
            .unwrap();
        pipeline
            .push_pending(&remote, &FixedSession::new("u1"), TIMEOUT, &HashSet::new())
            .await
            .unwrap();

        let row = remote.row("trip_items", &item.id).unwrap();
        assert_eq!(row["is_deleted"], true);
        assert_eq!(row["name"], "Socks"); // row still there
    }

    #[tokio::test]
    async fn rule_pack_changes_never_touch_the_network() {
        let (pipeline, tracker, log, remote) = setup();
        let mut pack = RulePack::new("u1", "Beach basics");
        tracker
            .track(ChangeOperation::Create, None, &mut pack, "u1")
            .unwrap();

        let report = pipeline
            .push_pending(&remote, &FixedSession::new("u1"), TIMEOUT, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(report.local_only, 1);
        assert_eq!(report.pushed, 0);
        assert!(remote.is_empty(EntityType::RulePack.table()));
        assert_eq!(log.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_stops_drain_and_keeps_changes_pending() {
        let (pipeline, tracker, log, remote) = setup();
        let mut a = TripItem::new("t1", "Socks");
        let mut b = TripItem::new("t1", "Boots");
        tracker
            .track(ChangeOperation::Create, None, &mut a, "u1")
            .unwrap();
        tracker
            .track(ChangeOperation::Create, None, &mut b, "u1")
            .unwrap();

        remote.fail_table("trip_items", true);
        let report = pipeline
            .push_pending(&remote, &FixedSession::new("u1"), TIMEOUT, &HashSet::new())
            .await
            .unwrap();
        assert!(report.error.is_some());
        assert_eq!(report.pushed, 0);
        assert_eq!(log.pending_count().unwrap(), 2);

        // Retried successfully on the next pass
        remote.fail_table("trip_items", false);
        let report = pipeline
            .push_pending(&remote, &FixedSession::new("u1"), TIMEOUT, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(report.pushed, 2);
        assert_eq!(log.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn policy_rejection_keeps_change_pending() {
        let (pipeline, tracker, log, remote) = setup();
        let mut item = TripItem::new("t1", "Socks");
        tracker
            .track(ChangeOperation::Create, None, &mut item, "u1")
            .unwrap();

        remote.set_reject_writes(true);
        let report = pipeline
            .push_pending(&remote, &FixedSession::new("u1"), TIMEOUT, &HashSet::new())
            .await
            .unwrap();
        assert!(report.error.as_ref().unwrap().is_policy_rejection());
        assert_eq!(log.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn conflicted_entities_are_not_pushed_past_their_conflict() {
        let (pipeline, tracker, log, remote) = setup();
        let mut conflicted_item = TripItem::new("t1", "Socks");
        let mut clean_item = TripItem::new("t1", "Boots");
        tracker
            .track(ChangeOperation::Create, None, &mut conflicted_item, "u1")
            .unwrap();
        tracker
            .track(ChangeOperation::Create, None, &mut clean_item, "u1")
            .unwrap();

        let mut conflicted = HashSet::new();
        conflicted.insert((EntityType::Item, conflicted_item.id.clone()));
        let report = pipeline
            .push_pending(&remote, &FixedSession::new("u1"), TIMEOUT, &conflicted)
            .await
            .unwrap();

        // Only the unconflicted entity went out
        assert_eq!(report.deferred, 1);
        assert_eq!(report.pushed, 1);
        assert!(report.error.is_none());
        assert!(remote.row("trip_items", &conflicted_item.id).is_none());
        assert!(remote.row("trip_items", &clean_item.id).is_some());
        assert_eq!(log.pending_count().unwrap(), 1);

        // Once the conflict is gone the change drains normally
        let report = pipeline
            .push_pending(&remote, &FixedSession::new("u1"), TIMEOUT, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(log.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn unverified_session_defers_everything() {
        struct NoSession;
        impl SessionProvider for NoSession {
            fn user_id(&self) -> Option<String> {
                None
            }
            async fn verify_session(&self) -> crate::error::Result<bool> {
                Ok(false)
            }
        }

        let (pipeline, tracker, log, remote) = setup();
        let mut item = TripItem::new("t1", "Socks");
        tracker
            .track(ChangeOperation::Create, None, &mut item, "u1")
            .unwrap();

        let report = pipeline
            .push_pending(&remote, &NoSession, TIMEOUT, &HashSet::new())
            .await
            .unwrap();
        assert!(!report.session_verified);
        assert_eq!(log.pending_count().unwrap(), 1);
        assert!(remote.is_empty("trip_items"));
    }

    #[tokio::test]
    async fn stalled_session_check_times_out_as_cannot_push() {
        struct StalledSession;
        impl SessionProvider for StalledSession {
            fn user_id(&self) -> Option<String> {
                Some("u1".to_string())
            }
            async fn verify_session(&self) -> crate::error::Result<bool> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(true)
            }
        }

        let (pipeline, tracker, log, remote) = setup();
        let mut item = TripItem::new("t1", "Socks");
        tracker
            .track(ChangeOperation::Create, None, &mut item, "u1")
            .unwrap();

        tokio::time::pause();
        let report = pipeline
            .push_pending(&remote, &StalledSession, Duration::from_millis(100), &HashSet::new())
            .await
            .unwrap();
        assert!(!report.session_verified);
        assert_eq!(log.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn idempotent_repush_leaves_row_identical() {
        let (pipeline, tracker, log, remote) = setup();
        let mut item = TripItem::new("t1", "Socks");
        let change = tracker
            .track(ChangeOperation::Create, None, &mut item, "u1")
            .unwrap();
        pipeline
            .push_pending(&remote, &FixedSession::new("u1"), TIMEOUT, &HashSet::new())
            .await
            .unwrap();
        let row_after_first = remote.row("trip_items", &item.id).unwrap();

        // Simulate a crash between remote apply and mark_synced: the same
        // change is replayed on the next cycle.
        pipeline.db.with_conn(|conn| {
            conn.execute(
                "UPDATE pending_changes SET synced = 0 WHERE id = ?1",
                rusqlite::params![change.id],
            )?;
            Ok(())
        })
        .unwrap();
        pipeline
            .push_pending(&remote, &FixedSession::new("u1"), TIMEOUT, &HashSet::new())
            .await
            .unwrap();

        let row_after_second = remote.row("trip_items", &item.id).unwrap();
        assert_eq!(row_after_first, row_after_second);
        assert_eq!(row_after_second["version"], item.version());
        assert_eq!(log.pending_count().unwrap(), 0);
    }
}
