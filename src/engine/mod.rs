mod availability;
mod capacity;
mod conflict;
mod error;
mod mutations;
mod queries;
mod slots;
#[cfg(test)]
mod tests;

pub use availability::{covers, find_overlapping_pair, merge_overlapping, resolve_effective_slots};
pub use capacity::{apply_enrollment_delta, transition_enrollment};
pub use conflict::{session_end, timestamp_conflict, weekly_conflict, DEFAULT_DURATION_MINUTES};
pub use error::{Conflict, EngineError};
pub use queries::ScheduleItem;
pub use slots::BookableSlots;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::notify::{Notification, NotificationKind, NotifyHub};
use crate::observability::{CONFLICTS_TOTAL, OPERATIONS_TOTAL, OPERATION_DURATION_SECONDS};
use crate::store::{Entity, Record, Store};

/// The Scheduling & Capacity Engine.
///
/// Every mutating operation runs the same sequence: authorize the caller,
/// take the store's scope locks, re-read the records it decides on, run
/// the conflict checks, commit one unit of work, then notify counterparts.
/// Notification happens after the commit and cannot undo it.
pub struct Engine {
    store: Arc<dyn Store>,
    pub notify: Arc<NotifyHub>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, notify: Arc<NotifyHub>, config: EngineConfig) -> Self {
        Self { store, notify, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Typed lookup that fails with `NotFound`.
    pub(super) async fn fetch<E: Entity>(&self, id: Ulid) -> Result<E, EngineError> {
        self.fetch_opt(id).await?.ok_or(EngineError::NotFound {
            collection: E::COLLECTION,
            id,
        })
    }

    pub(super) async fn fetch_opt<E: Entity>(&self, id: Ulid) -> Result<Option<E>, EngineError> {
        Ok(self
            .store
            .find_by_id(E::COLLECTION, id)
            .await?
            .and_then(E::from_record))
    }

    /// All records of `E`'s collection matching `filter`, in id order.
    pub(super) async fn find_where<E, F>(&self, filter: F) -> Result<Vec<E>, EngineError>
    where
        E: Entity,
        F: Fn(&E) -> bool + Send + Sync,
    {
        let predicate = move |record: &Record| E::from_record_ref(record).is_some_and(&filter);
        let records = self.store.find(E::COLLECTION, &predicate).await?;
        Ok(records.into_iter().filter_map(E::from_record).collect())
    }

    /// Hand one notification per distinct recipient to the hub, skipping
    /// the user who caused it.
    pub(super) fn emit(
        &self,
        recipients: impl IntoIterator<Item = Ulid>,
        actor: Ulid,
        kind: NotificationKind,
    ) {
        let at = now();
        let mut seen = HashSet::new();
        for recipient in recipients {
            if recipient != actor && seen.insert(recipient) {
                self.notify.send(Notification {
                    recipient,
                    kind: kind.clone(),
                    at,
                });
            }
        }
    }
}

/// Local wall-clock time; the engine does no timezone handling.
pub(crate) fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub(crate) fn today() -> NaiveDate {
    now().date()
}

/// Run one engine operation under the RED metrics, logging rejections.
pub(super) async fn instrumented<T>(
    operation: &'static str,
    fut: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    let start = Instant::now();
    let result = fut.await;
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(start.elapsed().as_secs_f64());
    let status = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
    if let Err(e) = &result {
        if let Some(conflict) = e.conflict() {
            metrics::counter!(CONFLICTS_TOTAL, "reason" => conflict.reason()).increment(1);
        }
        tracing::debug!(operation, error = %e, "operation rejected");
    }
    result
}
