//! Bounded run history attached to a registration.
//!
//! The history is a FIFO of at most [`HISTORY_CAPACITY`] records, oldest
//! first. Updates are read-modify-write against the store: the registration
//! is re-fetched after the run completes (never the copy held before
//! submission) and written back guarded by its resource version. A version
//! conflict surfaces as [`PacError::LedgerConflict`]; nothing here retries.

use tracing::{info, warn};

use crate::{
    Namespace, PacError, Registration, RegistrationName, RegistrationStore, RunStatusRecord,
};

/// Number of run records kept per registration.
pub const HISTORY_CAPACITY: usize = 5;

/// Appends `record` to `history`, keeping at most `capacity` entries.
///
/// A record whose run name is already present replaces that entry in place,
/// so re-applying the same append is a no-op rather than a duplicate.
pub fn append_bounded(history: &mut Vec<RunStatusRecord>, record: RunStatusRecord, capacity: usize) {
    if let Some(existing) = history.iter_mut().find(|r| r.run_name == record.run_name) {
        *existing = record;
        return;
    }
    if capacity == 0 {
        history.clear();
        return;
    }
    if history.len() >= capacity {
        let excess = history.len() + 1 - capacity;
        history.drain(..excess);
    }
    history.push(record);
}

/// Re-fetches the registration, appends `record`, and persists it.
pub async fn record_run(
    store: &dyn RegistrationStore,
    namespace: &Namespace,
    name: &RegistrationName,
    record: RunStatusRecord,
    capacity: usize,
) -> Result<Registration, PacError> {
    let mut latest = store.get(namespace, name).await?;
    append_bounded(&mut latest.history, record, capacity);

    match store.update(&latest).await {
        Ok(updated) => {
            info!(
                registration = %updated.name,
                namespace = %updated.namespace,
                entries = updated.history.len(),
                "repository run history updated"
            );
            Ok(updated)
        }
        Err(err) => {
            if err.is_bookkeeping() {
                warn!(
                    category = "bookkeeping",
                    registration = %name,
                    namespace = %namespace,
                    "run history update lost to a concurrent change"
                );
            }
            Err(err)
        }
    }
}
