//! Snapshot Manager (spec §4.6).
//!
//! Thin orchestration over `Catalog`'s snapshot operations, adding the
//! retention-policy union the Catalog itself has no opinion about.
//! Grounded in the teacher's `src/backup/prune.rs` `PruneOptions`/
//! `compute_prune_info` shape (keep-last and keep-newer-than unioned
//! into one retained set) adapted from backup groups to Chantal's flat
//! per-repository snapshot list.

use chrono::{Duration as ChronoDuration, Utc};

use crate::catalog::{Catalog, SnapshotRow};
use crate::error::{ChantalError, Result};

#[derive(Debug, Clone, Default)]
pub struct PruneOptions {
    pub keep_last: Option<u64>,
    pub keep_newer_than_days: Option<u64>,
}

pub struct SnapshotManager<'a> {
    catalog: &'a mut Catalog,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(catalog: &'a mut Catalog) -> Self {
        Self { catalog }
    }

    pub fn create(&mut self, repository_id: i64, name: &str) -> Result<SnapshotRow> {
        self.catalog.create_snapshot(repository_id, name)
    }

    pub fn list(&self, repository_id: Option<i64>) -> Result<Vec<SnapshotRow>> {
        self.catalog.list_snapshots(repository_id)
    }

    pub fn delete(&self, snapshot_id: i64) -> Result<()> {
        self.catalog.delete_snapshot(snapshot_id)
    }

    /// Compute the union of `keep_last_N` and `keep_newer_than(days)`
    /// over a repository's snapshots (spec §4.6 Prune), then delete
    /// everything outside the union. Snapshots that are published are
    /// left alone even if the policy would otherwise drop them;
    /// `delete_snapshot` enforces that and the caller should unpublish
    /// first if pruning must include them.
    pub fn prune(&mut self, repository_id: i64, policy: &PruneOptions) -> Result<Vec<i64>> {
        let mut snapshots = self.catalog.list_snapshots(Some(repository_id))?;
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut retained: std::collections::HashSet<i64> = std::collections::HashSet::new();

        if let Some(n) = policy.keep_last {
            for snap in snapshots.iter().take(n as usize) {
                retained.insert(snap.id);
            }
        }
        if let Some(days) = policy.keep_newer_than_days {
            let cutoff = Utc::now() - ChronoDuration::days(days as i64);
            for snap in snapshots.iter().filter(|s| s.created_at >= cutoff) {
                retained.insert(snap.id);
            }
        }
        // No policy configured at all keeps everything.
        if policy.keep_last.is_none() && policy.keep_newer_than_days.is_none() {
            return Ok(Vec::new());
        }

        let mut deleted = Vec::new();
        for snap in &snapshots {
            if retained.contains(&snap.id) {
                continue;
            }
            match self.catalog.delete_snapshot(snap.id) {
                Ok(()) => deleted.push(snap.id),
                Err(ChantalError::StillReferenced { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(deleted)
    }
}
