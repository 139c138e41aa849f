//! Catalog (spec §4.2): relational store of repositories, packages,
//! snapshots, views, and sync history, backed by `rusqlite`.
//!
//! The teacher's retrieved files carry no SQL layer to imitate directly
//! (see DESIGN.md); the closest pack precedent for "prepared statements
//! behind a thin repository layer" is `josongsong-semantica-codegraph`'s
//! embedded-SQLite storage package, per spec §9's explicit preference
//! for this shape over an ORM. Migrations are a numbered list of DDL
//! statements gated by `PRAGMA user_version`, the idiomatic rusqlite
//! pattern.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{ChantalError, Result};
use crate::family::{Family, FamilyMeta};
use crate::view::{ConflictPolicy, MemberRef};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE repositories (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        family TEXT NOT NULL,
        url TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        last_sync_at TEXT,
        last_sync_status TEXT,
        index_etag TEXT,
        index_last_modified TEXT,
        index_sha256 TEXT
    );

    CREATE TABLE packages (
        id INTEGER PRIMARY KEY,
        sha256 TEXT NOT NULL UNIQUE,
        size INTEGER NOT NULL,
        filename TEXT NOT NULL,
        repository_id INTEGER NOT NULL REFERENCES repositories(id),
        family TEXT NOT NULL,
        family_identity TEXT NOT NULL,
        family_metadata TEXT NOT NULL,
        is_live INTEGER NOT NULL DEFAULT 1,
        first_seen_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL
    );
    CREATE INDEX packages_repository_idx ON packages(repository_id);
    CREATE INDEX packages_sha256_idx ON packages(sha256);
    CREATE UNIQUE INDEX packages_identity_idx ON packages(repository_id, family_identity);

    CREATE TABLE snapshots (
        id INTEGER PRIMARY KEY,
        repository_id INTEGER NOT NULL REFERENCES repositories(id),
        name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        published_at TEXT,
        published_path TEXT,
        package_count INTEGER NOT NULL,
        total_size_bytes INTEGER NOT NULL,
        UNIQUE(repository_id, name)
    );

    CREATE TABLE snapshot_packages (
        snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
        package_id INTEGER NOT NULL REFERENCES packages(id),
        PRIMARY KEY (snapshot_id, package_id)
    );

    CREATE TABLE views (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        family TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        conflict_policy TEXT NOT NULL DEFAULT 'first-wins',
        is_published INTEGER NOT NULL DEFAULT 0,
        published_path TEXT
    );

    CREATE TABLE view_members (
        view_id INTEGER NOT NULL REFERENCES views(id),
        position INTEGER NOT NULL,
        kind TEXT NOT NULL,
        repository_id INTEGER REFERENCES repositories(id),
        snapshot_id INTEGER REFERENCES snapshots(id),
        PRIMARY KEY (view_id, position)
    );

    CREATE TABLE view_snapshots (
        id INTEGER PRIMARY KEY,
        view_id INTEGER NOT NULL REFERENCES views(id),
        created_at TEXT NOT NULL
    );

    CREATE TABLE view_snapshot_members (
        view_snapshot_id INTEGER NOT NULL REFERENCES view_snapshots(id),
        snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
        PRIMARY KEY (view_snapshot_id, snapshot_id)
    );

    CREATE TABLE sync_history (
        id INTEGER PRIMARY KEY,
        repository_id INTEGER NOT NULL REFERENCES repositories(id),
        started_at TEXT NOT NULL,
        finished_at TEXT,
        status TEXT NOT NULL,
        packages_added INTEGER NOT NULL DEFAULT 0,
        packages_removed INTEGER NOT NULL DEFAULT 0,
        bytes_downloaded INTEGER NOT NULL DEFAULT 0,
        error TEXT
    );

    CREATE TABLE repo_locks (
        repository_id INTEGER PRIMARY KEY REFERENCES repositories(id),
        locked_at TEXT NOT NULL,
        holder TEXT NOT NULL
    );
    "#,
];

pub struct Catalog {
    conn: Connection,
}

#[derive(Debug, Clone)]
pub struct NewPackage {
    pub sha256: [u8; 32],
    pub size: u64,
    pub filename: String,
    pub repository_id: i64,
    pub metadata: FamilyMeta,
}

#[derive(Debug, Clone)]
pub struct PackageRow {
    pub id: i64,
    pub sha256: [u8; 32],
    pub size: u64,
    pub filename: String,
    pub repository_id: i64,
    pub family: Family,
    pub family_identity: String,
    pub metadata: FamilyMeta,
    pub is_live: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ViewRow {
    pub id: i64,
    pub name: String,
    pub family: Family,
    pub conflict_policy: ConflictPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_published: bool,
    pub published_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ViewSnapshotRow {
    pub id: i64,
    pub view_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub id: i64,
    pub repository_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub published_path: Option<String>,
    pub package_count: i64,
    pub total_size_bytes: i64,
}

impl Catalog {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let mut catalog = Self { conn };
        catalog.migrate()?;
        Ok(catalog)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let mut catalog = Self { conn };
        catalog.migrate()?;
        Ok(catalog)
    }

    fn migrate(&mut self) -> Result<()> {
        let current: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        let tx = self.conn.transaction()?;
        for (idx, migration) in MIGRATIONS.iter().enumerate() {
            let version = (idx + 1) as i64;
            if version <= current {
                continue;
            }
            tx.execute_batch(migration)?;
        }
        tx.pragma_update(None, "user_version", MIGRATIONS.len() as i64)?;
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_repository(
        &self,
        name: &str,
        family: Family,
        url: &str,
        enabled: bool,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO repositories (name, family, url, enabled)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET family = excluded.family,
                 url = excluded.url, enabled = excluded.enabled",
            params![name, family.to_string(), url, enabled],
        )?;
        self.conn.query_row(
            "SELECT id FROM repositories WHERE name = ?1",
            params![name],
            |row| row.get(0),
        ).map_err(ChantalError::from)
    }

    /// Insert or refresh a package row, keyed on family-native identity
    /// within the repository (spec §4.5 step 3's diff key).
    pub fn upsert_package(&self, repository_id: i64, pkg: &NewPackage) -> Result<i64> {
        let now = Utc::now();
        let sha256_hex = crate::tools::digest_to_hex(&pkg.sha256);
        let family = pkg.metadata.family();
        let identity = pkg.metadata.identity();
        let metadata_json = serde_json::to_string(&pkg.metadata)
            .map_err(|err| ChantalError::Parse(err.to_string()))?;

        self.conn.execute(
            "INSERT INTO packages
                (sha256, size, filename, repository_id, family, family_identity,
                 family_metadata, is_live, first_seen_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)
             ON CONFLICT(repository_id, family_identity) DO UPDATE SET
                 sha256 = excluded.sha256,
                 size = excluded.size,
                 filename = excluded.filename,
                 family_metadata = excluded.family_metadata,
                 is_live = 1,
                 last_seen_at = excluded.last_seen_at",
            params![
                sha256_hex,
                pkg.size as i64,
                pkg.filename,
                repository_id,
                family.to_string(),
                identity,
                metadata_json,
                now.to_rfc3339(),
            ],
        )?;

        self.conn
            .query_row(
                "SELECT id FROM packages WHERE repository_id = ?1 AND family_identity = ?2",
                params![repository_id, identity],
                |row| row.get(0),
            )
            .map_err(ChantalError::from)
    }

    /// Mark a package absent from the latest parsed live set as no
    /// longer live, without deleting its row (spec §4.5 step 5).
    pub fn mark_not_live(&self, package_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE packages SET is_live = 0 WHERE id = ?1",
            params![package_id],
        )?;
        Ok(())
    }

    pub fn touch_last_seen(&self, package_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE packages SET last_seen_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), package_id],
        )?;
        Ok(())
    }

    pub fn list_live_packages(&self, repository_id: i64) -> Result<Vec<PackageRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, sha256, size, filename, repository_id, family, family_identity,
                    family_metadata, is_live, first_seen_at, last_seen_at
             FROM packages WHERE repository_id = ?1 AND is_live = 1",
        )?;
        let rows = stmt
            .query_map(params![repository_id], row_to_package)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_snapshot_packages(&self, snapshot_id: i64) -> Result<Vec<PackageRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.sha256, p.size, p.filename, p.repository_id, p.family,
                    p.family_identity, p.family_metadata, p.is_live, p.first_seen_at,
                    p.last_seen_at
             FROM packages p
             JOIN snapshot_packages sp ON sp.package_id = p.id
             WHERE sp.snapshot_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![snapshot_id], row_to_package)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn reference_count(&self, sha256: &[u8; 32]) -> Result<i64> {
        let hex = crate::tools::digest_to_hex(sha256);
        self.conn
            .query_row(
                "SELECT
                    (SELECT COUNT(*) FROM packages WHERE sha256 = ?1 AND is_live = 1) +
                    (SELECT COUNT(*) FROM snapshot_packages sp
                        JOIN packages p ON p.id = sp.package_id WHERE p.sha256 = ?1)",
                params![hex],
                |row| row.get(0),
            )
            .map_err(ChantalError::from)
    }

    /// Digests referenced by no live repository package and no
    /// snapshot (spec §4.2 `list_orphan_blobs`) — the complement is the
    /// GC live set.
    pub fn list_orphan_blobs(&self) -> Result<Vec<[u8; 32]>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT sha256 FROM packages p
             WHERE is_live = 0
               AND NOT EXISTS (
                   SELECT 1 FROM snapshot_packages sp WHERE sp.package_id = p.id
               )
               AND NOT EXISTS (
                   SELECT 1 FROM packages p2 WHERE p2.sha256 = p.sha256 AND p2.is_live = 1
               )",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let hex: String = row.get(0)?;
                Ok(hex)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|hex| crate::tools::hex_to_digest(&hex))
            .collect())
    }

    /// Every digest still referenced by a live package or a snapshot —
    /// the GC "mark" set (spec §4.1 GarbageCollect).
    pub fn live_blob_set(&self) -> Result<HashSet<[u8; 32]>> {
        let mut stmt = self.conn.prepare(
            "SELECT sha256 FROM packages WHERE is_live = 1
             UNION
             SELECT p.sha256 FROM packages p
             JOIN snapshot_packages sp ON sp.package_id = p.id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let hex: String = row.get(0)?;
                Ok(hex)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|hex| crate::tools::hex_to_digest(&hex))
            .collect())
    }

    /// Freeze a repository's current live set into a new Snapshot row
    /// (spec §4.2's canonical one-transaction example: insert snapshot,
    /// write frozen membership, compute aggregates).
    pub fn create_snapshot(&mut self, repository_id: i64, name: &str) -> Result<SnapshotRow> {
        let tx = self.conn.transaction()?;
        let now = Utc::now();

        let package_ids: Vec<(i64, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT id, size FROM packages WHERE repository_id = ?1 AND is_live = 1",
            )?;
            stmt.query_map(params![repository_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
        };

        let package_count = package_ids.len() as i64;
        let total_size_bytes: i64 = package_ids.iter().map(|(_, size)| size).sum();

        tx.execute(
            "INSERT INTO snapshots
                (repository_id, name, created_at, package_count, total_size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                repository_id,
                name,
                now.to_rfc3339(),
                package_count,
                total_size_bytes
            ],
        )?;
        let snapshot_id = tx.last_insert_rowid();

        for (package_id, _) in &package_ids {
            tx.execute(
                "INSERT INTO snapshot_packages (snapshot_id, package_id) VALUES (?1, ?2)",
                params![snapshot_id, package_id],
            )?;
        }

        tx.commit()?;

        Ok(SnapshotRow {
            id: snapshot_id,
            repository_id,
            name: name.to_string(),
            created_at: now,
            published_at: None,
            published_path: None,
            package_count,
            total_size_bytes,
        })
    }

    pub fn list_snapshots(&self, repository_id: Option<i64>) -> Result<Vec<SnapshotRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, repository_id, name, created_at, published_at, published_path,
                    package_count, total_size_bytes
             FROM snapshots WHERE (?1 IS NULL OR repository_id = ?1)
             ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![repository_id], row_to_snapshot)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a Snapshot row. The spec requires this to fail if the
    /// snapshot is published; blob removal is GC's job, never the
    /// Catalog's (spec §4.6 Delete).
    pub fn delete_snapshot(&self, snapshot_id: i64) -> Result<()> {
        let published: Option<String> = self
            .conn
            .query_row(
                "SELECT published_path FROM snapshots WHERE id = ?1",
                params![snapshot_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        if published.is_some() {
            return Err(ChantalError::StillReferenced {
                what: format!("snapshot {} is published", snapshot_id),
            });
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM snapshot_packages WHERE snapshot_id = ?1",
            params![snapshot_id],
        )?;
        let affected = tx.execute(
            "DELETE FROM snapshots WHERE id = ?1",
            params![snapshot_id],
        )?;
        tx.commit()?;
        if affected == 0 {
            return Err(ChantalError::NotFound(format!("snapshot {}", snapshot_id)));
        }
        Ok(())
    }

    pub fn mark_snapshot_published(&self, snapshot_id: i64, path: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE snapshots SET published_at = ?1, published_path = ?2 WHERE id = ?3",
            params![Utc::now().to_rfc3339(), path, snapshot_id],
        )?;
        Ok(())
    }

    pub fn record_sync_start(&self, repository_id: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sync_history (repository_id, started_at, status)
             VALUES (?1, ?2, 'running')",
            params![repository_id, Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn record_sync_finish(
        &self,
        sync_id: i64,
        status: &str,
        packages_added: u64,
        packages_removed: u64,
        bytes_downloaded: u64,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_history SET finished_at = ?1, status = ?2, packages_added = ?3,
                 packages_removed = ?4, bytes_downloaded = ?5, error = ?6
             WHERE id = ?7",
            params![
                Utc::now().to_rfc3339(),
                status,
                packages_added as i64,
                packages_removed as i64,
                bytes_downloaded as i64,
                error,
                sync_id,
            ],
        )?;
        Ok(())
    }

    pub fn stored_index_digest(&self, repository_id: i64) -> Result<(Option<String>, Option<String>, Option<String>)> {
        self.conn
            .query_row(
                "SELECT index_etag, index_last_modified, index_sha256
                 FROM repositories WHERE id = ?1",
                params![repository_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(ChantalError::from)
    }

    pub fn update_index_digest(
        &self,
        repository_id: i64,
        etag: Option<&str>,
        last_modified: Option<&str>,
        sha256_hex: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE repositories SET index_etag = ?1, index_last_modified = ?2,
                 index_sha256 = ?3, last_sync_at = ?4 WHERE id = ?5",
            params![etag, last_modified, sha256_hex, Utc::now().to_rfc3339(), repository_id],
        )?;
        Ok(())
    }

    /// Per-repository advisory lock (spec §4.5 "serialised by a
    /// per-repository advisory lock"). Returns `Conflict` if already
    /// held.
    pub fn acquire_repo_lock(&self, repository_id: i64, holder: &str) -> Result<()> {
        let result = self.conn.execute(
            "INSERT INTO repo_locks (repository_id, locked_at, holder) VALUES (?1, ?2, ?3)",
            params![repository_id, Utc::now().to_rfc3339(), holder],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(ChantalError::Conflict {
                    path: format!("repository {} sync lock", repository_id),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn release_repo_lock(&self, repository_id: i64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM repo_locks WHERE repository_id = ?1",
            params![repository_id],
        )?;
        Ok(())
    }

    /// Create a named View (spec §4.7, §2's "Views are mutable (created
    /// by config/admin, updated by sync)"). Members are set separately
    /// via `set_view_members` so callers can create-then-populate.
    pub fn create_view(&self, name: &str, family: Family, policy: ConflictPolicy) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO views (name, family, created_at, updated_at, conflict_policy)
             VALUES (?1, ?2, ?3, ?3, ?4)",
            params![name, family.to_string(), now, policy_to_str(policy)],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_view(&self, name: &str) -> Result<Option<ViewRow>> {
        self.conn
            .query_row(
                "SELECT id, name, family, conflict_policy, created_at, updated_at,
                        is_published, published_path
                 FROM views WHERE name = ?1",
                params![name],
                row_to_view,
            )
            .optional()
            .map_err(ChantalError::from)
    }

    fn view_by_id(&self, view_id: i64) -> Result<ViewRow> {
        self.conn
            .query_row(
                "SELECT id, name, family, conflict_policy, created_at, updated_at,
                        is_published, published_path
                 FROM views WHERE id = ?1",
                params![view_id],
                row_to_view,
            )
            .map_err(ChantalError::from)
    }

    pub fn list_views(&self) -> Result<Vec<ViewRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, family, conflict_policy, created_at, updated_at,
                    is_published, published_path
             FROM views ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], row_to_view)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Replace a View's ordered member list (spec §4.7's `(kind, id)`
    /// pairs) in one transaction.
    pub fn set_view_members(&mut self, view_id: i64, members: &[MemberRef]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM view_members WHERE view_id = ?1",
            params![view_id],
        )?;
        for (position, member) in members.iter().enumerate() {
            let (kind, repository_id, snapshot_id) = match member {
                MemberRef::Repository(id) => ("repository", Some(*id), None),
                MemberRef::Snapshot(id) => ("snapshot", None, Some(*id)),
            };
            tx.execute(
                "INSERT INTO view_members (view_id, position, kind, repository_id, snapshot_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![view_id, position as i64, kind, repository_id, snapshot_id],
            )?;
        }
        tx.execute(
            "UPDATE views SET updated_at = ?1 WHERE id = ?2",
            params![now, view_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_view_members(&self, view_id: i64) -> Result<Vec<MemberRef>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, repository_id, snapshot_id FROM view_members
             WHERE view_id = ?1 ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![view_id], |row| {
                let kind: String = row.get(0)?;
                let repository_id: Option<i64> = row.get(1)?;
                let snapshot_id: Option<i64> = row.get(2)?;
                Ok(if kind == "repository" {
                    MemberRef::Repository(repository_id.unwrap_or_default())
                } else {
                    MemberRef::Snapshot(snapshot_id.unwrap_or_default())
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_view_published(&self, view_id: i64, path: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE views SET is_published = 1, published_path = ?1, updated_at = ?2
             WHERE id = ?3",
            params![path, Utc::now().to_rfc3339(), view_id],
        )?;
        Ok(())
    }

    /// Resolve a View's current members into a deduplicated package
    /// list (spec §4.7's on-materialisation union).
    pub fn compose_view(&self, view_id: i64) -> Result<Vec<PackageRow>> {
        let view = self.view_by_id(view_id)?;
        let members = self.list_view_members(view_id)?;
        crate::view::ViewComposer::new(self).compose(&members, view.family, view.conflict_policy)
    }

    /// Freeze a View's current member resolution into a ViewSnapshot
    /// (spec §4.7 "ViewSnapshot freezes the current member-snapshot
    /// ids"). A `Snapshot` member is recorded as-is; a `Repository`
    /// member is first frozen into an implicit Snapshot of its current
    /// live set, so every frozen member is a concrete, immutable
    /// snapshot id regardless of how the View referenced it.
    pub fn create_view_snapshot(&mut self, view_id: i64) -> Result<ViewSnapshotRow> {
        let members = self.list_view_members(view_id)?;
        let mut snapshot_ids = Vec::with_capacity(members.len());
        for member in &members {
            let snapshot_id = match member {
                MemberRef::Snapshot(id) => *id,
                MemberRef::Repository(repository_id) => {
                    let name = format!(
                        "__view-{}-member-{}-{}",
                        view_id,
                        repository_id,
                        Utc::now().timestamp_nanos_opt().unwrap_or_default()
                    );
                    self.create_snapshot(*repository_id, &name)?.id
                }
            };
            snapshot_ids.push(snapshot_id);
        }

        let now = Utc::now();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO view_snapshots (view_id, created_at) VALUES (?1, ?2)",
            params![view_id, now.to_rfc3339()],
        )?;
        let view_snapshot_id = tx.last_insert_rowid();
        for snapshot_id in &snapshot_ids {
            tx.execute(
                "INSERT INTO view_snapshot_members (view_snapshot_id, snapshot_id)
                 VALUES (?1, ?2)",
                params![view_snapshot_id, snapshot_id],
            )?;
        }
        tx.commit()?;

        Ok(ViewSnapshotRow {
            id: view_snapshot_id,
            view_id,
            created_at: now,
        })
    }

    pub fn list_view_snapshot_members(&self, view_snapshot_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT snapshot_id FROM view_snapshot_members WHERE view_snapshot_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![view_snapshot_id], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Resolve a frozen ViewSnapshot's members, composed with the
    /// parent View's conflict policy — the immutable counterpart of
    /// `compose_view` (spec §4.7 "ViewSnapshot... plus the resolved
    /// package set").
    pub fn compose_view_snapshot(&self, view_snapshot_id: i64) -> Result<Vec<PackageRow>> {
        let view_id: i64 = self.conn.query_row(
            "SELECT view_id FROM view_snapshots WHERE id = ?1",
            params![view_snapshot_id],
            |row| row.get(0),
        )?;
        let view = self.view_by_id(view_id)?;
        let members: Vec<MemberRef> = self
            .list_view_snapshot_members(view_snapshot_id)?
            .into_iter()
            .map(MemberRef::Snapshot)
            .collect();
        crate::view::ViewComposer::new(self).compose(&members, view.family, view.conflict_policy)
    }
}

fn row_to_package(row: &rusqlite::Row) -> rusqlite::Result<PackageRow> {
    let sha256_hex: String = row.get(1)?;
    let family_str: String = row.get(5)?;
    let metadata_json: String = row.get(7)?;
    let first_seen_at: String = row.get(9)?;
    let last_seen_at: String = row.get(10)?;

    Ok(PackageRow {
        id: row.get(0)?,
        sha256: crate::tools::hex_to_digest(&sha256_hex).unwrap_or([0u8; 32]),
        size: row.get::<_, i64>(2)? as u64,
        filename: row.get(3)?,
        repository_id: row.get(4)?,
        family: parse_family(&family_str),
        family_identity: row.get(6)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_else(|_| {
            FamilyMeta::Rpm(crate::family::rpm::RpmMetadata {
                name: String::new(),
                version: String::new(),
                release: String::new(),
                arch: String::new(),
                epoch: None,
                summary: None,
                description: None,
                provides: Vec::new(),
                requires: Vec::new(),
                conflicts: Vec::new(),
                obsoletes: Vec::new(),
                nevra: String::new(),
                overflow: serde_json::Map::new(),
            })
        }),
        is_live: row.get::<_, i64>(8)? != 0,
        first_seen_at: first_seen_at.parse().unwrap_or_else(|_| Utc::now()),
        last_seen_at: last_seen_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<SnapshotRow> {
    let created_at: String = row.get(3)?;
    let published_at: Option<String> = row.get(4)?;
    Ok(SnapshotRow {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        name: row.get(2)?,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        published_at: published_at.and_then(|s| s.parse().ok()),
        published_path: row.get(5)?,
        package_count: row.get(6)?,
        total_size_bytes: row.get(7)?,
    })
}

fn parse_family(s: &str) -> Family {
    match s {
        "deb" => Family::Deb,
        "apk" => Family::Apk,
        "helm" => Family::Helm,
        _ => Family::Rpm,
    }
}

fn policy_to_str(policy: ConflictPolicy) -> &'static str {
    match policy {
        ConflictPolicy::FirstWins => "first-wins",
        ConflictPolicy::LastWins => "last-wins",
        ConflictPolicy::Fail => "fail",
    }
}

fn str_to_policy(s: &str) -> ConflictPolicy {
    match s {
        "last-wins" => ConflictPolicy::LastWins,
        "fail" => ConflictPolicy::Fail,
        _ => ConflictPolicy::FirstWins,
    }
}

fn row_to_view(row: &rusqlite::Row) -> rusqlite::Result<ViewRow> {
    let family_str: String = row.get(2)?;
    let policy_str: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(ViewRow {
        id: row.get(0)?,
        name: row.get(1)?,
        family: parse_family(&family_str),
        conflict_policy: str_to_policy(&policy_str),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
        is_published: row.get::<_, i64>(6)? != 0,
        published_path: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::helm::HelmMetadata;

    fn sample_metadata(name: &str, version: &str) -> FamilyMeta {
        FamilyMeta::Helm(HelmMetadata {
            name: name.to_string(),
            version: version.to_string(),
            app_version: None,
            description: None,
            home: None,
            icon: None,
            keywords: Vec::new(),
            sources: Vec::new(),
            maintainers: Vec::new(),
            dependencies: Vec::new(),
            created: None,
            digest: None,
            urls: Vec::new(),
            api_version: None,
            chart_type: None,
            deprecated: None,
            annotations: Default::default(),
            kube_version: None,
            overflow: serde_json::Map::new(),
        })
    }

    #[test]
    fn upsert_package_is_keyed_on_identity() {
        let catalog = Catalog::open_in_memory().unwrap();
        let repo_id = catalog
            .upsert_repository("charts", Family::Helm, "https://example.org", true)
            .unwrap();

        let pkg = NewPackage {
            sha256: [1u8; 32],
            size: 10,
            filename: "nginx-15.0.0.tgz".into(),
            repository_id: repo_id,
            metadata: sample_metadata("nginx", "15.0.0"),
        };
        let id1 = catalog.upsert_package(repo_id, &pkg).unwrap();

        let pkg_updated = NewPackage {
            sha256: [2u8; 32],
            ..pkg
        };
        let id2 = catalog.upsert_package(repo_id, &pkg_updated).unwrap();

        assert_eq!(id1, id2);
        let live = catalog.list_live_packages(repo_id).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].sha256, [2u8; 32]);
    }

    #[test]
    fn create_snapshot_freezes_live_set() {
        let mut catalog = Catalog::open_in_memory().unwrap();
        let repo_id = catalog
            .upsert_repository("charts", Family::Helm, "https://example.org", true)
            .unwrap();
        let pkg = NewPackage {
            sha256: [3u8; 32],
            size: 20,
            filename: "nginx-15.0.0.tgz".into(),
            repository_id: repo_id,
            metadata: sample_metadata("nginx", "15.0.0"),
        };
        catalog.upsert_package(repo_id, &pkg).unwrap();

        let snapshot = catalog.create_snapshot(repo_id, "v1").unwrap();
        assert_eq!(snapshot.package_count, 1);
        assert_eq!(snapshot.total_size_bytes, 20);

        let members = catalog.list_snapshot_packages(snapshot.id).unwrap();
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn delete_snapshot_fails_when_published() {
        let mut catalog = Catalog::open_in_memory().unwrap();
        let repo_id = catalog
            .upsert_repository("charts", Family::Helm, "https://example.org", true)
            .unwrap();
        let snapshot = catalog.create_snapshot(repo_id, "v1").unwrap();
        catalog.mark_snapshot_published(snapshot.id, "/out/v1").unwrap();

        let err = catalog.delete_snapshot(snapshot.id).unwrap_err();
        assert!(matches!(err, ChantalError::StillReferenced { .. }));
    }

    #[test]
    fn repo_lock_rejects_double_acquire() {
        let catalog = Catalog::open_in_memory().unwrap();
        let repo_id = catalog
            .upsert_repository("charts", Family::Helm, "https://example.org", true)
            .unwrap();
        catalog.acquire_repo_lock(repo_id, "sync-1").unwrap();
        let err = catalog.acquire_repo_lock(repo_id, "sync-2").unwrap_err();
        assert!(matches!(err, ChantalError::Conflict { .. }));
        catalog.release_repo_lock(repo_id).unwrap();
        catalog.acquire_repo_lock(repo_id, "sync-2").unwrap();
    }

    /// Spec §8 S6: a View composing two snapshots with `first-wins`
    /// resolves to only the earlier member's version of a conflicting
    /// identity, and freezing it into a ViewSnapshot preserves that
    /// resolution independent of later catalog changes.
    #[test]
    fn view_first_wins_across_two_snapshots_and_survives_freeze() {
        let mut catalog = Catalog::open_in_memory().unwrap();
        let repo_id = catalog
            .upsert_repository("charts", Family::Helm, "https://example.org", true)
            .unwrap();

        catalog
            .upsert_package(
                repo_id,
                &NewPackage {
                    sha256: [1u8; 32],
                    size: 10,
                    filename: "nginx-1.20.tgz".into(),
                    repository_id: repo_id,
                    metadata: sample_metadata("nginx", "1.20"),
                },
            )
            .unwrap();
        let snapshot_a = catalog.create_snapshot(repo_id, "a").unwrap();

        catalog.mark_not_live(
            catalog.list_live_packages(repo_id).unwrap()[0].id,
        ).unwrap();
        catalog
            .upsert_package(
                repo_id,
                &NewPackage {
                    sha256: [2u8; 32],
                    size: 10,
                    filename: "nginx-1.21.tgz".into(),
                    repository_id: repo_id,
                    metadata: sample_metadata("nginx", "1.21"),
                },
            )
            .unwrap();
        let snapshot_b = catalog.create_snapshot(repo_id, "b").unwrap();

        let view_id = catalog
            .create_view("combined", Family::Helm, ConflictPolicy::FirstWins)
            .unwrap();
        catalog
            .set_view_members(
                view_id,
                &[MemberRef::Snapshot(snapshot_a.id), MemberRef::Snapshot(snapshot_b.id)],
            )
            .unwrap();

        let resolved = catalog.compose_view(view_id).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].filename, "nginx-1.20.tgz");

        let view_snapshot = catalog.create_view_snapshot(view_id).unwrap();
        let frozen_members = catalog.list_view_snapshot_members(view_snapshot.id).unwrap();
        assert_eq!(frozen_members, vec![snapshot_a.id, snapshot_b.id]);

        let frozen = catalog.compose_view_snapshot(view_snapshot.id).unwrap();
        assert_eq!(frozen.len(), 1);
        assert_eq!(frozen[0].filename, "nginx-1.20.tgz");
    }
}
