//! Sync Engine (spec §4.5).
//!
//! Per-repository fetch → parse → diff → download → commit → verify
//! pipeline. Grounded in the teacher's `src/client/pull.rs` (bounded
//! worker pool over `futures::stream::try_buffer_unordered`, retry
//! loop around each chunk download) adapted from pull-by-chunk to
//! pull-by-package. URL joining uses the `url` crate already in the
//! teacher's dependency tree rather than ad-hoc string concatenation,
//! since upstream indexes mix absolute and root-relative `href`s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use log::{info, warn};

use crate::catalog::{Catalog, NewPackage};
use crate::config::{AuthConfig, RepositoryConfig};
use crate::error::{ChantalError, Result};
use crate::family::{parser_for, FamilyMeta, PackageRecord};
use crate::store::ContentStore;
use crate::tools::gpg::VerifyKey;
use crate::tools::http::{ConditionalHeaders, FetchOutcome, HttpClient};

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub packages_added: u64,
    pub packages_removed: u64,
    pub bytes_downloaded: u64,
    pub packages_failed: u64,
    pub first_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Ok,
    Unchanged,
    Partial,
    Failed,
}

impl SyncStatus {
    fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Ok => "ok",
            SyncStatus::Unchanged => "unchanged",
            SyncStatus::Partial => "partial",
            SyncStatus::Failed => "failed",
        }
    }
}

pub struct SyncEngine {
    http: HttpClient,
}

impl SyncEngine {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: HttpClient::with_defaults()?,
        })
    }

    /// Run the full six-step algorithm of spec §4.5 for one repository.
    /// Acquires the repository's advisory lock for the duration of the
    /// sync and always releases it, even on error.
    pub async fn sync_repository(
        &self,
        catalog: &mut Catalog,
        store: &ContentStore,
        repository_id: i64,
        repo: &RepositoryConfig,
    ) -> Result<SyncReport> {
        catalog.acquire_repo_lock(repository_id, "sync")?;
        let result = self.sync_repository_locked(catalog, store, repository_id, repo).await;
        catalog.release_repo_lock(repository_id)?;
        result
    }

    async fn sync_repository_locked(
        &self,
        catalog: &mut Catalog,
        store: &ContentStore,
        repository_id: i64,
        repo: &RepositoryConfig,
    ) -> Result<SyncReport> {
        let sync_id = catalog.record_sync_start(repository_id)?;

        // Step 1: fetch index, honouring stored validators.
        let (stored_etag, stored_last_modified, _stored_sha256) =
            catalog.stored_index_digest(repository_id)?;
        let cond = ConditionalHeaders {
            etag: stored_etag,
            last_modified: stored_last_modified,
        };
        let index_url = join_url(&repo.url, root_index_path(repo))?;
        let outcome = self
            .http
            .fetch_conditional(&index_url, repo.auth.as_ref(), &cond)
            .await?;

        let (body, etag, last_modified) = match outcome {
            FetchOutcome::Unchanged => {
                info!("sync {}: index unchanged", repo.name);
                catalog.record_sync_finish(sync_id, "unchanged", 0, 0, 0, None)?;
                return Ok(SyncReport {
                    status: SyncStatus::Unchanged,
                    ..Default::default()
                });
            }
            FetchOutcome::Fetched {
                body,
                etag,
                last_modified,
            } => (body, etag, last_modified),
        };

        // Step 6 (signature verification happens before the commit in
        // step 5, but upstream signatures cover the index bytes we
        // already have, so verify as soon as they're available).
        if !repo.gpg_keys.is_empty() {
            self.verify_index_signature(repo, &body).await?;
        }

        // Step 2: parse.
        let http = &self.http;
        let index_base_url = repo.url.clone();
        let aux_auth = repo.auth.clone();
        let mut fetch_aux = |href: &str| -> Result<Vec<u8>> {
            let url = join_url(&index_base_url, href)?;
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current()
                    .block_on(http.fetch_bytes(&url, aux_auth.as_ref()))
            })
        };
        let parser = parser_for(repo.family);
        let (records, digest) = parser.parse_index(&body, &mut fetch_aux)?;

        // Step 3: diff against the catalog's live set, keyed on
        // family-native identity.
        let existing = catalog.list_live_packages(repository_id)?;
        let existing_by_identity: HashMap<String, i64> = existing
            .iter()
            .map(|row| (row.family_identity.clone(), row.id))
            .collect();
        let incoming_identities: std::collections::HashSet<String> = records
            .iter()
            .map(|r| r.metadata.identity())
            .collect();

        let to_remove: Vec<i64> = existing
            .iter()
            .filter(|row| !incoming_identities.contains(&row.family_identity))
            .map(|row| row.id)
            .collect();
        let unchanged: Vec<i64> = existing
            .iter()
            .filter(|row| incoming_identities.contains(&row.family_identity))
            .map(|row| row.id)
            .collect();
        let to_add: Vec<&PackageRecord> = records
            .iter()
            .filter(|r| !existing_by_identity.contains_key(&r.metadata.identity()))
            .collect();

        // Step 4: bounded-concurrency download with retry/backoff.
        let concurrency = repo.sync.concurrency.max(1);
        let retries = repo.sync.retries;
        let base_url = Arc::new(repo.url.clone());
        let auth = Arc::new(repo.auth.clone());

        let downloads = stream::iter(to_add.into_iter().map(|record| {
            let base_url = Arc::clone(&base_url);
            let auth = Arc::clone(&auth);
            async move {
                let result =
                    download_with_retry(&self.http, &base_url, auth.as_ref().as_ref(), record, retries)
                        .await;
                (record, result)
            }
        }))
        .buffer_unordered(concurrency)
        .collect::<Vec<_>>()
        .await;

        let mut new_packages = Vec::new();
        let mut bytes_downloaded = 0u64;
        let mut first_error = None;
        let mut packages_failed = 0u64;

        for (record, result) in downloads {
            match result {
                Ok(bytes) => {
                    let (blob_sha256, size) = store.ingest(bytes.as_slice())?;
                    if let Some(hint) = record.sha256_hint {
                        if hint != blob_sha256 {
                            packages_failed += 1;
                            first_error.get_or_insert_with(|| {
                                format!("{}: sha256 mismatch after download", record.filename)
                            });
                            continue;
                        }
                    }
                    bytes_downloaded += size;
                    new_packages.push(NewPackage {
                        sha256: blob_sha256,
                        size,
                        filename: record.filename.clone(),
                        repository_id,
                        metadata: record.metadata.clone(),
                    });
                }
                Err(err) => {
                    packages_failed += 1;
                    warn!("sync {}: download {} failed: {}", repo.name, record.filename, err);
                    first_error.get_or_insert_with(|| format!("{}: {}", record.filename, err));
                }
            }
        }

        // Step 5: commit.
        let packages_added = new_packages.len() as u64;
        for pkg in &new_packages {
            catalog.upsert_package(repository_id, pkg)?;
        }
        for id in &unchanged {
            catalog.touch_last_seen(*id)?;
        }
        for id in &to_remove {
            catalog.mark_not_live(*id)?;
        }
        catalog.update_index_digest(
            repository_id,
            etag.as_deref(),
            last_modified.as_deref(),
            digest.content_sha256.map(|d| crate::tools::digest_to_hex(&d)).as_deref(),
        )?;

        let status = if packages_failed > 0 && packages_added == 0 {
            SyncStatus::Failed
        } else if packages_failed > 0 {
            SyncStatus::Partial
        } else {
            SyncStatus::Ok
        };

        catalog.record_sync_finish(
            sync_id,
            status.as_str(),
            packages_added,
            to_remove.len() as u64,
            bytes_downloaded,
            first_error.as_deref(),
        )?;

        Ok(SyncReport {
            status,
            packages_added,
            packages_removed: to_remove.len() as u64,
            bytes_downloaded,
            packages_failed,
            first_error,
        })
    }

    async fn verify_index_signature(&self, repo: &RepositoryConfig, body: &[u8]) -> Result<()> {
        // Detached-signature fetch and verification is intentionally
        // minimal: families publish their signature under a
        // predictable sibling name, and `tools::gpg` only needs bytes
        // in, bool out.
        let sig_url = join_url(&repo.url, &format!("{}.asc", root_index_path(repo)))?;
        let signature = match self.http.fetch_bytes(&sig_url, repo.auth.as_ref()).await {
            Ok(bytes) => bytes,
            Err(_) => return Ok(()), // no detached signature published
        };

        let keys: Vec<VerifyKey> = repo
            .gpg_keys
            .iter()
            .filter_map(|pem| VerifyKey::from_pem(pem.as_bytes()).ok())
            .collect();
        if keys.is_empty() {
            return Err(ChantalError::Signature(
                "repository has gpg_keys configured but none parsed".into(),
            ));
        }
        crate::tools::gpg::verify_any(body, &signature, &keys)
    }
}

/// Resolve `relative` against `base`, the way a browser resolves a
/// `href` found in a fetched index document. `base` need not carry a
/// trailing slash; `relative` may or may not carry a leading one.
fn join_url(base: &str, relative: &str) -> Result<String> {
    let mut normalized = base.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let base = url::Url::parse(&normalized)
        .map_err(|err| ChantalError::Config(format!("invalid repository url {}: {}", base, err)))?;
    let joined = base
        .join(relative.trim_start_matches('/'))
        .map_err(|err| ChantalError::Config(format!("invalid relative url {}: {}", relative, err)))?;
    Ok(joined.to_string())
}

fn root_index_path(repo: &RepositoryConfig) -> &'static str {
    match repo.family {
        crate::family::Family::Rpm => "repodata/repomd.xml",
        crate::family::Family::Deb => "Release",
        crate::family::Family::Apk => "APKINDEX.tar.gz",
        crate::family::Family::Helm => "index.yaml",
    }
}

async fn download_with_retry(
    http: &HttpClient,
    base_url: &str,
    auth: Option<&AuthConfig>,
    record: &PackageRecord,
    max_attempts: u32,
) -> Result<Vec<u8>> {
    let url = join_url(base_url, &record.relative_url)?;
    let mut attempt = 0u32;
    let mut delay = Duration::from_secs(1);

    loop {
        attempt += 1;
        match http.fetch_bytes(&url, auth).await {
            Ok(bytes) => return Ok(bytes),
            Err(err) if attempt >= max_attempts.max(1) => return Err(err),
            Err(_) => {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(30));
            }
        }
    }
}
