//! CLI entry point. Thin by design (spec §1 scopes CLI parsing, config
//! loading, and logging setup as external collaborators): this binary
//! only wires `clap` subcommands to the library's public API, the way
//! the teacher's own `src/bin/*` binaries are thin wrappers around
//! `pbs_datastore`/`pbs_client` functionality.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info};

use chantal::catalog::Catalog;
use chantal::config::{self, GlobalConfig};
use chantal::publish::{publisher_for, PublishOptions};
use chantal::snapshot::{PruneOptions, SnapshotManager};
use chantal::store::{ContentStore, VerifyOutcome};
use chantal::sync::{SyncEngine, SyncStatus};
use chantal::view::{ConflictPolicy, MemberRef};

#[derive(Parser)]
#[command(name = "chantal", about = "Mirror and republish package repositories")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "CHANTAL_CONFIG", default_value = "chantal.yaml")]
    config: PathBuf,

    /// Path to the content-addressed pool directory.
    #[arg(long, env = "CHANTAL_POOL", default_value = "pool")]
    pool: PathBuf,

    /// Path to the catalog's SQLite database file.
    #[arg(long, env = "CHANTAL_CATALOG", default_value = "catalog.sqlite")]
    catalog: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Synchronise one or all configured repositories.
    Sync {
        /// Repository name; omit to sync every enabled repository.
        name: Option<String>,
    },
    /// Freeze a repository's current live set into a named snapshot.
    Snapshot {
        repository: String,
        name: String,
    },
    /// Prune old snapshots for a repository.
    Prune {
        repository: String,
        #[arg(long)]
        keep_last: Option<u64>,
        #[arg(long)]
        keep_newer_than_days: Option<u64>,
    },
    /// Publish a repository's live set (or a named snapshot) to a directory.
    Publish {
        repository: String,
        target: PathBuf,
        #[arg(long)]
        snapshot: Option<String>,
    },
    /// Create or publish a named View composing repositories/snapshots.
    #[command(subcommand)]
    View(ViewCommand),
    /// Rehash every live blob in the pool and report any mismatch.
    Verify {
        /// Restrict verification to one repository; omit for the whole pool.
        repository: Option<String>,
    },
}

#[derive(Subcommand)]
enum ViewCommand {
    /// Create a named view over one family with a conflict policy.
    Create {
        name: String,
        /// rpm, deb, apk, or helm.
        family: String,
        #[arg(long, default_value = "first-wins")]
        conflict_policy: String,
    },
    /// Replace a view's ordered member list. Each member is either
    /// `repo:<name>` or `snapshot:<repository>/<snapshot-name>`.
    SetMembers { name: String, members: Vec<String> },
    /// Publish a view's currently-resolved package set to a directory.
    Publish { name: String, target: PathBuf },
}

fn load_config(path: &std::path::Path) -> anyhow::Result<GlobalConfig> {
    let bytes = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    config::parse(&bytes).map_err(anyhow::Error::from)
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    match run_inner(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            1
        }
    }
}

async fn run_inner(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(&cli.config)?;
    let store = ContentStore::new(&cli.pool).context("opening content store")?;
    let mut catalog = Catalog::open(&cli.catalog).context("opening catalog")?;

    match cli.command {
        Command::Sync { name } => run_sync(&config, &mut catalog, &store, name.as_deref()).await,
        Command::Snapshot { repository, name } => {
            let repo_id = resolve_repository(&config, &mut catalog, &repository)?;
            let mut manager = SnapshotManager::new(&mut catalog);
            let snapshot = manager.create(repo_id, &name)?;
            info!(
                "created snapshot {} ({} packages, {} bytes)",
                snapshot.name, snapshot.package_count, snapshot.total_size_bytes
            );
            Ok(0)
        }
        Command::Prune {
            repository,
            keep_last,
            keep_newer_than_days,
        } => {
            let repo_id = resolve_repository(&config, &mut catalog, &repository)?;
            let mut manager = SnapshotManager::new(&mut catalog);
            let deleted = manager.prune(
                repo_id,
                &PruneOptions {
                    keep_last,
                    keep_newer_than_days,
                },
            )?;
            info!("pruned {} snapshots", deleted.len());
            Ok(0)
        }
        Command::Publish {
            repository,
            target,
            snapshot,
        } => run_publish(&config, &catalog, &store, &repository, snapshot.as_deref(), &target),
        Command::View(cmd) => run_view(&config, &mut catalog, &store, cmd),
        Command::Verify { repository } => run_verify(&config, &mut catalog, &store, repository.as_deref()),
    }
}

/// Look up `name` in the loaded configuration and upsert its
/// repository row, returning the catalog id.
fn resolve_repository(
    config: &GlobalConfig,
    catalog: &mut Catalog,
    name: &str,
) -> anyhow::Result<i64> {
    let repo = config
        .repositories
        .iter()
        .find(|r| r.name == name)
        .with_context(|| format!("no configured repository named '{}'", name))?;
    catalog
        .upsert_repository(&repo.name, repo.family, &repo.url, repo.enabled)
        .map_err(anyhow::Error::from)
}

async fn run_sync(
    config: &GlobalConfig,
    catalog: &mut Catalog,
    store: &ContentStore,
    only: Option<&str>,
) -> anyhow::Result<i32> {
    let engine = SyncEngine::new()?;
    let mut any_failed = false;

    for repo in &config.repositories {
        if !repo.enabled {
            continue;
        }
        if let Some(only) = only {
            if repo.name != only {
                continue;
            }
        }

        let repository_id =
            catalog.upsert_repository(&repo.name, repo.family, &repo.url, repo.enabled)?;
        let report = engine
            .sync_repository(catalog, store, repository_id, repo)
            .await?;

        match report.status {
            SyncStatus::Ok | SyncStatus::Unchanged => {
                info!(
                    "{}: {:?} (+{} -{} {} bytes)",
                    repo.name,
                    report.status,
                    report.packages_added,
                    report.packages_removed,
                    report.bytes_downloaded
                );
            }
            SyncStatus::Partial => {
                any_failed = true;
                error!(
                    "{}: partial sync, {} packages failed ({})",
                    repo.name,
                    report.packages_failed,
                    report.first_error.as_deref().unwrap_or("unknown error")
                );
            }
            SyncStatus::Failed => {
                any_failed = true;
                error!(
                    "{}: sync failed ({})",
                    repo.name,
                    report.first_error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    Ok(if any_failed { 2 } else { 0 })
}

fn parse_family(name: &str) -> anyhow::Result<chantal::family::Family> {
    use chantal::family::Family;
    match name {
        "rpm" => Ok(Family::Rpm),
        "deb" => Ok(Family::Deb),
        "apk" => Ok(Family::Apk),
        "helm" => Ok(Family::Helm),
        other => anyhow::bail!("unknown family '{}' (expected rpm, deb, apk, or helm)", other),
    }
}

fn parse_conflict_policy(name: &str) -> anyhow::Result<ConflictPolicy> {
    match name {
        "first-wins" => Ok(ConflictPolicy::FirstWins),
        "last-wins" => Ok(ConflictPolicy::LastWins),
        "fail" => Ok(ConflictPolicy::Fail),
        other => anyhow::bail!("unknown conflict policy '{}'", other),
    }
}

/// Parse a `repo:<name>` or `snapshot:<repository>/<snapshot-name>`
/// member reference from the `view set-members` CLI syntax.
fn parse_member(config: &GlobalConfig, catalog: &mut Catalog, raw: &str) -> anyhow::Result<MemberRef> {
    if let Some(name) = raw.strip_prefix("repo:") {
        return Ok(MemberRef::Repository(resolve_repository(config, catalog, name)?));
    }
    if let Some(rest) = raw.strip_prefix("snapshot:") {
        let (repo_name, snapshot_name) = rest
            .split_once('/')
            .with_context(|| format!("expected snapshot:<repository>/<name>, got '{}'", raw))?;
        let repo_id = resolve_repository(config, catalog, repo_name)?;
        let snapshot = catalog
            .list_snapshots(Some(repo_id))?
            .into_iter()
            .find(|s| s.name == snapshot_name)
            .with_context(|| format!("no snapshot named '{}' in '{}'", snapshot_name, repo_name))?;
        return Ok(MemberRef::Snapshot(snapshot.id));
    }
    anyhow::bail!("member '{}' must start with 'repo:' or 'snapshot:'", raw)
}

fn run_view(
    config: &GlobalConfig,
    catalog: &mut Catalog,
    store: &ContentStore,
    cmd: ViewCommand,
) -> anyhow::Result<i32> {
    match cmd {
        ViewCommand::Create {
            name,
            family,
            conflict_policy,
        } => {
            let family = parse_family(&family)?;
            let policy = parse_conflict_policy(&conflict_policy)?;
            catalog.create_view(&name, family, policy)?;
            info!("created view '{}'", name);
            Ok(0)
        }
        ViewCommand::SetMembers { name, members } => {
            let view = catalog
                .get_view(&name)?
                .with_context(|| format!("no view named '{}'", name))?;
            let resolved: anyhow::Result<Vec<MemberRef>> = members
                .iter()
                .map(|raw| parse_member(config, &mut *catalog, raw))
                .collect();
            catalog.set_view_members(view.id, &resolved?)?;
            info!("set {} member(s) on view '{}'", members.len(), name);
            Ok(0)
        }
        ViewCommand::Publish { name, target } => {
            let view = catalog
                .get_view(&name)?
                .with_context(|| format!("no view named '{}'", name))?;
            let packages = catalog.compose_view(view.id)?;
            let publisher = publisher_for(view.family);
            match publisher.publish(&packages, store, &target, &PublishOptions::default()) {
                Ok(()) => {
                    catalog.mark_view_published(view.id, &target.display().to_string())?;
                    info!("published view '{}' ({} packages) to {}", name, packages.len(), target.display());
                    Ok(0)
                }
                Err(err) => {
                    error!("view publish failed: {err}");
                    Ok(3)
                }
            }
        }
    }
}

fn run_verify(
    config: &GlobalConfig,
    catalog: &mut Catalog,
    store: &ContentStore,
    repository: Option<&str>,
) -> anyhow::Result<i32> {
    let mut digests = std::collections::HashSet::new();

    if let Some(name) = repository {
        let repo_id = resolve_repository(config, catalog, name)?;
        for pkg in catalog.list_live_packages(repo_id)? {
            digests.insert(pkg.sha256);
        }
    } else {
        for repo in &config.repositories {
            let repo_id =
                catalog.upsert_repository(&repo.name, repo.family, &repo.url, repo.enabled)?;
            for pkg in catalog.list_live_packages(repo_id)? {
                digests.insert(pkg.sha256);
            }
        }
    }

    let mut bad = 0u64;
    for digest in &digests {
        match store.verify(digest)? {
            VerifyOutcome::Ok => {}
            VerifyOutcome::Corrupt => {
                bad += 1;
                error!("{} is corrupt", chantal::tools::digest_to_hex(digest));
            }
            VerifyOutcome::Missing => {
                bad += 1;
                error!("{} is missing from the pool", chantal::tools::digest_to_hex(digest));
            }
        }
    }

    info!("verified {} blob(s), {} bad", digests.len(), bad);
    Ok(if bad > 0 { 4 } else { 0 })
}

fn run_publish(
    config: &GlobalConfig,
    catalog: &Catalog,
    store: &ContentStore,
    repository: &str,
    snapshot_name: Option<&str>,
    target: &std::path::Path,
) -> anyhow::Result<i32> {
    let repo_config = config
        .repositories
        .iter()
        .find(|r| r.name == repository)
        .with_context(|| format!("no configured repository named '{}'", repository))?;

    let repository_id = catalog
        .upsert_repository(&repo_config.name, repo_config.family, &repo_config.url, true)?;

    let packages = if let Some(snapshot_name) = snapshot_name {
        let snapshot = catalog
            .list_snapshots(Some(repository_id))?
            .into_iter()
            .find(|s| s.name == snapshot_name)
            .with_context(|| format!("no snapshot named '{}'", snapshot_name))?;
        catalog.list_snapshot_packages(snapshot.id)?
    } else {
        catalog.list_live_packages(repository_id)?
    };

    let publisher = publisher_for(repo_config.family);
    let opts = PublishOptions::default();
    match publisher.publish(&packages, store, target, &opts) {
        Ok(()) => {
            info!("published {} packages to {}", packages.len(), target.display());
            Ok(0)
        }
        Err(err) => {
            error!("publish failed: {err}");
            Ok(3)
        }
    }
}

