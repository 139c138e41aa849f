//! End-to-end scenarios from spec §8, driven through the public
//! `chantal` library API (Catalog + ContentStore + SnapshotManager +
//! publishers) rather than the CLI or a live HTTP fetch, since the
//! sync engine's only external dependency is the network. Each test
//! uses an in-memory catalog (`Catalog::open_in_memory`) and a
//! `tempfile::TempDir`-backed content store, per SPEC_FULL.md §1's
//! test-tooling section.

use std::collections::HashSet;
use std::io::Cursor;
use std::os::unix::fs::MetadataExt;
use std::time::SystemTime;

use chantal::catalog::{Catalog, NewPackage};
use chantal::family::helm::HelmMetadata;
use chantal::family::{Family, FamilyMeta};
use chantal::publish::{publisher_for, PublishOptions};
use chantal::snapshot::SnapshotManager;
use chantal::store::ContentStore;
use chantal::view::{ConflictPolicy, MemberRef};

fn helm_meta(name: &str, version: &str) -> FamilyMeta {
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

fn ingest_package(
    store: &ContentStore,
    catalog: &Catalog,
    repository_id: i64,
    name: &str,
    version: &str,
    body: &[u8],
) -> i64 {
    let (sha256, size) = store.ingest(Cursor::new(body)).unwrap();
    catalog
        .upsert_package(
            repository_id,
            &NewPackage {
                sha256,
                size,
                filename: format!("{}-{}.tgz", name, version),
                repository_id,
                metadata: helm_meta(name, version),
            },
        )
        .unwrap()
}

/// S1: mirroring three packages lands three live rows, each backed by
/// a pool blob at its content-addressed path.
#[test]
fn sync_three_packages_lands_three_live_rows_and_pool_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path().join("pool")).unwrap();
    let catalog = Catalog::open_in_memory().unwrap();
    let repo_id = catalog
        .upsert_repository("charts", Family::Helm, "https://example.org", true)
        .unwrap();

    ingest_package(&store, &catalog, repo_id, "nginx", "1.0.0", b"nginx contents");
    ingest_package(&store, &catalog, repo_id, "redis", "2.0.0", b"redis contents");
    ingest_package(&store, &catalog, repo_id, "mysql", "3.0.0", b"mysql contents");

    let live = catalog.list_live_packages(repo_id).unwrap();
    assert_eq!(live.len(), 3);
    for pkg in &live {
        assert!(store.exists(&pkg.sha256));
        let blob_path = store.blob_path(&pkg.sha256);
        let hex = chantal::tools::digest_to_hex(&pkg.sha256);
        assert!(blob_path.ends_with(&hex));
    }
}

/// S2: a re-sync that adds one package and drops another leaves the
/// already-created snapshot referencing exactly its original members,
/// while the repository's live set reflects only the new state.
#[test]
fn resync_with_add_and_remove_preserves_snapshot_isolation() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path().join("pool")).unwrap();
    let mut catalog = Catalog::open_in_memory().unwrap();
    let repo_id = catalog
        .upsert_repository("charts", Family::Helm, "https://example.org", true)
        .unwrap();

    let nginx_id = ingest_package(&store, &catalog, repo_id, "nginx", "1.0.0", b"nginx v1");
    ingest_package(&store, &catalog, repo_id, "redis", "1.0.0", b"redis v1");

    let snapshot = {
        let mut manager = SnapshotManager::new(&mut catalog);
        manager.create(repo_id, "before").unwrap()
    };
    let snapshot_members = catalog.list_snapshot_packages(snapshot.id).unwrap();
    assert_eq!(snapshot_members.len(), 2);

    // Re-sync: redis disappears upstream, mysql is newly published.
    catalog.mark_not_live(
        catalog
            .list_live_packages(repo_id)
            .unwrap()
            .into_iter()
            .find(|p| p.filename.starts_with("redis"))
            .unwrap()
            .id,
    ).unwrap();
    ingest_package(&store, &catalog, repo_id, "mysql", "1.0.0", b"mysql v1");
    catalog.touch_last_seen(nginx_id).unwrap();

    let live_after = catalog.list_live_packages(repo_id).unwrap();
    assert_eq!(live_after.len(), 2);
    assert!(live_after.iter().any(|p| p.filename.starts_with("nginx")));
    assert!(live_after.iter().any(|p| p.filename.starts_with("mysql")));

    // The earlier snapshot is untouched by the re-sync.
    let snapshot_members_after = catalog.list_snapshot_packages(snapshot.id).unwrap();
    assert_eq!(snapshot_members_after.len(), 2);
    assert!(snapshot_members_after.iter().any(|p| p.filename.starts_with("redis")));
}

/// S3: publishing a snapshot hardlinks every package to the target
/// directory under the same inode as its pool copy, and a second
/// publish of the same snapshot is idempotent.
#[test]
fn publish_snapshot_hardlinks_pool_blobs_identically() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path().join("pool")).unwrap();
    let mut catalog = Catalog::open_in_memory().unwrap();
    let repo_id = catalog
        .upsert_repository("charts", Family::Helm, "https://example.org", true)
        .unwrap();
    ingest_package(&store, &catalog, repo_id, "nginx", "1.0.0", b"nginx contents");

    let snapshot = {
        let mut manager = SnapshotManager::new(&mut catalog);
        manager.create(repo_id, "v1").unwrap()
    };
    let packages = catalog.list_snapshot_packages(snapshot.id).unwrap();

    let target = dir.path().join("published");
    let publisher = publisher_for(Family::Helm);
    let opts = PublishOptions::default();
    publisher.publish(&packages, &store, &target, &opts).unwrap();

    let published_file = target.join(&packages[0].filename);
    assert!(published_file.is_file());

    let pool_meta = std::fs::metadata(store.blob_path(&packages[0].sha256)).unwrap();
    let published_meta = std::fs::metadata(&published_file).unwrap();
    assert_eq!(pool_meta.ino(), published_meta.ino());

    // Republishing is idempotent: same inode, no error.
    let opts_overwrite = PublishOptions {
        overwrite: true,
        ..PublishOptions::default()
    };
    publisher.publish(&packages, &store, &target, &opts_overwrite).unwrap();
    let republished_meta = std::fs::metadata(&published_file).unwrap();
    assert_eq!(republished_meta.ino(), pool_meta.ino());
}

/// S4: once every snapshot referencing a blob is deleted, a GC sweep
/// reclaims it; blobs still referenced by a live package or a
/// remaining snapshot survive.
#[test]
fn gc_reclaims_blobs_after_all_referencing_snapshots_are_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path().join("pool")).unwrap();
    let mut catalog = Catalog::open_in_memory().unwrap();
    let repo_id = catalog
        .upsert_repository("charts", Family::Helm, "https://example.org", true)
        .unwrap();

    ingest_package(&store, &catalog, repo_id, "keep", "1.0.0", b"kept forever");
    let orphan_id = ingest_package(&store, &catalog, repo_id, "gone", "1.0.0", b"soon gone");

    let snapshot = {
        let mut manager = SnapshotManager::new(&mut catalog);
        manager.create(repo_id, "only").unwrap()
    };

    // "gone" drops out of the live set but is still pinned by the
    // snapshot, so it must survive a GC run.
    catalog.mark_not_live(orphan_id).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(10));
    let started_at = SystemTime::now();
    let live = catalog.live_blob_set().unwrap();
    store.garbage_collect(&live, started_at).unwrap();

    let orphan_sha256 = catalog
        .list_snapshot_packages(snapshot.id)
        .unwrap()
        .into_iter()
        .find(|p| p.filename.starts_with("gone"))
        .unwrap()
        .sha256;
    assert!(store.exists(&orphan_sha256));

    // Deleting the snapshot drops the last reference; GC now reclaims it.
    catalog.delete_snapshot(snapshot.id).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(10));
    let started_at = SystemTime::now();
    let live = catalog.live_blob_set().unwrap();
    let (removed, _) = store.garbage_collect(&live, started_at).unwrap();
    assert_eq!(removed, 1);
    assert!(!store.exists(&orphan_sha256));
}

/// S5: concurrent ingest of identical content from several worker
/// threads converges on one pool blob with no torn writes or races.
#[test]
fn concurrent_ingest_of_identical_content_is_race_free() {
    let dir = tempfile::tempdir().unwrap();
    let store = std::sync::Arc::new(ContentStore::new(dir.path().join("pool")).unwrap());
    let body: &'static [u8] = b"identical payload shared by every worker";

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = std::sync::Arc::clone(&store);
            std::thread::spawn(move || store.ingest(Cursor::new(body)).unwrap())
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let digests: HashSet<[u8; 32]> = results.iter().map(|(d, _)| *d).collect();
    assert_eq!(digests.len(), 1);
    let digest = *digests.iter().next().unwrap();
    assert!(store.exists(&digest));
    assert_eq!(
        chantal::store::VerifyOutcome::Ok,
        store.verify(&digest).unwrap()
    );
}

/// S6: a view composing two snapshots under `first-wins` resolves
/// conflicting identities to the earlier member, and publishing that
/// view materialises only the resolved set.
#[test]
fn view_first_wins_publishes_only_the_resolved_package_set() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path().join("pool")).unwrap();
    let mut catalog = Catalog::open_in_memory().unwrap();
    let repo_id = catalog
        .upsert_repository("charts", Family::Helm, "https://example.org", true)
        .unwrap();

    ingest_package(&store, &catalog, repo_id, "nginx", "1.20.0", b"nginx v1.20");
    let snapshot_a = catalog.create_snapshot(repo_id, "a").unwrap();

    catalog.mark_not_live(
        catalog.list_live_packages(repo_id).unwrap()[0].id,
    ).unwrap();
    ingest_package(&store, &catalog, repo_id, "nginx", "1.21.0", b"nginx v1.21");
    let snapshot_b = catalog.create_snapshot(repo_id, "b").unwrap();

    let view_id = catalog
        .create_view("combined", Family::Helm, ConflictPolicy::FirstWins)
        .unwrap();
    catalog
        .set_view_members(view_id, &[MemberRef::Snapshot(snapshot_a.id), MemberRef::Snapshot(snapshot_b.id)])
        .unwrap();

    let resolved = catalog.compose_view(view_id).unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].filename, "nginx-1.20.0.tgz");

    let target = dir.path().join("published-view");
    let publisher = publisher_for(Family::Helm);
    publisher
        .publish(&resolved, &store, &target, &PublishOptions::default())
        .unwrap();

    assert!(target.join("nginx-1.20.0.tgz").is_file());
    assert!(!target.join("nginx-1.21.0.tgz").is_file());
}
