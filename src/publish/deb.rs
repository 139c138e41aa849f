//! DEB/APT Publisher (spec §4.8).
//!
//! Writes a `dists/<suite>/<component>/binary-<arch>/` layout and an
//! aggregate `Release` file with MD5Sum/SHA1/SHA256 sections, the way
//! a real APT archive does. Chantal's `FamilyPublisher` is not handed
//! the originating `RepositoryConfig` (packages plus publish options
//! are its whole contract, matching the other three families), so
//! suite/component are fixed at `stable`/`main`; multi-suite
//! publishing is left to the caller composing several single-suite
//! publishes into the same root, noted in DESIGN.md.

use std::path::Path;

use openssl::hash::{Hasher, MessageDigest};

use crate::catalog::PackageRow;
use crate::codec::{self, CompressionFormat};
use crate::error::{ChantalError, Result};
use crate::family::{Family, FamilyMeta};
use crate::publish::{FamilyPublisher, PublishOptions};
use crate::store::ContentStore;
use crate::tools::digest_to_hex;

pub struct DebPublisher;

const SUITE: &str = "stable";
const COMPONENT: &str = "main";

fn deb_rows(packages: &[PackageRow]) -> Vec<(&PackageRow, &crate::family::deb::DebMetadata)> {
    packages
        .iter()
        .filter_map(|row| match &row.metadata {
            FamilyMeta::Deb(meta) => Some((row, meta)),
            _ => None,
        })
        .collect()
}

fn stanza_for(row: &PackageRow, meta: &crate::family::deb::DebMetadata, pool_path: &str) -> String {
    let mut s = String::new();
    s.push_str(&format!("Package: {}\n", meta.package));
    s.push_str(&format!("Version: {}\n", meta.version));
    s.push_str(&format!("Architecture: {}\n", meta.architecture));
    if let Some(m) = &meta.maintainer {
        s.push_str(&format!("Maintainer: {}\n", m));
    }
    if let Some(sz) = meta.installed_size {
        s.push_str(&format!("Installed-Size: {}\n", sz));
    }
    if !meta.depends.is_empty() {
        s.push_str(&format!("Depends: {}\n", meta.depends.join(", ")));
    }
    s.push_str(&format!("Filename: {}\n", pool_path));
    s.push_str(&format!("Size: {}\n", row.size));
    s.push_str(&format!("SHA256: {}\n", digest_to_hex(&row.sha256)));
    if let Some(md5) = &meta.md5sum {
        s.push_str(&format!("MD5sum: {}\n", md5));
    }
    if let Some(desc) = &meta.description {
        s.push_str(&format!("Description: {}\n", desc));
    }
    s.push('\n');
    s
}

impl FamilyPublisher for DebPublisher {
    fn family(&self) -> Family {
        Family::Deb
    }

    fn publish(
        &self,
        packages: &[PackageRow],
        store: &ContentStore,
        target: &Path,
        opts: &PublishOptions,
    ) -> Result<()> {
        let rows = deb_rows(packages);
        let mut by_arch: std::collections::BTreeMap<String, Vec<(&PackageRow, &crate::family::deb::DebMetadata)>> =
            std::collections::BTreeMap::new();
        for (row, meta) in &rows {
            by_arch
                .entry(meta.architecture.clone())
                .or_default()
                .push((row, meta));
        }

        crate::tools::fs::atomic_publish_dir(target, |staging| {
            let pool_dir = staging.join("pool").join(COMPONENT);
            std::fs::create_dir_all(&pool_dir)?;

            let mut release_entries = Vec::new();

            for (arch, arch_rows) in &by_arch {
                let binary_dir = staging
                    .join("dists")
                    .join(SUITE)
                    .join(COMPONENT)
                    .join(format!("binary-{}", arch));
                std::fs::create_dir_all(&binary_dir)?;

                let mut packages_text = String::new();
                for (row, meta) in arch_rows {
                    let pool_path = format!("pool/{}/{}", COMPONENT, row.filename);
                    store.hardlink(&row.sha256, &staging.join(&pool_path), opts.overwrite)?;
                    packages_text.push_str(&stanza_for(row, meta, &pool_path));
                }

                let uncompressed = packages_text.into_bytes();
                std::fs::write(binary_dir.join("Packages"), &uncompressed)?;
                release_entries.push(relative_entry(staging, &binary_dir.join("Packages"), &uncompressed)?);

                for (fmt, ext) in [(CompressionFormat::Gzip, ".gz"), (CompressionFormat::Xz, ".xz")]
                {
                    let compressed = codec::compress(&uncompressed, fmt, None)?;
                    let path = binary_dir.join(format!("Packages{}", ext));
                    std::fs::write(&path, &compressed)?;
                    release_entries.push(relative_entry(staging, &path, &compressed)?);
                }
            }

            let release = build_release(&release_entries, opts.created_at);
            let dists_dir = staging.join("dists").join(SUITE);
            std::fs::create_dir_all(&dists_dir)?;
            std::fs::write(dists_dir.join("Release"), release.as_bytes())?;

            if let Some(key) = opts.signing_key {
                let signature = key.sign(release.as_bytes())?;
                std::fs::write(dists_dir.join("Release.gpg"), &signature)?;

                let mut inline = String::new();
                inline.push_str("-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\n");
                inline.push_str(&release);
                inline.push_str("-----BEGIN PGP SIGNATURE-----\n\n");
                inline.push_str(&hex(&signature));
                inline.push_str("\n-----END PGP SIGNATURE-----\n");
                std::fs::write(dists_dir.join("InRelease"), inline.as_bytes())?;
            }

            Ok(())
        })
    }
}

struct ReleaseEntry {
    relative_path: String,
    size: u64,
    md5: String,
    sha1: String,
    sha256: String,
}

fn relative_entry(staging: &Path, path: &Path, data: &[u8]) -> Result<ReleaseEntry> {
    let relative_path = path
        .strip_prefix(staging.join("dists").join(SUITE))
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned();

    let mut md5 = Hasher::new(MessageDigest::md5())
        .map_err(|err| ChantalError::Parse(format!("md5: {}", err)))?;
    md5.update(data)
        .map_err(|err| ChantalError::Parse(format!("md5: {}", err)))?;
    let mut sha1 = Hasher::new(MessageDigest::sha1())
        .map_err(|err| ChantalError::Parse(format!("sha1: {}", err)))?;
    sha1.update(data)
        .map_err(|err| ChantalError::Parse(format!("sha1: {}", err)))?;

    Ok(ReleaseEntry {
        relative_path,
        size: data.len() as u64,
        md5: hex(&md5.finish().map_err(|err| ChantalError::Parse(format!("md5: {}", err)))?),
        sha1: hex(&sha1.finish().map_err(|err| ChantalError::Parse(format!("sha1: {}", err)))?),
        sha256: digest_to_hex(&{
            let mut h = openssl::sha::Sha256::new();
            h.update(data);
            h.finish()
        }),
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn build_release(entries: &[ReleaseEntry], created_at: chrono::DateTime<chrono::Utc>) -> String {
    let mut s = String::new();
    s.push_str(&format!("Suite: {}\n", SUITE));
    s.push_str(&format!("Components: {}\n", COMPONENT));
    s.push_str(&format!("Date: {}\n", created_at.to_rfc2822()));
    s.push_str("MD5Sum:\n");
    for e in entries {
        s.push_str(&format!(" {} {} {}\n", e.md5, e.size, e.relative_path));
    }
    s.push_str("SHA1:\n");
    for e in entries {
        s.push_str(&format!(" {} {} {}\n", e.sha1, e.size, e.relative_path));
    }
    s.push_str("SHA256:\n");
    for e in entries {
        s.push_str(&format!(" {} {} {}\n", e.sha256, e.size, e.relative_path));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, NewPackage};
    use crate::family::deb::DebMetadata;
    use std::io::Cursor;

    #[test]
    fn publishes_release_with_hash_sections() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().join("pool")).unwrap();
        let mut catalog = Catalog::open_in_memory().unwrap();
        let repo_id = catalog
            .upsert_repository("internal", Family::Deb, "https://example.org", true)
            .unwrap();

        let (sha256, size) = store.ingest(Cursor::new(b"fake deb bytes")).unwrap();
        let pkg = NewPackage {
            sha256,
            size,
            filename: "curl_7.74.0_amd64.deb".into(),
            repository_id: repo_id,
            metadata: FamilyMeta::Deb(DebMetadata {
                package: "curl".into(),
                version: "7.74.0".into(),
                architecture: "amd64".into(),
                maintainer: None,
                description: Some("transfer data".into()),
                section: None,
                priority: None,
                installed_size: None,
                depends: vec!["libc6".into()],
                recommends: Vec::new(),
                conflicts: Vec::new(),
                provides: Vec::new(),
                md5sum: None,
                sha256: Some(digest_to_hex(&sha256)),
                overflow: serde_json::Map::new(),
            }),
        };
        catalog.upsert_package(repo_id, &pkg).unwrap();
        let rows = catalog.list_live_packages(repo_id).unwrap();

        let publisher = DebPublisher;
        let target = dir.path().join("out");
        publisher
            .publish(&rows, &store, &target, &PublishOptions::default())
            .unwrap();

        let release = std::fs::read_to_string(target.join("dists/stable/Release")).unwrap();
        assert!(release.contains("SHA256:"));
        assert!(target
            .join("dists/stable/main/binary-amd64/Packages")
            .is_file());
        assert!(target.join("pool/main/curl_7.74.0_amd64.deb").is_file());
    }

    #[test]
    fn in_release_embeds_a_signature_that_actually_verifies() {
        use crate::tools::gpg::{SigningKey, VerifyKey};
        use openssl::rsa::Rsa;

        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().join("pool")).unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let repo_id = catalog
            .upsert_repository("internal", Family::Deb, "https://example.org", true)
            .unwrap();

        let (sha256, size) = store.ingest(Cursor::new(b"fake deb bytes")).unwrap();
        catalog
            .upsert_package(
                repo_id,
                &NewPackage {
                    sha256,
                    size,
                    filename: "curl_7.74.0_amd64.deb".into(),
                    repository_id: repo_id,
                    metadata: FamilyMeta::Deb(DebMetadata {
                        package: "curl".into(),
                        version: "7.74.0".into(),
                        architecture: "amd64".into(),
                        maintainer: None,
                        description: None,
                        section: None,
                        priority: None,
                        installed_size: None,
                        depends: Vec::new(),
                        recommends: Vec::new(),
                        conflicts: Vec::new(),
                        provides: Vec::new(),
                        md5sum: None,
                        sha256: Some(digest_to_hex(&sha256)),
                        overflow: serde_json::Map::new(),
                    }),
                },
            )
            .unwrap();
        let rows = catalog.list_live_packages(repo_id).unwrap();

        let rsa = Rsa::generate(2048).unwrap();
        let signing_key = SigningKey::from_pem(&rsa.private_key_to_pem().unwrap()).unwrap();
        let verify_key = VerifyKey::from_pem(&rsa.public_key_to_pem().unwrap()).unwrap();

        let target = dir.path().join("out");
        let opts = PublishOptions {
            signing_key: Some(&signing_key),
            ..PublishOptions::default()
        };
        DebPublisher.publish(&rows, &store, &target, &opts).unwrap();

        let release = std::fs::read_to_string(target.join("dists/stable/Release")).unwrap();
        let in_release = std::fs::read_to_string(target.join("dists/stable/InRelease")).unwrap();

        let body = in_release
            .strip_prefix("-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\n")
            .unwrap();
        let (message, sig_block) = body
            .split_once("-----BEGIN PGP SIGNATURE-----\n\n")
            .unwrap();
        assert_eq!(message, release);

        let sig_hex = sig_block
            .trim_end()
            .strip_suffix("-----END PGP SIGNATURE-----")
            .unwrap()
            .trim();
        let signature: Vec<u8> = (0..sig_hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&sig_hex[i..i + 2], 16).unwrap())
            .collect();

        assert!(verify_key.verify(message.as_bytes(), &signature).unwrap());

        let detached = std::fs::read(target.join("dists/stable/Release.gpg")).unwrap();
        assert_eq!(detached, signature);
    }
}
