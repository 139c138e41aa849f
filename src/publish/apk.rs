//! Alpine APK Publisher (spec §4.8).
//!
//! Hardlinks packages under `<arch>/` and writes `APKINDEX.tar.gz`.
//! The `Q1`-prefixed checksum in each `APKINDEX` entry is carried
//! straight through from the parsed upstream metadata rather than
//! recomputed — Chantal never re-signs or re-derives upstream package
//! checksums (spec §1 Non-goals: "recomputing upstream package
//! signatures").

use std::io::Write;
use std::path::Path;

use crate::catalog::PackageRow;
use crate::error::Result;
use crate::family::{Family, FamilyMeta};
use crate::publish::{FamilyPublisher, PublishOptions};
use crate::store::ContentStore;

pub struct ApkPublisher;

fn apk_rows(packages: &[PackageRow]) -> Vec<(&PackageRow, &crate::family::apk::ApkMetadata)> {
    packages
        .iter()
        .filter_map(|row| match &row.metadata {
            FamilyMeta::Apk(meta) => Some((row, meta)),
            _ => None,
        })
        .collect()
}

fn entry_for(meta: &crate::family::apk::ApkMetadata) -> String {
    let mut s = String::new();
    s.push_str(&format!("C:{}\n", meta.checksum));
    s.push_str(&format!("P:{}\n", meta.name));
    s.push_str(&format!("V:{}\n", meta.version));
    s.push_str(&format!("A:{}\n", meta.architecture));
    s.push_str(&format!("S:{}\n", meta.size));
    if let Some(i) = meta.installed_size {
        s.push_str(&format!("I:{}\n", i));
    }
    if let Some(t) = &meta.description {
        s.push_str(&format!("T:{}\n", t));
    }
    if let Some(u) = &meta.url {
        s.push_str(&format!("U:{}\n", u));
    }
    if let Some(l) = &meta.license {
        s.push_str(&format!("L:{}\n", l));
    }
    if !meta.dependencies.is_empty() {
        s.push_str(&format!("D:{}\n", meta.dependencies.join(" ")));
    }
    if !meta.provides.is_empty() {
        s.push_str(&format!("p:{}\n", meta.provides.join(" ")));
    }
    if let Some(o) = &meta.origin {
        s.push_str(&format!("o:{}\n", o));
    }
    if let Some(m) = &meta.maintainer {
        s.push_str(&format!("m:{}\n", m));
    }
    if let Some(t) = meta.build_time {
        s.push_str(&format!("t:{}\n", t));
    }
    s.push('\n');
    s
}

impl FamilyPublisher for ApkPublisher {
    fn family(&self) -> Family {
        Family::Apk
    }

    fn publish(
        &self,
        packages: &[PackageRow],
        store: &ContentStore,
        target: &Path,
        opts: &PublishOptions,
    ) -> Result<()> {
        let rows = apk_rows(packages);

        crate::tools::fs::atomic_publish_dir(target, |staging| {
            let mut by_arch: std::collections::BTreeMap<String, Vec<_>> =
                std::collections::BTreeMap::new();
            for (row, meta) in &rows {
                by_arch.entry(meta.architecture.clone()).or_default().push((row, meta));
            }

            for (arch, arch_rows) in &by_arch {
                let arch_dir = staging.join(arch);
                std::fs::create_dir_all(&arch_dir)?;

                let mut index_text = String::new();
                for (row, meta) in arch_rows {
                    let filename = format!("{}-{}.apk", meta.name, meta.version);
                    store.hardlink(&row.sha256, &arch_dir.join(&filename), opts.overwrite)?;
                    index_text.push_str(&entry_for(meta));
                }

                let tar_gz_path = arch_dir.join("APKINDEX.tar.gz");
                let file = std::fs::File::create(&tar_gz_path)?;
                let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
                let mut builder = tar::Builder::new(encoder);

                append_tar_entry(&mut builder, "APKINDEX", index_text.as_bytes())?;
                append_tar_entry(
                    &mut builder,
                    "DESCRIPTION",
                    b"Chantal-published Alpine package index\n",
                )?;
                if let Some(key) = opts.signing_key {
                    let signature = key.sign(index_text.as_bytes())?;
                    append_tar_entry(&mut builder, ".SIGN.RSA.chantal.rsa.pub", &signature)?;
                }

                let encoder = builder.into_inner()?;
                encoder.finish()?;
            }

            Ok(())
        })
    }
}

fn append_tar_entry<W: Write>(builder: &mut tar::Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, NewPackage};
    use crate::family::apk::ApkMetadata;
    use std::io::Cursor;

    #[test]
    fn publishes_apkindex_per_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().join("pool")).unwrap();
        let mut catalog = Catalog::open_in_memory().unwrap();
        let repo_id = catalog
            .upsert_repository("alpine", Family::Apk, "https://example.org", true)
            .unwrap();

        let (sha256, size) = store.ingest(Cursor::new(b"fake apk bytes")).unwrap();
        let pkg = NewPackage {
            sha256,
            size,
            filename: "musl-1.2.3-r4.apk".into(),
            repository_id: repo_id,
            metadata: FamilyMeta::Apk(ApkMetadata {
                name: "musl".into(),
                version: "1.2.3-r4".into(),
                architecture: "x86_64".into(),
                checksum: "Q1abcdefghijklmnopqrstuvwxyz0123456=".into(),
                size,
                installed_size: None,
                description: Some("the musl c library".into()),
                url: None,
                license: Some("MIT".into()),
                dependencies: Vec::new(),
                provides: Vec::new(),
                origin: None,
                maintainer: None,
                build_time: None,
                overflow: serde_json::Map::new(),
            }),
        };
        catalog.upsert_package(repo_id, &pkg).unwrap();
        let rows = catalog.list_live_packages(repo_id).unwrap();

        let publisher = ApkPublisher;
        let target = dir.path().join("out");
        publisher
            .publish(&rows, &store, &target, &PublishOptions::default())
            .unwrap();

        assert!(target.join("x86_64/APKINDEX.tar.gz").is_file());
        assert!(target.join("x86_64/musl-1.2.3-r4.apk").is_file());
    }
}
