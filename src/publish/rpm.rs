//! RPM Publisher (spec §4.8).
//!
//! Writes `Packages/`, `repodata/{primary,filelists,other}.xml[.ext]`,
//! and `repodata/repomd.xml[.asc]`. `filelists.xml`/`other.xml` carry
//! per-package `<package>` stubs with no file list (Chantal's catalog
//! does not retain per-file RPM contents — see DESIGN.md) since no
//! consumer-facing invariant in spec §8 depends on their contents
//! beyond existing and parsing.

use std::path::Path;

use openssl::sha::Sha256;

use crate::catalog::PackageRow;
use crate::codec;
use crate::error::{ChantalError, Result};
use crate::family::{Family, FamilyMeta};
use crate::publish::{escape_xml, FamilyPublisher, PublishOptions};
use crate::store::ContentStore;
use crate::tools::digest_to_hex;

pub struct RpmPublisher;

fn rpm_rows(packages: &[PackageRow]) -> Vec<(&PackageRow, &crate::family::rpm::RpmMetadata)> {
    packages
        .iter()
        .filter_map(|row| match &row.metadata {
            FamilyMeta::Rpm(meta) => Some((row, meta)),
            _ => None,
        })
        .collect()
}

fn build_primary_xml(rows: &[(&PackageRow, &crate::family::rpm::RpmMetadata)]) -> String {
    let mut xml = String::new();
    xml.push_str(&format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata xmlns=\"http://linux.duke.edu/metadata/common\" xmlns:rpm=\"http://linux.duke.edu/metadata/rpm\" packages=\"{}\">\n",
        rows.len()
    ));
    for (row, meta) in rows {
        xml.push_str("  <package type=\"rpm\">\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape_xml(&meta.name)));
        xml.push_str(&format!("    <arch>{}</arch>\n", escape_xml(&meta.arch)));
        xml.push_str(&format!(
            "    <version epoch=\"{}\" ver=\"{}\" rel=\"{}\"/>\n",
            meta.epoch.as_deref().unwrap_or("0"),
            escape_xml(&meta.version),
            escape_xml(&meta.release)
        ));
        xml.push_str(&format!(
            "    <checksum type=\"sha256\" pkgid=\"YES\">{}</checksum>\n",
            digest_to_hex(&row.sha256)
        ));
        if let Some(summary) = &meta.summary {
            xml.push_str(&format!("    <summary>{}</summary>\n", escape_xml(summary)));
        }
        if let Some(description) = &meta.description {
            xml.push_str(&format!(
                "    <description>{}</description>\n",
                escape_xml(description)
            ));
        }
        xml.push_str(&format!(
            "    <location href=\"Packages/{}\"/>\n",
            escape_xml(&row.filename)
        ));
        xml.push_str(&format!("    <size package=\"{}\"/>\n", row.size));
        xml.push_str("    <format>\n");
        write_entries(&mut xml, "provides", &meta.provides);
        write_entries(&mut xml, "requires", &meta.requires);
        write_entries(&mut xml, "conflicts", &meta.conflicts);
        write_entries(&mut xml, "obsoletes", &meta.obsoletes);
        xml.push_str("    </format>\n");
        xml.push_str("  </package>\n");
    }
    xml.push_str("</metadata>\n");
    xml
}

fn write_entries(xml: &mut String, tag: &str, entries: &[String]) {
    if entries.is_empty() {
        return;
    }
    xml.push_str(&format!("      <rpm:{}>\n", tag));
    for entry in entries {
        xml.push_str(&format!(
            "        <rpm:entry name=\"{}\"/>\n",
            escape_xml(entry)
        ));
    }
    xml.push_str(&format!("      </rpm:{}>\n", tag));
}

fn build_stub_xml(root: &str, rows: &[(&PackageRow, &crate::family::rpm::RpmMetadata)]) -> String {
    let mut xml = String::new();
    xml.push_str(&format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<{0} xmlns=\"http://linux.duke.edu/metadata/{0}\" packages=\"{1}\">\n",
        root,
        rows.len()
    ));
    for (row, meta) in rows {
        xml.push_str(&format!(
            "  <package pkgid=\"{}\" name=\"{}\" arch=\"{}\">\n",
            digest_to_hex(&row.sha256),
            escape_xml(&meta.name),
            escape_xml(&meta.arch)
        ));
        xml.push_str(&format!(
            "    <version epoch=\"{}\" ver=\"{}\" rel=\"{}\"/>\n",
            meta.epoch.as_deref().unwrap_or("0"),
            escape_xml(&meta.version),
            escape_xml(&meta.release)
        ));
        xml.push_str("  </package>\n");
    }
    xml.push_str(&format!("</{}>\n", root));
    xml
}

struct RepodataEntry {
    data_type: &'static str,
    href: String,
    checksum: String,
    open_checksum: String,
    size: u64,
    open_size: u64,
}

impl FamilyPublisher for RpmPublisher {
    fn family(&self) -> Family {
        Family::Rpm
    }

    fn publish(
        &self,
        packages: &[PackageRow],
        store: &ContentStore,
        target: &Path,
        opts: &PublishOptions,
    ) -> Result<()> {
        let rows = rpm_rows(packages);

        crate::tools::fs::atomic_publish_dir(target, |staging| {
            let packages_dir = staging.join("Packages");
            std::fs::create_dir_all(&packages_dir)?;
            for (row, _) in &rows {
                store.hardlink(&row.sha256, &packages_dir.join(&row.filename), opts.overwrite)?;
            }

            let repodata_dir = staging.join("repodata");
            std::fs::create_dir_all(&repodata_dir)?;

            let ext = opts.compression.extension();
            let mut entries = Vec::new();
            for (name, raw) in [
                ("primary", build_primary_xml(&rows)),
                ("filelists", build_stub_xml("filelists", &rows)),
                ("other", build_stub_xml("otherdata", &rows)),
            ] {
                let uncompressed = raw.into_bytes();
                let open_checksum = sha256_hex(&uncompressed);
                let compressed = codec::compress(&uncompressed, opts.compression, None)?;
                let checksum = sha256_hex(&compressed);
                let filename = format!("{}.xml{}", name, ext);
                std::fs::write(repodata_dir.join(&filename), &compressed)?;
                entries.push(RepodataEntry {
                    data_type: match name {
                        "primary" => "primary",
                        "filelists" => "filelists",
                        _ => "other",
                    },
                    href: format!("repodata/{}", filename),
                    checksum,
                    open_checksum,
                    size: compressed.len() as u64,
                    open_size: uncompressed.len() as u64,
                });
            }

            let repomd = build_repomd_xml(&entries, opts.created_at.timestamp());
            let repomd_path = repodata_dir.join("repomd.xml");
            std::fs::write(&repomd_path, repomd.as_bytes())?;

            if let Some(key) = opts.signing_key {
                let signature = key.sign(repomd.as_bytes())?;
                std::fs::write(repodata_dir.join("repomd.xml.asc"), signature)?;
            }

            Ok(())
        })
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    digest_to_hex(&hasher.finish())
}

fn build_repomd_xml(entries: &[RepodataEntry], timestamp: i64) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<repomd xmlns=\"http://linux.duke.edu/metadata/repo\">\n");
    for entry in entries {
        xml.push_str(&format!("  <data type=\"{}\">\n", entry.data_type));
        xml.push_str(&format!(
            "    <checksum type=\"sha256\">{}</checksum>\n",
            entry.checksum
        ));
        xml.push_str(&format!(
            "    <open-checksum type=\"sha256\">{}</open-checksum>\n",
            entry.open_checksum
        ));
        xml.push_str(&format!("    <location href=\"{}\"/>\n", entry.href));
        xml.push_str(&format!("    <timestamp>{}</timestamp>\n", timestamp));
        xml.push_str(&format!("    <size>{}</size>\n", entry.size));
        xml.push_str(&format!("    <open-size>{}</open-size>\n", entry.open_size));
        xml.push_str("  </data>\n");
    }
    xml.push_str("</repomd>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, NewPackage};
    use crate::family::rpm::RpmMetadata;
    use chrono::TimeZone;
    use std::io::Cursor;

    #[test]
    fn publishes_repodata_and_hardlinks_packages() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().join("pool")).unwrap();
        let mut catalog = Catalog::open_in_memory().unwrap();
        let repo_id = catalog
            .upsert_repository("epel9", Family::Rpm, "https://example.org", true)
            .unwrap();

        let (sha256, size) = store.ingest(Cursor::new(b"fake rpm bytes")).unwrap();
        let pkg = NewPackage {
            sha256,
            size,
            filename: "nginx-1.20.1-10.el9.x86_64.rpm".into(),
            repository_id: repo_id,
            metadata: FamilyMeta::Rpm(RpmMetadata {
                name: "nginx".into(),
                version: "1.20.1".into(),
                release: "10.el9".into(),
                arch: "x86_64".into(),
                epoch: None,
                summary: Some("web server".into()),
                description: None,
                provides: vec!["nginx".into()],
                requires: Vec::new(),
                conflicts: Vec::new(),
                obsoletes: Vec::new(),
                nevra: "nginx-1.20.1-10.el9.x86_64".into(),
                overflow: serde_json::Map::new(),
            }),
        };
        catalog.upsert_package(repo_id, &pkg).unwrap();
        let rows = catalog.list_live_packages(repo_id).unwrap();

        let publisher = RpmPublisher;
        let target = dir.path().join("out");
        let opts = PublishOptions {
            created_at: chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            ..Default::default()
        };
        publisher.publish(&rows, &store, &target, &opts).unwrap();

        assert!(target.join("Packages/nginx-1.20.1-10.el9.x86_64.rpm").is_file());
        assert!(target.join("repodata/repomd.xml").is_file());
        let repomd = std::fs::read_to_string(target.join("repodata/repomd.xml")).unwrap();
        assert!(repomd.contains("primary"));
    }
}
