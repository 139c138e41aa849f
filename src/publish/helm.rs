//! Helm Publisher (spec §4.8).
//!
//! Hardlinks `.tgz` files into the publish root and writes `index.yaml`
//! with each entry's `urls` set to the chart's filename relative to
//! that root, the shape `helm repo index` itself produces for a
//! same-directory index.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::catalog::PackageRow;
use crate::error::{ChantalError, Result};
use crate::family::helm::HelmMetadata;
use crate::family::{Family, FamilyMeta};
use crate::publish::{FamilyPublisher, PublishOptions};
use crate::store::ContentStore;

pub struct HelmPublisher;

#[derive(Serialize)]
struct IndexFile {
    #[serde(rename = "apiVersion")]
    api_version: String,
    generated: chrono::DateTime<chrono::Utc>,
    entries: BTreeMap<String, Vec<HelmMetadata>>,
}

impl FamilyPublisher for HelmPublisher {
    fn family(&self) -> Family {
        Family::Helm
    }

    fn publish(
        &self,
        packages: &[PackageRow],
        store: &ContentStore,
        target: &Path,
        opts: &PublishOptions,
    ) -> Result<()> {
        let rows: Vec<(&PackageRow, HelmMetadata)> = packages
            .iter()
            .filter_map(|row| match &row.metadata {
                FamilyMeta::Helm(meta) => Some((row, meta.clone())),
                _ => None,
            })
            .collect();

        crate::tools::fs::atomic_publish_dir(target, |staging| {
            let mut entries: BTreeMap<String, Vec<HelmMetadata>> = BTreeMap::new();

            for (row, mut meta) in rows {
                store.hardlink(&row.sha256, &staging.join(&row.filename), opts.overwrite)?;
                meta.urls = vec![row.filename.clone()];
                meta.digest = Some(crate::tools::digest_to_hex(&row.sha256));
                entries.entry(meta.name.clone()).or_default().push(meta);
            }

            let index = IndexFile {
                api_version: "v1".to_string(),
                generated: opts.created_at,
                entries,
            };
            let yaml = serde_yaml::to_string(&index)
                .map_err(|err| ChantalError::Parse(err.to_string()))?;
            std::fs::write(staging.join("index.yaml"), yaml.as_bytes())?;

            Ok(())
        })
    }
}
