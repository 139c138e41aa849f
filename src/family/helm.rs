//! Helm family: chart repository `index.yaml` (spec §4.4).
//!
//! Field mapping grounded directly in
//! `original_source/src/chantal/plugins/helm/models.py`'s
//! `HelmMetadata`/`HelmMaintainer`/`HelmDependency`, including Helm's
//! camelCase index field names (`appVersion`, `apiVersion`,
//! `kubeVersion`) via `serde(rename = ...)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{ChantalError, Result};
use crate::family::{Family, FamilyMeta, FamilyParser, FetchAux, IndexDigest, PackageRecord};
use crate::tools::hex_to_digest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmMaintainer {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmDependency {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, rename = "import-values")]
    pub import_values: Vec<Value>,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmMetadata {
    pub name: String,
    pub version: String,
    #[serde(default, rename = "appVersion")]
    pub app_version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub maintainers: Vec<HelmMaintainer>,
    #[serde(default)]
    pub dependencies: Vec<HelmDependency>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, rename = "apiVersion")]
    pub api_version: Option<String>,
    #[serde(default, rename = "type")]
    pub chart_type: Option<String>,
    #[serde(default)]
    pub deprecated: Option<bool>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, rename = "kubeVersion")]
    pub kube_version: Option<String>,
    #[serde(default)]
    pub overflow: Map<String, Value>,
}

pub struct HelmParser;

#[derive(Debug, Deserialize)]
struct IndexFile {
    #[serde(default)]
    entries: BTreeMap<String, Vec<HelmMetadata>>,
}

impl FamilyParser for HelmParser {
    fn family(&self) -> Family {
        Family::Helm
    }

    fn parse_index(
        &self,
        raw: &[u8],
        _fetch_aux: &mut FetchAux,
    ) -> Result<(Vec<PackageRecord>, IndexDigest)> {
        let index: IndexFile = serde_yaml::from_slice(raw)
            .map_err(|err| ChantalError::Parse(format!("index.yaml: {}", err)))?;

        let mut records = Vec::new();
        for (_chart_name, versions) in index.entries {
            for meta in versions {
                let url = meta
                    .urls
                    .first()
                    .ok_or_else(|| {
                        ChantalError::Parse(format!(
                            "chart {}-{} has no urls entry",
                            meta.name, meta.version
                        ))
                    })?
                    .clone();
                let filename = url.rsplit('/').next().unwrap_or(&url).to_string();
                let sha256_hint = meta
                    .digest
                    .as_deref()
                    .and_then(|d| d.strip_prefix("sha256:").or(Some(d)))
                    .and_then(hex_to_digest);

                records.push(PackageRecord {
                    filename,
                    relative_url: url,
                    sha256_hint,
                    size_hint: None,
                    metadata: FamilyMeta::Helm(meta),
                });
            }
        }

        Ok((records, IndexDigest::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX_YAML: &str = r#"
apiVersion: v1
entries:
  nginx:
    - name: nginx
      version: 15.0.0
      appVersion: "1.25.0"
      description: NGINX Open Source Chart
      digest: sha256:eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee
      urls:
        - https://charts.example.org/nginx-15.0.0.tgz
      maintainers:
        - name: bitnami-bot
          email: bot@example.org
"#;

    #[test]
    fn parses_index_entries() {
        let parser = HelmParser;
        let (records, _) = parser
            .parse_index(INDEX_YAML.as_bytes(), &mut |_| unreachable!())
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].filename, "nginx-15.0.0.tgz");
        assert!(records[0].sha256_hint.is_some());
        match &records[0].metadata {
            FamilyMeta::Helm(m) => {
                assert_eq!(m.app_version.as_deref(), Some("1.25.0"));
                assert_eq!(m.maintainers.len(), 1);
            }
            _ => panic!("expected helm metadata"),
        }
    }

    #[test]
    fn rejects_chart_without_urls() {
        let parser = HelmParser;
        let broken = "entries:\n  foo:\n    - name: foo\n      version: 1.0.0\n";
        assert!(parser
            .parse_index(broken.as_bytes(), &mut |_| unreachable!())
            .is_err());
    }
}
