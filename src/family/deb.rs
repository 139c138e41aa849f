//! DEB/APT family: `Release` + `Packages` stanzas (spec §4.4).
//!
//! RFC2822-style stanza parsing, hand-rolled the way the teacher parses
//! its own line-oriented formats (`src/tools.rs`'s `file_get_contents`
//! callers, `src/config/datastore.rs`'s `SectionConfig`) rather than
//! pulling in a dedicated Debian-control-file crate.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ChantalError, Result};
use crate::family::{Family, FamilyMeta, FamilyParser, FetchAux, IndexDigest, PackageRecord};
use crate::tools::hex_to_digest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebMetadata {
    pub package: String,
    pub version: String,
    pub architecture: String,
    pub maintainer: Option<String>,
    pub description: Option<String>,
    pub section: Option<String>,
    pub priority: Option<String>,
    pub installed_size: Option<u64>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub recommends: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    pub md5sum: Option<String>,
    pub sha256: Option<String>,
    #[serde(default)]
    pub overflow: Map<String, Value>,
}

pub struct DebParser;

/// One unfolded `key: value` stanza, RFC2822-style (continuation lines
/// beginning with whitespace are folded into the previous value).
struct Stanza(std::collections::HashMap<String, String>);

impl Stanza {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    fn comma_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn split_stanzas(text: &str) -> Vec<Stanza> {
    let mut stanzas = Vec::new();
    let mut fields: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    let mut last_key: Option<String> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            if !fields.is_empty() {
                stanzas.push(Stanza(std::mem::take(&mut fields)));
                last_key = None;
            }
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(key) = &last_key {
                if let Some(existing) = fields.get_mut(key) {
                    existing.push('\n');
                    existing.push_str(line.trim());
                }
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_string();
            let value = value.trim().to_string();
            fields.insert(key.clone(), value);
            last_key = Some(key);
        }
    }
    if !fields.is_empty() {
        stanzas.push(Stanza(fields));
    }
    stanzas
}

impl FamilyParser for DebParser {
    fn family(&self) -> Family {
        Family::Deb
    }

    /// `raw` is the (already-fetched) `Packages` file for a single
    /// suite/component/architecture combination; the caller is
    /// responsible for iterating the combinations named in a `Release`
    /// file and invoking this once per combination (spec §4.4's
    /// parenthetical on DEB's multi-file root index). `fetch_aux` is
    /// unused for DEB but kept for a uniform trait surface.
    fn parse_index(
        &self,
        raw: &[u8],
        _fetch_aux: &mut FetchAux,
    ) -> Result<(Vec<PackageRecord>, IndexDigest)> {
        let text = std::str::from_utf8(raw)
            .map_err(|err| ChantalError::Parse(format!("Packages: not utf-8: {}", err)))?;

        let mut records = Vec::new();
        for stanza in split_stanzas(text) {
            let package = stanza
                .get("Package")
                .ok_or_else(|| ChantalError::Parse("stanza missing Package field".into()))?
                .to_string();
            let version = stanza
                .get("Version")
                .ok_or_else(|| ChantalError::Parse("stanza missing Version field".into()))?
                .to_string();
            let architecture = stanza
                .get("Architecture")
                .unwrap_or("all")
                .to_string();
            let filename = stanza
                .get("Filename")
                .ok_or_else(|| ChantalError::Parse("stanza missing Filename field".into()))?
                .to_string();
            let sha256 = stanza.get("SHA256").map(|s| s.to_string());
            let size_hint = stanza.get("Size").and_then(|s| s.parse().ok());

            records.push(PackageRecord {
                filename: filename.rsplit('/').next().unwrap_or(&filename).to_string(),
                relative_url: filename,
                sha256_hint: sha256.as_deref().and_then(hex_to_digest),
                size_hint,
                metadata: FamilyMeta::Deb(DebMetadata {
                    package,
                    version,
                    architecture,
                    maintainer: stanza.get("Maintainer").map(|s| s.to_string()),
                    description: stanza.get("Description").map(|s| s.to_string()),
                    section: stanza.get("Section").map(|s| s.to_string()),
                    priority: stanza.get("Priority").map(|s| s.to_string()),
                    installed_size: stanza.get("Installed-Size").and_then(|s| s.parse().ok()),
                    depends: stanza.comma_list("Depends"),
                    recommends: stanza.comma_list("Recommends"),
                    conflicts: stanza.comma_list("Conflicts"),
                    provides: stanza.comma_list("Provides"),
                    md5sum: stanza.get("MD5sum").map(|s| s.to_string()),
                    sha256,
                    overflow: Map::new(),
                }),
            });
        }

        Ok((records, IndexDigest::default()))
    }
}
