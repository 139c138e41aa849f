//! Alpine APK family: `APKINDEX.tar.gz` (spec §4.4).
//!
//! Field mapping grounded directly in
//! `original_source/src/chantal/plugins/apk/models.py`'s `ApkMetadata`
//! and its APKINDEX `C:`/`P:`/`V:`/... prefix convention. The checksum
//! field is APK's own `Q1`-prefixed base64 SHA1, not a sha256 the store
//! can use directly, so `sha256_hint` is left `None` and the real
//! content digest is computed at ingest time from the downloaded blob.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Read;

use crate::error::{ChantalError, Result};
use crate::family::{Family, FamilyMeta, FamilyParser, FetchAux, IndexDigest, PackageRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApkMetadata {
    pub name: String,
    pub version: String,
    pub architecture: String,
    pub checksum: String,
    pub size: u64,
    pub installed_size: Option<u64>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub license: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    pub origin: Option<String>,
    pub maintainer: Option<String>,
    pub build_time: Option<u64>,
    #[serde(default)]
    pub overflow: Map<String, Value>,
}

pub struct ApkParser;

fn extract_apkindex(raw: &[u8]) -> Result<String> {
    // APKINDEX.tar.gz is a gzip-compressed tar archive containing an
    // `APKINDEX` text member (plus `DESCRIPTION`/signature members this
    // engine does not need).
    let decompressed = crate::codec::decompress_by_name("APKINDEX.tar.gz", raw)?;
    let mut archive = tar::Archive::new(decompressed.as_slice());
    for entry in archive
        .entries()
        .map_err(|err| ChantalError::Parse(format!("APKINDEX.tar.gz: {}", err)))?
    {
        let mut entry = entry.map_err(|err| ChantalError::Parse(err.to_string()))?;
        let path = entry
            .path()
            .map_err(|err| ChantalError::Parse(err.to_string()))?
            .into_owned();
        if path.file_name().and_then(|n| n.to_str()) == Some("APKINDEX") {
            let mut buf = String::new();
            entry
                .read_to_string(&mut buf)
                .map_err(|err| ChantalError::Parse(format!("APKINDEX: not utf-8: {}", err)))?;
            return Ok(buf);
        }
    }
    Err(ChantalError::Parse(
        "APKINDEX.tar.gz has no APKINDEX member".into(),
    ))
}

fn parse_entries(text: &str) -> Vec<std::collections::HashMap<char, String>> {
    let mut entries = Vec::new();
    let mut current = std::collections::HashMap::new();

    for line in text.lines() {
        if line.is_empty() {
            if !current.is_empty() {
                entries.push(std::mem::take(&mut current));
            }
            continue;
        }
        let mut chars = line.chars();
        if let (Some(prefix), Some(':')) = (chars.next(), chars.next()) {
            let value: String = chars.collect();
            current.insert(prefix, value);
        }
    }
    if !current.is_empty() {
        entries.push(current);
    }
    entries
}

impl FamilyParser for ApkParser {
    fn family(&self) -> Family {
        Family::Apk
    }

    fn parse_index(
        &self,
        raw: &[u8],
        _fetch_aux: &mut FetchAux,
    ) -> Result<(Vec<PackageRecord>, IndexDigest)> {
        let text = extract_apkindex(raw)?;
        let mut records = Vec::new();

        for entry in parse_entries(&text) {
            let name = entry
                .get(&'P')
                .ok_or_else(|| ChantalError::Parse("APKINDEX entry missing P: (name)".into()))?
                .clone();
            let version = entry
                .get(&'V')
                .ok_or_else(|| ChantalError::Parse("APKINDEX entry missing V: (version)".into()))?
                .clone();
            let architecture = entry
                .get(&'A')
                .ok_or_else(|| {
                    ChantalError::Parse("APKINDEX entry missing A: (architecture)".into())
                })?
                .clone();
            let checksum = entry
                .get(&'C')
                .ok_or_else(|| {
                    ChantalError::Parse("APKINDEX entry missing C: (checksum)".into())
                })?
                .clone();
            let size: u64 = entry
                .get(&'S')
                .ok_or_else(|| ChantalError::Parse("APKINDEX entry missing S: (size)".into()))?
                .parse()
                .map_err(|_| ChantalError::Parse("APKINDEX S: not a number".into()))?;

            let filename = format!("{}-{}.apk", name, version);
            let relative_url = format!("{}/{}", architecture, filename);

            records.push(PackageRecord {
                filename,
                relative_url,
                sha256_hint: None,
                size_hint: Some(size),
                metadata: FamilyMeta::Apk(ApkMetadata {
                    name,
                    version,
                    architecture,
                    checksum,
                    size,
                    installed_size: entry.get(&'I').and_then(|v| v.parse().ok()),
                    description: entry.get(&'T').cloned(),
                    url: entry.get(&'U').cloned(),
                    license: entry.get(&'L').cloned(),
                    dependencies: entry
                        .get(&'D')
                        .map(|v| v.split_whitespace().map(|s| s.to_string()).collect())
                        .unwrap_or_default(),
                    provides: entry
                        .get(&'p')
                        .map(|v| v.split_whitespace().map(|s| s.to_string()).collect())
                        .unwrap_or_default(),
                    origin: entry.get(&'o').cloned(),
                    maintainer: entry.get(&'m').cloned(),
                    build_time: entry.get(&'t').and_then(|v| v.parse().ok()),
                    overflow: Map::new(),
                }),
            });
        }

        Ok((records, IndexDigest::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_apkindex_entries() {
        let text = "C:Q1abcdefghijklmnopqrstuvwxyz0123456=\nP:musl\nV:1.2.3-r4\nA:x86_64\nS:123456\nI:339968\nT:the musl c library\nL:MIT\nD:so:libc.musl-x86_64.so.1\np:so:libc.musl-x86_64.so.1=1\no:musl\nm:Packager <packager@example.org>\nt:1700000000\n";
        let entries = parse_entries(text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].get(&'P').unwrap(), "musl");
    }

    #[test]
    fn missing_required_field_errors() {
        let text = "P:musl\nV:1.2.3-r4\nA:x86_64\n";
        let entries = parse_entries(text);
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].contains_key(&'C'));
    }
}
