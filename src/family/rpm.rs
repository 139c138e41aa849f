//! RPM family: `repomd.xml` + `primary.xml` (spec §4.4).
//!
//! Grounded in `original_source/src/chantal/plugins/rpm/models.py`
//! (`RpmMetadata`, `get_nevra`) for the field set and NEVRA formatting,
//! and in `original_source/src/chantal/plugins/rpm/compression.py` for
//! the compression-from-href detection reused by [`crate::codec`].
//! Parsed with `quick-xml`'s event reader rather than full `serde`
//! deserialisation since both files use XML namespaces quick-xml's
//! serde layer handles awkwardly; the teacher favours hand-rolled,
//! streaming parsers (`src/backup/chunk_stream.rs`, `nom` for binary
//! formats) over heavyweight frameworks, so this keeps that texture.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ChantalError, Result};
use crate::family::{Family, FamilyMeta, FamilyParser, FetchAux, IndexDigest, PackageRecord};
use crate::tools::hex_to_digest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpmMetadata {
    pub name: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub epoch: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub obsoletes: Vec<String>,
    /// Cached NEVRA string, computed once at parse time.
    pub nevra: String,
    #[serde(default)]
    pub overflow: Map<String, Value>,
}

impl RpmMetadata {
    pub fn nevra(name: &str, epoch: Option<&str>, version: &str, release: &str, arch: &str) -> String {
        let epoch_str = epoch.map(|e| format!("{}:", e)).unwrap_or_default();
        format!("{}-{}{}-{}.{}", name, epoch_str, version, release, arch)
    }
}

pub struct RpmParser;

#[derive(Default)]
struct RepomdEntry {
    href: String,
    checksum_type: String,
    checksum: String,
}

fn parse_repomd(raw: &[u8]) -> Result<std::collections::HashMap<String, RepomdEntry>> {
    let mut reader = Reader::from_reader(raw);
    reader.trim_text(true);

    let mut entries = std::collections::HashMap::new();
    let mut current_type: Option<String> = None;
    let mut current = RepomdEntry::default();
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|err| ChantalError::Parse(format!("repomd.xml: {}", err)))?
        {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let local = local_name(e.name().as_ref());
                match local {
                    "data" => {
                        current = RepomdEntry::default();
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"type" {
                                current_type =
                                    Some(String::from_utf8_lossy(&attr.value).into_owned());
                            }
                        }
                    }
                    "location" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"href" {
                                current.href = String::from_utf8_lossy(&attr.value).into_owned();
                            }
                        }
                    }
                    "checksum" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"type" {
                                current.checksum_type =
                                    String::from_utf8_lossy(&attr.value).into_owned();
                            }
                        }
                    }
                    _ => {}
                }
                if matches!(e.name().as_ref().split(|b| *b == b':').last(), Some(b"checksum")) {
                    // text handled below via Event::Text following Start
                }
            }
            Event::Text(e) => {
                let text = e
                    .unescape()
                    .map_err(|err| ChantalError::Parse(err.to_string()))?
                    .into_owned();
                if current.checksum.is_empty() && !current.checksum_type.is_empty() {
                    current.checksum = text;
                }
            }
            Event::End(ref e) => {
                if local_name(e.name().as_ref()) == "data" {
                    if let Some(t) = current_type.take() {
                        entries.insert(t, std::mem::take(&mut current));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn local_name(qname: &[u8]) -> &str {
    let s = std::str::from_utf8(qname).unwrap_or("");
    s.rsplit(':').next().unwrap_or(s)
}

#[derive(Default)]
struct PkgBuilder {
    name: String,
    arch: String,
    epoch: Option<String>,
    ver: String,
    rel: String,
    checksum_type: String,
    checksum: String,
    summary: Option<String>,
    description: Option<String>,
    href: String,
    size_package: Option<u64>,
    provides: Vec<String>,
    requires: Vec<String>,
    conflicts: Vec<String>,
    obsoletes: Vec<String>,
    in_provides: bool,
    in_requires: bool,
    in_conflicts: bool,
    in_obsoletes: bool,
    text_target: Option<&'static str>,
}

fn parse_primary(raw: &[u8]) -> Result<Vec<PackageRecord>> {
    let mut reader = Reader::from_reader(raw);
    reader.trim_text(true);

    let mut records = Vec::new();
    let mut pkg: Option<PkgBuilder> = None;
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|err| ChantalError::Parse(format!("primary.xml: {}", err)))?
        {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let local = local_name(e.name().as_ref());
                match local {
                    "package" => pkg = Some(PkgBuilder::default()),
                    "name" => {
                        if let Some(p) = pkg.as_mut() {
                            p.text_target = Some("name");
                        }
                    }
                    "arch" => {
                        if let Some(p) = pkg.as_mut() {
                            p.text_target = Some("arch");
                        }
                    }
                    "summary" => {
                        if let Some(p) = pkg.as_mut() {
                            p.text_target = Some("summary");
                        }
                    }
                    "description" => {
                        if let Some(p) = pkg.as_mut() {
                            p.text_target = Some("description");
                        }
                    }
                    "version" => {
                        if let Some(p) = pkg.as_mut() {
                            for attr in e.attributes().flatten() {
                                let val = String::from_utf8_lossy(&attr.value).into_owned();
                                match attr.key.as_ref() {
                                    b"epoch" => {
                                        p.epoch = if val == "0" { None } else { Some(val) }
                                    }
                                    b"ver" => p.ver = val,
                                    b"rel" => p.rel = val,
                                    _ => {}
                                }
                            }
                        }
                    }
                    "checksum" => {
                        if let Some(p) = pkg.as_mut() {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"type" {
                                    p.checksum_type =
                                        String::from_utf8_lossy(&attr.value).into_owned();
                                }
                            }
                            p.text_target = Some("checksum");
                        }
                    }
                    "location" => {
                        if let Some(p) = pkg.as_mut() {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"href" {
                                    p.href = String::from_utf8_lossy(&attr.value).into_owned();
                                }
                            }
                        }
                    }
                    "size" => {
                        if let Some(p) = pkg.as_mut() {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"package" {
                                    p.size_package = String::from_utf8_lossy(&attr.value)
                                        .parse()
                                        .ok();
                                }
                            }
                        }
                    }
                    "provides" => {
                        if let Some(p) = pkg.as_mut() {
                            p.in_provides = true;
                        }
                    }
                    "requires" => {
                        if let Some(p) = pkg.as_mut() {
                            p.in_requires = true;
                        }
                    }
                    "conflicts" => {
                        if let Some(p) = pkg.as_mut() {
                            p.in_conflicts = true;
                        }
                    }
                    "obsoletes" => {
                        if let Some(p) = pkg.as_mut() {
                            p.in_obsoletes = true;
                        }
                    }
                    "entry" => {
                        if let Some(p) = pkg.as_mut() {
                            let name = e
                                .attributes()
                                .flatten()
                                .find(|a| a.key.as_ref() == b"name")
                                .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                            if let Some(name) = name {
                                if p.in_provides {
                                    p.provides.push(name);
                                } else if p.in_requires {
                                    p.requires.push(name);
                                } else if p.in_conflicts {
                                    p.conflicts.push(name);
                                } else if p.in_obsoletes {
                                    p.obsoletes.push(name);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                if let Some(p) = pkg.as_mut() {
                    if let Some(target) = p.text_target {
                        let text = e
                            .unescape()
                            .map_err(|err| ChantalError::Parse(err.to_string()))?
                            .trim()
                            .to_owned();
                        match target {
                            "name" => p.name = text,
                            "arch" => p.arch = text,
                            "summary" => p.summary = Some(text),
                            "description" => p.description = Some(text),
                            "checksum" => p.checksum = text,
                            _ => {}
                        }
                    }
                }
            }
            Event::End(ref e) => {
                let local = local_name(e.name().as_ref());
                match local {
                    "provides" => {
                        if let Some(p) = pkg.as_mut() {
                            p.in_provides = false;
                        }
                    }
                    "requires" => {
                        if let Some(p) = pkg.as_mut() {
                            p.in_requires = false;
                        }
                    }
                    "conflicts" => {
                        if let Some(p) = pkg.as_mut() {
                            p.in_conflicts = false;
                        }
                    }
                    "obsoletes" => {
                        if let Some(p) = pkg.as_mut() {
                            p.in_obsoletes = false;
                        }
                    }
                    "name" | "arch" | "summary" | "description" | "checksum" => {
                        if let Some(p) = pkg.as_mut() {
                            p.text_target = None;
                        }
                    }
                    "package" => {
                        if let Some(p) = pkg.take() {
                            let nevra = RpmMetadata::nevra(
                                &p.name,
                                p.epoch.as_deref(),
                                &p.ver,
                                &p.rel,
                                &p.arch,
                            );
                            let sha256_hint = if p.checksum_type.eq_ignore_ascii_case("sha256") {
                                hex_to_digest(&p.checksum)
                            } else {
                                None
                            };
                            let filename = p
                                .href
                                .rsplit('/')
                                .next()
                                .unwrap_or(&p.href)
                                .to_string();
                            records.push(PackageRecord {
                                filename,
                                relative_url: p.href.clone(),
                                sha256_hint,
                                size_hint: p.size_package,
                                metadata: FamilyMeta::Rpm(RpmMetadata {
                                    name: p.name,
                                    version: p.ver,
                                    release: p.rel,
                                    arch: p.arch,
                                    epoch: p.epoch,
                                    summary: p.summary,
                                    description: p.description,
                                    provides: p.provides,
                                    requires: p.requires,
                                    conflicts: p.conflicts,
                                    obsoletes: p.obsoletes,
                                    nevra,
                                    overflow: Map::new(),
                                }),
                            });
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

impl FamilyParser for RpmParser {
    fn family(&self) -> Family {
        Family::Rpm
    }

    fn parse_index(
        &self,
        raw: &[u8],
        fetch_aux: &mut FetchAux,
    ) -> Result<(Vec<PackageRecord>, IndexDigest)> {
        let entries = parse_repomd(raw)?;
        let primary = entries
            .get("primary")
            .ok_or_else(|| ChantalError::Parse("repomd.xml has no primary data".into()))?;

        let primary_raw = fetch_aux(&primary.href)?;
        let decompressed = crate::codec::decompress_by_name(&primary.href, &primary_raw)?;
        let records = parse_primary(&decompressed)?;

        let content_sha256 = if primary.checksum_type.eq_ignore_ascii_case("sha256") {
            hex_to_digest(&primary.checksum)
        } else {
            None
        };

        Ok((
            records,
            IndexDigest {
                etag: None,
                last_modified: None,
                content_sha256,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPOMD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <data type="primary">
    <checksum type="sha256">aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa</checksum>
    <location href="repodata/primary.xml"/>
    <size>123</size>
  </data>
</repomd>"#;

    const PRIMARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="1">
  <package type="rpm">
    <name>nginx</name>
    <arch>x86_64</arch>
    <version epoch="0" ver="1.20.1" rel="10.el9"/>
    <checksum type="sha256" pkgid="YES">bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb</checksum>
    <summary>high performance web server</summary>
    <location href="Packages/nginx-1.20.1-10.el9.x86_64.rpm"/>
    <size package="102400"/>
    <format>
      <rpm:provides>
        <rpm:entry name="nginx"/>
      </rpm:provides>
      <rpm:requires>
        <rpm:entry name="libc.so.6"/>
      </rpm:requires>
    </format>
  </package>
</metadata>"#;

    #[test]
    fn parses_repomd_and_primary() {
        let mut fetched = Vec::new();
        let parser = RpmParser;
        let (records, digest) = parser
            .parse_index(REPOMD.as_bytes(), &mut |href| {
                fetched.push(href.to_string());
                Ok(PRIMARY.as_bytes().to_vec())
            })
            .unwrap();

        assert_eq!(fetched, vec!["repodata/primary.xml"]);
        assert!(digest.content_sha256.is_some());
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.filename, "nginx-1.20.1-10.el9.x86_64.rpm");
        match &rec.metadata {
            FamilyMeta::Rpm(meta) => {
                assert_eq!(meta.nevra, "nginx-1.20.1-10.el9.x86_64");
                assert_eq!(meta.provides, vec!["nginx".to_string()]);
                assert_eq!(meta.requires, vec!["libc.so.6".to_string()]);
            }
            _ => panic!("expected rpm metadata"),
        }
    }
}
