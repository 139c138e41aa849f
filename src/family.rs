//! Family Parsers (spec §4.4).
//!
//! A family parser turns raw upstream index bytes into normalised
//! `PackageRecord`s. Dispatch is a compiled-in registry keyed by the
//! `family` string from config, per the Design Notes in spec §9 ("no
//! dynamic loading is required — families are compiled in").

pub mod apk;
pub mod deb;
pub mod helm;
pub mod rpm;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Rpm,
    Deb,
    Apk,
    Helm,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Family::Rpm => "rpm",
            Family::Deb => "deb",
            Family::Apk => "apk",
            Family::Helm => "helm",
        };
        f.write_str(s)
    }
}

/// Tagged-union package metadata (spec §9 "Structured metadata").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum FamilyMeta {
    Rpm(rpm::RpmMetadata),
    Deb(deb::DebMetadata),
    Apk(apk::ApkMetadata),
    Helm(helm::HelmMetadata),
}

impl FamilyMeta {
    pub fn family(&self) -> Family {
        match self {
            FamilyMeta::Rpm(_) => Family::Rpm,
            FamilyMeta::Deb(_) => Family::Deb,
            FamilyMeta::Apk(_) => Family::Apk,
            FamilyMeta::Helm(_) => Family::Helm,
        }
    }

    /// Family-native identity used for diffing and view deduplication
    /// (spec §4.5 step 3, §4.7): RPM NEVRA, DEB name+version+arch, APK
    /// name+version+arch, Helm name+version.
    pub fn identity(&self) -> String {
        match self {
            FamilyMeta::Rpm(m) => m.nevra.clone(),
            FamilyMeta::Deb(m) => format!("{}_{}_{}", m.package, m.version, m.architecture),
            FamilyMeta::Apk(m) => format!("{}-{}-{}", m.name, m.version, m.architecture),
            FamilyMeta::Helm(m) => format!("{}-{}", m.name, m.version),
        }
    }
}

/// One entry discovered in an upstream index (spec §4.4).
#[derive(Debug, Clone)]
pub struct PackageRecord {
    pub filename: String,
    pub relative_url: String,
    pub sha256_hint: Option<[u8; 32]>,
    pub size_hint: Option<u64>,
    pub metadata: FamilyMeta,
}

/// Validator state returned alongside a parsed index, stored by the Sync
/// Engine for the conditional-GET short-circuit (spec §4.5 step 1).
#[derive(Debug, Clone, Default)]
pub struct IndexDigest {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_sha256: Option<[u8; 32]>,
}

/// Callback a parser uses to fetch index files it discovers while
/// parsing the root index (APT's `Packages` under `Release`, RPM's
/// `primary.xml` under `repomd.xml`, APK's signed `APKINDEX.tar.gz`).
pub type FetchAux<'a> = dyn FnMut(&str) -> Result<Vec<u8>> + 'a;

pub trait FamilyParser {
    fn family(&self) -> Family;

    fn parse_index(
        &self,
        raw: &[u8],
        fetch_aux: &mut FetchAux,
    ) -> Result<(Vec<PackageRecord>, IndexDigest)>;
}

pub fn parser_for(family: Family) -> Box<dyn FamilyParser> {
    match family {
        Family::Rpm => Box::new(rpm::RpmParser),
        Family::Deb => Box::new(deb::DebParser),
        Family::Apk => Box::new(apk::ApkParser),
        Family::Helm => Box::new(helm::HelmParser),
    }
}
