//! Publisher (spec §4.8).
//!
//! Materialises a repository, snapshot, or view into a directory tree:
//! hardlinks packages from the pool under their upstream filenames and
//! regenerates family-correct metadata. Every family publisher stages
//! into a temp directory via `tools::fs::atomic_publish_dir` so a
//! failure never leaves a partially-written target (spec §4.8,
//! invariant 4's "publish idempotence").

pub mod apk;
pub mod deb;
pub mod helm;
pub mod rpm;

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::catalog::PackageRow;
use crate::codec::CompressionFormat;
use crate::error::Result;
use crate::family::Family;
use crate::store::ContentStore;
use crate::tools::gpg::SigningKey;

/// Options shared by every family publisher. `created_at` anchors
/// deterministic output (spec §8 invariant 4: "byte-identical target
/// directories modulo mtimes, which must be deterministic").
pub struct PublishOptions<'a> {
    pub compression: CompressionFormat,
    pub signing_key: Option<&'a SigningKey>,
    pub created_at: DateTime<Utc>,
    pub overwrite: bool,
}

impl<'a> Default for PublishOptions<'a> {
    fn default() -> Self {
        Self {
            compression: CompressionFormat::Gzip,
            signing_key: None,
            created_at: Utc::now(),
            overwrite: false,
        }
    }
}

pub trait FamilyPublisher {
    fn family(&self) -> Family;

    fn publish(
        &self,
        packages: &[PackageRow],
        store: &ContentStore,
        target: &Path,
        opts: &PublishOptions,
    ) -> Result<()>;
}

pub fn publisher_for(family: Family) -> Box<dyn FamilyPublisher> {
    match family {
        Family::Rpm => Box::new(rpm::RpmPublisher),
        Family::Deb => Box::new(deb::DebPublisher),
        Family::Apk => Box::new(apk::ApkPublisher),
        Family::Helm => Box::new(helm::HelmPublisher),
    }
}

/// Minimal XML text escaping shared by the RPM publisher's hand-built
/// metadata documents.
pub(crate) fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
