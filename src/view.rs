//! View Composer (spec §4.7).
//!
//! Unions packages across members (repositories or snapshots) sharing
//! a family, deduplicating on family-native identity. Resolved against
//! the open question in spec §9: default conflict policy is
//! `first-wins`, with `last-wins` and `fail` available (see
//! DESIGN.md).
//!
//! `ConflictPolicy` and `MemberRef` are the vocabulary the Catalog's
//! persisted `views`/`view_members` tables are built from (spec §2:
//! "Views are mutable... created by config/admin, updated by sync").
//! `Catalog::compose_view`/`compose_view_snapshot` drive this
//! `ViewComposer` over a View's stored members; this module itself
//! holds no database handle.

use crate::catalog::{Catalog, PackageRow};
use crate::error::{ChantalError, Result};
use crate::family::Family;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    FirstWins,
    LastWins,
    Fail,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::FirstWins
    }
}

#[derive(Debug, Clone, Copy)]
pub enum MemberRef {
    Repository(i64),
    Snapshot(i64),
}

pub struct ViewComposer<'a> {
    catalog: &'a Catalog,
}

impl<'a> ViewComposer<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Compute the resolved package set for an ordered list of members.
    /// All members must share `family` (spec §4.7 "all members must
    /// share a family") — a mismatched member is a `Parse` error since
    /// it indicates a misconfigured view rather than a runtime race.
    pub fn compose(
        &self,
        members: &[MemberRef],
        family: Family,
        policy: ConflictPolicy,
    ) -> Result<Vec<PackageRow>> {
        let mut by_identity: std::collections::HashMap<String, PackageRow> =
            std::collections::HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for member in members {
            let packages = match member {
                MemberRef::Repository(id) => self.catalog.list_live_packages(*id)?,
                MemberRef::Snapshot(id) => self.catalog.list_snapshot_packages(*id)?,
            };

            for pkg in packages {
                if pkg.family != family {
                    return Err(ChantalError::Parse(format!(
                        "view member package {} has family {:?}, expected {:?}",
                        pkg.family_identity, pkg.family, family
                    )));
                }

                match by_identity.get(&pkg.family_identity) {
                    None => {
                        order.push(pkg.family_identity.clone());
                        by_identity.insert(pkg.family_identity.clone(), pkg);
                    }
                    Some(existing) if existing.sha256 == pkg.sha256 => {
                        // Same content via a different member: no conflict.
                    }
                    Some(_) => match policy {
                        ConflictPolicy::FirstWins => {}
                        ConflictPolicy::LastWins => {
                            by_identity.insert(pkg.family_identity.clone(), pkg);
                        }
                        ConflictPolicy::Fail => {
                            return Err(ChantalError::Conflict {
                                path: format!(
                                    "view member disagrees on sha256 for {}",
                                    pkg.family_identity
                                ),
                            });
                        }
                    },
                }
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|identity| by_identity.remove(&identity))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NewPackage;
    use crate::family::helm::HelmMetadata;
    use crate::family::FamilyMeta;

    fn helm_pkg(name: &str, version: &str, sha: u8) -> NewPackage {
        NewPackage {
            sha256: [sha; 32],
            size: 10,
            filename: format!("{}-{}.tgz", name, version),
            repository_id: 0,
            metadata: FamilyMeta::Helm(HelmMetadata {
                name: name.to_string(),
                version: version.to_string(),
                app_version: None,
                description: None,
                home: None,
                icon: None,
                keywords: Vec::new(),
                sources: Vec::new(),
                maintainers: Vec::new(),
                dependencies: Vec::new(),
                created: None,
                digest: None,
                urls: Vec::new(),
                api_version: None,
                chart_type: None,
                deprecated: None,
                annotations: Default::default(),
                kube_version: None,
                overflow: serde_json::Map::new(),
            }),
        }
    }

    #[test]
    fn first_wins_keeps_earlier_member_version() {
        let mut catalog = Catalog::open_in_memory().unwrap();
        let repo_a = catalog
            .upsert_repository("a", Family::Helm, "https://a.example.org", true)
            .unwrap();
        let repo_b = catalog
            .upsert_repository("b", Family::Helm, "https://b.example.org", true)
            .unwrap();

        let mut pkg_a = helm_pkg("nginx", "15.0.0", 1);
        pkg_a.repository_id = repo_a;
        catalog.upsert_package(repo_a, &pkg_a).unwrap();

        // Same name+version (same family-native identity) but a
        // different sha256 — e.g. upstream repacked the chart.
        let mut pkg_b = helm_pkg("nginx", "15.0.0", 2);
        pkg_b.repository_id = repo_b;
        catalog.upsert_package(repo_b, &pkg_b).unwrap();

        let composer = ViewComposer::new(&catalog);
        let resolved = composer
            .compose(
                &[MemberRef::Repository(repo_a), MemberRef::Repository(repo_b)],
                Family::Helm,
                ConflictPolicy::FirstWins,
            )
            .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].sha256, [1u8; 32]);
    }

    #[test]
    fn fail_policy_rejects_disagreement() {
        let mut catalog = Catalog::open_in_memory().unwrap();
        let repo_a = catalog
            .upsert_repository("a", Family::Helm, "https://a.example.org", true)
            .unwrap();
        let repo_b = catalog
            .upsert_repository("b", Family::Helm, "https://b.example.org", true)
            .unwrap();

        let mut pkg_a = helm_pkg("nginx", "15.0.0", 1);
        pkg_a.repository_id = repo_a;
        catalog.upsert_package(repo_a, &pkg_a).unwrap();
        let mut pkg_b = helm_pkg("nginx", "15.0.0", 2);
        pkg_b.repository_id = repo_b;
        catalog.upsert_package(repo_b, &pkg_b).unwrap();

        let composer = ViewComposer::new(&catalog);
        let err = composer
            .compose(
                &[MemberRef::Repository(repo_a), MemberRef::Repository(repo_b)],
                Family::Helm,
                ConflictPolicy::Fail,
            )
            .unwrap_err();
        assert!(matches!(err, ChantalError::Conflict { .. }));
    }
}
