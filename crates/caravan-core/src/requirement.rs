//! Ordered requirement collections with merging semantics.
//!
//! A [`Requirement`] is an insertion-ordered sequence of entries, unique
//! by package. Adding an entry for a package already present intersects
//! the version ranges and reconciles source options; a failed
//! intersection leaves the collection untouched and surfaces a
//! descriptive error.

use crate::error::{Error, Result};
use crate::package::PackageName;
use crate::version::VersionRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Source options attached to a requirement entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Git repository URI, when the requirement pins a git source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,
    /// Branch, tag, or commit to check out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Feature names requested for the distribution.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub features: BTreeSet<String>,
}

impl Options {
    /// Options pinning a git source.
    #[must_use]
    pub fn git(uri: impl Into<String>, reference: Option<String>) -> Self {
        Self {
            git: Some(uri.into()),
            reference,
            features: BTreeSet::new(),
        }
    }

    /// Are all fields unset?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.git.is_none() && self.reference.is_none() && self.features.is_empty()
    }
}

/// One requirement: a package, an acceptable version range, and
/// optional source options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementEntry {
    /// The required package.
    pub package: PackageName,
    /// Acceptable versions.
    #[serde(default)]
    pub range: VersionRange,
    /// Source options, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Options>,
}

impl RequirementEntry {
    /// Create an entry with no source options.
    #[must_use]
    pub fn new(package: PackageName, range: VersionRange) -> Self {
        Self {
            package,
            range,
            options: None,
        }
    }

    /// Attach source options.
    #[must_use]
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = Some(options);
        self
    }

    /// The git URI this entry pins, if any.
    #[must_use]
    pub fn git_uri(&self) -> Option<&str> {
        self.options.as_ref().and_then(|o| o.git.as_deref())
    }

    /// The git ref this entry pins, if any.
    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        self.options.as_ref().and_then(|o| o.reference.as_deref())
    }
}

/// An insertion-ordered requirement collection, unique by package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Requirement {
    entries: Vec<RequirementEntry>,
}

impl Requirement {
    /// An empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add entries, merging each into the collection.
    ///
    /// The operation is atomic: if any merge fails, the collection is
    /// left exactly as it was and the first error is returned.
    pub fn add<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = RequirementEntry>,
    {
        let mut staged = self.entries.clone();
        for incoming in entries {
            match staged.iter_mut().find(|e| e.package == incoming.package) {
                Some(existing) => *existing = merge_entries(existing, &incoming)?,
                None => staged.push(incoming),
            }
        }
        self.entries = staged;
        Ok(())
    }

    /// Add a single entry.
    pub fn add_entry(&mut self, entry: RequirementEntry) -> Result<()> {
        self.add(std::iter::once(entry))
    }

    /// Merge another collection into this one.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        self.add(other.entries.iter().cloned())
    }

    /// Is there an entry for the package?
    #[must_use]
    pub fn has(&self, package: &PackageName) -> bool {
        self.entries.iter().any(|e| &e.package == package)
    }

    /// Get the entry for a package.
    #[must_use]
    pub fn get(&self, package: &PackageName) -> Option<&RequirementEntry> {
        self.entries.iter().find(|e| &e.package == package)
    }

    /// Remove entries for the given packages.
    pub fn delete<'a, I>(&mut self, packages: I)
    where
        I: IntoIterator<Item = &'a PackageName>,
    {
        for package in packages {
            self.entries.retain(|e| &e.package != package);
        }
    }

    /// Is the collection empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &RequirementEntry> {
        self.entries.iter()
    }

    /// Entries as a slice, in insertion order.
    #[must_use]
    pub fn as_slice(&self) -> &[RequirementEntry] {
        &self.entries
    }
}

impl<'a> IntoIterator for &'a Requirement {
    type Item = &'a RequirementEntry;
    type IntoIter = std::slice::Iter<'a, RequirementEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<RequirementEntry> for Requirement {
    fn from_iter<I: IntoIterator<Item = RequirementEntry>>(iter: I) -> Self {
        let mut req = Self::new();
        // Entries from an iterator are trusted; conflicting duplicates
        // keep the first range that merged cleanly.
        for entry in iter {
            let _ = req.add_entry(entry);
        }
        req
    }
}

/// Merge an incoming entry into an existing one for the same package.
///
/// Ranges intersect; refs must agree when both are present; the first
/// git URI seen wins (a registry/git or git/git source mismatch is a
/// conflict surfaced at satisfaction time, not here).
fn merge_entries(
    existing: &RequirementEntry,
    incoming: &RequirementEntry,
) -> Result<RequirementEntry> {
    let range = existing
        .range
        .merge(&incoming.range)
        .map_err(|_| Error::RequirementConflict {
            package: existing.package.to_string(),
            existing: existing.range.to_string(),
            incoming: incoming.range.to_string(),
        })?;

    let options = match (&existing.options, &incoming.options) {
        (None, None) => None,
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (Some(a), Some(b)) => {
            if let (Some(ar), Some(br)) = (&a.reference, &b.reference)
                && ar != br
            {
                return Err(Error::RefConflict {
                    package: existing.package.to_string(),
                    existing: ar.clone(),
                    incoming: br.clone(),
                });
            }
            let mut merged = a.clone();
            if merged.git.is_none() {
                merged.git.clone_from(&b.git);
            }
            if merged.reference.is_none() {
                merged.reference.clone_from(&b.reference);
            }
            merged.features.extend(b.features.iter().cloned());
            Some(merged)
        }
    };

    Ok(RequirementEntry {
        package: existing.package.clone(),
        range,
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;
    use pretty_assertions::assert_eq;

    fn entry(package: &str, range: &str) -> RequirementEntry {
        RequirementEntry::new(
            PackageName::new(package),
            VersionRange::parse(range).unwrap(),
        )
    }

    #[test]
    fn keeps_insertion_order() {
        let mut req = Requirement::new();
        req.add([entry("B", "1.0"), entry("A", "2.0"), entry("C", "")])
            .unwrap();
        let names: Vec<_> = req.iter().map(|e| e.package.as_str()).collect();
        assert_eq!(names, ["B", "A", "C"]);
    }

    #[test]
    fn same_package_intersects_ranges() {
        let mut req = Requirement::new();
        req.add([entry("A", ">= 1.0")]).unwrap();
        req.add([entry("A", "< 2.0")]).unwrap();
        assert_eq!(req.len(), 1);
        let merged = &req.get(&PackageName::new("A")).unwrap().range;
        assert!(merged.accepts(&Version::parse("1.5").unwrap()));
        assert!(!merged.accepts(&Version::parse("2.0").unwrap()));
    }

    #[test]
    fn failed_merge_leaves_collection_intact() {
        let mut req = Requirement::new();
        req.add([entry("A", "== 1.0"), entry("B", "1.0")]).unwrap();
        let before = req.clone();

        let err = req.add([entry("B", "2.0"), entry("A", "== 2.0")]);
        assert!(matches!(err, Err(Error::RequirementConflict { .. })));
        assert_eq!(req, before);
        assert_eq!(
            err.unwrap_err().to_string(),
            "Couldn't merge version range == 2.0 with == 1.0 for package A"
        );
    }

    #[test]
    fn adding_twice_is_idempotent() {
        let mut req = Requirement::new();
        let e = entry("A", ">= 1.0, < 2.0");
        req.add_entry(e.clone()).unwrap();
        let once = req.clone();
        req.add_entry(e).unwrap();
        assert_eq!(req, once);
    }

    #[test]
    fn ref_conflict_is_rejected() {
        let mut req = Requirement::new();
        req.add_entry(
            entry("A", "").with_options(Options::git("https://example.com/a.git", Some("main".into()))),
        )
        .unwrap();
        let err = req.add_entry(
            entry("A", "").with_options(Options::git("https://example.com/a.git", Some("dev".into()))),
        );
        assert!(matches!(err, Err(Error::RefConflict { .. })));
    }

    #[test]
    fn git_options_survive_registry_merge() {
        let mut req = Requirement::new();
        req.add_entry(
            entry("A", "").with_options(Options::git("https://example.com/a.git", None)),
        )
        .unwrap();
        req.add_entry(entry("A", ">= 1.0")).unwrap();
        let merged = req.get(&PackageName::new("A")).unwrap();
        assert_eq!(merged.git_uri(), Some("https://example.com/a.git"));
    }

    #[test]
    fn delete_removes_entries() {
        let mut req = Requirement::new();
        req.add([entry("A", ""), entry("B", ""), entry("C", "")])
            .unwrap();
        let a = PackageName::new("A");
        let c = PackageName::new("C");
        req.delete([&a, &c]);
        assert_eq!(req.len(), 1);
        assert!(req.has(&PackageName::new("B")));
    }

    #[test]
    fn features_union_on_merge() {
        let mut a = Options::default();
        a.features.insert("ssl".into());
        let mut b = Options::default();
        b.features.insert("ipv6".into());

        let mut req = Requirement::new();
        req.add_entry(entry("A", "").with_options(a)).unwrap();
        req.add_entry(entry("A", "").with_options(b)).unwrap();

        let merged = req.get(&PackageName::new("A")).unwrap();
        let features = &merged.options.as_ref().unwrap().features;
        assert!(features.contains("ssl") && features.contains("ipv6"));
    }
}
