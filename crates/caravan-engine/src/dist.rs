//! Distribution records and their pipeline state.
//!
//! A [`Distribution`] tracks one distfile through the
//! resolve → fetch → configure → install pipeline. Stage flags are
//! monotonic: once set they are never cleared, and setting a later
//! stage implies the earlier ones. Scheduling latches (per-stage
//! `registered`, per-stage `deps_registered`) are owned by the master
//! and live alongside the flags.

use caravan_core::{PackageName, Requirement, RequirementEntry, Version, VersionRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Where a distribution comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// A registry archive.
    Cpan,
    /// A git checkout.
    Git,
    /// A local directory or archive.
    Local,
}

impl Source {
    /// Source name as it appears in job payloads and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpan => "cpan",
            Self::Git => "git",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One package a distribution makes available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provide {
    /// The provided package.
    pub package: PackageName,
    /// The provided version, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    /// Git ref the package was resolved from, for git sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl Provide {
    /// Create a provide entry without a git ref.
    #[must_use]
    pub fn new(package: PackageName, version: Option<Version>) -> Self {
        Self {
            package,
            version,
            reference: None,
        }
    }
}

/// Requirement phases a distribution declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Needed before the configure step runs.
    Configure,
    /// Needed to build.
    Build,
    /// Needed to run tests.
    Test,
    /// Needed at runtime.
    Runtime,
}

impl Phase {
    /// Every phase, in pipeline order.
    pub const ALL: [Self; 4] = [Self::Configure, Self::Build, Self::Test, Self::Runtime];

    /// Phase name as it appears in metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Build => "build",
            Self::Test => "test",
            Self::Runtime => "runtime",
        }
    }
}

/// Per-phase requirement sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRequirements {
    #[serde(default, skip_serializing_if = "Requirement::is_empty")]
    configure: Requirement,
    #[serde(default, skip_serializing_if = "Requirement::is_empty")]
    build: Requirement,
    #[serde(default, skip_serializing_if = "Requirement::is_empty")]
    test: Requirement,
    #[serde(default, skip_serializing_if = "Requirement::is_empty")]
    runtime: Requirement,
}

impl PhaseRequirements {
    /// An empty set for every phase.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The requirement set of one phase.
    #[must_use]
    pub fn phase(&self, phase: Phase) -> &Requirement {
        match phase {
            Phase::Configure => &self.configure,
            Phase::Build => &self.build,
            Phase::Test => &self.test,
            Phase::Runtime => &self.runtime,
        }
    }

    /// Mutable access to one phase.
    pub fn phase_mut(&mut self, phase: Phase) -> &mut Requirement {
        match phase {
            Phase::Configure => &mut self.configure,
            Phase::Build => &mut self.build,
            Phase::Test => &mut self.test,
            Phase::Runtime => &mut self.runtime,
        }
    }

    /// Merge the given phases into one flat requirement collection.
    pub fn merged(&self, phases: &[Phase]) -> caravan_core::Result<Requirement> {
        let mut flat = Requirement::new();
        for phase in phases {
            flat.merge(self.phase(*phase))?;
        }
        Ok(flat)
    }

    /// Replace every phase that is non-empty in `incoming`.
    ///
    /// Fetch results carry configure-phase requirements from the static
    /// metadata; configure results carry the final build/test/runtime
    /// sets. Phases absent from a result keep their previous value.
    pub fn absorb(&mut self, incoming: &Self) {
        for phase in Phase::ALL {
            if !incoming.phase(phase).is_empty() {
                *self.phase_mut(phase) = incoming.phase(phase).clone();
            }
        }
    }

    /// Are all phases empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Phase::ALL.iter().all(|p| self.phase(*p).is_empty())
    }
}

/// Distribution metadata as reported by the fetch worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistMeta {
    /// Distribution name (e.g. `HTTP-Tiny`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Distribution version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

impl DistMeta {
    /// Display name `name-version`, when both parts are known.
    #[must_use]
    pub fn distvname(&self) -> Option<String> {
        match (&self.name, &self.version) {
            (Some(name), Some(version)) => Some(format!("{name}-{version}")),
            _ => None,
        }
    }
}

/// Post-configure distribution data: the authoritative provides list
/// and the refreshed display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistData {
    /// Refreshed display name, when the configure step derived one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distvname: Option<String>,
    /// Authoritative provides after configure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<Provide>,
}

/// Per-stage "follow-on job queued" latches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StageLatches {
    pub fetch: bool,
    pub configure: bool,
    pub install: bool,
}

/// Per-stage "dependency resolve jobs queued" latches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DepsLatches {
    pub configure: bool,
    pub install: bool,
}

/// Mutable record tracking one distribution's progress.
#[derive(Debug, Clone)]
pub struct Distribution {
    distfile: String,
    source: Source,
    root: bool,

    resolved: bool,
    fetched: bool,
    configured: bool,
    installed: bool,
    prebuilt: bool,

    pub(crate) registered: StageLatches,
    pub(crate) deps_registered: DepsLatches,

    /// Source URI (registry path or git URL).
    pub uri: String,
    /// Resolved git revision.
    pub rev: Option<String>,
    /// Requested git ref (branch, tag, or commit).
    pub reference: Option<String>,
    /// Packages this distribution is the authoritative source for.
    pub provides: Vec<Provide>,
    /// Per-phase requirements, populated by fetch and configure results.
    pub requirements: PhaseRequirements,
    /// Working directory after fetch.
    pub directory: Option<PathBuf>,
    /// Metadata from the fetch result.
    pub meta: Option<DistMeta>,
    /// Post-configure distribution data.
    pub distdata: Option<DistData>,
    /// Display name `name-version`, used as log context.
    pub distvname: String,
    /// Static install builder, when the configure step selected one.
    pub static_builder: Option<String>,
    /// Feature names requested for this distribution.
    pub features: BTreeSet<String>,
    /// Resolved version.
    pub version: Option<Version>,
}

impl Distribution {
    /// Create a fresh record for a distfile.
    #[must_use]
    pub fn new(distfile: impl Into<String>, source: Source, uri: impl Into<String>) -> Self {
        let distfile = distfile.into();
        let distvname = distvname_of(&distfile);
        Self {
            distfile,
            source,
            root: false,
            resolved: false,
            fetched: false,
            configured: false,
            installed: false,
            prebuilt: false,
            registered: StageLatches::default(),
            deps_registered: DepsLatches::default(),
            uri: uri.into(),
            rev: None,
            reference: None,
            provides: Vec::new(),
            requirements: PhaseRequirements::new(),
            directory: None,
            meta: None,
            distdata: None,
            distvname,
            static_builder: None,
            features: BTreeSet::new(),
            version: None,
        }
    }

    /// The synthetic root record carrying the user's requirements.
    ///
    /// It enters the pipeline pre-configured so the install sweep drives
    /// dependency resolution, and is marked installed directly when its
    /// requirements are satisfied.
    #[must_use]
    pub(crate) fn root(requirements: Requirement) -> Self {
        let mut dist = Self::new(crate::master::ROOT_DISTFILE, Source::Local, "");
        dist.root = true;
        dist.mark_configured();
        *dist.requirements.phase_mut(Phase::Runtime) = requirements;
        dist
    }

    /// Primary key.
    #[must_use]
    #[inline]
    pub fn distfile(&self) -> &str {
        &self.distfile
    }

    /// Where the distribution comes from.
    #[must_use]
    #[inline]
    pub fn source(&self) -> Source {
        self.source
    }

    /// Is this the synthetic root record?
    #[must_use]
    #[inline]
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Has a resolve result been integrated?
    #[must_use]
    pub fn resolved(&self) -> bool {
        self.resolved
    }

    /// Has a fetch result been integrated?
    #[must_use]
    pub fn fetched(&self) -> bool {
        self.fetched
    }

    /// Has a configure result been integrated?
    #[must_use]
    pub fn configured(&self) -> bool {
        self.configured
    }

    /// Has an install result been integrated?
    #[must_use]
    pub fn installed(&self) -> bool {
        self.installed
    }

    /// Did the fetch produce an already-configured layout?
    #[must_use]
    pub fn prebuilt(&self) -> bool {
        self.prebuilt
    }

    /// Mark resolved. Setting an already-set stage flag is a no-op.
    pub fn mark_resolved(&mut self) {
        self.resolved = true;
    }

    /// Mark fetched; implies resolved.
    pub fn mark_fetched(&mut self) {
        self.resolved = true;
        self.fetched = true;
    }

    /// Mark configured; implies fetched and resolved.
    pub fn mark_configured(&mut self) {
        self.resolved = true;
        self.fetched = true;
        self.configured = true;
    }

    /// Mark installed; implies every earlier stage.
    pub fn mark_installed(&mut self) {
        self.resolved = true;
        self.fetched = true;
        self.configured = true;
        self.installed = true;
    }

    /// Record that the fetch produced an already-configured layout.
    pub fn set_prebuilt(&mut self) {
        self.prebuilt = true;
    }

    /// Does this distribution provide `package` at a version accepted by
    /// `range`, with a matching git ref when one is requested?
    #[must_use]
    pub fn providing(
        &self,
        package: &PackageName,
        range: &VersionRange,
        reference: Option<&str>,
    ) -> bool {
        self.provides.iter().any(|p| {
            if p.package != *package {
                return false;
            }
            let version = p.version.clone().unwrap_or_else(Version::zero);
            if !version.satisfies(range) {
                return false;
            }
            reference.is_none_or(|wanted| p.reference.as_deref() == Some(wanted))
        })
    }

    /// Does this distribution's source satisfy the entry's source pin?
    ///
    /// Both non-git, or the same git URI.
    #[must_use]
    pub fn source_matches(&self, entry: &RequirementEntry) -> bool {
        match entry.git_uri() {
            Some(uri) => self.source == Source::Git && self.uri == uri,
            None => self.source != Source::Git,
        }
    }

    /// Stamp the requested git ref onto provides that lack one.
    ///
    /// Worker-supplied provides usually carry no ref; the ref pinned at
    /// resolve time is authoritative for every package the checkout
    /// provides.
    pub(crate) fn inherit_reference(&mut self) {
        let Some(reference) = self.reference.clone() else {
            return;
        };
        for provide in &mut self.provides {
            if provide.reference.is_none() {
                provide.reference = Some(reference.clone());
            }
        }
    }

    /// Merge provides from a duplicate resolve; existing packages win.
    pub(crate) fn merge_provides(&mut self, incoming: &[Provide]) {
        for provide in incoming {
            if !self.provides.iter().any(|p| p.package == provide.package) {
                self.provides.push(provide.clone());
            }
        }
    }

    /// Every package name required by any phase, deduplicated.
    #[must_use]
    pub fn required_packages(&self) -> Vec<PackageName> {
        let mut seen = Vec::new();
        for phase in Phase::ALL {
            for entry in self.requirements.phase(phase) {
                if !seen.contains(&entry.package) {
                    seen.push(entry.package.clone());
                }
            }
        }
        seen
    }
}

/// Derive the display name from a distfile: the basename with the
/// archive suffix removed.
#[must_use]
pub fn distvname_of(distfile: &str) -> String {
    let base = distfile.rsplit('/').next().unwrap_or(distfile);
    for suffix in [".tar.gz", ".tar.bz2", ".tar.xz", ".tgz", ".zip"] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    base.to_string()
}
