//! The target environment: installed-module probing, the core-module
//! inventory, and master configuration.
//!
//! The master never touches the filesystem itself; everything it knows
//! about the environment comes through [`InstalledOracle`] and the
//! injected [`CoreInventory`] table.

use ahash::AHashMap;
use caravan_core::{PackageName, Version};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What the oracle knows about one installed module.
#[derive(Debug, Clone)]
pub struct InstalledInfo {
    /// The installed package.
    pub package: PackageName,
    /// Installed version, when the module declares one.
    pub version: Option<Version>,
    /// Recorded git revision, for modules installed from git.
    pub rev: Option<String>,
    /// File the module was found in.
    pub filename: Option<PathBuf>,
}

impl InstalledInfo {
    /// An installed module with just a version.
    #[must_use]
    pub fn new(package: PackageName, version: Option<Version>) -> Self {
        Self {
            package,
            version,
            rev: None,
            filename: None,
        }
    }
}

/// Inspects the environment for an installed module.
///
/// Called from the master thread only; implementations need not be
/// re-entrant.
pub trait InstalledOracle: Send {
    /// Look a package up in the given search paths.
    fn probe(&self, package: &PackageName, search_paths: &[PathBuf]) -> Option<InstalledInfo>;
}

/// An environment with nothing installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyEnvironment;

impl InstalledOracle for EmptyEnvironment {
    fn probe(&self, _package: &PackageName, _search_paths: &[PathBuf]) -> Option<InstalledInfo> {
        None
    }
}

/// A fixed table of installed modules, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    installed: AHashMap<PackageName, InstalledInfo>,
}

impl StaticEnvironment {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an installed module.
    pub fn insert(&mut self, info: InstalledInfo) {
        self.installed.insert(info.package.clone(), info);
    }

    /// Record a package at a version.
    pub fn insert_version(&mut self, package: PackageName, version: Version) {
        self.insert(InstalledInfo::new(package, Some(version)));
    }
}

impl InstalledOracle for StaticEnvironment {
    fn probe(&self, package: &PackageName, _search_paths: &[PathBuf]) -> Option<InstalledInfo> {
        self.installed.get(package).cloned()
    }
}

/// Read-only core-module table: perl release → package → version.
///
/// Injected at construction; the master consults it only when a
/// `target_perl` is configured.
#[derive(Debug, Clone, Default)]
pub struct CoreInventory {
    releases: BTreeMap<Version, AHashMap<PackageName, Version>>,
}

impl CoreInventory {
    /// An empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a core module of one perl release.
    pub fn insert(&mut self, perl: Version, package: PackageName, version: Version) {
        self.releases
            .entry(perl)
            .or_default()
            .insert(package, version);
    }

    /// The core version of a package in one perl release.
    #[must_use]
    pub fn version_of(&self, perl: &Version, package: &PackageName) -> Option<&Version> {
        self.releases.get(perl)?.get(package)
    }
}

/// Configuration the master recognizes.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// The running runtime's version; satisfies the `perl`
    /// pseudo-package when no `target_perl` is set.
    pub perl_version: Version,
    /// Hypothetical runtime version for core-inventory consultation.
    pub target_perl: Option<Version>,
    /// Install into the global runtime; disables core-inventory
    /// side-checks such as the demotion warning.
    pub global: bool,
    /// Force re-installation of satisfied packages, once per run.
    pub reinstall: bool,
    /// Ordered directories for the installed oracle.
    pub search_inc: Vec<PathBuf>,
    /// Directories whose contents count as runtime core.
    pub core_inc: Vec<PathBuf>,
    /// Emit `n/total` progress updates after every install.
    pub show_progress: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            perl_version: Version::parse("5.38.0").expect("valid version literal"),
            target_perl: None,
            global: false,
            reinstall: false,
            search_inc: Vec::new(),
            core_inc: Vec::new(),
            show_progress: false,
        }
    }
}

impl MasterConfig {
    /// Configuration for a given running runtime version.
    #[must_use]
    pub fn for_perl(perl_version: Version) -> Self {
        Self {
            perl_version,
            ..Self::default()
        }
    }
}
