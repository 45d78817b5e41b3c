//! Work items and their results.
//!
//! A [`Job`] is an immutable descriptor of one unit of external work,
//! identified by a deterministic uid derived from its identity fields.
//! Workers hand back a [`JobResult`] carrying the uid, a success flag,
//! and a per-type [`JobOutcome`] payload; the master looks the original
//! job up by uid for context. Both sides serialize with serde so they
//! can cross a process boundary.

use crate::dist::{DistData, DistMeta, PhaseRequirements, Provide, Source};
use caravan_core::{PackageName, Version, VersionRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// The four pipeline stages a worker can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Map a package requirement to a distribution.
    Resolve,
    /// Download or check out a distribution.
    Fetch,
    /// Run the distribution's configure step.
    Configure,
    /// Build, test, and install.
    Install,
}

impl JobType {
    /// Stage name as it appears in logs and wire payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Fetch => "fetch",
            Self::Configure => "configure",
            Self::Install => "install",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Git source pin carried by a resolve job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSpec {
    /// Repository URI.
    pub uri: String,
    /// Branch, tag, or commit to check out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Typed job payloads, tagged by stage on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobKind {
    /// Resolve a package requirement to a distribution.
    Resolve {
        /// The package to resolve.
        package: PackageName,
        /// Acceptable versions.
        #[serde(default)]
        range: VersionRange,
        /// Force re-installation of satisfied packages.
        #[serde(default)]
        reinstall: bool,
        /// Requested feature names.
        #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
        features: BTreeSet<String>,
        /// Git source pin, when the requirement names one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        git: Option<GitSpec>,
    },
    /// Download or check out a distribution.
    Fetch {
        /// Distribution identifier.
        distfile: String,
        /// Where it comes from.
        source: Source,
        /// Registry path or git URL.
        uri: String,
        /// Resolved git revision.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rev: Option<String>,
        /// Requested git ref.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
        /// Requested feature names.
        #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
        features: BTreeSet<String>,
    },
    /// Run the configure step in the fetched directory.
    Configure {
        /// Distribution identifier.
        distfile: String,
        /// Where it comes from.
        source: Source,
        /// Registry path or git URL.
        uri: String,
        /// Working directory from the fetch result.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        directory: Option<PathBuf>,
        /// Fetched metadata.
        #[serde(default)]
        meta: DistMeta,
        /// Resolved version.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<Version>,
        /// Display name used as log context.
        distvname: String,
        /// Requested feature names.
        #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
        features: BTreeSet<String>,
    },
    /// Build, test, and install the configured distribution.
    Install {
        /// Distribution identifier.
        distfile: String,
        /// Where it comes from.
        source: Source,
        /// Registry path or git URL.
        uri: String,
        /// Working directory from the fetch result.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        directory: Option<PathBuf>,
        /// Fetched metadata.
        #[serde(default)]
        meta: DistMeta,
        /// Post-configure distribution data.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distdata: Option<DistData>,
        /// Display name used as log context.
        distvname: String,
        /// Static install builder, when one was selected.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        static_builder: Option<String>,
        /// The distribution skipped the configure stage.
        #[serde(default)]
        prebuilt: bool,
    },
}

impl JobKind {
    /// The stage this payload belongs to.
    #[must_use]
    pub const fn job_type(&self) -> JobType {
        match self {
            Self::Resolve { .. } => JobType::Resolve,
            Self::Fetch { .. } => JobType::Fetch,
            Self::Configure { .. } => JobType::Configure,
            Self::Install { .. } => JobType::Install,
        }
    }

    /// Identity fields: `{type, package|distfile, source, uri, ref}`.
    ///
    /// Two jobs are equal iff these agree; everything else (features,
    /// ranges, metadata snapshots) is payload.
    fn identity(&self) -> (JobType, &str, &str, &str, &str) {
        match self {
            Self::Resolve { package, git, .. } => (
                JobType::Resolve,
                package.as_str(),
                if git.is_some() { "git" } else { "cpan" },
                git.as_ref().map_or("", |g| g.uri.as_str()),
                git.as_ref()
                    .and_then(|g| g.reference.as_deref())
                    .unwrap_or(""),
            ),
            Self::Fetch {
                distfile,
                source,
                uri,
                reference,
                ..
            } => (
                JobType::Fetch,
                distfile,
                source.as_str(),
                uri,
                reference.as_deref().unwrap_or(""),
            ),
            Self::Configure {
                distfile,
                source,
                uri,
                ..
            } => (JobType::Configure, distfile, source.as_str(), uri, ""),
            Self::Install {
                distfile,
                source,
                uri,
                ..
            } => (JobType::Install, distfile, source.as_str(), uri, ""),
        }
    }
}

/// An immutable unit of external work with a stable identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    uid: String,
    #[serde(flatten)]
    kind: JobKind,
    #[serde(skip)]
    in_charge: bool,
}

impl Job {
    /// Construct a job, deriving its uid from the identity fields.
    #[must_use]
    pub fn new(kind: JobKind) -> Self {
        let uid = derive_uid(&kind);
        Self {
            uid,
            kind,
            in_charge: false,
        }
    }

    /// Stable identity, equal for equal jobs.
    #[must_use]
    #[inline]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// The typed payload.
    #[must_use]
    #[inline]
    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    /// The stage this job runs.
    #[must_use]
    pub fn job_type(&self) -> JobType {
        self.kind.job_type()
    }

    /// Has the job been handed to a worker?
    #[must_use]
    pub fn in_charge(&self) -> bool {
        self.in_charge
    }

    pub(crate) fn set_in_charge(&mut self, in_charge: bool) {
        self.in_charge = in_charge;
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.kind.identity() == other.kind.identity()
    }
}

impl Eq for Job {}

/// Derive the uid: a truncated blake3 digest of the identity tuple.
fn derive_uid(kind: &JobKind) -> String {
    let (job_type, key, source, uri, reference) = kind.identity();
    let mut hasher = blake3::Hasher::new();
    for field in [job_type.as_str(), key, source, uri, reference] {
        hasher.update(field.as_bytes());
        hasher.update(b"\0");
    }
    hasher.finalize().to_hex()[..16].to_string()
}

/// What a worker hands back for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Uid of the job this answers.
    pub uid: String,
    /// Did the stage succeed?
    pub ok: bool,
    /// Worker process id, for log records.
    pub pid: u32,
    /// Wall-clock seconds the stage took.
    pub elapsed: f64,
    /// Failure message or noteworthy detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Log annotation such as `using cache` or `from <mirror>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    /// Stage-specific payload, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
}

/// Stage-specific result payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobOutcome {
    /// A resolve result: where the package lives.
    Resolve {
        /// Distribution identifier the package resolved to.
        distfile: String,
        /// Where it comes from.
        source: Source,
        /// Registry path or git URL.
        uri: String,
        /// Resolved version.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<Version>,
        /// Resolved git revision.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rev: Option<String>,
        /// Packages the distribution provides, when the resolver knows.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        provides: Vec<Provide>,
    },
    /// A fetch result: the working directory and static metadata.
    Fetch {
        /// Directory the distribution was unpacked or checked out into.
        directory: PathBuf,
        /// Static metadata.
        #[serde(default)]
        meta: DistMeta,
        /// Provides from the metadata.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        provides: Vec<Provide>,
        /// Requirements from the static metadata.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requirements: Option<PhaseRequirements>,
        /// The layout is already configured; skip the configure stage.
        #[serde(default)]
        prebuilt: bool,
        /// Checked-out revision, for git sources.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rev: Option<String>,
        /// Version discovered during checkout, for git sources.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<Version>,
    },
    /// A configure result: final requirements and distribution data.
    Configure {
        /// Resolved build/test/runtime requirements.
        #[serde(default)]
        requirements: PhaseRequirements,
        /// Post-configure distribution data.
        #[serde(default)]
        distdata: DistData,
        /// Static install builder, when one was selected.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        static_builder: Option<String>,
    },
    /// An install result carries no extras.
    Install,
}

impl JobResult {
    /// A successful result for `job`.
    #[must_use]
    pub fn done(job: &Job, outcome: JobOutcome) -> Self {
        Self {
            uid: job.uid().to_string(),
            ok: true,
            pid: std::process::id(),
            elapsed: 0.0,
            message: None,
            annotation: None,
            outcome: Some(outcome),
        }
    }

    /// A failed result for `job`.
    #[must_use]
    pub fn failed(job: &Job, message: impl Into<String>) -> Self {
        Self {
            uid: job.uid().to_string(),
            ok: false,
            pid: std::process::id(),
            elapsed: 0.0,
            message: Some(message.into()),
            annotation: None,
            outcome: None,
        }
    }

    /// Attach an elapsed time.
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: f64) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Attach a log annotation.
    #[must_use]
    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }
}
