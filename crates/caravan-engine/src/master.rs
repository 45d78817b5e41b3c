//! The master state machine.
//!
//! Owns every distribution under consideration and every pending job,
//! integrates worker results, advances distributions through the
//! resolve → fetch → configure → install pipeline, and decides at the
//! end whether the run succeeded.
//!
//! The master is single-threaded and does no I/O: workers interact with
//! it only through [`Master::get_job`] and [`Master::register_result`],
//! both of which the embedder serializes (see [`crate::pool`]).
//! Failures are sticky; nothing is retried, and the only terminal
//! decision is made in [`Master::fail`].

use crate::cycle::{CircularDependency, format_cycle};
use crate::dist::{Distribution, Phase, Provide, Source, distvname_of};
use crate::env::{CoreInventory, InstalledOracle, MasterConfig};
use crate::job::{GitSpec, Job, JobKind, JobOutcome, JobResult, JobType};
use crate::report::{Outcome, Reporter, ResultLine};
use ahash::{AHashMap, AHashSet};
use caravan_core::{PackageName, Requirement, RequirementEntry, Version, VersionRange};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

/// Distfile of the synthetic record carrying the user's requirements.
pub const ROOT_DISTFILE: &str = "(root)";

/// Overall verdict of a satisfaction check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Every requirement is satisfied.
    Satisfied,
    /// At least one requirement is still outstanding.
    Unsatisfied,
    /// A `perl` requirement cannot be met by the target runtime.
    PerlVersionFail,
}

/// Result of [`Master::is_satisfied`].
#[derive(Debug, Clone)]
pub struct Satisfaction {
    /// Overall verdict.
    pub status: Status,
    /// A requirement collided with an already-registered provider from
    /// a different source.
    pub conflict: bool,
    /// Requirements that need a resolve job.
    pub need_resolve: Vec<RequirementEntry>,
}

/// Result of [`Master::is_installed`].
#[derive(Debug, Clone)]
pub struct InstalledQuery {
    /// The package is present at an acceptable version (and ref).
    pub installed: bool,
    /// The installed version, when the oracle found the package.
    pub version: Option<Version>,
    /// The recorded revision, for git installs.
    pub rev: Option<String>,
}

impl InstalledQuery {
    const fn absent() -> Self {
        Self {
            installed: false,
            version: None,
            rev: None,
        }
    }
}

/// Structured terminal report returned by [`Master::fail`].
#[derive(Debug, Clone, Default)]
pub struct FailureReport {
    /// Packages no resolver could map to a distribution.
    pub resolve: Vec<String>,
    /// Distfiles that never installed: explicit failures, cycle
    /// members, and dependency casualties.
    pub install: Vec<String>,
    /// Cycle members and their canonical cycle paths.
    pub cycles: BTreeMap<String, Vec<String>>,
}

/// The pipeline stages driven by the advancement pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Configure,
    Install,
}

fn reg_latch_mut(dist: &mut Distribution, stage: Stage) -> &mut bool {
    match stage {
        Stage::Configure => &mut dist.registered.configure,
        Stage::Install => &mut dist.registered.install,
    }
}

fn deps_latch_mut(dist: &mut Distribution, stage: Stage) -> &mut bool {
    match stage {
        Stage::Configure => &mut dist.deps_registered.configure,
        Stage::Install => &mut dist.deps_registered.install,
    }
}

/// Does the distfile name a perl core release archive?
fn is_core_perl_dist(distfile: &str) -> bool {
    distfile
        .rsplit('/')
        .next()
        .unwrap_or(distfile)
        .starts_with("perl-5")
}

/// The scheduler: owns all distributions and jobs and drives the run.
pub struct Master {
    config: MasterConfig,
    core: CoreInventory,
    oracle: Box<dyn InstalledOracle>,
    reporter: Box<dyn Reporter>,

    /// Pending and in-flight work, keyed by uid. Sorted iteration keeps
    /// scheduling reproducible.
    jobs: BTreeMap<String, Job>,
    /// Every distribution ever considered, keyed by distfile.
    distributions: BTreeMap<String, Distribution>,

    /// Packages a resolver permanently failed on.
    fail_resolve: AHashSet<PackageName>,
    /// Distfiles permanently removed from consideration.
    fail_install: AHashSet<String>,
    /// Positive oracle probes, retained for the run.
    installed_cache: AHashMap<PackageName, (Version, Option<String>)>,
    /// Packages already re-resolved in reinstall mode.
    reinstalled: AHashSet<PackageName>,
    /// Packages already warned about as demoted from core.
    removed_core: AHashSet<PackageName>,

    installed_count: usize,
}

impl fmt::Debug for Master {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Master")
            .field("jobs", &self.jobs.len())
            .field("distributions", &self.distributions.len())
            .field("fail_resolve", &self.fail_resolve.len())
            .field("fail_install", &self.fail_install.len())
            .field("installed_count", &self.installed_count)
            .finish_non_exhaustive()
    }
}

impl Master {
    /// Create a master over an environment.
    pub fn new(
        config: MasterConfig,
        core: CoreInventory,
        oracle: impl InstalledOracle + 'static,
        reporter: impl Reporter + 'static,
    ) -> Self {
        Self {
            config,
            core,
            oracle: Box::new(oracle),
            reporter: Box::new(reporter),
            jobs: BTreeMap::new(),
            distributions: BTreeMap::new(),
            fail_resolve: AHashSet::new(),
            fail_install: AHashSet::new(),
            installed_cache: AHashMap::new(),
            reinstalled: AHashSet::new(),
            removed_core: AHashSet::new(),
            installed_count: 0,
        }
    }

    /// Add root requirements, to be satisfied by the run.
    ///
    /// They live on a synthetic root record that participates in the
    /// install sweep only. Call before driving.
    pub fn add_requirements(&mut self, requirements: Requirement) -> caravan_core::Result<()> {
        match self.distributions.get_mut(ROOT_DISTFILE) {
            Some(root) => {
                root.requirements
                    .phase_mut(Phase::Runtime)
                    .merge(&requirements)?;
                root.deps_registered.install = false;
                root.registered.install = false;
            }
            None => {
                self.distributions
                    .insert(ROOT_DISTFILE.to_string(), Distribution::root(requirements));
            }
        }
        Ok(())
    }

    /// Enqueue a job unless an equal one is already pending.
    pub fn add_job(&mut self, job: Job) -> bool {
        if self.jobs.values().any(|pending| pending == &job) {
            debug!(uid = job.uid(), "duplicate job ignored");
            return false;
        }
        self.jobs.insert(job.uid().to_string(), job);
        true
    }

    /// Take every job not yet handed to a worker.
    ///
    /// When none are ready, runs the advancement pass once and tries
    /// again. An empty return means "nothing to do right now": the
    /// driver should wait for an outstanding result, or finish with
    /// [`Master::fail`] when nothing is in flight.
    pub fn get_job(&mut self) -> Vec<Job> {
        let ready = self.take_ready();
        if !ready.is_empty() {
            return ready;
        }
        self.calculate_jobs();
        self.take_ready()
    }

    fn take_ready(&mut self) -> Vec<Job> {
        self.jobs
            .values_mut()
            .filter(|job| !job.in_charge())
            .map(|job| {
                job.set_in_charge(true);
                job.clone()
            })
            .collect()
    }

    /// Integrate one worker result: dispatch to the stage handler,
    /// drop the job from the pending set, and emit its log record.
    pub fn register_result(&mut self, result: JobResult) {
        let Some(job) = self.jobs.get(&result.uid).cloned() else {
            warn!(uid = result.uid.as_str(), "result for unknown job");
            return;
        };

        let line_override = match job.job_type() {
            JobType::Resolve => self.register_resolve_result(&job, &result),
            JobType::Fetch => {
                self.register_fetch_result(&job, &result);
                None
            }
            JobType::Configure => {
                self.register_configure_result(&job, &result);
                None
            }
            JobType::Install => {
                self.register_install_result(&job, &result);
                None
            }
        };

        self.jobs.remove(&result.uid);

        let line = line_override.unwrap_or_else(|| self.default_line(&job, &result));
        self.reporter.result(&line);

        if job.job_type() == JobType::Install && result.ok && self.config.show_progress {
            let total = self
                .distributions
                .values()
                .filter(|d| !d.is_root())
                .count();
            self.reporter.progress(self.installed_count, total);
        }
    }

    /// Insert a distribution, or merge its provides into an existing
    /// record. Returns whether it was newly inserted.
    pub fn add_distribution(&mut self, dist: Distribution) -> bool {
        match self.distributions.get_mut(dist.distfile()) {
            Some(existing) => {
                existing.merge_provides(&dist.provides);
                false
            }
            None => {
                self.distributions
                    .insert(dist.distfile().to_string(), dist);
                true
            }
        }
    }

    /// Is the package present at an acceptable version (and ref)?
    ///
    /// Probes the oracle once per package and caches positive answers.
    /// In reinstall mode the first query per package reports the
    /// package absent, forcing one re-resolve; every later query sees
    /// the truth, so each package is reinstalled at most once per run.
    pub fn is_installed(
        &mut self,
        package: &PackageName,
        range: &VersionRange,
        reference: Option<&str>,
    ) -> InstalledQuery {
        if self.config.reinstall && !self.reinstalled.contains(package) {
            self.reinstalled.insert(package.clone());
            return InstalledQuery::absent();
        }

        let Some((version, rev)) = self.probe_cached(package) else {
            return InstalledQuery::absent();
        };

        let version_ok = version.satisfies(range);
        let reference_ok = match reference {
            None => true,
            Some(wanted) => rev
                .as_deref()
                .is_some_and(|r| r == wanted || r.starts_with(wanted)),
        };

        InstalledQuery {
            installed: version_ok && reference_ok,
            version: Some(version),
            rev,
        }
    }

    fn probe_cached(&mut self, package: &PackageName) -> Option<(Version, Option<String>)> {
        if let Some((version, rev)) = self.installed_cache.get(package) {
            return Some((version.clone(), rev.clone()));
        }
        let info = self.oracle.probe(package, &self.config.search_inc)?;
        let version = info.version.unwrap_or_else(Version::zero);
        self.installed_cache
            .insert(package.clone(), (version.clone(), info.rev.clone()));
        Some((version, info.rev))
    }

    /// Evaluate a flat requirement collection against the current
    /// state: target runtime, core inventory, known providers, and the
    /// installed oracle, in that order.
    pub fn is_satisfied(&mut self, requirements: &Requirement) -> Satisfaction {
        let mut perl_fail = false;
        let mut conflict = false;
        let mut pending = false;
        let mut need_resolve = Vec::new();

        for entry in requirements {
            if entry.package.is_perl() {
                let target = self
                    .config
                    .target_perl
                    .as_ref()
                    .unwrap_or(&self.config.perl_version);
                if !target.satisfies(&entry.range) {
                    perl_fail = true;
                }
                continue;
            }

            if let Some(target) = self.config.target_perl.clone() {
                let core_version = self.core.version_of(&target, &entry.package).cloned();
                if let Some(core_version) = core_version
                    && core_version.satisfies(&entry.range)
                {
                    if !self.config.global {
                        self.warn_if_demoted(&entry.package, &target);
                    }
                    continue;
                }
            }

            let provider = self
                .distributions
                .values()
                .find(|d| d.providing(&entry.package, &entry.range, entry.reference()))
                .map(|d| (d.distfile().to_string(), d.source_matches(entry), d.installed()));

            match provider {
                Some((distfile, source_ok, installed)) => {
                    if !source_ok {
                        conflict = true;
                        self.reporter.log_fail(
                            entry.package.as_str(),
                            &format!(
                                "already provided by {} from a conflicting source",
                                distvname_of(&distfile)
                            ),
                        );
                        continue;
                    }
                    if self.config.reinstall {
                        let query =
                            self.is_installed(&entry.package, &entry.range, entry.reference());
                        if !query.installed {
                            need_resolve.push(entry.clone());
                            continue;
                        }
                    }
                    if installed {
                        continue;
                    }
                    // A provider exists; wait for its pipeline.
                    pending = true;
                }
                None => {
                    let query = self.is_installed(&entry.package, &entry.range, entry.reference());
                    if query.installed {
                        continue;
                    }
                    need_resolve.push(entry.clone());
                }
            }
        }

        let status = if perl_fail {
            Status::PerlVersionFail
        } else if pending || conflict || !need_resolve.is_empty() {
            Status::Unsatisfied
        } else {
            Status::Satisfied
        };

        Satisfaction {
            status,
            conflict,
            need_resolve,
        }
    }

    /// One-shot warning for a package that is core in the target perl
    /// but missing from the running runtime's core directories.
    fn warn_if_demoted(&mut self, package: &PackageName, target: &Version) {
        if self.removed_core.contains(package) {
            return;
        }
        if self.oracle.probe(package, &self.config.core_inc).is_none() {
            self.removed_core.insert(package.clone());
            self.reporter.log(
                package.as_str(),
                &format!("{package} used to be in core of perl {target}; treating it as already installed"),
            );
        }
    }

    /// Enqueue a resolve job per entry, skipping packages already in a
    /// failure set. Returns whether every entry produced a job.
    pub fn register_resolve_jobs(&mut self, entries: &[RequirementEntry]) -> bool {
        let mut all_registered = true;
        for entry in entries {
            if self.fail_resolve.contains(&entry.package)
                || self.fail_install.contains(entry.package.as_str())
            {
                all_registered = false;
                continue;
            }
            let job = Job::new(JobKind::Resolve {
                package: entry.package.clone(),
                range: entry.range.clone(),
                reinstall: self.config.reinstall,
                features: entry
                    .options
                    .as_ref()
                    .map(|o| o.features.clone())
                    .unwrap_or_default(),
                git: entry.git_uri().map(|uri| GitSpec {
                    uri: uri.to_string(),
                    reference: entry.reference().map(String::from),
                }),
            });
            self.add_job(job);
        }
        all_registered
    }

    /// The advancement pass: three sweeps, top-down, over a snapshot of
    /// the distribution set.
    fn calculate_jobs(&mut self) {
        let distfiles: Vec<String> = self.distributions.keys().cloned().collect();

        // Fetch sweep.
        for distfile in &distfiles {
            if self.fail_install.contains(distfile.as_str()) {
                continue;
            }
            let job = {
                let Some(dist) = self.distributions.get_mut(distfile) else {
                    continue;
                };
                if !dist.resolved() || dist.fetched() || dist.registered.fetch {
                    continue;
                }
                dist.registered.fetch = true;
                Job::new(JobKind::Fetch {
                    distfile: distfile.clone(),
                    source: dist.source(),
                    uri: dist.uri.clone(),
                    rev: dist.rev.clone(),
                    reference: dist.reference.clone(),
                    features: dist.features.clone(),
                })
            };
            self.add_job(job);
        }

        // Configure sweep.
        for distfile in &distfiles {
            if self.fail_install.contains(distfile.as_str()) {
                continue;
            }
            let ready = self
                .distributions
                .get(distfile)
                .is_some_and(|d| d.fetched() && !d.configured() && !d.registered.configure);
            if ready {
                self.advance_stage(distfile, Stage::Configure);
            }
        }

        // Install sweep.
        for distfile in &distfiles {
            if self.fail_install.contains(distfile.as_str()) {
                continue;
            }
            let ready = self
                .distributions
                .get(distfile)
                .is_some_and(|d| d.configured() && !d.installed() && !d.registered.install);
            if ready {
                self.advance_stage(distfile, Stage::Install);
            }
        }
    }

    /// The four-branch advancement logic shared by the configure and
    /// install sweeps.
    fn advance_stage(&mut self, distfile: &str, stage: Stage) {
        let Some(dist) = self.distributions.get(distfile) else {
            return;
        };
        let label = dist.distvname.clone();
        let phases: &[Phase] = match stage {
            Stage::Configure => &[Phase::Configure],
            Stage::Install => {
                if dist.prebuilt() {
                    &[Phase::Configure, Phase::Build, Phase::Test, Phase::Runtime]
                } else {
                    &[Phase::Build, Phase::Test, Phase::Runtime]
                }
            }
        };
        let requirements = match dist.requirements.merged(phases) {
            Ok(requirements) => requirements,
            Err(err) => {
                // Phases of one distribution disagree on a range.
                self.reporter.log_fail(&label, &err.to_string());
                if let Some(d) = self.distributions.get_mut(distfile) {
                    *deps_latch_mut(d, stage) = true;
                }
                self.fail_install.insert(distfile.to_string());
                return;
            }
        };

        let sat = self.is_satisfied(&requirements);

        if sat.conflict {
            if let Some(d) = self.distributions.get_mut(distfile) {
                *deps_latch_mut(d, stage) = true;
            }
            self.fail_install.insert(distfile.to_string());
            return;
        }

        match sat.status {
            Status::Satisfied => {
                let job = {
                    let Some(d) = self.distributions.get_mut(distfile) else {
                        return;
                    };
                    *reg_latch_mut(d, stage) = true;
                    if d.is_root() {
                        // The root has no worker job; satisfied means done.
                        d.mark_installed();
                        None
                    } else {
                        Some(match stage {
                            Stage::Configure => Job::new(JobKind::Configure {
                                distfile: distfile.to_string(),
                                source: d.source(),
                                uri: d.uri.clone(),
                                directory: d.directory.clone(),
                                meta: d.meta.clone().unwrap_or_default(),
                                version: d.version.clone(),
                                distvname: d.distvname.clone(),
                                features: d.features.clone(),
                            }),
                            Stage::Install => Job::new(JobKind::Install {
                                distfile: distfile.to_string(),
                                source: d.source(),
                                uri: d.uri.clone(),
                                directory: d.directory.clone(),
                                meta: d.meta.clone().unwrap_or_default(),
                                distdata: d.distdata.clone(),
                                distvname: d.distvname.clone(),
                                static_builder: d.static_builder.clone(),
                                prebuilt: d.prebuilt(),
                            }),
                        })
                    }
                };
                if let Some(job) = job {
                    self.add_job(job);
                }
            }
            Status::PerlVersionFail => {
                self.reporter
                    .log_fail(&label, "requires a perl version the target cannot satisfy");
                self.fail_install.insert(distfile.to_string());
            }
            Status::Unsatisfied => {
                let should_register = {
                    let Some(d) = self.distributions.get_mut(distfile) else {
                        return;
                    };
                    if !sat.need_resolve.is_empty() && !*deps_latch_mut(d, stage) {
                        *deps_latch_mut(d, stage) = true;
                        true
                    } else {
                        false
                    }
                };
                if should_register {
                    let wanted: Vec<String> = sat
                        .need_resolve
                        .iter()
                        .map(|e| {
                            if e.range.accepts_any() {
                                e.package.to_string()
                            } else {
                                format!("{} ({})", e.package, e.range)
                            }
                        })
                        .collect();
                    self.reporter
                        .log(&label, &format!("needs {}", wanted.join(", ")));
                    if !self.register_resolve_jobs(&sat.need_resolve) {
                        self.fail_install.insert(distfile.to_string());
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage handlers
    // ------------------------------------------------------------------

    fn register_resolve_result(&mut self, job: &Job, result: &JobResult) -> Option<ResultLine> {
        let JobKind::Resolve {
            package,
            features,
            git,
            ..
        } = job.kind()
        else {
            return None;
        };

        if !result.ok {
            self.fail_resolve.insert(package.clone());
            return None;
        }
        let Some(JobOutcome::Resolve {
            distfile,
            source,
            uri,
            version,
            rev,
            provides,
        }) = result.outcome.as_ref()
        else {
            warn!(package = package.as_str(), "resolve result without payload");
            self.fail_resolve.insert(package.clone());
            return None;
        };

        if is_core_perl_dist(distfile) {
            self.reporter
                .log_fail(package.as_str(), "cannot upgrade core module");
            self.fail_install.insert(distfile.clone());
            return None;
        }

        if !self.config.reinstall {
            let wanted = version
                .as_ref()
                .map_or_else(VersionRange::any, VersionRange::exact);
            let reference = if *source == Source::Git {
                rev.as_deref()
            } else {
                None
            };
            let query = self.is_installed(package, &wanted, reference);
            if query.installed {
                return Some(ResultLine {
                    outcome: Outcome::Done,
                    job_type: JobType::Install,
                    elapsed: result.elapsed,
                    pid: result.pid,
                    message: distvname_of(distfile),
                    annotation: Some("already installed".into()),
                });
            }
        }

        let mut dist = Distribution::new(distfile.clone(), *source, uri.clone());
        dist.rev = rev.clone();
        dist.reference = git.as_ref().and_then(|g| g.reference.clone());
        dist.version = version.clone();
        dist.features = features.clone();
        dist.provides = if provides.is_empty() {
            vec![Provide {
                package: package.clone(),
                version: version.clone(),
                reference: dist.reference.clone(),
            }]
        } else {
            provides.clone()
        };
        dist.inherit_reference();
        dist.mark_resolved();

        if self.config.reinstall {
            // Re-resolving the distribution covers every name it
            // provides; none of them triggers another reinstall.
            for provide in &dist.provides {
                self.reinstalled.insert(provide.package.clone());
            }
        }

        self.add_distribution(dist);
        None
    }

    fn register_fetch_result(&mut self, job: &Job, result: &JobResult) {
        let JobKind::Fetch { distfile, .. } = job.kind() else {
            return;
        };
        if !result.ok {
            self.fail_install.insert(distfile.clone());
            return;
        }
        let Some(JobOutcome::Fetch {
            directory,
            meta,
            provides,
            requirements,
            prebuilt,
            rev,
            version,
        }) = result.outcome.as_ref()
        else {
            self.fail_install.insert(distfile.clone());
            return;
        };
        let Some(dist) = self.distributions.get_mut(distfile) else {
            return;
        };

        dist.directory = Some(directory.clone());
        dist.meta = Some(meta.clone());
        if !provides.is_empty() {
            dist.provides = provides.clone();
            dist.inherit_reference();
        }
        if dist.source() == Source::Git {
            if rev.is_some() {
                dist.rev = rev.clone();
            }
            if version.is_some() {
                dist.version = version.clone();
            }
            if let Some(name) = meta.distvname() {
                dist.distvname = name;
            }
        }
        if let Some(reqs) = requirements {
            dist.requirements.absorb(reqs);
        }
        if *prebuilt {
            // Already configured on disk: skip the configure stage and
            // keep the fetch-time provides as authoritative.
            dist.set_prebuilt();
            dist.mark_configured();
        } else {
            dist.mark_fetched();
        }
    }

    fn register_configure_result(&mut self, job: &Job, result: &JobResult) {
        let JobKind::Configure { distfile, .. } = job.kind() else {
            return;
        };
        if !result.ok {
            self.fail_install.insert(distfile.clone());
            return;
        }
        let Some(JobOutcome::Configure {
            requirements,
            distdata,
            static_builder,
        }) = result.outcome.as_ref()
        else {
            self.fail_install.insert(distfile.clone());
            return;
        };

        let logged = {
            let Some(dist) = self.distributions.get_mut(distfile) else {
                return;
            };
            dist.mark_configured();
            dist.requirements.absorb(requirements);
            dist.static_builder = static_builder.clone();
            dist.distdata = Some(distdata.clone());
            if dist.source() == Source::Git
                && let Some(name) = &distdata.distvname
            {
                dist.distvname = name.clone();
            }
            if !distdata.provides.is_empty() {
                // The post-configure list is authoritative; keep the
                // inherited git ref and sort for determinism.
                let mut provides = distdata.provides.clone();
                provides.sort_by(|a, b| a.package.cmp(&b.package));
                dist.provides = provides;
                dist.inherit_reference();
            }
            let summary = dist
                .provides
                .iter()
                .map(|p| match &p.version {
                    Some(v) => format!("{} {}", p.package, v),
                    None => p.package.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            (dist.distvname.clone(), summary)
        };
        self.reporter
            .log(&logged.0, &format!("provides: {}", logged.1));
    }

    fn register_install_result(&mut self, job: &Job, result: &JobResult) {
        let JobKind::Install { distfile, .. } = job.kind() else {
            return;
        };
        if !result.ok {
            self.fail_install.insert(distfile.clone());
            return;
        }
        if let Some(dist) = self.distributions.get_mut(distfile) {
            dist.mark_installed();
            self.installed_count += 1;
        }
    }

    fn default_line(&self, job: &Job, result: &JobResult) -> ResultLine {
        let message = match job.kind() {
            JobKind::Resolve { package, .. } => package.to_string(),
            JobKind::Fetch { distfile, .. } => self
                .distributions
                .get(distfile)
                .map_or_else(|| distvname_of(distfile), |d| d.distvname.clone()),
            JobKind::Configure { distvname, .. } | JobKind::Install { distvname, .. } => {
                distvname.clone()
            }
        };
        let message = match (&result.message, result.ok) {
            (Some(detail), false) => format!("{message}: {detail}"),
            _ => message,
        };
        ResultLine {
            outcome: if result.ok { Outcome::Done } else { Outcome::Fail },
            job_type: job.job_type(),
            elapsed: result.elapsed,
            pid: result.pid,
            message,
            annotation: result.annotation.clone(),
        }
    }

    /// Terminal verdict: `None` when every distribution installed,
    /// otherwise the structured failure report.
    ///
    /// Every distribution that neither installed nor failed explicitly
    /// is fed to the cycle detector; cycle members are reported with
    /// their canonical path, the rest as dependency casualties.
    pub fn fail(&self) -> Option<FailureReport> {
        struct NotInstalled {
            distfile: String,
            distvname: String,
            provides: Vec<PackageName>,
            requires: Vec<PackageName>,
        }

        let pending: Vec<NotInstalled> = self
            .distributions
            .values()
            .filter(|d| !d.installed() && !self.fail_install.contains(d.distfile()))
            .map(|d| NotInstalled {
                distfile: d.distfile().to_string(),
                distvname: d.distvname.clone(),
                provides: d.provides.iter().map(|p| p.package.clone()).collect(),
                requires: d.required_packages(),
            })
            .collect();

        let mut resolve: Vec<String> = self.fail_resolve.iter().map(ToString::to_string).collect();
        resolve.sort();
        let mut install: BTreeSet<String> = self.fail_install.iter().cloned().collect();

        if resolve.is_empty() && install.is_empty() && pending.is_empty() {
            return None;
        }

        let mut detector = CircularDependency::new();
        for p in &pending {
            detector.add(
                p.distfile.clone(),
                p.distvname.clone(),
                p.provides.clone(),
                p.requires.clone(),
            );
        }
        detector.finalize();
        let cycles: BTreeMap<String, Vec<String>> = detector.detect().into_iter().collect();

        let mut reported: BTreeSet<Vec<String>> = BTreeSet::new();
        for path in cycles.values() {
            if reported.insert(path.clone()) {
                self.reporter.log_fail(
                    "cycle",
                    &format!("Detected circular dependencies {}", format_cycle(path)),
                );
            }
        }
        for p in &pending {
            if !cycles.contains_key(&p.distfile) {
                self.reporter
                    .log_fail(&p.distvname, "failed because of dependencies");
            }
            install.insert(p.distfile.clone());
        }

        Some(FailureReport {
            resolve,
            install: install.into_iter().collect(),
            cycles,
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Number of distributions installed by this run.
    #[must_use]
    pub fn installed_count(&self) -> usize {
        self.installed_count
    }

    /// Number of pending and in-flight jobs.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }

    /// Is any job pending or in flight?
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.jobs.is_empty()
    }

    /// Look a distribution up by distfile.
    #[must_use]
    pub fn distribution(&self, distfile: &str) -> Option<&Distribution> {
        self.distributions.get(distfile)
    }

    /// Every distribution under consideration, in distfile order.
    pub fn distributions(&self) -> impl Iterator<Item = &Distribution> {
        self.distributions.values()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &MasterConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EmptyEnvironment, StaticEnvironment};
    use crate::report::MemoryReporter;
    use std::collections::BTreeSet as StdBTreeSet;
    use std::sync::Arc;

    fn pkg(name: &str) -> PackageName {
        PackageName::new(name)
    }

    fn range(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    fn version(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn empty_master() -> Master {
        Master::new(
            MasterConfig::default(),
            CoreInventory::new(),
            EmptyEnvironment,
            MemoryReporter::new(),
        )
    }

    fn resolve_job(package: &str) -> Job {
        Job::new(JobKind::Resolve {
            package: pkg(package),
            range: range(""),
            reinstall: false,
            features: StdBTreeSet::new(),
            git: None,
        })
    }

    #[test]
    fn add_job_deduplicates_pending() {
        let mut master = empty_master();
        assert!(master.add_job(resolve_job("A")));
        assert!(!master.add_job(resolve_job("A")));
        assert_eq!(master.pending(), 1);
        assert!(master.add_job(resolve_job("B")));
        assert_eq!(master.pending(), 2);
    }

    #[test]
    fn get_job_hands_each_job_out_once() {
        let mut master = empty_master();
        master.add_job(resolve_job("A"));

        let first = master.get_job();
        assert_eq!(first.len(), 1);
        assert!(master.get_job().is_empty(), "job already in charge");
        assert_eq!(master.pending(), 1, "still in flight");
    }

    #[test]
    fn register_result_removes_the_job() {
        let mut master = empty_master();
        master.add_job(resolve_job("A"));
        let job = master.get_job().remove(0);

        master.register_result(JobResult::failed(&job, "no resolver"));
        assert_eq!(master.pending(), 0);
        assert!(master.get_job().is_empty());
    }

    #[test]
    fn calculate_jobs_twice_is_a_noop() {
        let mut master = empty_master();
        master
            .add_requirements(
                [RequirementEntry::new(pkg("A"), range(""))]
                    .into_iter()
                    .collect(),
            )
            .unwrap();

        let first = master.get_job();
        assert_eq!(first.len(), 1, "one resolve for A");
        assert!(master.get_job().is_empty());
        assert_eq!(master.pending(), 1);
    }

    #[test]
    fn resolve_failure_is_sticky() {
        let mut master = empty_master();
        master
            .add_requirements(
                [RequirementEntry::new(pkg("A"), range(""))]
                    .into_iter()
                    .collect(),
            )
            .unwrap();

        let job = master.get_job().remove(0);
        master.register_result(JobResult::failed(&job, "not on the index"));

        // A is poisoned: no further resolve jobs for it, and callers
        // registering it are told so.
        assert!(!master.register_resolve_jobs(&[RequirementEntry::new(pkg("A"), range(""))]));
        assert!(master.fail().is_some());
    }

    #[test]
    fn core_perl_distfile_is_refused() {
        let reporter = Arc::new(MemoryReporter::new());
        let mut master = Master::new(
            MasterConfig::default(),
            CoreInventory::new(),
            EmptyEnvironment,
            Arc::clone(&reporter),
        );
        master.add_job(resolve_job("Scalar.Util"));
        let job = master.get_job().remove(0);

        master.register_result(JobResult::done(
            &job,
            JobOutcome::Resolve {
                distfile: "authors/id/S/SH/SHAY/perl-5.38.0.tar.gz".into(),
                source: Source::Cpan,
                uri: "authors/id/S/SH/SHAY/perl-5.38.0.tar.gz".into(),
                version: Some(version("5.38.0")),
                rev: None,
                provides: vec![],
            },
        ));

        assert!(reporter.contains("cannot upgrade core module"));
        assert!(master.distribution("authors/id/S/SH/SHAY/perl-5.38.0.tar.gz").is_none());
        let report = master.fail().expect("run failed");
        assert!(report
            .install
            .contains(&"authors/id/S/SH/SHAY/perl-5.38.0.tar.gz".to_string()));
    }

    #[test]
    fn already_installed_resolve_creates_no_distribution() {
        let mut env = StaticEnvironment::new();
        env.insert_version(pkg("A"), version("1.2"));
        let reporter = Arc::new(MemoryReporter::new());
        let mut master = Master::new(
            MasterConfig::default(),
            CoreInventory::new(),
            env,
            Arc::clone(&reporter),
        );
        master.add_job(resolve_job("A"));
        let job = master.get_job().remove(0);

        master.register_result(JobResult::done(
            &job,
            JobOutcome::Resolve {
                distfile: "A-1.2.tar.gz".into(),
                source: Source::Cpan,
                uri: "authors/A-1.2.tar.gz".into(),
                version: Some(version("1.2")),
                rev: None,
                provides: vec![],
            },
        ));

        assert!(master.distribution("A-1.2.tar.gz").is_none());
        assert!(reporter.contains("already installed"));
        assert!(master.fail().is_none());
    }

    #[test]
    fn perl_requirement_emits_no_resolve_jobs() {
        let mut master = empty_master();
        master
            .add_requirements(
                [RequirementEntry::new(pkg("perl"), range(">= 5.8"))]
                    .into_iter()
                    .collect(),
            )
            .unwrap();

        assert!(master.get_job().is_empty());
        assert!(master.fail().is_none());
        assert_eq!(master.installed_count(), 0);
    }

    #[test]
    fn demoted_core_module_warns_once_and_satisfies() {
        let mut core = CoreInventory::new();
        let target = version("5.36.0");
        core.insert(target.clone(), pkg("CGI"), version("4.5"));

        let reporter = Arc::new(MemoryReporter::new());
        let config = MasterConfig {
            target_perl: Some(target),
            ..MasterConfig::default()
        };
        let mut master = Master::new(config, core, EmptyEnvironment, Arc::clone(&reporter));

        let reqs: Requirement = [RequirementEntry::new(pkg("CGI"), range(">= 4.0"))]
            .into_iter()
            .collect();
        let first = master.is_satisfied(&reqs);
        assert_eq!(first.status, Status::Satisfied);
        let second = master.is_satisfied(&reqs);
        assert_eq!(second.status, Status::Satisfied);

        let warnings = reporter
            .records()
            .iter()
            .filter(|r| r.contains("used to be in core"))
            .count();
        assert_eq!(warnings, 1);
    }

    #[test]
    fn global_mode_skips_the_demotion_warning() {
        let mut core = CoreInventory::new();
        let target = version("5.36.0");
        core.insert(target.clone(), pkg("CGI"), version("4.5"));

        let reporter = Arc::new(MemoryReporter::new());
        let config = MasterConfig {
            target_perl: Some(target),
            global: true,
            ..MasterConfig::default()
        };
        let mut master = Master::new(config, core, EmptyEnvironment, Arc::clone(&reporter));

        let reqs: Requirement = [RequirementEntry::new(pkg("CGI"), range(">= 4.0"))]
            .into_iter()
            .collect();
        assert_eq!(master.is_satisfied(&reqs).status, Status::Satisfied);
        assert!(!reporter.contains("used to be in core"));
    }

    #[test]
    fn reinstall_reports_absent_exactly_once() {
        let mut env = StaticEnvironment::new();
        env.insert_version(pkg("A"), version("1.2"));
        let config = MasterConfig {
            reinstall: true,
            ..MasterConfig::default()
        };
        let mut master = Master::new(config, CoreInventory::new(), env, MemoryReporter::new());

        let first = master.is_installed(&pkg("A"), &range(">= 1.0"), None);
        assert!(!first.installed, "first query forces a reinstall");
        let second = master.is_installed(&pkg("A"), &range(">= 1.0"), None);
        assert!(second.installed, "reinstalled at most once per run");
    }
}
