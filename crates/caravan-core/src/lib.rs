//! Leaf types for the caravan installer.
//!
//! This crate provides the value types the orchestration engine is built
//! from:
//! - Perl-compatible version literals and version ranges
//! - Package names (with the `perl` pseudo-package)
//! - Ordered requirement collections with merging semantics
//! - Error types

pub mod error;
mod package;
mod requirement;
mod version;

pub use error::{Error, Result};
pub use package::{PERL, PackageName};
pub use requirement::{Options, Requirement, RequirementEntry};
pub use version::{Version, VersionRange};
