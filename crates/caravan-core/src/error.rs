//! Error types for caravan leaf operations.

use thiserror::Error;

/// Errors produced by the version and requirement algebra.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A version literal could not be parsed.
    #[error("invalid version literal: {literal}")]
    InvalidVersion {
        /// The offending literal.
        literal: String,
    },

    /// A version range clause could not be parsed.
    #[error("invalid version range: {range}")]
    InvalidRange {
        /// The offending range string.
        range: String,
    },

    /// Two ranges intersect to the empty set.
    #[error("illegal version range: {left} with {right}")]
    IllegalRange {
        /// One side of the failed intersection.
        left: String,
        /// The other side.
        right: String,
    },

    /// Two requirement entries for one package could not be merged.
    #[error("Couldn't merge version range {incoming} with {existing} for package {package}")]
    RequirementConflict {
        /// The package both entries name.
        package: String,
        /// The range already held for the package.
        existing: String,
        /// The range that failed to merge in.
        incoming: String,
    },

    /// Two requirement entries pin the same package to different git refs.
    #[error("Couldn't merge ref {incoming} with {existing} for package {package}")]
    RefConflict {
        /// The package both entries name.
        package: String,
        /// The ref already held for the package.
        existing: String,
        /// The ref that failed to merge in.
        incoming: String,
    },

    /// A package name literal is empty or malformed.
    #[error("invalid package name: {name}")]
    InvalidPackageName {
        /// The offending name.
        name: String,
    },
}

/// Result alias for caravan leaf operations.
pub type Result<T> = std::result::Result<T, Error>;
