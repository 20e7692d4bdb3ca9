// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The error taxonomy, split by operation cluster rather than one
//! crate-wide error enum.

use thiserror::Error;

/// Errors raised while loading catalog elements (vendors, features,
/// models) from the external declarative map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// An element (vendor, feature, or model) reused a name already present
    /// in its collection.
    #[error("{kind} name '{name}' is already defined")]
    DuplicateName {
        /// Which collection the duplicate was found in.
        kind: &'static str,
        /// The offending name.
        name: String,
    },
    /// A required `name` attribute was missing.
    #[error("element is missing its required 'name' attribute")]
    MissingName,
    /// A `<vendor>` element's `string` attribute was not exactly 12 bytes.
    #[error("vendor string must be exactly 12 bytes, got {0}")]
    MalformedVendor(usize),
    /// A `<cpuid>` element had an unparsable `function` or register
    /// attribute.
    #[error("malformed cpuid attribute '{0}'")]
    MalformedCpuid(String),
    /// A `<model>` element named an ancestor that has not been loaded yet.
    #[error("model references unknown ancestor model '{0}'")]
    UnknownAncestor(String),
    /// A `<model>` element named a vendor that does not exist in the
    /// catalog.
    #[error("model references unknown vendor '{0}'")]
    UnknownVendor(String),
    /// A `<feature>` reference (in a model or a CPU definition) named a
    /// feature that does not exist in the catalog.
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),
}

/// Errors raised when a caller-supplied CPU definition references catalog
/// entries that do not exist, or the catalog itself cannot satisfy the
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// The CPU definition's `model_name` is not in the catalog.
    #[error("unknown CPU model '{0}'")]
    UnknownModel(String),
    /// A feature named by the CPU definition is not in the catalog.
    #[error("unknown CPU feature '{0}'")]
    UnknownFeature(String),
    /// Decode's `preferred` model was excluded by the allowlist and
    /// `fallback == Fallback::Forbid`.
    #[error("model '{0}' is not supported and fallback is forbidden")]
    UnsupportedModel(String),
    /// The CPU definition named an architecture outside `{I686, X86_64}`.
    #[error("CPU arch '{0:?}' is not supported by this driver")]
    ArchMismatch(crate::policy::Arch),
    /// Decode exhausted every allowed candidate model without finding one
    /// whose data is compatible with the probed CPUID.
    #[error("no suitable CPU model found for the given data")]
    NoSuitableModel,
}

/// The reason [`ComputeOutcome::Incompatible`](crate::compute::ComputeOutcome::Incompatible)
/// was returned, carrying the human-readable feature names implicated in
/// the incompatibility, when any were resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {features:?}")]
pub struct IncompatibleReason {
    /// Short description of which check failed.
    pub reason: &'static str,
    /// The feature names implicated in the failure, if any were resolved.
    pub features: Vec<String>,
}

impl IncompatibleReason {
    /// Builds a reason with no catalog-resolved feature names (e.g. an arch
    /// or vendor mismatch).
    #[must_use]
    pub fn new(reason: &'static str) -> Self {
        Self {
            reason,
            features: Vec::new(),
        }
    }

    /// Builds a reason naming the given features.
    #[must_use]
    pub fn with_features(reason: &'static str, features: Vec<String>) -> Self {
        Self { reason, features }
    }
}

/// Errors specific to the host CPUID probe ([`crate::node`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeDataError {
    /// The current process is not running on a supported architecture.
    #[error("CPUID probing is only supported on x86_64 hosts")]
    UnsupportedArch,
}

/// Errors raised by [`crate::baseline::x86_baseline`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BaselineError {
    /// A catalog lookup failed while building one of the input models.
    #[error(transparent)]
    Input(#[from] InputError),
    /// No CPUs were given to intersect.
    #[error("baseline requires at least one CPU")]
    Empty,
    /// The given CPUs declared different, mutually exclusive vendors.
    #[error("CPU vendors of the given CPUs do not match")]
    VendorMismatch,
    /// The given CPUs share no common CPUID features.
    #[error("no features in common between given CPUs")]
    Incompatible,
}
