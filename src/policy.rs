// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared enums for feature policy, match mode, fallback, CPU mode/type, and
//! architecture. Every other module depends on these.

use serde::{Deserialize, Serialize};

/// How a feature should be treated when reconciling guest against host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Policy {
    /// Force the feature on regardless of what the model would otherwise say.
    Force,
    /// The guest requires this feature; incompatible if the host lacks it.
    Require,
    /// Include the feature if the host has it, otherwise silently drop it.
    Optional,
    /// Force the feature off even if the model would otherwise include it.
    Disable,
    /// Incompatible if the host has this feature at all.
    Forbid,
}

/// How a guest's requested feature set compares against what the host model
/// naturally provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchMode {
    /// The guest CPUID must equal the host model exactly (modulo explicit
    /// policy overrides).
    Exact,
    /// The host may not have any feature beyond what the guest asked for.
    Strict,
    /// The host may be a strict superset of the guest's requirements.
    Minimum,
}

/// Whether [`codec::x86_decode`](crate::codec::x86_decode) may substitute a
/// nearby model when the preferred one is absent from the allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fallback {
    /// Substitute another allowed model, emitting a warning.
    Allow,
    /// Fail with [`error::InputError::UnsupportedModel`](crate::error::InputError::UnsupportedModel).
    Forbid,
}

/// How a guest CPU definition's model should be derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// The model and feature policies are taken literally from the
    /// definition.
    Custom,
    /// The model is synthesized from the host's detected model, retaining
    /// the guest's explicit feature policies.
    HostModel,
    /// The guest CPUID is the host's, unmodified.
    HostPassthrough,
}

/// Whether a CPU definition describes a physical host or a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuType {
    /// Describes a physical machine's capabilities.
    Host,
    /// Describes what a guest wants or has been given.
    Guest,
}

/// Instruction set architecture of a CPU definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    /// Unspecified; inherits the host's architecture.
    None,
    /// 32-bit x86.
    I686,
    /// 64-bit x86.
    X86_64,
}

impl Arch {
    /// Whether `self` names one of the architectures this driver supports
    /// ([`Arch::I686`] or [`Arch::X86_64`]).
    ///
    /// Membership, not equality with a particular host: the driver table is
    /// registered over both architectures, so a guest naming either one is
    /// acceptable regardless of which one the host happens to be (the
    /// original driver checks membership in its `archs` array, not equality
    /// against `host->arch`).
    #[must_use]
    pub fn is_supported(self) -> bool {
        matches!(self, Arch::I686 | Arch::X86_64)
    }

    /// Resolves the effective architecture for a compute/baseline/update
    /// operation: `self` if specified, else `host`.
    #[must_use]
    pub fn reconcile(self, host: Arch) -> Option<Arch> {
        match self {
            Arch::None => Some(host),
            other if other.is_supported() => Some(other),
            _ => None,
        }
    }
}
