// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The external CPU definition accessor contract (spec §6) and a concrete
//! in-memory implementation. A real virtualization host has its own generic
//! `virCPUDef`-style object; this crate only ever touches it through the
//! reads and mutations named here.

use serde::{Deserialize, Serialize};

use crate::policy::{Arch, CpuType, Fallback, MatchMode, Mode, Policy};

/// One `(feature_name, policy)` pair on a CPU definition.
///
/// `policy` is `None` for a feature whose policy is meaningless — the
/// source driver encodes this as a `-1` sentinel on host-typed CPU
/// definitions (feature policy only has meaning for guests); `Option`
/// is the direct translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuFeature {
    /// The catalog feature name.
    pub name: String,
    /// How this CPU definition wants the feature treated, or `None` if
    /// policy is not meaningful for this definition's CPU type.
    pub policy: Option<Policy>,
}

impl CpuFeature {
    /// Builds a new `(name, Some(policy))` pair.
    #[must_use]
    pub fn new(name: impl Into<String>, policy: Policy) -> Self {
        Self {
            name: name.into(),
            policy: Some(policy),
        }
    }
}

/// A host or guest CPU definition: model name, vendor name, feature policy
/// list, and the match/fallback/mode knobs that govern how it is
/// reconciled. This is the concrete implementation of the §6 accessor
/// contract; the rest of the crate is written against the contract's
/// methods, not against this struct's fields, so a real host's own CPU
/// definition object can stand in for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuDef {
    /// Instruction set architecture.
    pub arch: Arch,
    /// Whether this describes a host or a guest.
    pub cpu_type: CpuType,
    /// How the model should be derived (only meaningful for guests).
    pub mode: Mode,
    /// How strictly the guest's requirements must match the host.
    pub match_mode: MatchMode,
    /// Whether decode may fall back to a nearby model.
    pub fallback: Fallback,
    /// The catalog model name, if any.
    pub model_name: Option<String>,
    /// The catalog vendor name, if any.
    pub vendor_name: Option<String>,
    /// The feature policy list.
    pub features: Vec<CpuFeature>,
}

impl Default for Arch {
    fn default() -> Self {
        Arch::None
    }
}

impl Default for CpuType {
    fn default() -> Self {
        CpuType::Host
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Custom
    }
}

impl Default for MatchMode {
    fn default() -> Self {
        MatchMode::Exact
    }
}

impl Default for Fallback {
    fn default() -> Self {
        Fallback::Allow
    }
}

impl CpuDef {
    /// A bare guest definition naming `model` with no feature overrides.
    #[must_use]
    pub fn guest(model: impl Into<String>) -> Self {
        Self {
            cpu_type: CpuType::Guest,
            model_name: Some(model.into()),
            ..Self::default()
        }
    }

    /// A bare host definition naming `model`.
    #[must_use]
    pub fn host(model: impl Into<String>) -> Self {
        Self {
            cpu_type: CpuType::Host,
            model_name: Some(model.into()),
            ..Self::default()
        }
    }

    /// The policy for `name`, if this definition mentions it and the
    /// policy is meaningful (`Some`).
    #[must_use]
    pub fn feature_policy(&self, name: &str) -> Option<Policy> {
        self.features.iter().find(|f| f.name == name)?.policy
    }

    /// Appends a `(name, policy)` pair. Does not check for duplicates; the
    /// caller (or catalog-driven construction) is responsible for that, the
    /// same way the original `virCPUDefAddFeature` leaves de-duplication to
    /// its caller.
    pub fn add_feature(&mut self, name: impl Into<String>, policy: Policy) {
        self.features.push(CpuFeature::new(name, policy));
    }

    /// Updates the policy of an existing feature, or appends it if absent.
    pub fn update_feature(&mut self, name: &str, policy: Policy) {
        match self.features.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.policy = Some(policy),
            None => self.add_feature(name.to_owned(), policy),
        }
    }

    /// Replaces this definition's model/vendor with `other`'s. When
    /// `keep_features` is true, the existing feature list is left alone;
    /// otherwise it is replaced with `other`'s.
    pub fn copy_model_from(&mut self, other: &CpuDef, keep_features: bool) {
        self.model_name = other.model_name.clone();
        self.vendor_name = other.vendor_name.clone();
        if !keep_features {
            self.features = other.features.clone();
        }
    }

    /// Clears the model, vendor, and feature list, leaving the rest of the
    /// definition (arch, type, mode, match, fallback) untouched.
    pub fn free_model(&mut self) {
        self.model_name = None;
        self.vendor_name = None;
        self.features.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_feature_appends_when_absent_and_overwrites_when_present() {
        let mut cpu = CpuDef::guest("core2");
        cpu.update_feature("sse2", Policy::Require);
        assert_eq!(cpu.feature_policy("sse2"), Some(Policy::Require));
        cpu.update_feature("sse2", Policy::Disable);
        assert_eq!(cpu.feature_policy("sse2"), Some(Policy::Disable));
        assert_eq!(cpu.features.len(), 1);
    }

    #[test]
    fn copy_model_from_can_keep_or_replace_features() {
        let mut host = CpuDef::host("x86_64");
        host.vendor_name = Some("Intel".to_owned());
        host.add_feature("lm", Policy::Require);

        let mut guest = CpuDef::guest("base");
        guest.add_feature("sse2", Policy::Optional);

        let mut kept = guest.clone();
        kept.copy_model_from(&host, true);
        assert_eq!(kept.model_name.as_deref(), Some("x86_64"));
        assert_eq!(kept.vendor_name.as_deref(), Some("Intel"));
        assert_eq!(kept.feature_policy("sse2"), Some(Policy::Optional));

        let mut replaced = guest.clone();
        replaced.copy_model_from(&host, false);
        assert_eq!(replaced.feature_policy("lm"), Some(Policy::Require));
        assert_eq!(replaced.feature_policy("sse2"), None);
    }

    #[test]
    fn free_model_clears_model_vendor_and_features_only() {
        let mut cpu = CpuDef::guest("core2");
        cpu.vendor_name = Some("Intel".to_owned());
        cpu.add_feature("sse2", Policy::Require);
        cpu.match_mode = MatchMode::Strict;

        cpu.free_model();

        assert_eq!(cpu.model_name, None);
        assert_eq!(cpu.vendor_name, None);
        assert!(cpu.features.is_empty());
        assert_eq!(cpu.match_mode, MatchMode::Strict);
        assert_eq!(cpu.cpu_type, CpuType::Guest);
    }
}
