// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Comparing host vs. guest CPU definitions under policies and match
//! modes: the model comparator and the central `x86Compute` algorithm.

use crate::catalog::{Catalog, Model};
use crate::codec::x86_model_from_cpu;
use crate::cpu_def::CpuDef;
use crate::data::CpuidData;
use crate::error::{IncompatibleReason, InputError};
use crate::policy::{CpuType, MatchMode, Policy};

/// The four-way relation between two models' bit sets, as distinguished by
/// mask containment on each leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRelation {
    /// Bit-equal on every leaf present in either.
    Equal,
    /// `model1` has bits `model2` lacks, and nothing the other way.
    Superset,
    /// `model2` has bits `model1` lacks, and nothing the other way.
    Subset,
    /// Each side has bits the other lacks.
    Unrelated,
}

/// Combines two partial per-leaf verdicts the way the comparator folds a
/// walk over many leaves into one overall relation: `Equal` is absorbed by
/// anything, agreement sticks, and disagreement collapses to `Unrelated`.
fn combine(acc: Option<ModelRelation>, leaf: ModelRelation) -> Option<ModelRelation> {
    use ModelRelation::{Equal, Subset, Superset, Unrelated};
    match acc {
        None => Some(leaf),
        Some(Equal) => Some(leaf),
        Some(prev) => match (prev, leaf) {
            (Superset, Equal) | (Superset, Superset) => Some(Superset),
            (Subset, Equal) | (Subset, Subset) => Some(Subset),
            _ if prev == leaf => Some(prev),
            _ => Some(Unrelated),
        },
    }
}

/// Compares `model1` to `model2` leaf by leaf via mask containment,
/// returning one of `{Equal, Subset, Superset, Unrelated}`.
///
/// A single leaf where `model1` has bits `model2` lacks yields a candidate
/// verdict of `Superset` for that leaf (and vice versa for `Subset`); once
/// both kinds of candidate verdict have appeared, the overall result is
/// `Unrelated`. The walk covers `model1`'s leaves first, then `model2`'s —
/// symmetric by construction, since either walk alone would miss a leaf the
/// other side has but the first lacks.
#[must_use]
pub fn x86_model_compare(model1: &Model, model2: &Model) -> ModelRelation {
    let mut result: Option<ModelRelation> = None;

    for leaf in model1.data.iterate() {
        let leaf_relation = match model2.data.lookup(leaf.function) {
            Some(other_leaf) if other_leaf.matches(leaf) => ModelRelation::Equal,
            Some(other_leaf) if other_leaf.match_masked(leaf) => ModelRelation::Subset,
            _ => ModelRelation::Superset,
        };
        result = combine(result, leaf_relation);
        if result == Some(ModelRelation::Unrelated) {
            return ModelRelation::Unrelated;
        }
    }

    for leaf in model2.data.iterate() {
        let leaf_relation = match model1.data.lookup(leaf.function) {
            Some(other_leaf) if other_leaf.matches(leaf) => ModelRelation::Equal,
            Some(other_leaf) if other_leaf.match_masked(leaf) => ModelRelation::Superset,
            _ => ModelRelation::Subset,
        };
        result = combine(result, leaf_relation);
        if result == Some(ModelRelation::Unrelated) {
            return ModelRelation::Unrelated;
        }
    }

    result.unwrap_or(ModelRelation::Equal)
}

/// The outcome of [`x86_compute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeOutcome {
    /// The host satisfies the guest's requirements exactly.
    Identical,
    /// The host is a superset of what the guest asked for.
    Superset,
    /// The host cannot satisfy the guest's requirements.
    Incompatible(IncompatibleReason),
}

fn feature_names(catalog: &Catalog, data: &CpuidData) -> Vec<String> {
    catalog
        .features()
        .iter()
        .filter(|f| !f.data.is_empty() && data.is_subset(&f.data))
        .map(|f| f.name.clone())
        .collect()
}

/// Compares `host` against `cpu` (a guest or another host definition) and,
/// if requested, produces the CPUID data a guest should be handed.
///
/// See spec §4.4 for the full algorithm; summarized:
/// 1. Architecture and vendor compatibility checks.
/// 2. Build `host_model` (REQUIRE) and `cpu`'s force/require/optional/
///    disable/forbid models.
/// 3. Forbid check: any host feature in `cpu_forbid` is fatal.
/// 4. Require normalization: explicit force/optional/disable override an
///    inherited require.
/// 5. Require satisfaction: the host must be a superset (or equal) of
///    `cpu_require`.
/// 6. Classification: `IDENTICAL` if nothing left over once optional/
///    require/disable/force are excluded, else `SUPERSET` (fatal under
///    strict match for a guest).
/// 7. If guest data was requested, build it from `host_model` plus forced
///    features minus disabled ones (and minus the leftover diff, under
///    exact match).
pub fn x86_compute(
    catalog: &Catalog,
    host: &CpuDef,
    cpu: &CpuDef,
    want_guest_data: bool,
) -> Result<(ComputeOutcome, Option<CpuidData>), InputError> {
    let Some(_effective_arch) = cpu.arch.reconcile(host.arch) else {
        return Ok((
            ComputeOutcome::Incompatible(IncompatibleReason::new("CPU arch does not match host arch")),
            None,
        ));
    };

    if let Some(cpu_vendor) = cpu.vendor_name.as_deref() {
        if host.vendor_name.as_deref() != Some(cpu_vendor) {
            return Ok((
                ComputeOutcome::Incompatible(IncompatibleReason::new(
                    "host CPU vendor does not match required CPU vendor",
                )),
                None,
            ));
        }
    }

    let host_model = x86_model_from_cpu(catalog, host, Policy::Require)?;
    let cpu_force = x86_model_from_cpu(catalog, cpu, Policy::Force)?;
    let mut cpu_require = x86_model_from_cpu(catalog, cpu, Policy::Require)?;
    let cpu_optional = x86_model_from_cpu(catalog, cpu, Policy::Optional)?;
    let cpu_disable = x86_model_from_cpu(catalog, cpu, Policy::Disable)?;
    let cpu_forbid = x86_model_from_cpu(catalog, cpu, Policy::Forbid)?;

    let mut forbidden_hit = cpu_forbid.data.deep_copy();
    forbidden_hit.intersect(&host_model.data);
    if !forbidden_hit.is_empty() {
        return Ok((
            ComputeOutcome::Incompatible(IncompatibleReason::with_features(
                "host CPU does not allow forbidden CPU feature",
                feature_names(catalog, &forbidden_hit),
            )),
            None,
        ));
    }

    // Explicit force/optional/disable override an inherited require.
    let mut overrides = cpu_force.data.deep_copy();
    overrides.add(&cpu_optional.data);
    overrides.add(&cpu_disable.data);
    cpu_require.data.subtract(&overrides);

    let relation = x86_model_compare(&host_model, &cpu_require);
    if matches!(relation, ModelRelation::Subset | ModelRelation::Unrelated) {
        let mut missing = cpu_require.data.deep_copy();
        missing.subtract(&host_model.data);
        return Ok((
            ComputeOutcome::Incompatible(IncompatibleReason::with_features(
                "guest requires a CPU feature not supported by the host",
                feature_names(catalog, &missing),
            )),
            None,
        ));
    }

    let mut diff = host_model.data.deep_copy();
    diff.subtract(&cpu_optional.data);
    diff.subtract(&cpu_require.data);
    diff.subtract(&cpu_disable.data);
    diff.subtract(&cpu_force.data);

    let outcome = if diff.is_empty() {
        ComputeOutcome::Identical
    } else {
        ComputeOutcome::Superset
    };

    if outcome == ComputeOutcome::Superset
        && cpu.cpu_type == CpuType::Guest
        && cpu.match_mode == MatchMode::Strict
    {
        return Ok((
            ComputeOutcome::Incompatible(IncompatibleReason::with_features(
                "guest CPU doesn't match specification: extra features not allowed in strict mode",
                feature_names(catalog, &diff),
            )),
            None,
        ));
    }

    let guest_data = if want_guest_data {
        let mut guest_model = host_model.data.deep_copy();
        if cpu.cpu_type == CpuType::Guest && cpu.match_mode == MatchMode::Exact {
            guest_model.subtract(&diff);
        }
        guest_model.add(&cpu_force.data);
        guest_model.subtract(&cpu_disable.data);
        Some(guest_model)
    } else {
        None
    };

    Ok((outcome, guest_data))
}
