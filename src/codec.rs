// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Translating between high-level CPU definitions (model + features +
//! policy) and raw CPUID data: `x86ModelFromCPU`, `x86DataToCPU`/the greedy
//! subset-peel, `x86Decode`, and `x86Encode`.

use bitflags::bitflags;
use log::{debug, warn};

use crate::catalog::{Catalog, Model};
use crate::cpu_def::CpuDef;
use crate::data::CpuidData;
use crate::error::InputError;
use crate::policy::{CpuType, Fallback, Policy};

bitflags! {
    /// Bit flags accepted by [`x86_decode`] and `baseline`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DecodeFlags: u32 {
        /// After selecting a candidate model, compute the residue of the
        /// model's own data not already covered by its named features and
        /// add it back as REQUIRE-policy features.
        const EXPAND_FEATURES = 1;
    }
}

/// Builds a working [`Model`] from `cpu`'s declared model/features under
/// `policy`.
///
/// If `policy` is [`Policy::Require`], starts from a copy of `cpu`'s named
/// catalog model (error if the name is unknown or unset); otherwise starts
/// empty. A host-typed CPU definition with a non-`Require` policy returns
/// the empty model immediately — host CPUs have no per-feature policy.
/// Otherwise, unions in every referenced feature whose own policy equals
/// `policy` (guests) or every referenced feature unconditionally (hosts).
pub fn x86_model_from_cpu(
    catalog: &Catalog,
    cpu: &CpuDef,
    policy: Policy,
) -> Result<Model, InputError> {
    let mut model = if policy == Policy::Require {
        let name = cpu
            .model_name
            .as_deref()
            .ok_or_else(|| InputError::UnknownModel(String::new()))?;
        catalog
            .model(name)
            .cloned()
            .ok_or_else(|| InputError::UnknownModel(name.to_owned()))?
    } else {
        Model {
            name: String::new(),
            vendor: None,
            data: CpuidData::new(),
        }
    };

    if policy != Policy::Require && cpu.cpu_type == CpuType::Host {
        return Ok(model);
    }

    for feature in &cpu.features {
        if cpu.cpu_type == CpuType::Guest && feature.policy != Some(policy) {
            continue;
        }
        let catalog_feature = catalog
            .feature(&feature.name)
            .ok_or_else(|| InputError::UnknownFeature(feature.name.clone()))?;
        model.data.add(&catalog_feature.data);
    }

    Ok(model)
}

/// The greedy subset-peel: iterates catalog features in load order; for
/// each one fully contained in `working`, subtracts it out and appends
/// `(feature.name, policy)` to `cpu`. Not minimum-cover — the result depends
/// on catalog load order by design (spec §4.3).
pub fn x86_data_to_cpu_features(
    catalog: &Catalog,
    policy: Policy,
    working: &mut CpuidData,
    cpu: &mut CpuDef,
) {
    for feature in catalog.features() {
        if working.is_subset(&feature.data) {
            working.subtract(&feature.data);
            cpu.add_feature(feature.name.clone(), policy);
        }
    }
}

/// Unions the data of every feature named on `cpu`'s feature list,
/// regardless of each one's stored policy. Used by `EXPAND_FEATURES` to
/// find a candidate model's residue beyond its already-named features, and
/// by baseline's `MINIMUM`-to-`EXACT` promotion for the same reason.
pub(crate) fn x86_data_from_cpu_features(catalog: &Catalog, cpu: &CpuDef) -> CpuidData {
    let mut data = CpuidData::new();
    for feature in &cpu.features {
        if let Some(catalog_feature) = catalog.feature(&feature.name) {
            data.add(&catalog_feature.data);
        }
    }
    data
}

/// Extracts a vendor from `data` by scanning the catalog's vendors: the
/// first whose leaf is mask-contained in `data` wins, and its bits are
/// cleared. Returns the vendor's name.
fn extract_vendor(catalog: &Catalog, data: &mut CpuidData) -> Option<String> {
    for vendor in catalog.vendors() {
        if let Some(leaf) = data.lookup(vendor.cpuid.function) {
            if leaf.match_masked(&vendor.cpuid) {
                data.lookup_mut(vendor.cpuid.function).clear_bits(&vendor.cpuid);
                return Some(vendor.name.clone());
            }
        }
    }
    None
}

/// Builds a `CPUDef` describing `data` in terms of `candidate`: the
/// features `data` has beyond `candidate`'s own (as REQUIRE) and the
/// features `candidate` has that `data` lacks (as DISABLE).
pub fn x86_data_to_cpu(catalog: &Catalog, data: &CpuidData, candidate: &Model) -> CpuDef {
    let mut copy = data.deep_copy();
    let mut model_data = candidate.data.deep_copy();

    let vendor_name = extract_vendor(catalog, &mut copy);

    // Note: `model_data` is subtracted against the *original* `data`, not
    // the vendor-stripped `copy` — mirrors the source driver exactly.
    copy.subtract(&model_data);
    model_data.subtract(data);

    let mut cpu = CpuDef {
        cpu_type: CpuType::Guest,
        model_name: Some(candidate.name.clone()),
        vendor_name,
        ..CpuDef::default()
    };

    x86_data_to_cpu_features(catalog, Policy::Require, &mut copy, &mut cpu);
    x86_data_to_cpu_features(catalog, Policy::Disable, &mut model_data, &mut cpu);

    cpu
}

/// Whether `name` is in `allowlist`, or `allowlist` is empty (meaning "no
/// restriction").
fn model_is_allowed(name: &str, allowlist: Option<&[String]>) -> bool {
    match allowlist {
        None => true,
        Some(list) if list.is_empty() => true,
        Some(list) => list.iter().any(|n| n == name),
    }
}

/// Picks the best-fitting named model for an opaque CPUID snapshot.
///
/// Iterates every catalog model (most-recently-loaded first). Models
/// excluded by `allowlist` are skipped unless they equal `preferred`: then
/// fallback governs whether that's an error ([`Fallback::Forbid`]) or a
/// warned-about substitution ([`Fallback::Allow`]). Candidates whose
/// declared vendor conflicts with the decoded vendor are skipped. If
/// `cpu.cpu_type` is [`CpuType::Host`], every feature policy is unset and
/// candidates containing any DISABLE feature are skipped outright.
///
/// Selection: `preferred`, if reached and allowed, wins immediately.
/// Otherwise the candidate with the fewest features wins; ties keep
/// whichever was found first (i.e. the more recently loaded model, since
/// iteration runs newest-first).
pub fn x86_decode(
    catalog: &Catalog,
    cpu: &mut CpuDef,
    data: &CpuidData,
    allowlist: Option<&[String]>,
    preferred: Option<&str>,
    flags: DecodeFlags,
) -> Result<(), InputError> {
    let mut best: Option<(CpuDef, &Model)> = None;

    for candidate in catalog.models_by_recency() {
        if !model_is_allowed(&candidate.name, allowlist) {
            if preferred == Some(candidate.name.as_str()) {
                if cpu.fallback == Fallback::Forbid {
                    return Err(InputError::UnsupportedModel(candidate.name.clone()));
                }
                warn!(
                    "preferred CPU model {} not allowed; closest supported model will be used",
                    candidate.name
                );
            } else {
                debug!("CPU model {} not allowed; ignoring", candidate.name);
            }
            continue;
        }

        let mut cpu_candidate = x86_data_to_cpu(catalog, data, candidate);

        if let (Some(candidate_vendor_idx), Some(decoded_vendor)) =
            (candidate.vendor, cpu_candidate.vendor_name.as_deref())
        {
            let candidate_vendor_name = &catalog.vendors()[candidate_vendor_idx].name;
            if candidate_vendor_name != decoded_vendor {
                debug!(
                    "CPU vendor {} of model {} differs from {}; ignoring",
                    candidate_vendor_name, candidate.name, decoded_vendor
                );
                continue;
            }
        }

        if cpu.cpu_type == CpuType::Host {
            cpu_candidate.cpu_type = CpuType::Host;
            if cpu_candidate
                .features
                .iter()
                .any(|f| f.policy == Some(Policy::Disable))
            {
                continue;
            }
            for f in &mut cpu_candidate.features {
                f.policy = None;
            }
        }

        if preferred == Some(candidate.name.as_str()) {
            best = Some((cpu_candidate, candidate));
            break;
        }

        let better = match &best {
            None => true,
            Some((current, _)) => current.features.len() > cpu_candidate.features.len(),
        };
        if better {
            best = Some((cpu_candidate, candidate));
        }
    }

    let (mut chosen, chosen_model) = best.ok_or(InputError::NoSuitableModel)?;

    if flags.contains(DecodeFlags::EXPAND_FEATURES) {
        let mut residue = chosen_model.data.deep_copy();
        let named = x86_data_from_cpu_features(catalog, &chosen);
        residue.subtract(&named);
        x86_data_to_cpu_features(catalog, Policy::Require, &mut residue, &mut chosen);
    }

    cpu.model_name = chosen.model_name;
    cpu.vendor_name = chosen.vendor_name;
    cpu.features = chosen.features;
    Ok(())
}

/// Which of the six outputs [`x86_encode`] should build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeRequest {
    /// Build the FORCE-policy data.
    pub forced: bool,
    /// Build the REQUIRE-policy data.
    pub required: bool,
    /// Build the OPTIONAL-policy data.
    pub optional: bool,
    /// Build the DISABLE-policy data.
    pub disabled: bool,
    /// Build the FORBID-policy data.
    pub forbidden: bool,
    /// Build the matched-vendor-only data.
    pub vendor: bool,
}

/// The outputs [`x86_encode`] produced, one per requested field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeOutputs {
    /// FORCE-policy data, if requested.
    pub forced: Option<CpuidData>,
    /// REQUIRE-policy data, if requested.
    pub required: Option<CpuidData>,
    /// OPTIONAL-policy data, if requested.
    pub optional: Option<CpuidData>,
    /// DISABLE-policy data, if requested.
    pub disabled: Option<CpuidData>,
    /// FORBID-policy data, if requested.
    pub forbidden: Option<CpuidData>,
    /// A fresh `CpuidData` containing only the matched vendor's leaf, if
    /// requested.
    pub vendor: Option<CpuidData>,
}

/// For each requested output, builds a model under the corresponding
/// policy and returns its data. The vendor output, if requested, is a
/// fresh `CpuidData` holding only the named vendor's leaf. Partial failure
/// returns an error and produces nothing (all-or-nothing, per spec §7).
pub fn x86_encode(
    catalog: &Catalog,
    cpu: &CpuDef,
    request: EncodeRequest,
) -> Result<EncodeOutputs, InputError> {
    let mut outputs = EncodeOutputs::default();

    if request.forced {
        outputs.forced = Some(x86_model_from_cpu(catalog, cpu, Policy::Force)?.data);
    }
    if request.required {
        outputs.required = Some(x86_model_from_cpu(catalog, cpu, Policy::Require)?.data);
    }
    if request.optional {
        outputs.optional = Some(x86_model_from_cpu(catalog, cpu, Policy::Optional)?.data);
    }
    if request.disabled {
        outputs.disabled = Some(x86_model_from_cpu(catalog, cpu, Policy::Disable)?.data);
    }
    if request.forbidden {
        outputs.forbidden = Some(x86_model_from_cpu(catalog, cpu, Policy::Forbid)?.data);
    }
    if request.vendor {
        let name = cpu
            .vendor_name
            .as_deref()
            .ok_or_else(|| InputError::UnknownModel(String::new()))?;
        let vendor = catalog
            .vendor(name)
            .ok_or_else(|| InputError::UnknownModel(name.to_owned()))?;
        let mut data = CpuidData::new();
        data.add_cpuid(&vendor.cpuid);
        outputs.vendor = Some(data);
    }

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ElementKind;

    #[derive(Debug, Clone, Default)]
    struct El {
        attrs: Vec<(&'static str, String)>,
        children: Vec<(&'static str, El)>,
    }
    impl El {
        fn attr(mut self, k: &'static str, v: impl Into<String>) -> Self {
            self.attrs.push((k, v.into()));
            self
        }
        fn child(mut self, tag: &'static str, el: El) -> Self {
            self.children.push((tag, el));
            self
        }
    }
    impl crate::catalog::Accessor for El {
        fn attr(&self, name: &str) -> Option<&str> {
            self.attrs.iter().find(|(n, _)| *n == name).map(|(_, v)| v.as_str())
        }
        fn nested(&self, tag: &str) -> Vec<Self> {
            self.children
                .iter()
                .filter(|(t, _)| *t == tag)
                .map(|(_, e)| e.clone())
                .collect()
        }
    }

    fn feature(name: &'static str, function: u32, edx_bit: u32) -> El {
        El::default().attr("name", name).child(
            "cpuid",
            El::default()
                .attr("function", format!("{function:#x}"))
                .attr("edx", format!("{:#x}", 1u32 << edx_bit)),
        )
    }

    fn catalog() -> Catalog {
        let mut cat = Catalog::new();
        cat.load(
            ElementKind::Vendor,
            &El::default().attr("name", "Intel").attr("string", "GenuineIntel"),
        )
        .unwrap();
        cat.load(
            ElementKind::Vendor,
            &El::default().attr("name", "AMD").attr("string", "AuthenticAMD"),
        )
        .unwrap();
        cat.load(ElementKind::Feature, &feature("fpu", 1, 0)).unwrap();
        cat.load(ElementKind::Feature, &feature("sse2", 1, 26)).unwrap();
        cat.load(ElementKind::Feature, &feature("lm", crate::data::EXT_BASE + 1, 29))
            .unwrap();
        cat.load(
            ElementKind::Model,
            &El::default()
                .attr("name", "base")
                .child("feature", El::default().attr("name", "fpu")),
        )
        .unwrap();
        cat.load(
            ElementKind::Model,
            &El::default()
                .attr("name", "core2")
                .child("model", El::default().attr("name", "base"))
                .child("vendor", El::default().attr("name", "Intel"))
                .child("feature", El::default().attr("name", "sse2")),
        )
        .unwrap();
        cat.load(
            ElementKind::Model,
            &El::default()
                .attr("name", "x86_64")
                .child("model", El::default().attr("name", "core2"))
                .child("feature", El::default().attr("name", "lm")),
        )
        .unwrap();
        cat
    }

    #[test]
    fn model_from_cpu_require_copies_named_model() {
        let cat = catalog();
        let cpu = CpuDef::guest("core2");
        let model = x86_model_from_cpu(&cat, &cpu, Policy::Require).unwrap();
        assert_eq!(model.data, cat.model("core2").unwrap().data);
    }

    #[test]
    fn model_from_cpu_host_nonrequire_is_empty() {
        let cat = catalog();
        let mut cpu = CpuDef::host("core2");
        cpu.add_feature("sse2", Policy::Force);
        let model = x86_model_from_cpu(&cat, &cpu, Policy::Force).unwrap();
        assert!(model.data.is_empty());
    }

    #[test]
    fn decode_prefers_named_model() {
        let cat = catalog();
        let mut data = cat.model("core2").unwrap().data.deep_copy();
        data.add(&cat.feature("lm").unwrap().data);

        let mut cpu = CpuDef::guest("");
        x86_decode(&cat, &mut cpu, &data, None, Some("core2"), DecodeFlags::empty()).unwrap();
        assert_eq!(cpu.model_name.as_deref(), Some("core2"));
    }

    #[test]
    fn decode_expand_features_adds_residue() {
        let cat = catalog();
        let mut data = cat.model("core2").unwrap().data.deep_copy();
        data.add(&cat.feature("lm").unwrap().data);

        let mut cpu = CpuDef::guest("");
        x86_decode(
            &cat,
            &mut cpu,
            &data,
            None,
            Some("core2"),
            DecodeFlags::EXPAND_FEATURES,
        )
        .unwrap();
        assert_eq!(cpu.model_name.as_deref(), Some("core2"));
        assert!(cpu
            .features
            .iter()
            .any(|f| f.name == "lm" && f.policy == Some(Policy::Require)));
    }

    #[test]
    fn decode_empty_catalog_has_no_suitable_model() {
        let cat = Catalog::new();
        let mut cpu = CpuDef::guest("");
        let err = x86_decode(
            &cat,
            &mut cpu,
            &CpuidData::new(),
            None,
            None,
            DecodeFlags::empty(),
        )
        .unwrap_err();
        assert_eq!(err, InputError::NoSuitableModel);
    }

    #[test]
    fn encode_vendor_output_is_single_leaf() {
        let cat = catalog();
        let mut cpu = CpuDef::guest("core2");
        cpu.vendor_name = Some("Intel".to_owned());
        let outputs = x86_encode(
            &cat,
            &cpu,
            EncodeRequest {
                vendor: true,
                ..EncodeRequest::default()
            },
        )
        .unwrap();
        let vendor_data = outputs.vendor.unwrap();
        assert_eq!(vendor_data, {
            let mut d = CpuidData::new();
            d.add_cpuid(&cat.vendor("Intel").unwrap().cpuid);
            d
        });
    }
}
