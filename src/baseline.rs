// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Intersecting many CPU descriptions into one, rewriting a guest's policy
//! against a host model, and probing whether a data blob has a named
//! feature.

use crate::catalog::Catalog;
use crate::codec::{x86_data_from_cpu_features, x86_data_to_cpu_features, x86_decode, DecodeFlags};
use crate::cpu_def::CpuDef;
use crate::data::CpuidData;
use crate::error::{BaselineError, InputError};
use crate::policy::{Arch, MatchMode, Mode, Policy};

pub use crate::codec::x86_model_from_cpu;

/// Intersects `cpus` into the largest CPU description compatible with every
/// one of them.
///
/// Starts from `cpus[0]`'s REQUIRE model, then `intersect`s in each
/// subsequent CPU's REQUIRE model. Vendors must agree: if every CPU names
/// the same vendor it survives into the output and its leaf is added back
/// before decoding; if any CPU omits a vendor, the output has none; if two
/// CPUs name different vendors, that's [`BaselineError::VendorMismatch`].
/// An empty final intersection is [`BaselineError::Incompatible`]. The
/// decoded result's architecture is cleared (baseline describes capability,
/// not a specific arch).
pub fn x86_baseline(
    catalog: &Catalog,
    cpus: &[CpuDef],
    allowlist: Option<&[String]>,
    flags: DecodeFlags,
) -> Result<CpuDef, BaselineError> {
    let (first, rest) = cpus.split_first().ok_or(BaselineError::Empty)?;

    let mut distinct_vendors: Vec<&str> = Vec::new();
    let mut any_vendorless = false;
    for cpu in cpus {
        match cpu.vendor_name.as_deref() {
            Some(v) if !distinct_vendors.contains(&v) => distinct_vendors.push(v),
            None => any_vendorless = true,
            _ => {}
        }
    }
    if distinct_vendors.len() > 1 {
        return Err(BaselineError::VendorMismatch);
    }
    let common_vendor = if any_vendorless {
        None
    } else {
        distinct_vendors.first().copied()
    };

    let mut base = x86_model_from_cpu(catalog, first, Policy::Require)?.data;
    for cpu in rest {
        let model = x86_model_from_cpu(catalog, cpu, Policy::Require)?;
        base.intersect(&model.data);
    }

    if base.is_empty() {
        return Err(BaselineError::Incompatible);
    }

    if let Some(vendor_name) = common_vendor {
        if let Some(vendor) = catalog.vendor(vendor_name) {
            base.add_cpuid(&vendor.cpuid);
        }
    }

    let mut out = CpuDef::default();
    x86_decode(catalog, &mut out, &base, allowlist, None, flags)?;
    out.arch = Arch::None;
    Ok(out)
}

/// Rewrites `guest`'s mode/match/features against `host`, per
/// `guest.mode`:
///
/// - [`Mode::Custom`]: each `OPTIONAL` feature becomes `REQUIRE` if
///   `host`'s REQUIRE model contains it, else `DISABLE`. If
///   `guest.match_mode` was [`MatchMode::Minimum`], it is promoted to
///   [`MatchMode::Exact`] and the leftover host capability beyond what the
///   guest already names is appended as `REQUIRE` features (a greedy
///   subset-peel over `host − guest_model − already-named-features`).
/// - [`Mode::HostModel`]: match becomes `Exact`; the guest's model/vendor
///   become the host's. If the guest already named features, they survive
///   the swap (saved, then restored after the copy).
/// - [`Mode::HostPassthrough`]: match becomes `Minimum`; the guest's
///   model/vendor/features become the host's outright.
pub fn x86_update(catalog: &Catalog, guest: &mut CpuDef, host: &CpuDef) -> Result<(), InputError> {
    match guest.mode {
        Mode::Custom => {
            let host_model = x86_model_from_cpu(catalog, host, Policy::Require)?;
            let original_match = guest.match_mode;

            let optional_names: Vec<String> = guest
                .features
                .iter()
                .filter(|f| f.policy == Some(Policy::Optional))
                .map(|f| f.name.clone())
                .collect();
            for name in optional_names {
                let catalog_feature = catalog
                    .feature(&name)
                    .ok_or_else(|| InputError::UnknownFeature(name.clone()))?;
                let policy = if host_model.data.is_subset(&catalog_feature.data) {
                    Policy::Require
                } else {
                    Policy::Disable
                };
                guest.update_feature(&name, policy);
            }

            if original_match == MatchMode::Minimum {
                guest.match_mode = MatchMode::Exact;
                let guest_model = x86_model_from_cpu(catalog, guest, Policy::Require)?;
                let mut remainder = host_model.data;
                remainder.subtract(&guest_model.data);
                remainder.subtract(&x86_data_from_cpu_features(catalog, guest));
                x86_data_to_cpu_features(catalog, Policy::Require, &mut remainder, guest);
            }
        }
        Mode::HostModel => {
            guest.match_mode = MatchMode::Exact;
            if guest.features.is_empty() {
                guest.copy_model_from(host, false);
            } else {
                let saved = guest.features.clone();
                guest.copy_model_from(host, false);
                guest.features = saved;
            }
        }
        Mode::HostPassthrough => {
            guest.match_mode = MatchMode::Minimum;
            guest.copy_model_from(host, false);
        }
    }
    Ok(())
}

/// Whether `data` mask-contains the named feature's bits.
///
/// An unknown feature name is [`InputError::UnknownFeature`], not a silent
/// "absent" — unlike the `-1`-as-errno convention of the source driver,
/// Rust's `Result` lets us say so directly.
pub fn x86_has_feature(catalog: &Catalog, data: &CpuidData, name: &str) -> Result<bool, InputError> {
    let feature = catalog
        .feature(name)
        .ok_or_else(|| InputError::UnknownFeature(name.to_owned()))?;
    Ok(data.is_subset(&feature.data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Accessor, ElementKind};

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
    impl Accessor for El {
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

    fn feature_el(name: &'static str, function: u32, edx_bit: u32) -> El {
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
        cat.load(ElementKind::Feature, &feature_el("fpu", 1, 0)).unwrap();
        cat.load(ElementKind::Feature, &feature_el("sse2", 1, 26)).unwrap();
        cat.load(
            ElementKind::Feature,
            &feature_el("lm", crate::data::EXT_BASE + 1, 29),
        )
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

    fn host_guest(model: &str, vendor: &str) -> CpuDef {
        let mut h = CpuDef::guest(model);
        h.vendor_name = Some(vendor.to_owned());
        h
    }

    #[test]
    fn baseline_of_two_compatible_models_names_the_common_ancestor() {
        let cat = catalog();
        let cpus = vec![host_guest("x86_64", "Intel"), host_guest("core2", "Intel")];
        let out = x86_baseline(&cat, &cpus, None, DecodeFlags::empty()).unwrap();
        assert_eq!(out.model_name.as_deref(), Some("core2"));
        assert_eq!(out.vendor_name.as_deref(), Some("Intel"));
        assert_eq!(out.arch, Arch::None);
    }

    #[test]
    fn baseline_vendor_mismatch_is_an_error() {
        let cat = catalog();
        let cpus = vec![host_guest("core2", "Intel"), host_guest("base", "AMD")];
        let err = x86_baseline(&cat, &cpus, None, DecodeFlags::empty()).unwrap_err();
        assert_eq!(err, BaselineError::VendorMismatch);
    }

    #[test]
    fn baseline_with_no_cpus_is_an_error() {
        let cat = catalog();
        let err = x86_baseline(&cat, &[], None, DecodeFlags::empty()).unwrap_err();
        assert_eq!(err, BaselineError::Empty);
    }

    #[test]
    fn has_feature_reports_presence_and_rejects_unknown_names() {
        let cat = catalog();
        let data = cat.model("core2").unwrap().data.deep_copy();
        assert!(x86_has_feature(&cat, &data, "fpu").unwrap());
        assert!(!x86_has_feature(&cat, &data, "lm").unwrap());
        assert_eq!(
            x86_has_feature(&cat, &data, "nope").unwrap_err(),
            InputError::UnknownFeature("nope".to_owned())
        );
    }

    #[test]
    fn update_custom_promotes_optional_to_require_when_host_has_it() {
        let cat = catalog();
        let host = CpuDef::host("x86_64");
        let mut guest = CpuDef::guest("base");
        guest.add_feature("sse2", Policy::Optional);
        x86_update(&cat, &mut guest, &host).unwrap();
        assert_eq!(guest.feature_policy("sse2"), Some(Policy::Require));
    }

    #[test]
    fn update_custom_disables_optional_when_host_lacks_it() {
        let cat = catalog();
        let host = CpuDef::host("base");
        let mut guest = CpuDef::guest("base");
        guest.add_feature("lm", Policy::Optional);
        x86_update(&cat, &mut guest, &host).unwrap();
        assert_eq!(guest.feature_policy("lm"), Some(Policy::Disable));
    }

    #[test]
    fn update_host_model_with_no_guest_features_copies_host_model() {
        let cat = catalog();
        let mut host = CpuDef::host("x86_64");
        host.vendor_name = Some("Intel".to_owned());
        let mut guest = CpuDef::guest("base");
        guest.mode = Mode::HostModel;
        x86_update(&cat, &mut guest, &host).unwrap();
        assert_eq!(guest.model_name.as_deref(), Some("x86_64"));
        assert_eq!(guest.match_mode, MatchMode::Exact);
    }

    #[test]
    fn update_host_passthrough_copies_host_model_and_sets_minimum() {
        let cat = catalog();
        let host = CpuDef::host("x86_64");
        let mut guest = CpuDef::guest("base");
        guest.mode = Mode::HostPassthrough;
        x86_update(&cat, &mut guest, &host).unwrap();
        assert_eq!(guest.model_name.as_deref(), Some("x86_64"));
        assert_eq!(guest.match_mode, MatchMode::Minimum);
    }
}
