// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The public driver surface: one function per operation a virtualization
//! host's CPU-feature engine registers for the `"x86"` architecture, each
//! delegating to the module that actually implements it.

use crate::baseline::{x86_baseline, x86_has_feature, x86_update};
use crate::catalog::Catalog;
use crate::codec::{x86_decode, x86_encode, DecodeFlags, EncodeRequest, EncodeOutputs};
use crate::compute::{x86_compute, ComputeOutcome};
use crate::cpu_def::CpuDef;
use crate::data::CpuidData;
use crate::error::{BaselineError, InputError};
use crate::node;

/// Compares `cpu` against `host`, with no guest CPUID data produced.
pub fn compare(catalog: &Catalog, host: &CpuDef, cpu: &CpuDef) -> Result<ComputeOutcome, InputError> {
    let (outcome, _) = x86_compute(catalog, host, cpu, false)?;
    Ok(outcome)
}

/// Compares `host` against `guest` and, when compatible, returns the CPUID
/// data the guest should be handed alongside the comparison outcome.
pub fn guest_data(
    catalog: &Catalog,
    host: &CpuDef,
    guest: &CpuDef,
) -> Result<(ComputeOutcome, Option<CpuidData>), InputError> {
    x86_compute(catalog, host, guest, true)
}

/// Decodes an opaque CPUID snapshot into `cpu`'s model/vendor/feature
/// fields.
pub fn decode(
    catalog: &Catalog,
    cpu: &mut CpuDef,
    data: &CpuidData,
    allowlist: Option<&[String]>,
    preferred: Option<&str>,
    flags: DecodeFlags,
) -> Result<(), InputError> {
    x86_decode(catalog, cpu, data, allowlist, preferred, flags)
}

/// Builds the independently requested CPUID blobs (force/require/optional/
/// disable/forbid/vendor) for `cpu`.
pub fn encode(catalog: &Catalog, cpu: &CpuDef, request: EncodeRequest) -> Result<EncodeOutputs, InputError> {
    x86_encode(catalog, cpu, request)
}

/// A no-op: every [`CpuidData`] here is an owned value freed by Rust's
/// normal drop glue, unlike the source driver's explicit free call.
pub fn free(_data: CpuidData) {}

/// Captures the CPUID of the physical host this process runs on.
pub fn node_data() -> Result<CpuidData, crate::error::NodeDataError> {
    node::node_data()
}

/// Intersects `cpus` into the largest CPU description compatible with all
/// of them.
pub fn baseline(
    catalog: &Catalog,
    cpus: &[CpuDef],
    allowlist: Option<&[String]>,
    flags: DecodeFlags,
) -> Result<CpuDef, BaselineError> {
    x86_baseline(catalog, cpus, allowlist, flags)
}

/// Rewrites `guest`'s mode/match/features against `host`.
pub fn update(catalog: &Catalog, guest: &mut CpuDef, host: &CpuDef) -> Result<(), InputError> {
    x86_update(catalog, guest, host)
}

/// Whether `data` has the named feature.
pub fn has_feature(catalog: &Catalog, data: &CpuidData, name: &str) -> Result<bool, InputError> {
    x86_has_feature(catalog, data, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Accessor, ElementKind};
    use crate::policy::MatchMode;

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
        cat
    }

    #[test]
    fn guest_data_returns_identical_and_host_cpuid() {
        let cat = catalog();
        let mut host = CpuDef::host("core2");
        host.vendor_name = Some("Intel".to_owned());
        let mut guest = CpuDef::guest("core2");
        guest.match_mode = MatchMode::Exact;
        let (outcome, data) = guest_data(&cat, &host, &guest).unwrap();
        assert_eq!(outcome, ComputeOutcome::Identical);
        let data = data.unwrap();
        let core2_data = &cat.model("core2").unwrap().data;
        assert!(data.is_subset(core2_data) && core2_data.is_subset(&data));
    }

    #[test]
    fn has_feature_delegates_to_baseline_module() {
        let cat = catalog();
        let data = cat.model("core2").unwrap().data.deep_copy();
        assert!(has_feature(&cat, &data, "fpu").unwrap());
    }
}
