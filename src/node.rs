// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Capturing the CPUID of the physical host this process runs on.

use crate::data::CpuidData;
#[cfg(target_arch = "x86_64")]
use crate::data::{CpuidTuple, EXT_BASE};
use crate::error::NodeDataError;

/// Probes the running x86_64 host's CPUID and assembles it into a
/// [`CpuidData`].
///
/// For `base` in `{0x0, EXT_BASE}`: calls `CPUID(base)` to learn
/// `max_leaf_index` from the returned `eax`, then calls `CPUID(base + i)`
/// for every `i` in `0..=max_leaf_index`, with `ecx` zeroed before each
/// call (the core only ever reads the zero sub-leaf). Unsupported function
/// numbers surface as all-zero leaves on real hardware and are simply
/// skipped by [`CpuidData::iterate`] downstream.
#[cfg(target_arch = "x86_64")]
pub fn node_data() -> Result<CpuidData, NodeDataError> {
    // SAFETY: guarded by `cfg(target_arch = "x86_64")`; `__cpuid` is safe to
    // call on any x86_64 target regardless of which leaves it supports.
    let mut data = CpuidData::new();
    for base in [0u32, EXT_BASE] {
        let probe = unsafe { core::arch::x86_64::__cpuid(base) };
        let max_leaf = probe.eax.wrapping_sub(base);
        for i in 0..=max_leaf {
            let function = base.wrapping_add(i);
            // SAFETY: same as above.
            let leaf = unsafe { core::arch::x86_64::__cpuid(function) };
            data.add_cpuid(&CpuidTuple {
                function,
                eax: leaf.eax,
                ebx: leaf.ebx,
                ecx: leaf.ecx,
                edx: leaf.edx,
            });
        }
    }
    Ok(data)
}

/// Always fails: CPUID probing is only meaningful on x86_64 hosts.
#[cfg(not(target_arch = "x86_64"))]
pub fn node_data() -> Result<CpuidData, NodeDataError> {
    Err(NodeDataError::UnsupportedArch)
}
