// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! x86 CPUID feature algebra and model resolver.
//!
//! This crate compares, combines, decodes, encodes, and reconciles CPU
//! capability descriptions expressed as x86 CPUID register values, against a
//! curated catalog of named vendors, features, and models. It is the core of
//! a virtualization host's guest-CPU definition engine: given a host's
//! capabilities and a guest's requested CPU definition, it decides whether
//! the guest can run on the host and, if so, what CPUID the guest should be
//! handed.
//!
//! XML parsing, file I/O, and the generic `virCPUDef`-style host object are
//! out of scope; the catalog loader consumes a small callback contract
//! ([`catalog::Accessor`]) instead of a parser, and guest/host CPU
//! definitions are read and written through the [`cpu_def`] accessor
//! contract.

/// CPUID data algebra: sparse per-leaf register tuples and set operations
/// over them.
pub mod data;

/// Shared enums used across every other module (feature policy, match mode,
/// fallback, CPU mode/type, architecture).
pub mod policy;

/// Named vendors, features, and models, loaded from a declarative map.
pub mod catalog;

/// The external CPU definition accessor contract (§6) and a concrete
/// in-memory implementation of it.
pub mod cpu_def;

/// Translating between high-level CPU definitions and raw CPUID data.
pub mod codec;

/// Comparing host vs. guest CPU definitions under policies and match modes.
pub mod compute;

/// Intersecting many CPU descriptions into one, rewriting a guest's policy
/// against a host, and probing whether a data blob has a named feature.
pub mod baseline;

/// Capturing the CPUID of the physical host this process runs on.
pub mod node;

/// The error taxonomy of the crate, split by operation cluster.
pub mod error;

/// The public driver surface (§6 of the design): one function per operation
/// in the driver table, each delegating to the module that implements it.
pub mod driver;

pub use catalog::{Catalog, Feature, Model, Vendor};
pub use cpu_def::{CpuDef, CpuFeature};
pub use data::{CpuidData, CpuidTuple, EXT_BASE};
pub use policy::{Arch, CpuType, Fallback, MatchMode, Mode, Policy};
