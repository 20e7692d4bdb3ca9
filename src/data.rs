// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! CPUID data algebra: a sparse container of per-leaf register tuples and
//! the bitwise set operations (union, intersection, subtraction,
//! containment) the rest of the crate is built on.
//!
//! Leaves are treated as bit-sets. A [`CpuidData`] holds two dense,
//! function-indexed sequences, `basic` for functions `< EXT_BASE` and
//! `extended` for functions `>= EXT_BASE`; a function past the end of its
//! sequence is equivalent to the null tuple (all registers zero).

use serde::{Deserialize, Serialize};

/// The base of the extended CPUID function range.
pub const EXT_BASE: u32 = 0x8000_0000;

/// A single CPUID leaf: the four-register result for one `function` input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuidTuple {
    /// CPUID input/output function number.
    pub function: u32,
    /// EAX register value.
    pub eax: u32,
    /// EBX register value.
    pub ebx: u32,
    /// ECX register value.
    pub ecx: u32,
    /// EDX register value.
    pub edx: u32,
}

impl CpuidTuple {
    /// Builds the null tuple for `function` (all registers zero).
    #[must_use]
    pub fn null(function: u32) -> Self {
        Self {
            function,
            ..Self::default()
        }
    }

    /// Whether every register is zero.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.eax == 0 && self.ebx == 0 && self.ecx == 0 && self.edx == 0
    }

    /// All four registers equal.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.eax == other.eax
            && self.ebx == other.ebx
            && self.ecx == other.ecx
            && self.edx == other.edx
    }

    /// `(self & mask) == mask` on every register: `self` contains every bit
    /// set in `mask`.
    #[must_use]
    pub fn match_masked(&self, mask: &Self) -> bool {
        self.eax & mask.eax == mask.eax
            && self.ebx & mask.ebx == mask.ebx
            && self.ecx & mask.ecx == mask.ecx
            && self.edx & mask.edx == mask.edx
    }

    /// `self |= src` register-wise.
    pub fn set_bits(&mut self, src: &Self) {
        self.eax |= src.eax;
        self.ebx |= src.ebx;
        self.ecx |= src.ecx;
        self.edx |= src.edx;
    }

    /// `self &= !mask` register-wise.
    pub fn clear_bits(&mut self, mask: &Self) {
        self.eax &= !mask.eax;
        self.ebx &= !mask.ebx;
        self.ecx &= !mask.ecx;
        self.edx &= !mask.edx;
    }

    /// `self &= src` register-wise.
    pub fn and_bits(&mut self, src: &Self) {
        self.eax &= src.eax;
        self.ebx &= src.ebx;
        self.ecx &= src.ecx;
        self.edx &= src.edx;
    }
}

/// A sparse, per-leaf CPUID register store.
///
/// `basic[i]` always has `function == i`; `extended[i]` always has
/// `function == EXT_BASE + i`. The container grows to cover new indices but
/// never shrinks; growth pads intermediate slots with null tuples carrying
/// the right `function` value. Zero-valued tuples may sit inside either
/// sequence and are skipped by [`CpuidData::iterate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuidData {
    basic: Vec<CpuidTuple>,
    extended: Vec<CpuidTuple>,
}

/// Whether a function number lands in the basic or extended range, and the
/// index into the corresponding sequence.
fn split(function: u32) -> (bool, usize) {
    if function >= EXT_BASE {
        (false, (function - EXT_BASE) as usize)
    } else {
        (true, function as usize)
    }
}

impl CpuidData {
    /// An empty data set (no leaves at all).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sequence(&self, basic: bool) -> &[CpuidTuple] {
        if basic {
            &self.basic
        } else {
            &self.extended
        }
    }

    fn sequence_mut(&mut self, basic: bool) -> &mut Vec<CpuidTuple> {
        if basic {
            &mut self.basic
        } else {
            &mut self.extended
        }
    }

    /// Grows the basic or extended sequence so that index `index` exists,
    /// padding new slots with null tuples carrying the correct `function`.
    fn grow(&mut self, basic: bool, index: usize) {
        let base = if basic { 0 } else { EXT_BASE };
        let seq = self.sequence_mut(basic);
        while seq.len() <= index {
            #[allow(clippy::cast_possible_truncation)]
            let function = base + seq.len() as u32;
            seq.push(CpuidTuple::null(function));
        }
    }

    /// The leaf tuple at `function`, if present and non-null.
    #[must_use]
    pub fn lookup(&self, function: u32) -> Option<&CpuidTuple> {
        let (basic, index) = split(function);
        self.sequence(basic)
            .get(index)
            .filter(|t| !t.is_null())
    }

    /// Mutable access to the leaf at `function`, growing the container if
    /// needed. The returned tuple always has `function` set correctly.
    pub fn lookup_mut(&mut self, function: u32) -> &mut CpuidTuple {
        let (basic, index) = split(function);
        self.grow(basic, index);
        &mut self.sequence_mut(basic)[index]
    }

    /// ORs `leaf`'s bits into the corresponding position, growing the
    /// container if needed. `leaf.function` selects the position; the
    /// stored tuple keeps its own correct `function` value regardless of
    /// what `leaf.function` says once the OR is applied.
    pub fn add_cpuid(&mut self, leaf: &CpuidTuple) {
        let entry = self.lookup_mut(leaf.function);
        entry.set_bits(leaf);
    }

    /// Non-null leaves in order: all of `basic` ascending, then all of
    /// `extended` ascending.
    pub fn iterate(&self) -> impl Iterator<Item = &CpuidTuple> + '_ {
        self.basic
            .iter()
            .chain(self.extended.iter())
            .filter(|t| !t.is_null())
    }

    /// Whether [`CpuidData::iterate`] yields nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iterate().next().is_none()
    }

    /// Grows `self` to cover every index present in `other`, then unions
    /// register-wise at every overlapping leaf (`self |= other`).
    pub fn add(&mut self, other: &Self) {
        if let Some(last) = other.basic.last() {
            self.grow(true, last.function as usize);
        }
        if let Some(last) = other.extended.last() {
            self.grow(false, (last.function - EXT_BASE) as usize);
        }
        for leaf in other.iterate() {
            self.lookup_mut(leaf.function).set_bits(leaf);
        }
    }

    /// For each leaf present in both `self` and `other` (up to the shorter
    /// of the two sequences), clears `self`'s bits wherever `other` has
    /// them. Leaves only `self` has are left untouched — this is bounded by
    /// `min(len)`, unlike [`CpuidData::intersect`].
    pub fn subtract(&mut self, other: &Self) {
        let basic_len = self.basic.len().min(other.basic.len());
        for i in 0..basic_len {
            let mask = other.basic[i];
            self.basic[i].clear_bits(&mask);
        }
        let ext_len = self.extended.len().min(other.extended.len());
        for i in 0..ext_len {
            let mask = other.extended[i];
            self.extended[i].clear_bits(&mask);
        }
    }

    /// For each non-null leaf in `self`: if `other` has that function,
    /// ANDs the bits in place; otherwise clears `self`'s leaf entirely.
    /// Leaves `other` has that `self` doesn't are not materialized — this
    /// is the asymmetry that distinguishes `intersect` from `subtract`.
    pub fn intersect(&mut self, other: &Self) {
        for i in 0..self.basic.len() {
            if self.basic[i].is_null() {
                continue;
            }
            match other.basic.get(i) {
                Some(mask) => self.basic[i].and_bits(mask),
                None => self.basic[i] = CpuidTuple::null(self.basic[i].function),
            }
        }
        for i in 0..self.extended.len() {
            if self.extended[i].is_null() {
                continue;
            }
            match other.extended.get(i) {
                Some(mask) => self.extended[i].and_bits(mask),
                None => self.extended[i] = CpuidTuple::null(self.extended[i].function),
            }
        }
    }

    /// Whether every non-null leaf of `sub` is present in `self` (the
    /// superset) and mask-contained by it.
    #[must_use]
    pub fn is_subset(&self, sub: &Self) -> bool {
        sub.iterate()
            .all(|leaf| match self.lookup(leaf.function) {
                Some(sup_leaf) => sup_leaf.match_masked(leaf),
                None => false,
            })
    }

    /// A deep copy (no sharing of the underlying vectors).
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}
