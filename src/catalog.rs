// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The catalog of named vendors, features, and models, loaded from a
//! declarative map via a small callback contract. XML parsing and file I/O
//! live outside this crate; the external layer drives [`Catalog::load`]
//! with a stream of `(element_kind, accessor)` pairs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::data::CpuidData;
use crate::error::CatalogError;

/// Which kind of `<vendor>`/`<feature>`/`<model>` element an [`Accessor`]
/// describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// A named vendor string (e.g. `GenuineIntel`).
    Vendor,
    /// A named bundle of CPUID bits.
    Feature,
    /// A named model: an optional ancestor, an optional vendor, and zero or
    /// more features.
    Model,
}

/// The callback contract the external XML (or any declarative-map) layer
/// drives the catalog loader with. Concrete shape is deliberately minimal:
/// attribute lookups by name, and enumeration of same-shaped nested
/// elements by tag.
pub trait Accessor: Sized {
    /// The value of attribute `name` on this element, if present.
    fn attr(&self, name: &str) -> Option<&str>;

    /// Every direct child element tagged `tag`, in document order.
    fn nested(&self, tag: &str) -> Vec<Self>;
}

/// A named CPU vendor string, e.g. `GenuineIntel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    /// Catalog-unique name.
    pub name: String,
    /// The leaf-0 tuple encoding the 12-byte vendor string.
    pub cpuid: crate::data::CpuidTuple,
}

/// A named bundle of CPUID bits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Catalog-unique name.
    pub name: String,
    /// The feature's CPUID data.
    pub data: CpuidData,
}

/// A named CPU model: the union of an optional ancestor model's data and
/// every referenced feature's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Catalog-unique name.
    pub name: String,
    /// Index into [`Catalog::vendors`] of the model's bound vendor, if any.
    pub vendor: Option<usize>,
    /// Feature data accumulated from the ancestor (if any) and every
    /// referenced feature.
    pub data: CpuidData,
}

/// The loaded catalog: vendors, features, and models, each indexed by
/// unique name. Insertion order is load order; [`Catalog::models_by_recency`]
/// exposes the reverse, which is the order Decode's tie-break depends on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    vendors: Vec<Vendor>,
    features: Vec<Feature>,
    models: Vec<Model>,
    #[serde(skip)]
    vendor_names: HashMap<String, usize>,
    #[serde(skip)]
    feature_names: HashMap<String, usize>,
    #[serde(skip)]
    model_names: HashMap<String, usize>,
}

fn parse_hex(s: &str) -> Option<u32> {
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(s, 16).ok()
}

impl Catalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All loaded vendors, in load order.
    #[must_use]
    pub fn vendors(&self) -> &[Vendor] {
        &self.vendors
    }

    /// All loaded features, in load order.
    #[must_use]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// All loaded models, in load order.
    #[must_use]
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Models in reverse load order: the most recently loaded model first.
    /// Decode's "fewest features, ties broken by iteration order" rule
    /// depends on this ordering — a newer entry at the head wins a tie.
    pub fn models_by_recency(&self) -> impl Iterator<Item = &Model> {
        self.models.iter().rev()
    }

    /// Looks up a vendor by name.
    #[must_use]
    pub fn vendor(&self, name: &str) -> Option<&Vendor> {
        self.vendor_names.get(name).map(|&i| &self.vendors[i])
    }

    /// Looks up a feature by name.
    #[must_use]
    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.feature_names.get(name).map(|&i| &self.features[i])
    }

    /// Looks up a model by name.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&Model> {
        self.model_names.get(name).map(|&i| &self.models[i])
    }

    /// Dispatches one loaded element into the catalog. A failed element
    /// contributes nothing; previously loaded elements remain valid (the
    /// spec's "load is atomic per element" contract).
    pub fn load<A: Accessor>(&mut self, kind: ElementKind, element: &A) -> Result<(), CatalogError> {
        match kind {
            ElementKind::Vendor => self.load_vendor(element),
            ElementKind::Feature => self.load_feature(element),
            ElementKind::Model => self.load_model(element),
        }
    }

    fn load_vendor<A: Accessor>(&mut self, element: &A) -> Result<(), CatalogError> {
        let name = element.attr("name").ok_or(CatalogError::MissingName)?.to_owned();
        if self.vendor_names.contains_key(&name) {
            return Err(CatalogError::DuplicateName {
                kind: "vendor",
                name,
            });
        }
        let string = element.attr("string").ok_or(CatalogError::MissingName)?;
        let bytes = string.as_bytes();
        if bytes.len() != 12 {
            return Err(CatalogError::MalformedVendor(bytes.len()));
        }
        let ebx = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let edx = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let ecx = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let cpuid = crate::data::CpuidTuple {
            function: 0,
            eax: 0,
            ebx,
            ecx,
            edx,
        };
        let index = self.vendors.len();
        self.vendors.push(Vendor {
            name: name.clone(),
            cpuid,
        });
        self.vendor_names.insert(name, index);
        Ok(())
    }

    fn load_feature<A: Accessor>(&mut self, element: &A) -> Result<(), CatalogError> {
        let name = element.attr("name").ok_or(CatalogError::MissingName)?.to_owned();
        if self.feature_names.contains_key(&name) {
            return Err(CatalogError::DuplicateName {
                kind: "feature",
                name,
            });
        }
        let mut data = CpuidData::new();
        for cpuid_el in element.nested("cpuid") {
            let function = cpuid_el
                .attr("function")
                .and_then(parse_hex)
                .ok_or_else(|| CatalogError::MalformedCpuid("function".to_owned()))?;
            let mut tuple = crate::data::CpuidTuple::null(function);
            let fields: [(&str, fn(&mut crate::data::CpuidTuple, u32)); 4] = [
                ("eax", |t, v| t.eax = v),
                ("ebx", |t, v| t.ebx = v),
                ("ecx", |t, v| t.ecx = v),
                ("edx", |t, v| t.edx = v),
            ];
            for (field, setter) in fields {
                if let Some(raw) = cpuid_el.attr(field) {
                    let value = parse_hex(raw)
                        .ok_or_else(|| CatalogError::MalformedCpuid(field.to_owned()))?;
                    setter(&mut tuple, value);
                }
            }
            data.add_cpuid(&tuple);
        }
        let index = self.features.len();
        self.features.push(Feature {
            name: name.clone(),
            data,
        });
        self.feature_names.insert(name, index);
        Ok(())
    }

    fn load_model<A: Accessor>(&mut self, element: &A) -> Result<(), CatalogError> {
        let name = element.attr("name").ok_or(CatalogError::MissingName)?.to_owned();
        if self.model_names.contains_key(&name) {
            return Err(CatalogError::DuplicateName {
                kind: "model",
                name,
            });
        }

        let mut data = CpuidData::new();
        let mut vendor: Option<usize> = None;

        if let Some(ancestor_el) = element.nested("model").into_iter().next() {
            let ancestor_name = ancestor_el
                .attr("name")
                .ok_or(CatalogError::MissingName)?
                .to_owned();
            let &ancestor_index = self
                .model_names
                .get(&ancestor_name)
                .ok_or_else(|| CatalogError::UnknownAncestor(ancestor_name.clone()))?;
            let ancestor = &self.models[ancestor_index];
            data.add(&ancestor.data);
            vendor = ancestor.vendor;
        }

        if let Some(vendor_el) = element.nested("vendor").into_iter().next() {
            let vendor_name = vendor_el
                .attr("name")
                .ok_or(CatalogError::MissingName)?
                .to_owned();
            let &vendor_index = self
                .vendor_names
                .get(&vendor_name)
                .ok_or_else(|| CatalogError::UnknownVendor(vendor_name.clone()))?;
            vendor = Some(vendor_index);
        }

        for feature_el in element.nested("feature") {
            let feature_name = feature_el
                .attr("name")
                .ok_or(CatalogError::MissingName)?
                .to_owned();
            let &feature_index = self
                .feature_names
                .get(&feature_name)
                .ok_or_else(|| CatalogError::UnknownFeature(feature_name.clone()))?;
            data.add(&self.features[feature_index].data);
        }

        let index = self.models.len();
        self.models.push(Model {
            name: name.clone(),
            vendor,
            data,
        });
        self.model_names.insert(name, index);
        Ok(())
    }
}
