//! A dependency graph of resource descriptors.
//!
//! Resources are added leaf-first: every dependency must already be in the
//! graph, and no resource may depend on a later layer. The graph is
//! therefore acyclic by construction and its insertion order is a valid
//! provisioning order.

use ahash::AHashMap as HashMap;
use serde::Serialize;
use std::{borrow::Borrow, fmt};
use thiserror::Error;

/// A construct path such as `ecsResources/fargateService`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ResourceId(String);

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Network,
    Compute,
    Routing,
    Pipeline,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub kind: &'static str,
    pub layer: Layer,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ResourceId>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub properties: serde_json::Value,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    #[serde(skip)]
    index: HashMap<ResourceId, usize>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("resource {0} is already defined")]
    Duplicate(ResourceId),

    #[error("resource {resource} depends on undefined resource {dependency}")]
    UnknownDependency {
        resource: ResourceId,
        dependency: ResourceId,
    },

    #[error("resource {resource} ({layer:?}) may not depend on {dependency} in a later layer")]
    LayerInversion {
        resource: ResourceId,
        layer: Layer,
        dependency: ResourceId,
    },
}

// === impl ResourceId ===

impl ResourceId {
    pub fn new(scope: &str, name: &str) -> Self {
        Self(format!("{scope}/{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// === impl Resource ===

impl Resource {
    pub fn new(id: ResourceId, kind: &'static str, layer: Layer) -> Self {
        Self {
            id,
            kind,
            layer,
            depends_on: Vec::new(),
            properties: serde_json::Value::Null,
        }
    }

    pub fn depends_on<'a>(mut self, deps: impl IntoIterator<Item = &'a ResourceId>) -> Self {
        self.depends_on.extend(deps.into_iter().cloned());
        self
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

// === impl ResourceGraph ===

impl ResourceGraph {
    /// Adds a resource and returns its id.
    pub fn add(&mut self, resource: Resource) -> Result<ResourceId, GraphError> {
        if self.index.contains_key(&resource.id) {
            return Err(GraphError::Duplicate(resource.id));
        }

        for dep in &resource.depends_on {
            let dependency = self
                .get(dep.as_str())
                .ok_or_else(|| GraphError::UnknownDependency {
                    resource: resource.id.clone(),
                    dependency: dep.clone(),
                })?;
            if dependency.layer > resource.layer {
                return Err(GraphError::LayerInversion {
                    resource: resource.id.clone(),
                    layer: resource.layer,
                    dependency: dep.clone(),
                });
            }
        }

        let id = resource.id.clone();
        self.index.insert(id.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.index.get(id).map(|&i| &self.resources[i])
    }

    /// Resources in provisioning order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> + '_ {
        self.resources.iter()
    }

    /// Resources that directly depend on `id`.
    pub fn dependents<'g>(&'g self, id: &'g ResourceId) -> impl Iterator<Item = &'g Resource> + 'g {
        self.resources
            .iter()
            .filter(move |r| r.depends_on.contains(id))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
