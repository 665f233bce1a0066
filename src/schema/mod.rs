//! Custom resource schemas
//!
//! A [`KindSchema`] pairs a CustomResourceDefinition with the
//! group/version/kind it declares. The [`registry::SchemaRegistry`] records
//! schemas once the API server has accepted them.

pub mod registry;

use std::fmt;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use serde::Deserialize;

use crate::Error;

pub use registry::{CrdClient, KubeCrdClient, SchemaRegistry};

/// Condition type set by the apiextensions controller once names are accepted
const NAMES_ACCEPTED: &str = "NamesAccepted";
/// Condition type set once the CRD is served
const ESTABLISHED: &str = "Established";

/// Identity key for a registered schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupVersion {
    group: String,
    version: String,
}

impl GroupVersion {
    /// Create a new group/version pair
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }

    /// API group (e.g., "example.dev")
    pub fn group(&self) -> &str {
        &self.group
    }

    /// API version (e.g., "v1alpha1")
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The apiVersion string ("group/version", or just "version" for core)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.api_version())
    }
}

/// A CRD together with the group/version/kind it declares
#[derive(Debug, Clone)]
pub struct KindSchema {
    group_version: GroupVersion,
    kind: String,
    crd: CustomResourceDefinition,
}

impl KindSchema {
    /// Derive the group/version/kind from a CRD.
    ///
    /// The version is the storage version, or the first declared version
    /// when none is marked for storage.
    pub fn from_crd(crd: CustomResourceDefinition) -> Result<Self, Error> {
        let name = match crd.metadata.name.as_deref() {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => return Err(Error::invalid_schema("unknown", "metadata.name is required")),
        };

        if crd.spec.group.is_empty() {
            return Err(Error::invalid_schema(name, "spec.group is empty"));
        }
        if crd.spec.names.kind.is_empty() {
            return Err(Error::invalid_schema(name, "spec.names.kind is empty"));
        }

        let version = crd
            .spec
            .versions
            .iter()
            .find(|v| v.storage)
            .or_else(|| crd.spec.versions.first())
            .map(|v| v.name.clone())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::invalid_schema(&name, "spec.versions declares no version"))?;

        Ok(Self {
            group_version: GroupVersion::new(crd.spec.group.clone(), version),
            kind: crd.spec.names.kind.clone(),
            crd,
        })
    }

    /// Parse a CRD manifest (YAML or JSON)
    pub fn from_yaml(manifest: &str) -> Result<Self, Error> {
        let crd: CustomResourceDefinition = serde_yaml::from_str(manifest)
            .map_err(|e| Error::invalid_schema("unknown", format!("failed to parse CRD: {e}")))?;
        Self::from_crd(crd)
    }

    /// Parse every CRD in a multi-document YAML stream, skipping empty documents
    pub fn from_yaml_documents(manifests: &str) -> Result<Vec<Self>, Error> {
        let mut schemas = Vec::new();
        for document in serde_yaml::Deserializer::from_str(manifests) {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| Error::invalid_schema("unknown", format!("failed to parse CRD: {e}")))?;
            if value.is_null() {
                continue;
            }
            let crd: CustomResourceDefinition = serde_yaml::from_value(value)
                .map_err(|e| Error::invalid_schema("unknown", format!("failed to parse CRD: {e}")))?;
            schemas.push(Self::from_crd(crd)?);
        }
        Ok(schemas)
    }

    /// Group/version this schema registers
    pub fn group_version(&self) -> &GroupVersion {
        &self.group_version
    }

    /// Kind declared by the schema
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// CRD object name (e.g., "widgets.example.dev")
    pub fn name(&self) -> &str {
        self.crd.metadata.name.as_deref().unwrap_or_default()
    }

    /// The CRD to submit to the API server
    pub fn crd(&self) -> &CustomResourceDefinition {
        &self.crd
    }
}

/// A schema as recorded after registration
#[derive(Debug, Clone)]
pub struct RegisteredSchema {
    /// The CRD as returned by the API server
    pub crd: CustomResourceDefinition,
    /// Whether the server has accepted the CRD's names
    pub accepted: bool,
}

impl RegisteredSchema {
    /// Build a registered schema from the server's copy of the CRD
    pub fn from_server(crd: CustomResourceDefinition) -> Self {
        let accepted = crd_condition_true(&crd, NAMES_ACCEPTED);
        Self { crd, accepted }
    }

    /// Whether the CRD is being served by the API server
    pub fn established(&self) -> bool {
        crd_condition_true(&self.crd, ESTABLISHED)
    }
}

fn crd_condition_true(crd: &CustomResourceDefinition, condition_type: &str) -> bool {
    crd.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == condition_type && c.status == "True")
        })
        .unwrap_or(false)
}
