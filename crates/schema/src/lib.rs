//! fluxconn schema: typed adapters for the documents the function reads.
//!
//! Every semi-structured input is parsed exactly once here. Missing fields and
//! type mismatches come back as `FunctionError` variants so the compose
//! pipeline never does path lookups on raw JSON.

#![forbid(unsafe_code)]

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use serde_json::Value as Json;

use fluxconn_core::{Document, FunctionError, Resource};

pub mod eks;

pub use eks::{ClusterAdapter, EksCluster};

/// Context key under which the orchestrator merges the environment config.
pub const ENVIRONMENT_CONTEXT_KEY: &str = "apiextensions.crossplane.io/environment";

const CLUSTER_NAME_FIELD: &str = "spec.clusterName";

#[derive(Debug, Clone, Default, Deserialize)]
struct CompositeDoc {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    metadata: ObjectMeta,
    /// Kept untyped so `null` or a wrong type surfaces through `cluster_name`.
    #[serde(default)]
    spec: Option<Json>,
}

/// The observed parent resource (a `FluxRemoteConnection`).
///
/// Fields are read lazily: a parent without a name can still declare its
/// cluster dependency; only composition needs the name.
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub kind: String,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub spec: Option<Json>,
}

impl Composite {
    pub fn from_resource(res: &Resource) -> Result<Self, FunctionError> {
        let doc: CompositeDoc = serde_json::from_value(res.resource.clone())
            .map_err(|source| FunctionError::Decode { what: "observed composite resource".into(), source })?;
        let kind = if doc.kind.is_empty() { "composite resource".to_string() } else { doc.kind };
        let name = doc.metadata.name.filter(|n| !n.is_empty());
        Ok(Self { kind, name, namespace: doc.metadata.namespace, spec: doc.spec })
    }

    pub fn name(&self) -> Result<&str, FunctionError> {
        self.name.as_deref().ok_or_else(|| FunctionError::missing(&self.kind, "metadata.name"))
    }

    pub fn cluster_name(&self) -> Result<&str, FunctionError> {
        let mismatch = || FunctionError::TypeMismatch {
            kind: self.kind.clone(),
            field: CLUSTER_NAME_FIELD.into(),
            expected: "string",
        };
        let spec = match &self.spec {
            None | Some(Json::Null) => return Err(FunctionError::missing(&self.kind, CLUSTER_NAME_FIELD)),
            Some(Json::Object(spec)) => spec,
            Some(_) => return Err(mismatch()),
        };
        match spec.get("clusterName") {
            Some(Json::String(s)) if !s.is_empty() => Ok(s.as_str()),
            Some(Json::String(_)) | Some(Json::Null) | None => Err(FunctionError::missing(&self.kind, CLUSTER_NAME_FIELD)),
            Some(_) => Err(mismatch()),
        }
    }

    /// Namespace as the selector expects it; cluster-scoped parents map to "".
    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }
}

/// Cluster-wide defaults supplied through the environment context entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(rename = "management-cluster-id", default)]
    pub account_id: String,
    #[serde(rename = "default-region", default)]
    pub default_region: Option<String>,
}

impl EnvironmentConfig {
    /// Decode the environment from the request context. An absent entry
    /// decodes to the empty config; `validate` decides whether that is usable.
    pub fn from_context(context: Option<&Document>) -> Result<Self, FunctionError> {
        let Some(raw) = context.and_then(|c| c.get(ENVIRONMENT_CONTEXT_KEY)) else {
            return Ok(Self::default());
        };
        serde_json::from_value(raw.clone())
            .map_err(|source| FunctionError::Decode { what: "environment config".into(), source })
    }

    pub fn validate(&self) -> Result<(), FunctionError> {
        if self.account_id.trim().is_empty() {
            return Err(FunctionError::Configuration(
                "cannot decode management-cluster account id from environment config".into(),
            ));
        }
        Ok(())
    }

    /// Region for the composed EKS resources; "" when the environment has none.
    pub fn region(&self) -> &str {
        self.default_region.as_deref().unwrap_or("")
    }
}

/// Per-kind adapters, built once at startup and handed to the function.
#[derive(Debug, Clone)]
pub struct Adapters {
    pub cluster: ClusterAdapter,
}

impl Default for Adapters {
    fn default() -> Self {
        Self { cluster: ClusterAdapter::eks() }
    }
}
