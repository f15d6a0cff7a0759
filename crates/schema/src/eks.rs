//! EKS kinds: the `Cluster` the function depends on and the access kinds it composes.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::GroupVersionKind;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use fluxconn_core::{FunctionError, Match, Resource, ResourceSelector};

pub const EKS_GROUP: &str = "eks.aws.m.upbound.io";
pub const EKS_VERSION: &str = "v1beta1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateAuthority {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<Vec<CertificateAuthority>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_provider: Option<ClusterObservation>,
}

/// Read-only view of a fetched EKS `Cluster`. Only identity and observed
/// status are modelled; the function never writes this kind.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EksCluster {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: Option<ClusterStatus>,
}

impl EksCluster {
    fn observation(&self) -> Option<&ClusterObservation> {
        self.status.as_ref().and_then(|s| s.at_provider.as_ref())
    }

    pub fn arn(&self) -> Option<&str> {
        self.observation().and_then(|o| o.arn.as_deref())
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.observation().and_then(|o| o.endpoint.as_deref())
    }

    /// Encoded CA bundle of the first certificate authority entry, if any.
    pub fn certificate_data(&self) -> Option<&str> {
        self.observation()
            .and_then(|o| o.certificate_authority.as_ref())
            .and_then(|cas| cas.first())
            .and_then(|ca| ca.data.as_deref())
    }

    pub fn display_ref(&self) -> String {
        let ns = self.metadata.namespace.as_deref().unwrap_or("");
        let name = self.metadata.name.as_deref().unwrap_or("");
        format!("{ns}/{name}")
    }
}

/// Knows which kind backs the cluster dependency: builds its selector and
/// decodes fetched items into `EksCluster`.
#[derive(Debug, Clone)]
pub struct ClusterAdapter {
    gvk: GroupVersionKind,
}

impl ClusterAdapter {
    pub fn new(gvk: GroupVersionKind) -> Self {
        Self { gvk }
    }

    pub fn eks() -> Self {
        Self::new(GroupVersionKind::gvk(EKS_GROUP, EKS_VERSION, "Cluster"))
    }

    pub fn api_version(&self) -> String {
        if self.gvk.group.is_empty() {
            self.gvk.version.clone()
        } else {
            format!("{}/{}", self.gvk.group, self.gvk.version)
        }
    }

    pub fn kind(&self) -> &str {
        &self.gvk.kind
    }

    pub fn selector(&self, namespace: &str, name: &str) -> ResourceSelector {
        ResourceSelector {
            api_version: self.api_version(),
            kind: self.gvk.kind.clone(),
            namespace: Some(namespace.to_string()),
            selection: Match::MatchName(name.to_string()),
        }
    }

    pub fn decode(&self, res: &Resource) -> Result<EksCluster, FunctionError> {
        let cluster: EksCluster = serde_json::from_value(res.resource.clone())
            .map_err(|source| FunctionError::Decode { what: format!("{} resource", self.gvk.kind), source })?;
        let api_version = self.api_version();
        if !cluster.kind.is_empty() && (cluster.kind != self.gvk.kind || cluster.api_version != api_version) {
            return Err(FunctionError::UnexpectedKind {
                expected: format!("{}/{}", api_version, self.gvk.kind),
                found: format!("{}/{}", cluster.api_version, cluster.kind),
            });
        }
        Ok(cluster)
    }
}

/// Reference to the provider config that authorizes managed resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfigReference {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessScope {
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntryParameters {
    pub cluster_name: String,
    pub principal_arn: String,
    #[serde(default)]
    pub region: String,
}

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[kube(group = "eks.aws.m.upbound.io", version = "v1beta1", kind = "AccessEntry", namespaced, schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct AccessEntrySpec {
    pub for_provider: AccessEntryParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config_ref: Option<ProviderConfigReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicyAssociationParameters {
    pub cluster_name: String,
    pub principal_arn: String,
    pub policy_arn: String,
    #[serde(default)]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_scope: Option<AccessScope>,
}

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "eks.aws.m.upbound.io",
    version = "v1beta1",
    kind = "AccessPolicyAssociation",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicyAssociationSpec {
    pub for_provider: AccessPolicyAssociationParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config_ref: Option<ProviderConfigReference>,
}
