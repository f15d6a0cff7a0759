//! Builds the composed resources for a resolved cluster and merges them into
//! the desired set handed over by earlier pipeline steps.

use std::collections::BTreeMap;

use base64::Engine as _;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde::Serialize;
use serde_json::json;

use fluxconn_core::{FunctionError, Resource};
use fluxconn_schema::eks::{
    AccessEntry, AccessEntryParameters, AccessEntrySpec, AccessPolicyAssociation,
    AccessPolicyAssociationParameters, AccessPolicyAssociationSpec, AccessScope, ProviderConfigReference,
};
use fluxconn_schema::{Composite, EksCluster, EnvironmentConfig};

pub const EXTERNAL_NAME_ANNOTATION: &str = "crossplane.io/external-name";
pub const EXTERNAL_NAME: &str = "flux-remote-connection";

pub const CONFIGMAP_KEY: &str = "configmap";
pub const ACCESS_ENTRY_KEY: &str = "accessentry";
pub const ACCESS_POLICY_ASSOCIATION_KEY: &str = "accesspolicyassociation";
pub const KUSTOMIZATION_KEY: &str = "kustomization";

/// Logical names this function writes; everything else in the desired set is left alone.
pub const OWNED_KEYS: [&str; 4] = [CONFIGMAP_KEY, ACCESS_ENTRY_KEY, ACCESS_POLICY_ASSOCIATION_KEY, KUSTOMIZATION_KEY];

const ROLE_NAME: &str = "flux-remote-connection";
const CLUSTER_ADMIN_POLICY_ARN: &str = "arn:aws:eks::aws:cluster-access-policy/AmazonEKSClusterAdminPolicy";
const HEALTHCHECK: &str = "healthcheck";

/// What the composed resources need to know about the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConnection {
    pub arn: String,
    pub endpoint: String,
    /// PEM bundle; empty when the cluster reports no certificate authority.
    pub ca: String,
}

impl ClusterConnection {
    pub fn from_cluster(cluster: &EksCluster) -> Result<Self, FunctionError> {
        let kind = format!("Cluster {}", cluster.display_ref());
        let arn = cluster.arn().ok_or_else(|| FunctionError::missing(&kind, "status.atProvider.arn"))?;
        let endpoint = cluster
            .endpoint()
            .ok_or_else(|| FunctionError::missing(&kind, "status.atProvider.endpoint"))?;
        let ca = match cluster.certificate_data() {
            Some(raw) => decode_ca(raw, cluster)?,
            None => String::new(),
        };
        Ok(Self { arn: arn.to_string(), endpoint: endpoint.to_string(), ca })
    }
}

fn decode_ca(raw: &str, cluster: &EksCluster) -> Result<String, FunctionError> {
    let what = || format!("ca of cluster {}", cluster.display_ref());
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| FunctionError::encoding(what(), e))?;
    String::from_utf8(bytes).map_err(|e| FunctionError::encoding(what(), e))
}

/// Compute the composed resources and merge them into `desired`. Owned keys
/// are overwritten, foreign keys pass through untouched.
pub fn synthesize(
    parent: &Composite,
    env: &EnvironmentConfig,
    cluster: &EksCluster,
    mut desired: BTreeMap<String, Resource>,
) -> Result<BTreeMap<String, Resource>, FunctionError> {
    env.validate()?;
    let conn = ClusterConnection::from_cluster(cluster)?;
    let cluster_name = parent.cluster_name()?;
    let principal_arn = format!("arn:aws:iam::{}:role/{}", env.account_id, ROLE_NAME);
    let region = env.region().to_string();
    let provider_config = ProviderConfigReference { kind: "ProviderConfig".into(), name: "aws".into() };

    let name = parent.name()?;
    let configmap = config_map(name, &conn);
    desired.insert(CONFIGMAP_KEY.into(), composed("ConfigMap", &configmap)?);

    let mut entry = AccessEntry::new(
        name,
        AccessEntrySpec {
            for_provider: AccessEntryParameters {
                cluster_name: cluster_name.to_string(),
                principal_arn: principal_arn.clone(),
                region: region.clone(),
            },
            provider_config_ref: Some(provider_config.clone()),
        },
    );
    entry.metadata = object_meta(name);
    desired.insert(ACCESS_ENTRY_KEY.into(), composed("AccessEntry", &entry)?);

    let mut association = AccessPolicyAssociation::new(
        name,
        AccessPolicyAssociationSpec {
            for_provider: AccessPolicyAssociationParameters {
                cluster_name: cluster_name.to_string(),
                principal_arn,
                policy_arn: CLUSTER_ADMIN_POLICY_ARN.into(),
                region,
                access_scope: Some(AccessScope { type_: "cluster".into() }),
            },
            provider_config_ref: Some(provider_config),
        },
    );
    association.metadata = object_meta(name);
    desired.insert(ACCESS_POLICY_ASSOCIATION_KEY.into(), composed("AccessPolicyAssociation", &association)?);

    // Flux kinds are composed untyped.
    let ks = kustomization(name);
    desired.insert(KUSTOMIZATION_KEY.into(), composed("Kustomization", &ks)?);

    Ok(desired)
}

fn object_meta(name: &str) -> ObjectMeta {
    let mut annotations = BTreeMap::new();
    annotations.insert(EXTERNAL_NAME_ANNOTATION.to_string(), EXTERNAL_NAME.to_string());
    ObjectMeta { name: Some(name.to_string()), annotations: Some(annotations), ..Default::default() }
}

fn config_map(name: &str, conn: &ClusterConnection) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert("provider".to_string(), "aws".to_string());
    data.insert("cluster".to_string(), conn.arn.clone());
    data.insert("address".to_string(), conn.endpoint.clone());
    data.insert("ca.crt".to_string(), conn.ca.clone());
    ConfigMap { metadata: object_meta(name), data: Some(data), ..Default::default() }
}

fn kustomization(configmap_name: &str) -> DynamicObject {
    let gvk = GroupVersionKind::gvk("kustomize.toolkit.fluxcd.io", "v1", "Kustomization");
    let mut ks = DynamicObject::new(HEALTHCHECK, &ApiResource::from_gvk(&gvk)).data(json!({
        "spec": {
            "interval": "5m",
            "path": "./healthcheck",
            "prune": true,
            "sourceRef": {
                "kind": "GitRepository",
                "namespace": "flux-system",
                "name": HEALTHCHECK,
            },
            "healthChecks": [
                { "apiVersion": "v1", "kind": "namespace", "name": HEALTHCHECK }
            ],
            "kubeConfig": {
                "configMapRef": { "name": configmap_name }
            }
        }
    }));
    ks.metadata = object_meta(HEALTHCHECK);
    ks
}

fn composed<T: Serialize>(what: &str, obj: &T) -> Result<Resource, FunctionError> {
    serde_json::to_value(obj)
        .map(Resource::from_json)
        .map_err(|source| FunctionError::Compose { what: what.to_string(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxconn_schema::ClusterAdapter;

    fn parent() -> Composite {
        Composite::from_resource(&Resource::from_json(json!({
            "kind": "OnlineFluxRemoteConnection",
            "metadata": { "name": "XRName", "namespace": "XRNamespace" },
            "spec": { "clusterName": "clusterName" }
        })))
        .unwrap()
    }

    fn env() -> EnvironmentConfig {
        EnvironmentConfig { account_id: "12345".into(), default_region: Some("eu".into()) }
    }

    fn cluster(at_provider: serde_json::Value) -> EksCluster {
        ClusterAdapter::eks()
            .decode(&Resource::from_json(json!({
                "apiVersion": "eks.aws.m.upbound.io/v1beta1",
                "kind": "Cluster",
                "metadata": { "namespace": "XRNamespace", "name": "clusterName" },
                "status": { "atProvider": at_provider }
            })))
            .unwrap()
    }

    fn full_cluster() -> EksCluster {
        cluster(json!({
            "arn": "clusterArn",
            "endpoint": "https://example.org",
            "certificateAuthority": [ { "data": "ZXhhbXBsZQ==" } ]
        }))
    }

    #[test]
    fn writes_every_owned_key() {
        let out = synthesize(&parent(), &env(), &full_cluster(), BTreeMap::new()).unwrap();
        let keys: Vec<_> = out.keys().map(String::as_str).collect();
        let mut owned = OWNED_KEYS.to_vec();
        owned.sort();
        assert_eq!(keys, owned);
        for r in out.values() {
            assert_eq!(r.resource["metadata"]["annotations"][EXTERNAL_NAME_ANNOTATION], EXTERNAL_NAME);
        }
    }

    #[test]
    fn configmap_carries_decoded_connection() {
        let out = synthesize(&parent(), &env(), &full_cluster(), BTreeMap::new()).unwrap();
        let cm = &out[CONFIGMAP_KEY].resource;
        assert_eq!(cm["apiVersion"], "v1");
        assert_eq!(cm["kind"], "ConfigMap");
        assert_eq!(cm["metadata"]["name"], "XRName");
        assert_eq!(
            cm["data"],
            json!({
                "provider": "aws",
                "cluster": "clusterArn",
                "address": "https://example.org",
                "ca.crt": "example"
            })
        );
    }

    #[test]
    fn access_policy_association_grants_cluster_admin() {
        let out = synthesize(&parent(), &env(), &full_cluster(), BTreeMap::new()).unwrap();
        let apa = &out[ACCESS_POLICY_ASSOCIATION_KEY].resource;
        assert_eq!(apa["kind"], "AccessPolicyAssociation");
        assert_eq!(
            apa["spec"]["forProvider"],
            json!({
                "clusterName": "clusterName",
                "principalArn": "arn:aws:iam::12345:role/flux-remote-connection",
                "policyArn": "arn:aws:eks::aws:cluster-access-policy/AmazonEKSClusterAdminPolicy",
                "region": "eu",
                "accessScope": { "type": "cluster" }
            })
        );
        assert_eq!(apa["spec"]["providerConfigRef"], json!({ "kind": "ProviderConfig", "name": "aws" }));
    }

    #[test]
    fn kustomization_points_at_configmap() {
        let out = synthesize(&parent(), &env(), &full_cluster(), BTreeMap::new()).unwrap();
        let ks = &out[KUSTOMIZATION_KEY].resource;
        assert_eq!(ks["apiVersion"], "kustomize.toolkit.fluxcd.io/v1");
        assert_eq!(ks["kind"], "Kustomization");
        assert_eq!(ks["metadata"]["name"], "healthcheck");
        assert_eq!(ks["spec"]["kubeConfig"]["configMapRef"]["name"], "XRName");
        assert_eq!(ks["spec"]["prune"], true);
    }

    #[test]
    fn missing_ca_yields_empty_bundle() {
        let c = cluster(json!({ "arn": "a", "endpoint": "https://e" }));
        let out = synthesize(&parent(), &env(), &c, BTreeMap::new()).unwrap();
        assert_eq!(out[CONFIGMAP_KEY].resource["data"]["ca.crt"], "");
    }

    #[test]
    fn malformed_ca_is_an_encoding_error() {
        let c = cluster(json!({ "arn": "a", "endpoint": "https://e", "certificateAuthority": [ { "data": "%%%" } ] }));
        let err = synthesize(&parent(), &env(), &c, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, FunctionError::Encoding { .. }));
        assert!(err.to_string().contains("XRNamespace/clusterName"), "err={}", err);
    }

    #[test]
    fn missing_endpoint_is_reported() {
        let c = cluster(json!({ "arn": "a" }));
        let err = synthesize(&parent(), &env(), &c, BTreeMap::new()).unwrap_err().to_string();
        assert!(err.contains("status.atProvider.endpoint"), "err={}", err);
    }

    #[test]
    fn missing_account_is_a_configuration_error() {
        let env = EnvironmentConfig::default();
        let err = synthesize(&parent(), &env, &full_cluster(), BTreeMap::new()).unwrap_err();
        assert!(matches!(err, FunctionError::Configuration(_)));
    }

    #[test]
    fn region_is_empty_without_default() {
        let env = EnvironmentConfig { account_id: "1".into(), default_region: None };
        let out = synthesize(&parent(), &env, &full_cluster(), BTreeMap::new()).unwrap();
        assert_eq!(out[ACCESS_ENTRY_KEY].resource["spec"]["forProvider"]["region"], "");
        assert_eq!(out[ACCESS_POLICY_ASSOCIATION_KEY].resource["spec"]["forProvider"]["region"], "");
    }

    #[test]
    fn unnamed_parent_cannot_be_composed() {
        let res = Resource::from_json(json!({ "kind": "OnlineFluxRemoteConnection", "spec": { "clusterName": "c" } }));
        let parent = Composite::from_resource(&res).unwrap();
        let err = synthesize(&parent, &env(), &full_cluster(), BTreeMap::new()).unwrap_err();
        assert!(matches!(err, FunctionError::MissingField { .. }));
        assert!(err.to_string().contains("metadata.name"), "err={}", err);
    }

    #[test]
    fn foreign_keys_survive_and_owned_keys_are_replaced() {
        let mut existing = BTreeMap::new();
        existing.insert("bucket".to_string(), Resource::from_json(json!({ "kind": "Bucket", "spec": { "x": 1 } })));
        existing.insert(CONFIGMAP_KEY.to_string(), Resource::from_json(json!({ "kind": "Stale" })));
        let out = synthesize(&parent(), &env(), &full_cluster(), existing).unwrap();
        assert_eq!(out["bucket"].resource, json!({ "kind": "Bucket", "spec": { "x": 1 } }));
        assert_eq!(out[CONFIGMAP_KEY].resource["kind"], "ConfigMap");
        assert_eq!(out.len(), 5);
    }
}
