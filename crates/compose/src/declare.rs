use fluxconn_core::{FunctionError, ResourceSelector};
use fluxconn_schema::{ClusterAdapter, Composite};

/// Requirement key under which the cluster selector is declared.
pub const CLUSTER_REQUIREMENT: &str = "eks";

/// Selector for the cluster the parent points at: same namespace as the
/// parent, matched by the name in `spec.clusterName`.
pub fn declare(adapter: &ClusterAdapter, parent: &Composite) -> Result<ResourceSelector, FunctionError> {
    let cluster_name = parent.cluster_name()?;
    Ok(adapter.selector(parent.namespace_or_default(), cluster_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxconn_core::Resource;
    use serde_json::json;

    fn parent(doc: serde_json::Value) -> Composite {
        Composite::from_resource(&Resource::from_json(doc)).unwrap()
    }

    #[test]
    fn declares_cluster_in_parent_namespace() {
        let xr = parent(json!({
            "kind": "FluxRemoteConnection",
            "metadata": { "name": "a", "namespace": "team" },
            "spec": { "clusterName": "prod" }
        }));
        let sel = declare(&ClusterAdapter::eks(), &xr).unwrap();
        assert_eq!(sel.api_version, "eks.aws.m.upbound.io/v1beta1");
        assert_eq!(sel.kind, "Cluster");
        assert_eq!(sel.namespace.as_deref(), Some("team"));
        assert_eq!(sel.match_name(), Some("prod"));
    }

    #[test]
    fn cluster_scoped_parent_uses_empty_namespace() {
        let xr = parent(json!({ "kind": "K", "metadata": { "name": "a" }, "spec": { "clusterName": "prod" } }));
        let sel = declare(&ClusterAdapter::eks(), &xr).unwrap();
        assert_eq!(sel.namespace.as_deref(), Some(""));
    }

    #[test]
    fn missing_cluster_name_fails() {
        let xr = parent(json!({ "kind": "K", "metadata": { "name": "a" } }));
        let err = declare(&ClusterAdapter::eks(), &xr).unwrap_err();
        assert!(matches!(err, FunctionError::MissingField { .. }));
    }
}
