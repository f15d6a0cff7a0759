//! Helpers for assembling a `RunFunctionResponse` from a request.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::{
    Condition, ConditionStatus, FunctionResult, Resource, ResourceSelector, ResponseMeta,
    RunFunctionRequest, RunFunctionResponse, Severity, State, Target, Ttl,
};

/// How long the orchestrator may cache a response before invoking again.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Start a response for `req`: echo the tag, carry desired state and context
/// forward so later pipeline steps see what earlier ones produced.
pub fn to(req: &RunFunctionRequest, ttl: Duration) -> RunFunctionResponse {
    RunFunctionResponse {
        meta: Some(ResponseMeta { tag: req.tag().to_string(), ttl: Some(Ttl(ttl)) }),
        desired: req.desired.clone(),
        context: req.context.clone(),
        ..Default::default()
    }
}

/// Mark the pass as failed. Desired state is dropped: a fatal response
/// never carries partial output.
pub fn fatal(rsp: &mut RunFunctionResponse, message: impl Into<String>) {
    rsp.desired = None;
    rsp.results.push(FunctionResult {
        severity: Severity::Fatal,
        message: message.into(),
        target: Some(Target::Composite),
    });
}

pub fn condition_true<'a>(rsp: &'a mut RunFunctionResponse, type_: &str, reason: &str) -> &'a mut Condition {
    push_condition(rsp, type_, ConditionStatus::True, reason)
}

fn push_condition<'a>(
    rsp: &'a mut RunFunctionResponse,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
) -> &'a mut Condition {
    rsp.conditions.push(Condition {
        type_: type_.to_string(),
        status,
        reason: reason.to_string(),
        message: None,
        target: None,
    });
    let last = rsp.conditions.len() - 1;
    &mut rsp.conditions[last]
}

/// Declare (or re-declare) a resource the orchestrator must fetch before the next call.
pub fn require(rsp: &mut RunFunctionResponse, key: &str, selector: ResourceSelector) {
    rsp.requirements.get_or_insert_with(Default::default).resources.insert(key.to_string(), selector);
}

/// Replace the desired composed resources wholesale, keeping the desired composite.
pub fn set_desired_resources(rsp: &mut RunFunctionResponse, resources: BTreeMap<String, Resource>) {
    rsp.desired.get_or_insert_with(State::default).resources = resources;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Match;
    use serde_json::json;

    fn request() -> RunFunctionRequest {
        serde_json::from_value(json!({
            "meta": { "tag": "hello" },
            "desired": { "resources": { "bucket": { "resource": { "kind": "Bucket" } } } },
            "context": { "apiextensions.crossplane.io/environment": { "a": "b" } }
        }))
        .unwrap()
    }

    #[test]
    fn to_echoes_tag_desired_and_context() {
        let req = request();
        let rsp = to(&req, DEFAULT_TTL);
        let meta = rsp.meta.as_ref().unwrap();
        assert_eq!(meta.tag, "hello");
        assert_eq!(meta.ttl, Some(Ttl(Duration::from_secs(60))));
        assert_eq!(rsp.desired, req.desired);
        assert_eq!(rsp.context, req.context);
        assert!(!rsp.is_fatal());
    }

    #[test]
    fn fatal_drops_desired_state() {
        let mut rsp = to(&request(), DEFAULT_TTL);
        fatal(&mut rsp, "boom");
        assert!(rsp.desired.is_none());
        assert!(rsp.is_fatal());
        assert_eq!(rsp.results[0].message, "boom");
        assert_eq!(rsp.results[0].target, Some(Target::Composite));
    }

    #[test]
    fn condition_builder_targets_composite() {
        let mut rsp = RunFunctionResponse::default();
        condition_true(&mut rsp, "FunctionSuccess", "Success").target_composite();
        assert_eq!(
            serde_json::to_value(&rsp.conditions).unwrap(),
            json!([{
                "type": "FunctionSuccess",
                "status": "STATUS_CONDITION_TRUE",
                "reason": "Success",
                "target": "TARGET_COMPOSITE"
            }])
        );
    }

    #[test]
    fn require_overwrites_same_key() {
        let mut rsp = RunFunctionResponse::default();
        let sel = |n: &str| ResourceSelector {
            api_version: "v1".into(),
            kind: "ConfigMap".into(),
            namespace: None,
            selection: Match::MatchName(n.into()),
        };
        require(&mut rsp, "cm", sel("a"));
        require(&mut rsp, "cm", sel("b"));
        assert_eq!(rsp.requirements.as_ref().unwrap().resources.len(), 1);
        assert_eq!(rsp.required_selector("cm").unwrap().match_name(), Some("b"));
    }

    #[test]
    fn set_desired_keeps_composite() {
        let mut rsp = RunFunctionResponse {
            desired: Some(State {
                composite: Some(Resource::from_json(json!({ "kind": "XR" }))),
                resources: BTreeMap::new(),
            }),
            ..Default::default()
        };
        let mut resources = BTreeMap::new();
        resources.insert("cm".to_string(), Resource::from_json(json!({ "kind": "ConfigMap" })));
        set_desired_resources(&mut rsp, resources);
        let desired = rsp.desired.unwrap();
        assert!(desired.composite.is_some());
        assert_eq!(desired.resources.len(), 1);
    }
}
