//! fluxconn core: the function invocation envelope (request, response,
//! selectors, conditions) and the error taxonomy shared by the other crates.
//!
//! Field names and enum spellings follow the protobuf JSON mapping of the
//! composition function protocol so documents can be exchanged verbatim with
//! an orchestrator. All maps are ordered, which keeps serialized responses
//! byte-stable across invocations.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

mod error;
pub mod response;

pub use error::FunctionError;

/// Free-form JSON object (protobuf `Struct`).
pub type Document = serde_json::Map<String, Json>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Ttl>,
}

/// Response cache lifetime, encoded as a protobuf JSON duration (`"60s"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ttl(pub Duration);

impl Serialize for Ttl {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        let secs = self.0.as_secs();
        let nanos = self.0.subsec_nanos();
        if nanos == 0 {
            return ser.serialize_str(&format!("{secs}s"));
        }
        let frac = format!("{nanos:09}");
        ser.serialize_str(&format!("{}.{}s", secs, frac.trim_end_matches('0')))
    }
}

impl<'de> Deserialize<'de> for Ttl {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(de)?;
        parse_duration(&raw)
            .map(Ttl)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {raw:?}")))
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    let body = s.strip_suffix('s')?;
    let (whole, frac) = body.split_once('.').unwrap_or((body, ""));
    let secs = whole.parse::<u64>().ok()?;
    if frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let nanos = if frac.is_empty() { 0 } else { format!("{frac:0<9}").parse::<u32>().ok()? };
    Some(Duration::new(secs, nanos))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ready {
    #[default]
    #[serde(rename = "READY_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "READY_TRUE")]
    True,
    #[serde(rename = "READY_FALSE")]
    False,
}

impl Ready {
    fn is_unspecified(&self) -> bool { matches!(self, Ready::Unspecified) }
}

/// One resource document plus the bookkeeping the orchestrator attaches to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default)]
    pub resource: Json,
    /// Connection secret values, base64 encoded as in the protobuf JSON mapping.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connection_details: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Ready::is_unspecified")]
    pub ready: Ready,
}

impl Resource {
    pub fn from_json(resource: Json) -> Self {
        Self { resource, ..Default::default() }
    }
}

/// Observed or desired state: the composite plus composed resources by logical name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, Resource>,
}

/// Items the orchestrator fetched for one declared selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub items: Vec<Resource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchLabels {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// How a selector picks its target. Exactly one mode is set on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Match {
    MatchName(String),
    MatchLabels(MatchLabels),
}

/// Declarative query for one auxiliary resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub selection: Match,
}

impl ResourceSelector {
    pub fn match_name(&self) -> Option<&str> {
        match &self.selection {
            Match::MatchName(n) => Some(n.as_str()),
            Match::MatchLabels(_) => None,
        }
    }

    /// `namespace/name` rendering used in messages.
    pub fn display_ref(&self) -> String {
        let ns = self.namespace.as_deref().unwrap_or("");
        match &self.selection {
            Match::MatchName(n) => format!("{ns}/{n}"),
            Match::MatchLabels(l) => {
                let pairs: Vec<_> = l.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
                format!("{ns}/{{{}}}", pairs.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, ResourceSelector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "SEVERITY_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "SEVERITY_FATAL")]
    Fatal,
    #[serde(rename = "SEVERITY_WARNING")]
    Warning,
    #[serde(rename = "SEVERITY_NORMAL")]
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    #[serde(rename = "TARGET_COMPOSITE")]
    Composite,
    #[serde(rename = "TARGET_COMPOSITE_AND_CLAIM")]
    CompositeAndClaim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    #[serde(rename = "STATUS_CONDITION_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "STATUS_CONDITION_UNKNOWN")]
    Unknown,
    #[serde(rename = "STATUS_CONDITION_TRUE")]
    True,
    #[serde(rename = "STATUS_CONDITION_FALSE")]
    False,
}

/// A pipeline result; a `Fatal` one aborts the pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionResult {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
}

impl Condition {
    pub fn target_composite(&mut self) -> &mut Self {
        self.target = Some(Target::Composite);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFunctionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<RequestMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<State>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<State>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Document>,
    /// Resources fetched for previously declared selectors. `None` until the
    /// orchestrator has attempted resolution.
    #[serde(default, alias = "extraResources", skip_serializing_if = "Option::is_none")]
    pub required_resources: Option<BTreeMap<String, Resources>>,
}

impl RunFunctionRequest {
    pub fn tag(&self) -> &str {
        self.meta.as_ref().map(|m| m.tag.as_str()).unwrap_or("")
    }

    pub fn observed_composite(&self) -> Option<&Resource> {
        self.observed.as_ref().and_then(|s| s.composite.as_ref())
    }

    /// Copy of the desired composed resources accumulated so far in the pipeline.
    pub fn desired_resources(&self) -> BTreeMap<String, Resource> {
        self.desired.as_ref().map(|s| s.resources.clone()).unwrap_or_default()
    }

    pub fn context_value(&self, key: &str) -> Option<&Json> {
        self.context.as_ref().and_then(|c| c.get(key))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<State>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<FunctionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl RunFunctionResponse {
    pub fn desired_resources(&self) -> Option<&BTreeMap<String, Resource>> {
        self.desired.as_ref().map(|s| &s.resources)
    }

    pub fn is_fatal(&self) -> bool {
        self.results.iter().any(|r| r.severity == Severity::Fatal)
    }

    pub fn required_selector(&self, key: &str) -> Option<&ResourceSelector> {
        self.requirements.as_ref().and_then(|r| r.resources.get(key))
    }
}
