use std::collections::BTreeMap;

use fluxconn_core::{FunctionError, Resource, ResourceSelector, Resources};
use tracing::debug;

/// Outcome of checking one declared requirement against the request.
#[derive(Debug)]
pub enum GateDecision<'a> {
    /// The orchestrator has not resolved requirements yet; ask again.
    NeedMore,
    /// Resolution was attempted and came back empty. Terminal.
    Unsatisfiable(FunctionError),
    Proceed(&'a Resource),
}

/// Decide whether the pass can continue. `required` is the request's
/// dependency section; `None` or an empty map means resolution has not
/// happened yet. When several items match, the first one wins.
pub fn gate<'a>(
    required: Option<&'a BTreeMap<String, Resources>>,
    key: &str,
    selector: &ResourceSelector,
) -> GateDecision<'a> {
    let section = match required {
        Some(section) if !section.is_empty() => section,
        _ => return GateDecision::NeedMore,
    };
    let items = section.get(key).map(|r| r.items.as_slice()).unwrap_or_default();
    match items {
        [] => GateDecision::Unsatisfiable(FunctionError::Unsatisfiable {
            kind: selector.kind.clone(),
            reference: selector.display_ref(),
        }),
        [first, rest @ ..] => {
            if !rest.is_empty() {
                debug!(key, count = items.len(), "multiple resources matched; using the first");
            }
            GateDecision::Proceed(first)
        }
    }
}
