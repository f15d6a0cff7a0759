//! fluxconn compose: the function itself.
//!
//! One pass runs Declarator → Gate → Synthesizer. The pass is stateless:
//! everything it knows comes from the request, so the orchestrator may call it
//! any number of times, for any number of parents, concurrently.

#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use fluxconn_core::response::{self, DEFAULT_TTL};
use fluxconn_core::{RunFunctionRequest, RunFunctionResponse};
use fluxconn_schema::{Adapters, Composite, EnvironmentConfig, ENVIRONMENT_CONTEXT_KEY};

pub mod declare;
pub mod gate;
pub mod synth;

pub use declare::{declare, CLUSTER_REQUIREMENT};
pub use gate::{gate, GateDecision};
pub use synth::{synthesize, ClusterConnection};

/// Entry point the transport calls once per reconciliation attempt.
pub trait FunctionRunner: Send + Sync {
    fn run_function(&self, req: &RunFunctionRequest) -> RunFunctionResponse;
}

/// How a pass that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    NeedMore,
    Composed,
}

/// `outcome` label of `function_passes_total`.
fn outcome(pass: &Result<Pass>) -> &'static str {
    match pass {
        Ok(Pass::NeedMore) => "need_more",
        Ok(Pass::Composed) => "composed",
        Err(_) => "fatal",
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    adapters: Adapters,
    ttl: Duration,
}

impl Default for Function {
    fn default() -> Self {
        Self::new(Adapters::default())
    }
}

impl Function {
    pub fn new(adapters: Adapters) -> Self {
        Self { adapters, ttl: DEFAULT_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn reconcile(&self, req: &RunFunctionRequest, rsp: &mut RunFunctionResponse) -> Result<Pass> {
        let observed = req
            .observed_composite()
            .ok_or_else(|| anyhow!("cannot get observed composite resource: request carries none"))?;
        let parent = Composite::from_resource(observed).context("cannot get observed composite resource")?;

        let selector = declare(&self.adapters.cluster, &parent).context("cannot create EKS cluster selector")?;
        // Re-declared on every pass so the orchestrator keeps fetching it.
        response::require(rsp, CLUSTER_REQUIREMENT, selector.clone());

        let item = match gate(req.required_resources.as_ref(), CLUSTER_REQUIREMENT, &selector) {
            GateDecision::NeedMore => return Ok(Pass::NeedMore),
            GateDecision::Unsatisfiable(reason) => return Err(reason.into()),
            GateDecision::Proceed(item) => item,
        };

        let env = EnvironmentConfig::from_context(req.context.as_ref())
            .with_context(|| format!("cannot get composition environment from context key {ENVIRONMENT_CONTEXT_KEY:?}"))?;
        debug!(account = %env.account_id, region = %env.region(), "loaded composition environment");

        let cluster = self
            .adapters
            .cluster
            .decode(item)
            .with_context(|| format!("could not parse eks cluster: {}", selector.display_ref()))?;

        let desired = synthesize(&parent, &env, &cluster, req.desired_resources())
            .with_context(|| format!("cannot compose resources for {}", parent.name.as_deref().unwrap_or(&parent.kind)))?;
        debug!(count = desired.len(), "desired resources composed");
        response::set_desired_resources(rsp, desired);
        Ok(Pass::Composed)
    }
}

impl FunctionRunner for Function {
    fn run_function(&self, req: &RunFunctionRequest) -> RunFunctionResponse {
        info!(tag = %req.tag(), "running function");
        let t0 = Instant::now();
        let mut rsp = response::to(req, self.ttl);
        let pass = self.reconcile(req, &mut rsp);
        counter!("function_passes_total", 1u64, "outcome" => outcome(&pass));
        histogram!("function_pass_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match pass {
            Ok(Pass::NeedMore) => {
                debug!(key = CLUSTER_REQUIREMENT, "required resources not available; waiting for next pass");
            }
            Ok(Pass::Composed) => {
                response::condition_true(&mut rsp, "FunctionSuccess", "Success").target_composite();
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(error = %message, "function pass failed");
                response::fatal(&mut rsp, message);
            }
        }
        rsp
    }
}
