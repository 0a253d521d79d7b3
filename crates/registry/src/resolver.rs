//! Endpoint resolution for logical backend services.
//!
//! Each service has an ordered candidate list spanning the supported
//! deployment topologies (direct host/port, container network, ingress
//! path prefix). Candidates are probed in the same fixed order on every
//! resolution; the first responsive one is cached until a call against it
//! fails.

use async_trait::async_trait;
use dashmap::DashMap;
use queryflow_common::{PipelineError, Result, ServicesConfig};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Logical backend services the pipeline needs to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    ToolRegistry,
    AgentService,
    FormRenderer,
}

impl ServiceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ToolRegistry => "tool-registry",
            Self::AgentService => "agent-service",
            Self::FormRenderer => "form-renderer",
        }
    }

    /// RPC services are probed with an initialize request; auxiliary
    /// services with a health check.
    fn is_rpc(&self) -> bool {
        matches!(self, Self::ToolRegistry | Self::AgentService)
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Probe seam; tests inject a fake, production uses [`HttpProbe`].
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    async fn probe(&self, base_url: &str, kind: ServiceKind) -> bool;
}

/// Probes a candidate with a cheap protocol-appropriate request.
///
/// A candidate is alive when the request succeeds or the server answers
/// with a well-formed "route exists but request invalid" status; only
/// transport failures and 5xx responses disqualify it.
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn status_is_alive(status: reqwest::StatusCode) -> bool {
        status.is_success()
            || status == reqwest::StatusCode::NOT_FOUND
            || status == reqwest::StatusCode::METHOD_NOT_ALLOWED
    }
}

#[async_trait]
impl EndpointProbe for HttpProbe {
    async fn probe(&self, base_url: &str, kind: ServiceKind) -> bool {
        let result = if kind.is_rpc() {
            let envelope = json!({
                "protocolVersion": crate::client::PROTOCOL_VERSION,
                "method": "initialize",
                "params": {},
                "id": "probe",
            });
            self.client
                .post(base_url)
                .timeout(self.timeout)
                .json(&envelope)
                .send()
                .await
        } else {
            let health_url = format!("{}/health", base_url.trim_end_matches('/'));
            self.client
                .get(&health_url)
                .timeout(self.timeout)
                .send()
                .await
        };

        match result {
            Ok(response) => Self::status_is_alive(response.status()),
            Err(e) => {
                debug!("Probe of {} ({}) failed: {}", base_url, kind, e);
                false
            }
        }
    }
}

/// Resolves logical service names to reachable base URLs, caching the
/// first responsive candidate per service.
///
/// The cache is process-wide and last-writer-wins: a stale entry only
/// triggers a future re-probe, it never corrupts state.
pub struct EndpointResolver {
    candidates: HashMap<ServiceKind, Vec<String>>,
    cache: DashMap<ServiceKind, String>,
    probe: Arc<dyn EndpointProbe>,
}

impl EndpointResolver {
    pub fn new(candidates: HashMap<ServiceKind, Vec<String>>, probe: Arc<dyn EndpointProbe>) -> Self {
        Self {
            candidates,
            cache: DashMap::new(),
            probe,
        }
    }

    pub fn from_config(config: &ServicesConfig, probe: Arc<dyn EndpointProbe>) -> Self {
        let mut candidates = HashMap::new();
        candidates.insert(ServiceKind::ToolRegistry, config.tool_registry.candidates());
        candidates.insert(ServiceKind::AgentService, config.agent_service.candidates());
        candidates.insert(ServiceKind::FormRenderer, config.form_renderer.candidates());
        Self::new(candidates, probe)
    }

    /// Base URL for `kind`: the cached entry when present, otherwise the
    /// first candidate that answers a probe.
    pub async fn resolve(&self, kind: ServiceKind) -> Result<String> {
        if let Some(cached) = self.cache.get(&kind) {
            debug!("Endpoint cache hit for {}: {}", kind, cached.value());
            return Ok(cached.clone());
        }

        let candidates = self
            .candidates
            .get(&kind)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                PipelineError::no_reachable_endpoint(kind.name(), "no candidates configured")
            })?;

        for candidate in candidates {
            if self.probe.probe(candidate, kind).await {
                info!("Resolved {} to {}", kind, candidate);
                self.cache.insert(kind, candidate.clone());
                return Ok(candidate.clone());
            }
            debug!("Candidate {} for {} not responsive", candidate, kind);
        }

        warn!("All {} candidates exhausted for {}", candidates.len(), kind);
        Err(PipelineError::no_reachable_endpoint(
            kind.name(),
            format!("all {} candidates failed probing", candidates.len()),
        ))
    }

    /// Drop the cached entry so the next resolve re-probes from the top
    /// of the candidate list.
    pub async fn invalidate(&self, kind: ServiceKind) {
        if self.cache.remove(&kind).is_some() {
            info!("Invalidated cached endpoint for {}", kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts only the candidate at `accept_index`, counting probes.
    struct ScriptedProbe {
        accept_index: Option<usize>,
        probes: AtomicUsize,
    }

    impl ScriptedProbe {
        fn accepting(index: usize) -> Self {
            Self {
                accept_index: Some(index),
                probes: AtomicUsize::new(0),
            }
        }

        fn rejecting_all() -> Self {
            Self {
                accept_index: None,
                probes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EndpointProbe for ScriptedProbe {
        async fn probe(&self, base_url: &str, _kind: ServiceKind) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            // Candidates are named c0, c1, ... by the test fixtures.
            self.accept_index
                .map(|i| base_url.ends_with(&format!("c{}", i)))
                .unwrap_or(false)
        }
    }

    fn resolver_with(probe: Arc<dyn EndpointProbe>) -> EndpointResolver {
        let mut candidates = HashMap::new();
        candidates.insert(
            ServiceKind::ToolRegistry,
            vec![
                "http://c0".to_string(),
                "http://c1".to_string(),
                "http://c2".to_string(),
            ],
        );
        EndpointResolver::new(candidates, probe)
    }

    #[tokio::test]
    async fn resolves_first_responsive_candidate_in_order() {
        let probe = Arc::new(ScriptedProbe::accepting(1));
        let resolver = resolver_with(probe.clone());

        let url = resolver.resolve(ServiceKind::ToolRegistry).await.unwrap();
        assert_eq!(url, "http://c1");
        // c0 was tried first and rejected, c1 accepted, c2 never probed.
        assert_eq!(probe.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_skips_probing_until_invalidated() {
        let probe = Arc::new(ScriptedProbe::accepting(0));
        let resolver = resolver_with(probe.clone());

        resolver.resolve(ServiceKind::ToolRegistry).await.unwrap();
        resolver.resolve(ServiceKind::ToolRegistry).await.unwrap();
        assert_eq!(probe.probes.load(Ordering::SeqCst), 1);

        resolver.invalidate(ServiceKind::ToolRegistry).await;
        resolver.resolve(ServiceKind::ToolRegistry).await.unwrap();
        assert_eq!(probe.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_candidates_surface_no_reachable_endpoint() {
        let resolver = resolver_with(Arc::new(ScriptedProbe::rejecting_all()));

        let err = resolver
            .resolve(ServiceKind::ToolRegistry)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NoReachableEndpoint { .. }
        ));
    }

    #[tokio::test]
    async fn unconfigured_service_fails_immediately() {
        let resolver =
            EndpointResolver::new(HashMap::new(), Arc::new(ScriptedProbe::rejecting_all()));

        let err = resolver.resolve(ServiceKind::AgentService).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoReachableEndpoint { .. }));
    }
}
