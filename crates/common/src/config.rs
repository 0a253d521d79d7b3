use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub services: ServicesConfig,
    pub planner: PlannerConfig,
    pub synthesizer: SynthesizerConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Ordered endpoint candidates per logical backend service.
///
/// Candidates are probed in a fixed priority order: direct host/port
/// first, then container-network hostnames, then ingress path prefixes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEndpoints {
    pub direct: Vec<String>,
    pub container: Vec<String>,
    pub ingress: Vec<String>,
}

impl ServiceEndpoints {
    pub fn candidates(&self) -> Vec<String> {
        self.direct
            .iter()
            .chain(self.container.iter())
            .chain(self.ingress.iter())
            .cloned()
            .collect()
    }

    fn for_service(name: &str, port: u16) -> Self {
        Self {
            direct: vec![format!("http://127.0.0.1:{}", port)],
            container: vec![format!("http://{}:{}", name, port)],
            ingress: vec![format!("http://127.0.0.1:8080/{}", name)],
        }
    }
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            direct: Vec::new(),
            container: Vec::new(),
            ingress: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub tool_registry: ServiceEndpoints,
    pub agent_service: ServiceEndpoints,
    pub form_renderer: ServiceEndpoints,
    pub probe_timeout_ms: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            tool_registry: ServiceEndpoints::for_service("tool-registry", 8801),
            agent_service: ServiceEndpoints::for_service("agent-service", 8802),
            form_renderer: ServiceEndpoints::for_service("form-renderer", 8803),
            probe_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// History turns included in the planning prompt.
    pub max_history_turns: usize,
    /// Honor the model's direct-completion signal, skipping plan review.
    pub allow_direct_completion: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_history_turns: 5,
            allow_direct_completion: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    /// Per-task result excerpt bound for the synthesis prompt. Bounds the
    /// model input only; stored task results are never truncated.
    pub excerpt_limit: usize,
    /// Answer fragment size for streamed `ANSWER_DATA` chunks.
    pub answer_chunk_size: usize,
    pub fallback_message: String,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            excerpt_limit: 4_000,
            answer_chunk_size: 1_800,
            fallback_message:
                "I was unable to put together an answer for this request. Please try rephrasing your question."
                    .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// In-memory session cache capacity.
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_sessions: 1_024 }
    }
}

impl SystemConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SystemConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` when present, falling back to defaults.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
