//! Endpoint resolution and RPC clients for backend services

pub mod client;
pub mod completion;
pub mod resolver;

pub use client::{RegistryClient, ToolInvoker, PROTOCOL_VERSION, SESSION_TOKEN_HEADER};
pub use completion::{AgentServiceClient, CompletionClient};
pub use resolver::{EndpointProbe, EndpointResolver, HttpProbe, ServiceKind};
