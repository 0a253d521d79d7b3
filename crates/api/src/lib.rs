//! HTTP surface of the orchestration pipeline.
//!
//! Two streaming endpoints carry a turn: `POST /query` plans it (pausing
//! at `PLAN_READY:` when review is needed) and `POST /plan` resumes the
//! reviewed plan through execution and synthesis. Both answer with a
//! single long-lived chunked response of newline-delimited typed events.

pub mod routes;
pub mod server;
pub mod types;

pub use server::{ApiServer, AppState};
pub use types::*;
