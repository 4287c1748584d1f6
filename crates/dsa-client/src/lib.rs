//! DSA Client - transport layer for the stock analysis dashboard
//!
//! Provides:
//! - [`AnalysisApi`], the seam between the reconciliation core and the
//!   backend, with a `reqwest` implementation ([`HttpApi`])
//! - key casing normalization of backend payloads
//! - an incremental server-sent event decoder and a reconnecting task stream
//!   subscriber that forwards typed events over a channel
//! - [`MockApi`], an in-process backend for tests and offline demos

pub mod api;
pub mod casing;
pub mod mock;
pub mod sse;
pub mod stream;

pub use api::{AnalysisApi, ApiFuture, HttpApi, HttpApiConfig};
pub use casing::{normalize_keys, snake_to_camel};
pub use mock::MockApi;
pub use sse::{decode_task_event, SseDecoder, SseFrame};
pub use stream::{backoff_delay, StreamConfig, StreamMessage, TaskStream};
