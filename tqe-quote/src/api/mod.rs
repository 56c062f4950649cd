//! HTTP API handlers for tqe-quote

pub mod admin;
pub mod health;
pub mod pipeline;
pub mod quotes;
pub mod sse;

pub use admin::admin_routes;
pub use health::health_routes;
pub use pipeline::pipeline_routes;
pub use quotes::quote_routes;
pub use sse::quote_event_stream;
