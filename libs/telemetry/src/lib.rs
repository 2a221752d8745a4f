//! Lightweight tracing facade plus the in-process metrics registry.
//!
//! ```no_run
//! use pricebot_telemetry::{init_telemetry, Metrics};
//!
//! # fn main() -> anyhow::Result<()> {
//! init_telemetry("pricebot")?;
//! let metrics = Metrics::new();
//! metrics.incr("documents_uploaded");
//! tracing::info!("telemetry configured");
//! # Ok(())
//! # }
//! ```

mod metrics;
mod tracing_init;

pub use metrics::{FailureRecord, Metrics, counter};
pub use tracing_init::init_telemetry;
