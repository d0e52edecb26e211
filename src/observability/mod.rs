//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Subsystems produce:
//!     → tracing events (structured fields: endpoint, protocol, connection_id)
//!     → metrics.rs (counters)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or JSON)
//!     → whatever metrics recorder the host process installs
//! ```

pub mod logging;
pub mod metrics;
