//! Loadiso Core - traffic classification and routing
//!
//! Lets one service handle production and load-test traffic side by side:
//! - Classifies each inbound request exactly once at the ingress gate
//! - Keeps the classification in a per-unit-of-execution context
//! - Optionally stamps it onto the relational session for server-side policy
//! - Routes every resource acquisition to a real or a test backend
//!
//! # Example
//!
//! ```rust,ignore
//! use loadiso_core::{ClassificationContext, IngressGate, RequestHeaders};
//!
//! # async fn example(headers: RequestHeaders) -> Result<(), loadiso_core::GateError> {
//! let gate = IngressGate::new();
//! let ctx = ClassificationContext::new();
//!
//! let is_test = gate
//!     .handle(&ctx, &headers, |scope| async move { scope.context().is_test() })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod classification;
pub mod context;
pub mod error;
pub mod gate;
pub mod headers;
pub mod router;
pub mod session;

pub use classification::{
    TrafficClassification, TrafficKind, LOAD_TEST_VALUE, PLACEHOLDER_RUN_ID, PRODUCTION_VALUE,
};
pub use context::{ClassificationContext, UnitId};
pub use error::{GateError, RouterError, SessionError};
pub use gate::{ClassificationGuard, IngressGate, RequestScope};
pub use headers::{RequestHeaders, TEST_RUN_ID_HEADER, TRAFFIC_TYPE_HEADER};
pub use router::{BackendKey, BackendRouter, ResourceKind, RouterBuilder};
pub use session::{MarkerState, SessionMarker};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
