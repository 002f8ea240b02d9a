//! Load-test isolation application (loadiso-app)
//!
//! Ties the classification core to the three routed resources:
//!
//! 1. **Configuration**: [`IsolationConfig`] picks a datasource and a stream
//!    strategy and names every role, prefix and topic
//! 2. **Wiring**: [`Application::build`] provisions routers and consumers for
//!    those strategies and fails fast on anything misconfigured
//! 3. **Service**: [`UserService`] operations resolve their backends from the
//!    request's classification at the moment of use
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use loadiso_app::prelude::*;
//!
//! let config = IsolationConfig::default();
//! let app = Application::build(config.clone(), Backends::provision(&config)?)?;
//!
//! let ctx = ClassificationContext::new();
//! let users = app
//!     .handle(&ctx, &headers, |scope| async move {
//!         service.list_users(scope.context())
//!     })
//!     .await??;
//! ```

pub mod application;
pub mod config;
pub mod error;
pub mod logging;
pub mod service;
pub mod simulator;

pub use application::{Application, Backends, EventConsumers, SessionIsolation};
pub use config::{
    CacheConfig, DatasourceConfig, DatasourceStrategy, GateConfig, IsolationConfig,
    StrategyConfig, StreamConfig, StreamStrategy,
};
pub use error::{AppError, ConfigError, ServiceError};
pub use logging::{init_tracing, LogFormat, DEFAULT_FILTER};
pub use service::{CreatedUser, UserRequest, UserService, USERS_CACHE};
pub use simulator::{run_simulator, SimulatorConfig, SimulatorReport, SimulatorStats, Violation};

/// Common imports for driving the application
pub mod prelude {
    pub use crate::{Application, Backends, EventConsumers, IsolationConfig, UserRequest, UserService};
    pub use loadiso_core::{ClassificationContext, RequestHeaders, RequestScope};
}
