//! Traffic classification model
//!
//! A [`TrafficClassification`] is built once per inbound request and never
//! mutated afterwards. Anything that is not exactly the test sentinel degrades
//! to production traffic.

use crate::headers::RequestHeaders;
use std::fmt;

/// Traffic-kind value that marks a request as load-test traffic
pub const LOAD_TEST_VALUE: &str = "LOAD_TEST";

/// Traffic-kind label used for production traffic in logs and outbound metadata
pub const PRODUCTION_VALUE: &str = "PRODUCTION";

/// Run id reported when no run is associated with the request
pub const PLACEHOLDER_RUN_ID: &str = "-";

/// Kind of traffic a request belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TrafficKind {
    /// Real user traffic (default when no signal is present)
    #[default]
    Production,
    /// Synthetic load-test traffic
    Test,
}

impl TrafficKind {
    /// Parse the traffic-kind signal; only the exact sentinel yields `Test`
    #[inline]
    #[must_use]
    pub fn from_signal(signal: Option<&str>) -> Self {
        match signal {
            Some(LOAD_TEST_VALUE) => Self::Test,
            _ => Self::Production,
        }
    }

    /// Label propagated in logs and message metadata
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => PRODUCTION_VALUE,
            Self::Test => LOAD_TEST_VALUE,
        }
    }

    /// Check for test traffic
    #[inline]
    #[must_use]
    pub fn is_test(self) -> bool {
        matches!(self, Self::Test)
    }
}

impl fmt::Display for TrafficKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable classification of one request
///
/// The run id only ever exists for test traffic and is used for correlation,
/// never for routing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TrafficClassification {
    kind: TrafficKind,
    run_id: Option<String>,
}

impl TrafficClassification {
    /// Production classification
    #[inline]
    #[must_use]
    pub fn for_production() -> Self {
        Self::default()
    }

    /// Test classification with an explicit run id
    ///
    /// An empty run id is replaced by a generated one.
    #[must_use]
    pub fn for_test(run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        let run_id = if run_id.is_empty() || run_id == PLACEHOLDER_RUN_ID {
            generate_run_id()
        } else {
            run_id
        };
        Self {
            kind: TrafficKind::Test,
            run_id: Some(run_id),
        }
    }

    /// Classify from request metadata
    ///
    /// Test traffic without a run id gets a generated one; a run id sent with
    /// production traffic is ignored.
    #[must_use]
    pub fn from_headers(headers: &RequestHeaders) -> Self {
        match TrafficKind::from_signal(headers.traffic_type()) {
            TrafficKind::Test => Self::for_test(headers.test_run_id().unwrap_or_default()),
            TrafficKind::Production => Self::for_production(),
        }
    }

    /// Traffic kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TrafficKind {
        self.kind
    }

    /// Check for test traffic
    #[inline]
    #[must_use]
    pub fn is_test(&self) -> bool {
        self.kind.is_test()
    }

    /// Run id, present only for test traffic
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Run id for telemetry, falling back to the placeholder
    #[inline]
    #[must_use]
    pub fn run_id_or_placeholder(&self) -> &str {
        self.run_id().unwrap_or(PLACEHOLDER_RUN_ID)
    }
}

impl fmt::Display for TrafficClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.run_id_or_placeholder())
    }
}

fn generate_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
