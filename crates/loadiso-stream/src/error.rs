//! Error types for the stream backend

use loadiso_core::RouterError;

/// Stream errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// SASL login rejected
    #[error("Authentication failed during authentication due to invalid credentials with SASL mechanism PLAIN (principal: {0})")]
    AuthenticationFailed(String),

    /// Principal lacks an ACL on the topic
    #[error("Not authorized to access topics: [{topic}] (principal: {principal}, operation: {operation})")]
    TopicAuthorizationFailed {
        /// Authenticated principal
        principal: String,
        /// Topic refused
        topic: String,
        /// Operation refused
        operation: String,
    },

    /// Principal lacks READ on the consumer group
    #[error("Not authorized to access group: {group} (principal: {principal})")]
    GroupAuthorizationFailed {
        /// Authenticated principal
        principal: String,
        /// Group refused
        group: String,
    },

    /// Topic does not exist and auto-creation is off
    #[error("unknown topic or partition: {0}")]
    UnknownTopic(String),

    /// Payload could not be (de)serialized
    #[error("event serialization failed: {0}")]
    Serialization(String),

    /// Background publish task ended abnormally
    #[error("publish task aborted: {0}")]
    PublishAborted(String),

    /// Stream configuration rejected at startup
    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),

    /// Router wiring failed
    #[error("stream misconfigured: {0}")]
    Misconfigured(#[from] RouterError),
}

impl StreamError {
    /// Whether an ACL refused the operation
    #[inline]
    #[must_use]
    pub fn is_authorization_error(&self) -> bool {
        matches!(
            self,
            Self::TopicAuthorizationFailed { .. } | Self::GroupAuthorizationFailed { .. }
        )
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_predicate() {
        let topic = StreamError::TopicAuthorizationFailed {
            principal: "test_producer".into(),
            topic: "user-events.real".into(),
            operation: "WRITE".into(),
        };
        assert!(topic.is_authorization_error());
        assert!(topic.to_string().contains("[user-events.real]"));
        assert!(!StreamError::UnknownTopic("x".into()).is_authorization_error());
    }
}
