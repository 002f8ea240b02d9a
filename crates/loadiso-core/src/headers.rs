//! Inbound request metadata
//!
//! Header names compare case-insensitively; the first value wins when a header
//! is repeated.

use std::collections::BTreeMap;

/// Header carrying the traffic kind
pub const TRAFFIC_TYPE_HEADER: &str = "X-Traffic-Type";

/// Header carrying the load-test run identifier
pub const TEST_RUN_ID_HEADER: &str = "X-Test-Run-Id";

/// Request metadata as seen by the ingress gate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    entries: BTreeMap<String, String>,
}

impl RequestHeaders {
    /// Create empty header set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header, keeping an existing value for the same name
    #[must_use]
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a header, keeping an existing value for the same name
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .entry(name.as_ref().to_ascii_lowercase())
            .or_insert_with(|| value.into());
    }

    /// Look a header up by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Traffic kind signal, if present
    #[inline]
    #[must_use]
    pub fn traffic_type(&self) -> Option<&str> {
        self.get(TRAFFIC_TYPE_HEADER)
    }

    /// Run id signal, if present
    #[inline]
    #[must_use]
    pub fn test_run_id(&self) -> Option<&str> {
        self.get(TEST_RUN_ID_HEADER)
    }

    /// Number of distinct headers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no headers are present
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for RequestHeaders
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let headers = RequestHeaders::new().with("x-traffic-type", "LOAD_TEST");
        assert_eq!(headers.traffic_type(), Some("LOAD_TEST"));
        assert_eq!(headers.get("X-TRAFFIC-TYPE"), Some("LOAD_TEST"));
    }

    #[test]
    fn first_value_wins() {
        let headers: RequestHeaders = [
            (TEST_RUN_ID_HEADER, "run-1"),
            ("x-test-run-id", "run-2"),
        ]
        .into_iter()
        .collect();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.test_run_id(), Some("run-1"));
    }

    #[test]
    fn missing_headers() {
        let headers = RequestHeaders::new();
        assert!(headers.is_empty());
        assert_eq!(headers.traffic_type(), None);
        assert_eq!(headers.test_run_id(), None);
    }
}
