//! Window key generation and handling.

/// A key that names one event stream in the window counter.
///
/// Each identifier owns one global stream (empty endpoint) plus one stream
/// per endpoint class it has touched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// The caller this stream belongs to
    pub identifier: String,
    /// Endpoint class, or empty for the identifier-wide stream
    pub endpoint: String,
}

impl WindowKey {
    /// Create a key for an identifier on a specific endpoint class.
    pub fn new(identifier: &str, endpoint: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    /// Create the identifier-wide key that spans all endpoints.
    pub fn global(identifier: &str) -> Self {
        Self::new(identifier, "")
    }

    pub fn is_global(&self) -> bool {
        self.endpoint.is_empty()
    }

    /// Convert the key to a string representation.
    ///
    /// This is useful for logging and debugging.
    pub fn to_string_key(&self) -> String {
        if self.is_global() {
            format!("{}:*", self.identifier)
        } else {
            format!("{}:{}", self.identifier, self.endpoint)
        }
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
