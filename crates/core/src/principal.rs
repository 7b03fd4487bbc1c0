//! Request-scoped identity.
//!
//! A `Principal` is the opaque subject identifier attached to every request.
//! The executor forwards it to the retrieval tools for ownership scoping and
//! never inspects or stores it beyond that.

use serde::{Deserialize, Serialize};

/// Opaque identifier for the requesting user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal(pub String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Principal {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_roundtrip() {
        let p = Principal::new("user-42");
        assert_eq!(p.as_str(), "user-42");
        assert_eq!(p.to_string(), "user-42");
    }
}
