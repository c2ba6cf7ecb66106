//! Data carried between the paginator and the search transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resource prefixes accepted as a search scope.
const SCOPE_PREFIXES: [&str; 3] = ["organizations/", "folders/", "projects/"];

/// Resource a search is restricted to, in `organizations/<id>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

/// Rejected scope strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("scope must not be empty")]
    Empty,
    #[error("invalid scope {0:?}: expected a numeric organization id or organizations/<id>, folders/<id>, projects/<id> with ids of letters, digits, '.', '_' or '-'")]
    Malformed(String),
}

impl Scope {
    /// Scope for a numeric organization id.
    pub fn organization(id: u64) -> Self {
        Self(format!("organizations/{}", id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Scope {
    type Err = ScopeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ScopeError::Empty);
        }
        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(Self(format!("organizations/{}", trimmed)));
        }
        let valid = SCOPE_PREFIXES.iter().any(|prefix| {
            trimmed
                .strip_prefix(prefix)
                .is_some_and(|id| !id.is_empty() && id.bytes().all(is_id_byte))
        });
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ScopeError::Malformed(trimmed.to_string()))
        }
    }
}

// Resource ids are spliced into URL paths unescaped.
fn is_id_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-')
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One IAM policy search result. The engine never looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyRecord(serde_json::Value);

impl PolicyRecord {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for PolicyRecord {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Request for a single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub scope: Scope,
    /// Cursor from the previous response; `None` for the first page.
    pub cursor: Option<String>,
}

impl PageRequest {
    pub fn first(scope: Scope) -> Self {
        Self { scope, cursor: None }
    }

    pub fn next(scope: Scope, cursor: impl Into<String>) -> Self {
        Self { scope, cursor: Some(cursor.into()) }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageResponse {
    pub items: Vec<PolicyRecord>,
    pub next_cursor: Option<String>,
}

impl PageResponse {
    pub fn new(items: Vec<PolicyRecord>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }

    /// Cursor for the following page. Empty cursors mean "no more pages".
    pub fn continuation(&self) -> Option<&str> {
        self.next_cursor.as_deref().filter(|c| !c.is_empty())
    }

    pub fn is_last(&self) -> bool {
        self.continuation().is_none()
    }
}
