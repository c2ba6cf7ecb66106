//! HTTP transport for the IAM policy search endpoint.
//!
//! Two response schemas are supported and selected explicitly through [`ApiVariant`]:
//!
//! | variant | scope parameter | items field |
//! |---|---|---|
//! | `SearchAll` (default) | `scope` | `results` |
//! | `Parent` | `parent` | `policies` |
//!
//! Both use `pageToken` / `nextPageToken` for the cursor. The decoder only reads the field of
//! the selected variant.
//!
//! Failures are classified here: HTTP 429 is the only transient class.

use crate::error::{Classify, ErrorClass};
use crate::paginate::PolicySearch;
use crate::types::{PageRequest, PageResponse, PolicyRecord};
use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Cloud Asset `searchAllIamPolicies`, with the scope in the path.
pub const DEFAULT_ENDPOINT: &str =
    "https://cloudasset.googleapis.com/v1/{scope}:searchAllIamPolicies";

/// Placeholder replaced by the scope inside an endpoint template.
pub const SCOPE_PLACEHOLDER: &str = "{scope}";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response schema spoken by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiVariant {
    #[default]
    SearchAll,
    Parent,
}

impl ApiVariant {
    /// Query parameter carrying the scope when the template has no placeholder.
    pub fn scope_param(self) -> &'static str {
        match self {
            ApiVariant::SearchAll => "scope",
            ApiVariant::Parent => "parent",
        }
    }

    /// JSON field holding the page's items.
    pub fn items_field(self) -> &'static str {
        match self {
            ApiVariant::SearchAll => "results",
            ApiVariant::Parent => "policies",
        }
    }
}

impl FromStr for ApiVariant {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "search-all" | "results" => Ok(ApiVariant::SearchAll),
            "parent" | "policies" => Ok(ApiVariant::Parent),
            other => Err(format!("unknown API variant '{other}' (expected search-all or parent)")),
        }
    }
}

impl fmt::Display for ApiVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiVariant::SearchAll => f.write_str("search-all"),
            ApiVariant::Parent => f.write_str("parent"),
        }
    }
}

/// Failures of a single search request.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// HTTP 429; the only retryable failure.
    #[error("rate limited (http {status}): {body}")]
    RateLimited { status: u16, body: String },
    /// Any other non-success status.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    /// The body was not a valid page for the selected variant.
    #[error("decode error: {0}")]
    Decode(String),
}

impl SearchError {
    /// HTTP status, when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            SearchError::RateLimited { status, .. } | SearchError::Http { status, .. } => {
                Some(*status)
            }
            SearchError::Transport(err) => err.status().map(|s| s.as_u16()),
            SearchError::Decode(_) => None,
        }
    }
}

impl Classify for SearchError {
    fn class(&self) -> ErrorClass {
        match self {
            SearchError::RateLimited { .. } => ErrorClass::TransientRateLimit,
            _ => ErrorClass::Permanent,
        }
    }
}

const NEXT_PAGE_TOKEN_FIELD: &str = "nextPageToken";

/// Decode a response body for `variant`. Only the variant's items field and `nextPageToken` are
/// read; a missing or null items field is an empty page.
pub fn decode_page(body: &str, variant: ApiVariant) -> Result<PageResponse, SearchError> {
    let mut wire: Map<String, JsonValue> = serde_json::from_str(body)
        .map_err(|err| SearchError::Decode(format!("invalid search response JSON: {err}")))?;

    let items = match wire.remove(variant.items_field()) {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(raw) => serde_json::from_value::<Vec<PolicyRecord>>(raw).map_err(|err| {
            SearchError::Decode(format!("invalid '{}' field: {err}", variant.items_field()))
        })?,
    };
    let next_cursor = match wire.remove(NEXT_PAGE_TOKEN_FIELD) {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(token)) => Some(token),
        Some(other) => {
            return Err(SearchError::Decode(format!(
                "'{NEXT_PAGE_TOKEN_FIELD}' must be a string, got {other}"
            )))
        }
    };
    Ok(PageResponse::new(items, next_cursor))
}

/// `reqwest`-backed [`PolicySearch`].
#[derive(Clone)]
pub struct HttpPolicySearch {
    http: reqwest::Client,
    endpoint: String,
    authorization: String,
    variant: ApiVariant,
    page_size: Option<u32>,
    query: Option<String>,
    request_timeout: Duration,
}

impl fmt::Debug for HttpPolicySearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPolicySearch")
            .field("endpoint", &self.endpoint)
            .field("authorization", &"<redacted>")
            .field("variant", &self.variant)
            .field("page_size", &self.page_size)
            .field("query", &self.query)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl HttpPolicySearch {
    /// Client for the default endpoint with an already-issued OAuth access token.
    pub fn new(access_token: impl AsRef<str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            authorization: normalize_bearer_authorization(access_token.as_ref()),
            variant: ApiVariant::default(),
            page_size: None,
            query: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Endpoint template. `{scope}` is replaced by the scope; without it the scope is sent as a
    /// query parameter named by the variant.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_variant(mut self, variant: ApiVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Search filter forwarded as `query`.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Use a preconfigured `reqwest` client (proxies, custom TLS roots).
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn variant(&self) -> ApiVariant {
        self.variant
    }

    fn url_for(&self, request: &PageRequest) -> String {
        self.endpoint.replace(SCOPE_PLACEHOLDER, request.scope.as_str())
    }

    fn query_for(&self, request: &PageRequest) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if !self.endpoint.contains(SCOPE_PLACEHOLDER) {
            params.push((self.variant.scope_param(), request.scope.to_string()));
        }
        if let Some(cursor) = request.cursor.as_deref().filter(|c| !c.is_empty()) {
            params.push(("pageToken", cursor.to_string()));
        }
        if let Some(size) = self.page_size {
            params.push(("pageSize", size.to_string()));
        }
        if let Some(query) = &self.query {
            params.push(("query", query.clone()));
        }
        params
    }
}

#[async_trait]
impl PolicySearch for HttpPolicySearch {
    type Error = SearchError;

    async fn search_policies(&self, request: &PageRequest) -> Result<PageResponse, SearchError> {
        let response = self
            .http
            .get(self.url_for(request))
            .query(&self.query_for(request))
            .header(header::AUTHORIZATION, &self.authorization)
            .header(header::ACCEPT, "application/json")
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(SearchError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(SearchError::Transport)?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SearchError::RateLimited { status: status.as_u16(), body });
        }
        if !status.is_success() {
            return Err(SearchError::Http { status: status.as_u16(), body });
        }
        decode_page(&body, self.variant)
    }
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
