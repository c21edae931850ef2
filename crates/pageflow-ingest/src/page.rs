//! Page payloads and per-page outcomes
//!
//! The API answers every page request with a JSON object shaped like
//!
//! ```json
//! { "data": [ { ... }, { ... } ], "next": "opaque-or-null", "has_more": true }
//! ```
//!
//! `data` items are passed through untouched. `next` and `has_more` are the
//! only metadata the cursor looks at.

use serde_json::Value;

/// One raw API record, field order preserved as received
pub type Record = serde_json::Map<String, Value>;

/// State of the `next` field in a page body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NextField {
    /// The body has no `next` key at all
    #[default]
    Absent,
    /// `next` is present and explicitly null
    Null,
    /// A continuation token or absolute URL
    Value(String),
}

/// Pagination metadata carried alongside the records
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageMeta {
    pub next: NextField,
    pub has_more: Option<bool>,
}

impl PageMeta {
    /// True when the API explicitly says nothing follows this page
    pub fn signals_end(&self) -> bool {
        self.next == NextField::Null || self.has_more == Some(false)
    }

    pub fn next_token(&self) -> Option<&str> {
        match &self.next {
            NextField::Value(token) => Some(token.as_str()),
            _ => None,
        }
    }
}

/// A decoded, successful page
#[derive(Debug, Clone, Default)]
pub struct PageData {
    pub records: Vec<Record>,
    pub meta: PageMeta,
}

impl PageData {
    /// Decode a page body. An empty body is an empty page; `data` may be
    /// missing or null, which also means no records.
    pub fn from_slice(body: &[u8]) -> Result<Self, String> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let value: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
        let Value::Object(mut root) = value else {
            return Err("page body is not a JSON object".to_string());
        };

        let records = match root.remove("data") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| match item {
                    Value::Object(record) => Ok(record),
                    other => Err(format!("data[{idx}] is not an object: {other}")),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => return Err(format!("`data` is not an array: {other}")),
        };

        let next = match root.get("next") {
            None => NextField::Absent,
            Some(Value::Null) => NextField::Null,
            Some(Value::String(token)) if token.is_empty() => NextField::Null,
            Some(Value::String(token)) => NextField::Value(token.clone()),
            Some(Value::Number(n)) => NextField::Value(n.to_string()),
            Some(other) => return Err(format!("`next` has unsupported type: {other}")),
        };

        let has_more = root.get("has_more").and_then(Value::as_bool);

        Ok(Self {
            records,
            meta: PageMeta { next, has_more },
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Why a page could not be resolved successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Non-transient rejection; the run must stop
    Fatal,
    /// Every allowed attempt failed with a transient error
    Exhausted,
    /// Cancellation arrived while the page was in flight
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Fatal => write!(f, "fatal"),
            FailureKind::Exhausted => write!(f, "retries exhausted"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Failure details for one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub kind: FailureKind,
    /// Last HTTP status seen, if the failure came from a response
    pub status: Option<u16>,
    pub message: String,
    /// Number of attempts made before giving up
    pub attempts: u32,
}

/// Outcome of resolving one page request
#[derive(Debug, Clone)]
pub enum PageResult {
    Success(PageData),
    Failure(PageFailure),
}

impl PageResult {
    pub fn is_success(&self) -> bool {
        matches!(self, PageResult::Success(_))
    }
}
