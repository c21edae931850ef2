//! Pagination cursor
//!
//! The cursor holds only configuration. The next request is computed from the
//! previous request and its result, so a run can be replayed from any recorded
//! request without wall-clock or external state.

use serde::{Deserialize, Serialize};

use crate::page::PageResult;

/// Default records per page, matching the API's usual limit
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// How the API paginates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    /// `offset`/`limit` query parameters
    #[default]
    Offset,
    /// Opaque continuation token from the previous page's `next`
    Token,
}

impl std::str::FromStr for PaginationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "offset" => Ok(PaginationMode::Offset),
            "token" | "cursor" => Ok(PaginationMode::Token),
            _ => Err(format!("Invalid pagination mode: {}", s)),
        }
    }
}

/// Where a page starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePosition {
    Offset { offset: u64, limit: u32 },
    Token { limit: u32, token: Option<String> },
}

/// The next chunk to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based, strictly increasing page number
    pub sequence: u64,
    pub position: PagePosition,
}

/// Why pagination stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// A page came back with zero records
    Exhausted,
    /// The API metadata said nothing follows
    NoMorePages,
    /// The configured page cap was reached
    PageCap { max_pages: u64 },
    /// A token-mode page failed, so no continuation token exists
    CursorLost,
}

impl std::fmt::Display for DoneReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DoneReason::Exhausted => write!(f, "dataset exhausted"),
            DoneReason::NoMorePages => write!(f, "no more pages"),
            DoneReason::PageCap { max_pages } => write!(f, "page cap of {} reached", max_pages),
            DoneReason::CursorLost => write!(f, "continuation token lost after failed page"),
        }
    }
}

/// Result of advancing the cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPage {
    Fetch(PageRequest),
    Done(DoneReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationCursor {
    mode: PaginationMode,
    page_size: u32,
    max_pages: Option<u64>,
}

impl PaginationCursor {
    pub fn new(mode: PaginationMode, page_size: u32, max_pages: Option<u64>) -> Self {
        Self {
            mode,
            page_size,
            max_pages,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn initial(&self) -> PageRequest {
        let position = match self.mode {
            PaginationMode::Offset => PagePosition::Offset {
                offset: 0,
                limit: self.page_size,
            },
            PaginationMode::Token => PagePosition::Token {
                limit: self.page_size,
                token: None,
            },
        };

        PageRequest {
            sequence: 1,
            position,
        }
    }

    /// Decide what follows `previous` given how it resolved.
    ///
    /// A failed offset page is skipped by advancing one page width. A failed
    /// token page has no continuation, so pagination ends there.
    pub fn advance(&self, previous: &PageRequest, result: &PageResult) -> NextPage {
        let position = match (result, &previous.position) {
            (PageResult::Success(page), _) if page.is_empty() => {
                return NextPage::Done(DoneReason::Exhausted);
            },
            (PageResult::Success(page), PagePosition::Offset { offset, limit }) => {
                if page.meta.signals_end() {
                    return NextPage::Done(DoneReason::NoMorePages);
                }
                PagePosition::Offset {
                    offset: offset + u64::from(*limit),
                    limit: *limit,
                }
            },
            (PageResult::Success(page), PagePosition::Token { limit, .. }) => {
                match page.meta.next_token() {
                    Some(token) if page.meta.has_more != Some(false) => PagePosition::Token {
                        limit: *limit,
                        token: Some(token.to_string()),
                    },
                    _ => return NextPage::Done(DoneReason::NoMorePages),
                }
            },
            (PageResult::Failure(_), PagePosition::Offset { offset, limit }) => {
                PagePosition::Offset {
                    offset: offset + u64::from(*limit),
                    limit: *limit,
                }
            },
            (PageResult::Failure(_), PagePosition::Token { .. }) => {
                return NextPage::Done(DoneReason::CursorLost);
            },
        };

        if let Some(max_pages) = self.max_pages {
            if previous.sequence >= max_pages {
                return NextPage::Done(DoneReason::PageCap { max_pages });
            }
        }

        NextPage::Fetch(PageRequest {
            sequence: previous.sequence + 1,
            position,
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.page_size == 0 {
            return Err("page size must be greater than 0".to_string());
        }
        if self.max_pages == Some(0) {
            return Err("max pages must be greater than 0 when set".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::page::{FailureKind, NextField, PageData, PageFailure, PageMeta, Record};

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let mut record = Record::new();
                record.insert("id".to_string(), i.into());
                record
            })
            .collect()
    }

    fn success(n: usize, next: NextField) -> PageResult {
        PageResult::Success(PageData {
            records: records(n),
            meta: PageMeta {
                next,
                has_more: None,
            },
        })
    }

    fn exhausted() -> PageResult {
        PageResult::Failure(PageFailure {
            kind: FailureKind::Exhausted,
            status: Some(500),
            message: "HTTP 500".to_string(),
            attempts: 5,
        })
    }

    #[test]
    fn test_initial_request() {
        let cursor = PaginationCursor::new(PaginationMode::Offset, 100, None);
        let first = cursor.initial();
        assert_eq!(first.sequence, 1);
        assert_eq!(
            first.position,
            PagePosition::Offset {
                offset: 0,
                limit: 100
            }
        );
    }

    #[test]
    fn test_offset_advances_by_page_size() {
        let cursor = PaginationCursor::new(PaginationMode::Offset, 100, None);
        let first = cursor.initial();
        let NextPage::Fetch(second) = cursor.advance(&first, &success(100, NextField::Absent))
        else {
            panic!("expected another page");
        };
        assert_eq!(second.sequence, 2);
        assert_eq!(
            second.position,
            PagePosition::Offset {
                offset: 100,
                limit: 100
            }
        );
    }

    #[test]
    fn test_empty_page_terminates() {
        let cursor = PaginationCursor::new(PaginationMode::Offset, 100, None);
        assert_eq!(
            cursor.advance(&cursor.initial(), &success(0, NextField::Value("x".into()))),
            NextPage::Done(DoneReason::Exhausted)
        );
    }

    #[test]
    fn test_explicit_end_terminates() {
        let cursor = PaginationCursor::new(PaginationMode::Offset, 100, None);
        assert_eq!(
            cursor.advance(&cursor.initial(), &success(3, NextField::Null)),
            NextPage::Done(DoneReason::NoMorePages)
        );

        let no_more = PageResult::Success(PageData {
            records: records(3),
            meta: PageMeta {
                next: NextField::Absent,
                has_more: Some(false),
            },
        });
        assert_eq!(
            cursor.advance(&cursor.initial(), &no_more),
            NextPage::Done(DoneReason::NoMorePages)
        );
    }

    #[test]
    fn test_failed_offset_page_is_skipped() {
        let cursor = PaginationCursor::new(PaginationMode::Offset, 50, None);
        let NextPage::Fetch(next) = cursor.advance(&cursor.initial(), &exhausted()) else {
            panic!("failed page should not end pagination");
        };
        assert_eq!(
            next.position,
            PagePosition::Offset {
                offset: 50,
                limit: 50
            }
        );
    }

    #[test]
    fn test_token_mode_follows_next() {
        let cursor = PaginationCursor::new(PaginationMode::Token, 10, None);
        let first = cursor.initial();
        let NextPage::Fetch(second) = cursor.advance(&first, &success(10, NextField::Value("t2".into())))
        else {
            panic!("expected another page");
        };
        assert_eq!(
            second.position,
            PagePosition::Token {
                limit: 10,
                token: Some("t2".to_string())
            }
        );

        assert_eq!(
            cursor.advance(&second, &success(10, NextField::Absent)),
            NextPage::Done(DoneReason::NoMorePages)
        );
        assert_eq!(
            cursor.advance(&second, &exhausted()),
            NextPage::Done(DoneReason::CursorLost)
        );
    }

    #[test]
    fn test_page_cap() {
        let cursor = PaginationCursor::new(PaginationMode::Offset, 10, Some(3));
        let mut request = cursor.initial();
        let mut fetched = 1;
        loop {
            match cursor.advance(&request, &success(10, NextField::Absent)) {
                NextPage::Fetch(next) => {
                    request = next;
                    fetched += 1;
                },
                NextPage::Done(reason) => {
                    assert_eq!(reason, DoneReason::PageCap { max_pages: 3 });
                    break;
                },
            }
        }
        assert_eq!(fetched, 3);
    }

    #[test]
    fn test_advance_is_reproducible() {
        let cursor = PaginationCursor::new(PaginationMode::Offset, 25, None);
        let request = PageRequest {
            sequence: 7,
            position: PagePosition::Offset {
                offset: 150,
                limit: 25,
            },
        };
        let result = success(25, NextField::Absent);
        assert_eq!(cursor.advance(&request, &result), cursor.advance(&request, &result));
    }

    #[test]
    fn test_validate() {
        assert!(PaginationCursor::new(PaginationMode::Offset, 0, None).validate().is_err());
        assert!(PaginationCursor::new(PaginationMode::Offset, 10, Some(0)).validate().is_err());
        assert!(PaginationCursor::new(PaginationMode::Token, 10, Some(1)).validate().is_ok());
        assert_eq!("cursor".parse::<PaginationMode>().unwrap(), PaginationMode::Token);
    }
}
