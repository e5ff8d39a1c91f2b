use crate::error::PageError;
use crate::http::{FetchGate, FetchOutcome};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

/// Wire shape of a collection response: `{"data": [...], "page": {"cursor", "next"}}`.
///
/// Items stay untyped here so one malformed entity cannot sink its page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPage {
    #[serde(default)]
    pub data: Option<Vec<Value>>,
    #[serde(default)]
    pub page: Option<PageInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageInfo {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub next: Option<String>,
}

/// One page of a collection and the continuation URL for the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub next: Option<String>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::terminal(Vec::new())
    }
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, next: Option<String>) -> Self {
        Self {
            data,
            next: next.filter(|n| !n.trim().is_empty()),
        }
    }

    pub fn terminal(data: Vec<T>) -> Self {
        Self { data, next: None }
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

impl<T: DeserializeOwned> Page<T> {
    /// Empty and failed fetches both become an empty terminal page. Items
    /// that do not decode as `T` are dropped; the continuation is kept.
    pub fn from_outcome(outcome: FetchOutcome<RawPage>) -> Self {
        let raw = match outcome {
            FetchOutcome::Data(raw) => raw,
            FetchOutcome::Empty | FetchOutcome::Failed(_) => return Self::default(),
        };
        let data = raw
            .data
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .filter_map(|(i, item)| match serde_json::from_value::<T>(item) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Skipping item {} of page: {}", i, e);
                    None
                }
            })
            .collect();
        Self::new(data, raw.page.and_then(|p| p.next))
    }

    /// Fetch the page after this one. Calling this on a terminal page is a
    /// caller bug and fails before any request is made.
    pub async fn advance(&self, gate: &FetchGate) -> Result<Page<T>, PageError> {
        let next = self.next.as_deref().ok_or(PageError::Exhausted)?;
        let outcome = gate.get_json::<RawPage>(next, &[]).await;
        if let FetchOutcome::Failed(err) = &outcome {
            warn!("Pagination stopped: {} ({})", err.code, err.message);
        }
        Ok(Self::from_outcome(outcome))
    }

    /// Consume this page and every following one, in server order.
    pub async fn drain(self, gate: &FetchGate) -> Vec<T> {
        let mut seen = HashSet::new();
        let mut current = self;
        let mut all = Vec::new();
        loop {
            all.append(&mut current.data);
            let Some(next) = current.next.clone() else {
                break;
            };
            if !seen.insert(next.clone()) {
                warn!("Pagination stopped: continuation repeated");
                break;
            }
            current = match current.advance(gate).await {
                Ok(p) => p,
                Err(_) => break,
            };
            debug!("Fetched page of {} items ({} so far)", current.data.len(), all.len());
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ErrorInfo;

    #[test]
    fn blank_continuation_is_terminal() {
        let p: Page<u32> = Page::new(vec![1], Some("  ".into()));
        assert!(!p.has_next());
    }

    #[test]
    fn failed_outcome_is_empty_terminal() {
        let p: Page<u32> = Page::from_outcome(FetchOutcome::Failed(ErrorInfo {
            code: "transport_error".into(),
            message: "refused".into(),
            status: None,
        }));
        assert!(p.data.is_empty());
        assert!(!p.has_next());
    }

    #[test]
    fn raw_page_without_page_info() {
        let raw: RawPage = serde_json::from_value(serde_json::json!({"data": [1, 2]})).unwrap();
        let p: Page<u32> = Page::from_outcome(FetchOutcome::Data(raw));
        assert_eq!(p.data, vec![1, 2]);
        assert!(!p.has_next());
    }

    #[test]
    fn malformed_item_is_skipped_and_continuation_kept() {
        let raw: RawPage = serde_json::from_value(serde_json::json!({
            "data": [1, "two", 3],
            "page": {"next": "https://api.example/p2"}
        }))
        .unwrap();
        let p: Page<u32> = Page::from_outcome(FetchOutcome::Data(raw));
        assert_eq!(p.data, vec![1, 3]);
        assert_eq!(p.next.as_deref(), Some("https://api.example/p2"));
    }

    #[test]
    fn null_data_is_an_empty_page() {
        let raw: RawPage = serde_json::from_value(serde_json::json!({"data": null})).unwrap();
        let p: Page<u32> = Page::from_outcome(FetchOutcome::Data(raw));
        assert!(p.data.is_empty());
    }

    #[tokio::test]
    async fn advancing_terminal_page_fails_fast() {
        let gate = FetchGate::new(reqwest::Client::new(), "t", false);
        let p: Page<u32> = Page::terminal(vec![7]);
        assert_eq!(p.advance(&gate).await.unwrap_err(), PageError::Exhausted);
    }
}
