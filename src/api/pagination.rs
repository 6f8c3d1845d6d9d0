//! Cursor-based page loading over the `{results, next}` envelope.

use crate::api::client::{ApiClient, Call};
use crate::api::errors::Result;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// One ordered batch of a paginated list.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_next: bool,
}

/// Position in a paginated list. `has_next` is `None` until the first page
/// has been fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    page_number: u32,
    has_next: Option<bool>,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self {
            page_number: 1,
            has_next: None,
        }
    }
}

impl PageCursor {
    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn has_next(&self) -> Option<bool> {
        self.has_next
    }

    pub fn next_page(&self) -> u32 {
        self.page_number + 1
    }

    /// Records a successful fetch of `page`. An earlier page may be fetched
    /// again when the list shrank locally.
    pub fn advance(&mut self, page: u32, has_next: bool) {
        debug_assert!((1..=self.page_number + 1).contains(&page));
        self.page_number = page;
        self.has_next = Some(has_next);
    }

    /// Overrides completeness without moving the page number.
    pub fn set_has_next(&mut self, has_next: bool) {
        self.has_next = Some(has_next);
    }
}

/// A list endpoint plus how it names its paging parameters.
#[derive(Debug, Clone)]
pub struct ListEndpoint {
    path: String,
    query: Vec<(String, String)>,
    auth_required: bool,
    size_param: &'static str,
}

impl ListEndpoint {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
            auth_required: false,
            size_param: "page_size",
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_owned(), value.to_string()));
        self
    }

    pub fn authenticated(mut self) -> Self {
        self.auth_required = true;
        self
    }

    /// Uses `name` instead of `page_size` for the batch size parameter.
    pub fn size_param(mut self, name: &'static str) -> Self {
        self.size_param = name;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Paged {
        results: Vec<T>,
        #[serde(default)]
        next: Option<String>,
    },
    Bare(Vec<T>),
}

/// Fetches one page. Re-fetching the same page is safe; failures are
/// returned to the caller without retrying.
pub async fn fetch_page<T: DeserializeOwned>(
    client: &ApiClient,
    endpoint: &ListEndpoint,
    page_number: u32,
    page_size: u32,
) -> Result<Page<T>> {
    let mut call = Call::get(endpoint.path.clone());
    for (key, value) in &endpoint.query {
        call = call.query(key, value);
    }
    call = call
        .query("page", page_number)
        .query(endpoint.size_param, page_size);
    if endpoint.auth_required {
        call = call.authenticated();
    }

    let envelope: Envelope<T> = client.json(call).await?;
    Ok(match envelope {
        Envelope::Paged { results, next } => Page {
            items: results,
            has_next: next.is_some_and(|url| !url.is_empty()),
        },
        Envelope::Bare(items) => Page {
            items,
            has_next: false,
        },
    })
}
