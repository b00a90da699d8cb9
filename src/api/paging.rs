use std::future::Future;

use serde::Deserialize;

use crate::error::{Error, Result};

/// One page of a paginated listing. `next` carries the provider's opaque
/// next-page URL; an absent or empty value means the listing is done.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub items: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub total: u32,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next: None,
            total: 0,
        }
    }
}

/// Collect a paginated listing through a per-page fetch closure taking
/// (limit, offset). `max` of None collects everything; with a maximum the
/// final request's limit shrinks so we never over-fetch, and the result
/// is truncated to exactly `max` items.
///
/// Stops when the maximum is reached, the provider reports no next page,
/// or a page comes back empty (even with a next marker present).
pub async fn collect_paged<T, F, Fut>(
    page_size: usize,
    max: Option<usize>,
    mut fetch: F,
) -> Result<Vec<T>>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    if page_size == 0 {
        return Err(Error::InvalidInput("page size must be positive".into()));
    }
    if max == Some(0) {
        return Ok(Vec::new());
    }

    let mut limit = page_size;
    if let Some(m) = max {
        if m < limit {
            limit = m;
        }
    }

    let mut out: Vec<T> = Vec::new();
    let mut offset = 0usize;
    loop {
        let page = fetch(limit, offset).await?;
        let fetched = page.items.len();
        out.extend(page.items);

        if let Some(m) = max {
            if out.len() >= m {
                out.truncate(m);
                return Ok(out);
            }
        }
        let no_next = page.next.as_deref().map_or(true, str::is_empty);
        if no_next || fetched == 0 {
            return Ok(out);
        }

        offset += limit;
        if let Some(m) = max {
            let remaining = m - out.len();
            if remaining < limit {
                limit = remaining;
            }
        }
    }
}
