//! # Pagination.
//!
//! Listing APIs return one [`Page`] at a time; [`list_all`] walks the
//! `next_page` chain until it ends and concatenates the items in the order
//! the pages were returned.

use std::future::Future;

use crate::error::SourceError;

/// Largest page size a listing accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page selector (1-based page number).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageOptions {
    pub page_number: u32,
    pub page_size: u32,
}

impl Default for PageOptions {
    /// First page, 20 items.
    fn default() -> Self {
        Self {
            page_number: 1,
            page_size: 20,
        }
    }
}

impl PageOptions {
    /// Returns the options with `page_number >= 1` and `1 <= page_size <= MAX_PAGE_SIZE`.
    #[inline]
    pub fn normalized(self) -> Self {
        Self {
            page_number: self.page_number.max(1),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }
}

/// Position of a page within the full result set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pagination {
    pub current_page: u32,
    pub previous_page: Option<u32>,
    pub next_page: Option<u32>,
    pub total_pages: u32,
    pub total_count: usize,
}

/// One page of results.
#[derive(Clone, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    /// Slices `all` into the page selected by `opts`.
    pub fn from_items(all: Vec<T>, opts: PageOptions) -> Self {
        let opts = opts.normalized();
        let total_count = all.len();
        let size = opts.page_size as usize;
        let total_pages = total_count.div_ceil(size).max(1) as u32;

        let start = (opts.page_number as usize - 1).saturating_mul(size);
        let items: Vec<T> = all.into_iter().skip(start).take(size).collect();

        let current_page = opts.page_number;
        Self {
            items,
            pagination: Pagination {
                current_page,
                previous_page: (current_page > 1).then(|| current_page - 1),
                next_page: (current_page < total_pages).then(|| current_page + 1),
                total_pages,
                total_count,
            },
        }
    }
}

/// Fetches every page via `fetch` and returns all items in page order.
///
/// Fails on the first page error; a partial listing is never returned.
/// A source whose `next_page` does not advance is reported as an error
/// rather than looped on forever.
pub async fn list_all<T, F, Fut>(mut fetch: F) -> Result<Vec<T>, SourceError>
where
    F: FnMut(PageOptions) -> Fut,
    Fut: Future<Output = Result<Page<T>, SourceError>>,
{
    let mut opts = PageOptions {
        page_number: 1,
        page_size: MAX_PAGE_SIZE,
    };
    let mut all = Vec::new();
    loop {
        let page = fetch(opts).await?;
        all.extend(page.items);
        match page.pagination.next_page {
            None => return Ok(all),
            Some(next) if next <= opts.page_number => {
                return Err(SourceError::Unavailable {
                    error: format!(
                        "pagination did not advance past page {}",
                        opts.page_number
                    ),
                });
            }
            Some(next) => opts.page_number = next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_pages() {
        let items: Vec<u32> = (0..45).collect();
        let page = Page::from_items(
            items.clone(),
            PageOptions {
                page_number: 3,
                page_size: 20,
            },
        );
        assert_eq!(page.items, (40..45).collect::<Vec<_>>());
        assert_eq!(page.pagination.total_pages, 3);
        assert_eq!(page.pagination.next_page, None);
        assert_eq!(page.pagination.previous_page, Some(2));
        assert_eq!(page.pagination.total_count, 45);
    }

    #[test]
    fn empty_listing_has_one_page() {
        let page = Page::<u32>::from_items(vec![], PageOptions::default());
        assert!(page.items.is_empty());
        assert_eq!(page.pagination.total_pages, 1);
        assert_eq!(page.pagination.next_page, None);
    }

    #[tokio::test]
    async fn list_all_exhausts_every_page() {
        let items: Vec<u32> = (0..250).collect();
        let mut calls = 0;
        let all = list_all(|opts| {
            calls += 1;
            let page = Page::from_items(items.clone(), opts);
            async move { Ok(page) }
        })
        .await
        .unwrap();
        assert_eq!(all, items);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn list_all_fails_on_any_page_error() {
        let res: Result<Vec<u32>, _> = list_all(|opts| async move {
            if opts.page_number == 2 {
                return Err(SourceError::Unavailable {
                    error: "page 2 down".into(),
                });
            }
            Ok(Page::from_items((0..300).collect(), opts))
        })
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn list_all_rejects_stuck_pagination() {
        let res: Result<Vec<u32>, _> = list_all(|_opts| async move {
            Ok(Page {
                items: vec![1],
                pagination: Pagination {
                    current_page: 1,
                    next_page: Some(1),
                    ..Pagination::default()
                },
            })
        })
        .await;
        assert!(res.is_err());
    }
}
