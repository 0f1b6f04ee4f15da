//! Since-cursor pagination over exchange endpoints
//!
//! Each page is requested with `since` = previous page's last timestamp + 1.
//! An empty page (after dropping items outside `[since, until)`) ends the
//! iteration. A page that does not move the cursor forward, or going past
//! `max_pages`, aborts with [`AppError::Pagination`] instead of looping.

use crate::error::{AppError, Result};
use crate::exchanges::types::{Order, Trade};
use crate::exchanges::ExchangeApiClient;
use futures_util::stream::{self, Stream};
use std::future::Future;

/// Items carrying a millisecond timestamp
pub trait Timestamped {
    fn timestamp(&self) -> i64;
}

impl Timestamped for Trade {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Timestamped for Order {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationLimits {
    pub max_pages: usize,
}

impl Default for PaginationLimits {
    fn default() -> Self {
        Self { max_pages: 1000 }
    }
}

/// Cursor over the half-open window `[since, until)`
#[derive(Debug, Clone)]
pub struct SinceCursor {
    since: i64,
    until: i64,
    pages_fetched: usize,
    limits: PaginationLimits,
    done: bool,
}

impl SinceCursor {
    pub fn new(since: i64, until: i64, limits: PaginationLimits) -> Self {
        Self {
            since,
            until,
            pages_fetched: 0,
            limits,
            done: since >= until,
        }
    }

    pub fn since(&self) -> i64 {
        self.since
    }

    pub fn is_done(&self) -> bool {
        self.done || self.since >= self.until
    }

    /// Register a fetched page.
    ///
    /// Returns the in-window items sorted by timestamp, or `None` once the
    /// window is exhausted. An empty page leaves `since` untouched. Only pages
    /// carrying in-window items count towards `max_pages`.
    pub fn accept<T: Timestamped>(&mut self, mut page: Vec<T>) -> Result<Option<Vec<T>>> {
        if page.is_empty() {
            self.done = true;
            return Ok(None);
        }

        page.sort_by_key(Timestamped::timestamp);

        let last_timestamp = page[page.len() - 1].timestamp();
        let next_since = match last_timestamp.checked_add(1) {
            Some(next) if next > self.since => next,
            _ => {
                self.done = true;
                return Err(AppError::Pagination(format!(
                    "Cursor did not advance: since={}, last item timestamp={}",
                    self.since, last_timestamp
                )));
            }
        };

        let (since, until) = (self.since, self.until);
        page.retain(|item| item.timestamp() >= since && item.timestamp() < until);
        self.since = next_since;

        if page.is_empty() {
            self.done = true;
            return Ok(None);
        }

        self.pages_fetched += 1;
        if self.pages_fetched > self.limits.max_pages {
            self.done = true;
            return Err(AppError::Pagination(format!(
                "Exceeded {} pages while paginating, cursor at {}",
                self.limits.max_pages, self.since
            )));
        }

        Ok(Some(page))
    }
}

/// Lazily fetch pages through `fetch(since)` until the cursor is exhausted
pub fn pages<'a, T, F, Fut>(cursor: SinceCursor, fetch: F) -> impl Stream<Item = Result<Vec<T>>> + Send + 'a
where
    T: Timestamped + Send + 'a,
    F: FnMut(i64) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'a,
{
    stream::try_unfold((cursor, fetch), |(mut cursor, mut fetch)| async move {
        if cursor.is_done() {
            return Ok(None);
        }

        let page = fetch(cursor.since()).await?;
        Ok(cursor.accept(page)?.map(|items| (items, (cursor, fetch))))
    })
}

/// Pages of the account's own trades in `[since, until)`
pub fn my_trade_pages<'a>(
    client: &'a dyn ExchangeApiClient,
    symbol: &'a str,
    since: i64,
    until: i64,
    limits: PaginationLimits,
) -> impl Stream<Item = Result<Vec<Trade>>> + Send + 'a {
    pages(SinceCursor::new(since, until, limits), move |since| {
        client.fetch_my_trades(symbol, since)
    })
}

/// Pages of public market trades in `[since, until)`
pub fn trade_pages<'a>(
    client: &'a dyn ExchangeApiClient,
    symbol: &'a str,
    since: i64,
    until: i64,
    limits: PaginationLimits,
) -> impl Stream<Item = Result<Vec<Trade>>> + Send + 'a {
    pages(SinceCursor::new(since, until, limits), move |since| {
        client.fetch_trades(symbol, since)
    })
}

/// Pages of the account's open orders created in `[since, until)`
pub fn open_order_pages<'a>(
    client: &'a dyn ExchangeApiClient,
    symbol: &'a str,
    since: i64,
    until: i64,
    limits: PaginationLimits,
) -> impl Stream<Item = Result<Vec<Order>>> + Send + 'a {
    pages(SinceCursor::new(since, until, limits), move |since| {
        client.fetch_open_orders(symbol, since)
    })
}
