//! Paginated retrieval that follows continuation tokens.
//!
//! A [`PagedFetcher`] turns a [`PageSource`] (anything that can fetch one
//! page given an optional continuation token) into a lazy stream of records.
//! Each page request is retried under a [`RetryPolicy`] and guarded by a
//! [`Deadline`]. Records already yielded stay yielded when a later page
//! fails: the stream reports the error and ends.

use std::collections::VecDeque;
use std::future::Future;

use async_stream::try_stream;
use derive_more::{Deref, Display, From};
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::deadline::Deadline;
use crate::retry::RetryPolicy;
use crate::{Error, Result, TRACING_TARGET_FETCH};

/// Number of recent continuation tokens remembered for cycle detection.
pub const DEFAULT_TOKEN_HISTORY: usize = 64;

/// Opaque marker pointing at the next page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Deref)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Continuation(String);

impl Continuation {
    /// Creates a continuation from any string-like token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Continuation {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// One page of results from a remote listing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPage<T> {
    /// Records in the order the remote returned them.
    pub items: Vec<T>,
    /// Token for the next page, absent on the last page.
    pub continuation: Option<Continuation>,
}

impl<T> FetchPage<T> {
    /// Creates the final page of a listing.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            continuation: None,
        }
    }

    /// Creates a page followed by the page at `continuation`.
    pub fn with_next(items: Vec<T>, continuation: impl Into<Continuation>) -> Self {
        Self {
            items,
            continuation: Some(continuation.into()),
        }
    }

    /// Returns `true` if no page follows this one.
    pub fn is_last(&self) -> bool {
        self.continuation.is_none()
    }
}

/// Something that can fetch one page of a remote listing.
///
/// `None` requests the first page; `Some(token)` requests the page the token
/// points at.
pub trait PageSource {
    /// Record type of the listing.
    type Item;

    /// Fetches a single page.
    fn fetch_page(
        &mut self,
        continuation: Option<Continuation>,
    ) -> impl Future<Output = Result<FetchPage<Self::Item>>> + Send;
}

/// [`PageSource`] backed by a closure, created with [`page_fn`].
#[derive(Debug, Clone)]
pub struct PageFn<F>(F);

/// Adapts a closure returning a page future into a [`PageSource`].
pub fn page_fn<F, Fut, T>(f: F) -> PageFn<F>
where
    F: FnMut(Option<Continuation>) -> Fut,
    Fut: Future<Output = Result<FetchPage<T>>> + Send,
{
    PageFn(f)
}

impl<F, Fut, T> PageSource for PageFn<F>
where
    F: FnMut(Option<Continuation>) -> Fut,
    Fut: Future<Output = Result<FetchPage<T>>> + Send,
{
    type Item = T;

    fn fetch_page(
        &mut self,
        continuation: Option<Continuation>,
    ) -> impl Future<Output = Result<FetchPage<T>>> + Send {
        (self.0)(continuation)
    }
}

/// Bounded memory of the most recent continuation tokens.
#[derive(Debug)]
struct TokenHistory {
    recent: VecDeque<Continuation>,
    capacity: usize,
}

impl TokenHistory {
    fn new(capacity: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records `token`, returning `false` if it was already remembered.
    fn insert(&mut self, token: &Continuation) -> bool {
        if self.recent.contains(token) {
            return false;
        }

        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(token.clone());
        true
    }
}

/// Retrieves a complete listing page by page.
///
/// # Examples
///
/// ```rust,ignore
/// let fetcher = PagedFetcher::new(client.collection::<User>("users"), RetryPolicy::default())
///     .with_deadline(Deadline::after(Duration::from_secs(600)));
///
/// let mut users = std::pin::pin!(fetcher.into_stream());
/// while let Some(user) = users.try_next().await? {
///     println!("{}", user.display_name);
/// }
/// ```
#[derive(Debug)]
pub struct PagedFetcher<S> {
    source: S,
    policy: RetryPolicy,
    deadline: Deadline,
    token_history: usize,
}

impl<S: PageSource> PagedFetcher<S> {
    /// Creates a fetcher over `source` retrying each page under `policy`.
    pub fn new(source: S, policy: RetryPolicy) -> Self {
        Self {
            source,
            policy,
            deadline: Deadline::none(),
            token_history: DEFAULT_TOKEN_HISTORY,
        }
    }

    /// Stops fetching once `deadline` fires.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Sets how many recent tokens are remembered for cycle detection.
    #[must_use]
    pub fn with_token_history(mut self, tokens: usize) -> Self {
        self.token_history = tokens.max(1);
        self
    }

    /// Produces the listing as a lazy stream.
    ///
    /// The stream ends after the first page without a continuation, or
    /// right after yielding an error.
    pub fn into_stream(self) -> impl Stream<Item = Result<S::Item>> {
        let Self {
            mut source,
            policy,
            deadline,
            token_history,
        } = self;

        try_stream! {
            let mut history = TokenHistory::new(token_history);
            let mut continuation: Option<Continuation> = None;
            let mut page_number: u64 = 0;

            loop {
                page_number += 1;
                let page =
                    fetch_with_retry(&mut source, &policy, &deadline, continuation.clone()).await?;
                let FetchPage { items, continuation: next } = page;

                tracing::debug!(
                    target: TRACING_TARGET_FETCH,
                    page = page_number,
                    items = items.len(),
                    has_next = next.is_some(),
                    "Fetched page"
                );

                for item in items {
                    yield item;
                }

                let Some(token) = next else {
                    break;
                };

                if !history.insert(&token) {
                    tracing::error!(
                        target: TRACING_TARGET_FETCH,
                        page = page_number,
                        token = %token,
                        "Continuation token repeated, aborting listing"
                    );
                    Err::<(), _>(Error::pagination_cycle(&token))?;
                }

                continuation = Some(token);
            }
        }
    }

    /// Fetches every page and gathers the records.
    ///
    /// Records fetched before a failure are discarded; use
    /// [`into_stream`](Self::into_stream) to keep partial progress.
    pub async fn try_collect_all(self) -> Result<Vec<S::Item>> {
        self.into_stream().try_collect().await
    }
}

async fn fetch_with_retry<S: PageSource>(
    source: &mut S,
    policy: &RetryPolicy,
    deadline: &Deadline,
    continuation: Option<Continuation>,
) -> Result<FetchPage<S::Item>> {
    let mut state = policy.attempts();
    loop {
        state.start(deadline)?;

        match source.fetch_page(continuation.clone()).await {
            Ok(page) => return Ok(page),
            Err(error) => state.fail(deadline, error).await?,
        }
    }
}
