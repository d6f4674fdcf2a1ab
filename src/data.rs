use std::sync::Arc;

use tracing::{debug, warn};

use crate::normalize::MediaRecord;
use crate::reddit::{self, ListingOptions, SortOption};

/// Page-size hint sent upstream, independent of how many records are wanted.
pub const UPSTREAM_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchQuery {
    pub collection: String,
    pub sort: SortOption,
    pub cursor: Option<String>,
    pub required: usize,
}

impl FetchQuery {
    pub fn new(collection: impl Into<String>, sort: SortOption, required: usize) -> Self {
        Self {
            collection: collection.into(),
            sort,
            cursor: None,
            required,
        }
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// A query asking for nothing is never sent.
    pub fn is_issuable(&self) -> bool {
        self.required > 0
    }
}

/// One upstream page after normalization.
///
/// `records` only holds entries with a playable source; `raw_count` and
/// `last_cursor` describe the page as the upstream returned it, so callers can
/// tell "nothing playable here" apart from "nothing left".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageResult {
    pub records: Vec<MediaRecord>,
    pub raw_count: usize,
    pub last_cursor: Option<String>,
    pub required: usize,
}

impl PageResult {
    pub fn empty(required: usize) -> Self {
        Self {
            required,
            ..Default::default()
        }
    }

    pub fn from_listing(listing: reddit::Listing<reddit::Post>, required: usize) -> Self {
        let raw_count = listing.children.len();
        let last_cursor = listing
            .children
            .last()
            .map(|thing| thing.data.name.clone())
            .filter(|name| !name.is_empty());
        let records = listing
            .children
            .iter()
            .filter_map(|thing| MediaRecord::from_post(&thing.data))
            .collect();
        Self {
            records,
            raw_count,
            last_cursor,
            required,
        }
    }
}

pub trait FeedService: Send + Sync {
    /// Fetches a single page. Failures are reported as an empty page.
    fn fetch_page(&self, query: &FetchQuery) -> PageResult;
}

pub struct RedditFeedService {
    client: Arc<reddit::Client>,
    upstream_limit: u32,
}

impl RedditFeedService {
    pub fn new(client: Arc<reddit::Client>) -> Self {
        Self {
            client,
            upstream_limit: UPSTREAM_PAGE_LIMIT,
        }
    }

    pub fn with_upstream_limit(mut self, limit: u32) -> Self {
        if limit > 0 {
            self.upstream_limit = limit;
        }
        self
    }
}

impl FeedService for RedditFeedService {
    fn fetch_page(&self, query: &FetchQuery) -> PageResult {
        let opts = ListingOptions {
            after: query.cursor.clone(),
            limit: Some(self.upstream_limit),
        };
        match self
            .client
            .subreddit_listing(&query.collection, query.sort, opts)
        {
            Ok(listing) => {
                let page = PageResult::from_listing(listing, query.required);
                debug!(
                    collection = %query.collection,
                    sort = query.sort.as_str(),
                    cursor = ?query.cursor,
                    raw = page.raw_count,
                    valid = page.records.len(),
                    "fetched listing page"
                );
                page
            }
            Err(err) => {
                warn!(
                    collection = %query.collection,
                    cursor = ?query.cursor,
                    "listing fetch failed, treating as end of listing: {err:#}"
                );
                PageResult::empty(query.required)
            }
        }
    }
}
