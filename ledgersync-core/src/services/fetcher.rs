//! Transaction fetcher - paginated pulls from the aggregator
//!
//! Pages are pulled one at a time so callers can persist each page before
//! asking for the next. A listing stops when the aggregator stops handing
//! out `next` links or when the page ceiling is reached; hitting the ceiling
//! is not an error, it is reported through `Pages::capped`.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::MAX_PAGES_CEILING;
use crate::domain::result::Result;
use crate::domain::{mask_link_id, RawTransaction, SyncScope};
use crate::ports::{PageCursor, TransactionSource};

/// Ids per `id__in` request
pub const ID_CHUNK_SIZE: usize = 100;

/// One page after validation and deduplication
#[derive(Debug, Default)]
pub struct FetchedPage {
    /// 1-based page number within the fetch
    pub number: usize,
    pub transactions: Vec<RawTransaction>,
    /// Records the aggregator sent that failed validation
    pub invalid: usize,
    /// Records already seen earlier in this fetch
    pub duplicates: usize,
}

/// Everything a fetch returned, collected
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub transactions: Vec<RawTransaction>,
    pub invalid: usize,
    pub duplicates: usize,
    pub pages: usize,
    pub capped: bool,
}

/// Pull-based page iterator over one fetch
pub struct Pages {
    source: Arc<dyn TransactionSource>,
    link_id: String,
    max_pages: usize,
    /// Listings still to start (one per id chunk)
    queued: VecDeque<PageCursor>,
    /// Continuation of the listing in progress
    current: Option<PageCursor>,
    seen: HashSet<String>,
    fetched: usize,
    capped: bool,
    done: bool,
}

impl Pages {
    /// Next page, or None once the fetch is exhausted or capped
    ///
    /// An aggregator error ends the fetch; pages returned before it stand.
    pub async fn next_page(&mut self) -> Result<Option<FetchedPage>> {
        if self.done {
            return Ok(None);
        }

        let cursor = match self.current.take().or_else(|| self.queued.pop_front()) {
            Some(cursor) => cursor,
            None => {
                self.done = true;
                return Ok(None);
            }
        };

        if self.fetched >= self.max_pages {
            warn!(
                link_id = %mask_link_id(&self.link_id),
                max_pages = self.max_pages,
                "page limit reached, stopping fetch"
            );
            self.capped = true;
            self.done = true;
            return Ok(None);
        }

        let page = match self.source.fetch_page(&self.link_id, &cursor).await {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        self.fetched += 1;
        self.current = page.next.map(PageCursor::Next);

        let received = page.transactions.len();
        let transactions: Vec<RawTransaction> = page
            .transactions
            .into_iter()
            .filter(|tx| self.seen.insert(tx.id.clone()))
            .collect();
        let duplicates = received - transactions.len();

        debug!(
            link_id = %mask_link_id(&self.link_id),
            page = self.fetched,
            transactions = transactions.len(),
            invalid = page.invalid,
            duplicates,
            "fetched page"
        );

        Ok(Some(FetchedPage {
            number: self.fetched,
            transactions,
            invalid: page.invalid,
            duplicates,
        }))
    }

    /// Pages fetched so far
    pub fn pages(&self) -> usize {
        self.fetched
    }

    /// Whether the page ceiling cut the fetch short
    pub fn capped(&self) -> bool {
        self.capped
    }

    /// Drain the remaining pages
    pub async fn collect(mut self) -> Result<FetchOutcome> {
        let mut outcome = FetchOutcome::default();
        while let Some(page) = self.next_page().await? {
            outcome.invalid += page.invalid;
            outcome.duplicates += page.duplicates;
            outcome.transactions.extend(page.transactions);
        }
        outcome.pages = self.fetched;
        outcome.capped = self.capped;
        Ok(outcome)
    }
}

/// Paginated fetches against a transaction source
#[derive(Clone)]
pub struct TransactionFetcher {
    source: Arc<dyn TransactionSource>,
    max_pages: usize,
}

impl TransactionFetcher {
    /// `max_pages` is clamped to 1..=100
    pub fn new(source: Arc<dyn TransactionSource>, max_pages: usize) -> Self {
        Self {
            source,
            max_pages: max_pages.clamp(1, MAX_PAGES_CEILING),
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Page iterator for a sync scope
    pub fn pages(&self, link_id: &str, scope: &SyncScope) -> Pages {
        let queued: VecDeque<PageCursor> = match scope {
            SyncScope::Range { date_from, date_to } => VecDeque::from([PageCursor::Start {
                date_from: *date_from,
                date_to: *date_to,
            }]),
            SyncScope::Ids(ids) => {
                let mut unique = HashSet::new();
                let ids: Vec<String> = ids
                    .iter()
                    .filter(|id| !id.trim().is_empty() && unique.insert(id.to_string()))
                    .cloned()
                    .collect();
                ids.chunks(ID_CHUNK_SIZE)
                    .map(|chunk| PageCursor::Ids(chunk.to_vec()))
                    .collect()
            }
        };

        Pages {
            source: Arc::clone(&self.source),
            link_id: link_id.to_string(),
            max_pages: self.max_pages,
            queued,
            current: None,
            seen: HashSet::new(),
            fetched: 0,
            capped: false,
            done: false,
        }
    }

    /// Every transaction of a link, optionally bounded by value date
    pub async fn fetch_all(
        &self,
        link_id: &str,
        date_from: Option<chrono::NaiveDate>,
        date_to: Option<chrono::NaiveDate>,
    ) -> Result<FetchOutcome> {
        self.pages(link_id, &SyncScope::Range { date_from, date_to })
            .collect()
            .await
    }

    /// Only the given transaction ids
    pub async fn fetch_by_ids(&self, link_id: &str, ids: &[String]) -> Result<FetchOutcome> {
        self.pages(link_id, &SyncScope::Ids(ids.to_vec()))
            .collect()
            .await
    }
}
