use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error, instrument};

use crate::api::{ApiError, TaskBackend, TaskPage};
use crate::filters::TaskFilters;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryState {
    Loading,
    Ready(TaskPage),
    Failed(ApiError),
}

impl QueryState {
    pub fn page(&self) -> Option<&TaskPage> {
        match self {
            QueryState::Ready(page) => Some(page),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, QueryState::Failed(_))
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    state: QueryState,
    generation: u64,
}

/// Results keyed by the full filter set. A response that arrives after
/// the user moved on is stored under a key nobody reads anymore.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// Responses to fetches issued at or before this generation predate
    /// the last mutation and are discarded.
    floor: AtomicU64,
}

impl QueryCache {
    pub fn key(filters: &TaskFilters) -> String {
        let args = filters.to_list_args();
        crate::http::encode_query(&args.query_pairs())
    }

    pub fn get(&self, filters: &TaskFilters) -> Option<QueryState> {
        self.entries
            .lock()
            .get(&Self::key(filters))
            .map(|entry| entry.state.clone())
    }

    fn begin(&self, key: &str, generation: u64) {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            // Keep showing the previous page while it reloads.
            Some(entry) => {
                entry.generation = generation;
            }
            None => {
                entries.insert(
                    key.to_string(),
                    CacheEntry {
                        state: QueryState::Loading,
                        generation,
                    },
                );
            }
        }
    }

    /// Stores a settled result unless a newer fetch for the same key was
    /// issued in the meantime, or the cache was invalidated after this
    /// fetch went out.
    fn settle(&self, key: &str, generation: u64, state: QueryState) -> bool {
        let floor = self.floor.load(Ordering::SeqCst);
        if generation <= floor {
            debug!(key, generation, floor, "dropping response issued before invalidation");
            return false;
        }

        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.generation > generation => {
                debug!(key, generation, newer = entry.generation, "dropping superseded response");
                false
            }
            Some(entry) => {
                entry.state = state;
                entry.generation = generation;
                true
            }
            None => {
                entries.insert(key.to_string(), CacheEntry { state, generation });
                true
            }
        }
    }

    /// Forgets every cached page and every fetch still in flight.
    fn invalidate(&self, generation: u64) {
        self.floor.fetch_max(generation, Ordering::SeqCst);
        let mut entries = self.entries.lock();
        debug!(count = entries.len(), generation, "invalidated cached pages");
        entries.clear();
    }
}

/// The only path that changes what the list shows.
#[derive(Debug, Default)]
pub struct TaskQueryExecutor {
    cache: QueryCache,
    generation: AtomicU64,
}

impl TaskQueryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// What the list shows for `filters` right now, if anything was
    /// fetched for them.
    pub fn state_for(&self, filters: &TaskFilters) -> Option<QueryState> {
        self.cache.get(filters)
    }

    /// Called after a mutation; the next fetch for any key goes to the
    /// backend and earlier responses are ignored.
    pub fn invalidate(&self) {
        self.cache.invalidate(self.generation.load(Ordering::SeqCst));
    }

    /// Issues one fetch. Failures come back as [`QueryState::Failed`]
    /// rather than as an error so the caller can offer a retry.
    #[instrument(skip(self, backend, filters), fields(page = filters.page, size = filters.page_size))]
    pub async fn fetch<B: TaskBackend>(&self, backend: &B, filters: &TaskFilters) -> QueryState {
        let key = QueryCache::key(filters);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cache.begin(&key, generation);

        let args = filters.to_list_args();
        let state = match backend.list_tasks(&args).await {
            Ok(response) => match TaskPage::from_response(response) {
                Ok(page) => {
                    debug!(
                        items = page.items.len(),
                        total = page.total,
                        pages = page.pages,
                        "task page loaded"
                    );
                    QueryState::Ready(page)
                }
                Err(err) => {
                    error!(error = %err, "task page could not be decoded");
                    QueryState::Failed(err)
                }
            },
            Err(err) => {
                error!(error = %err, retryable = err.is_retryable(), "task list fetch failed");
                QueryState::Failed(err)
            }
        };

        self.cache.settle(&key, generation, state.clone());
        state
    }
}
