//! Generic list-resource client: one instance per list view.
//!
//! A fetch is split into three steps so interleavings stay explicit:
//! [`ListResource::begin_fetch`] issues a ticket tagged with a generation
//! number, [`ListResource::fetch`] performs the request without touching the
//! list, and [`ListResource::apply`] installs the result only if the ticket is
//! still the latest one issued. [`ListResource::refresh`] runs all three.
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

use crate::api::ApiClient;
use crate::envelope::normalize;
use crate::error::ApiError;
use crate::model::Resource;
use crate::query::{QueryState, ResourcePage};

pub const LOAD_FAILED: &str = "Failed to load data";

/// Snapshot of the query a fetch was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub query: QueryState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchApplied {
    Applied,
    /// The request failed; previous items were kept and an error was set.
    Failed,
    /// A newer fetch was issued after this one; the result was dropped.
    Stale,
}

pub struct ListResource<T: Resource> {
    pub(crate) client: ApiClient,
    pub(crate) query: QueryState,
    pub(crate) page: ResourcePage<T>,
    loading: bool,
    pub(crate) error: Option<String>,
    issued: u64,
    pub(crate) busy: HashSet<i64>,
    pub(crate) creating: bool,
}

impl<T: Resource> ListResource<T> {
    pub fn new(client: ApiClient, page_size: u32) -> Self {
        Self {
            client,
            query: QueryState::new(page_size),
            page: ResourcePage::default(),
            loading: false,
            error: None,
            issued: 0,
            busy: HashSet::new(),
            creating: false,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    /// Direct access for callers that drive fetches by hand.
    pub fn query_mut(&mut self) -> &mut QueryState {
        &mut self.query
    }

    pub fn page(&self) -> &ResourcePage<T> {
        &self.page
    }

    pub fn items(&self) -> &[T] {
        &self.page.items
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.issued
    }

    /// True while a mutation on this item is in flight.
    pub fn is_busy(&self, id: i64) -> bool {
        self.busy.contains(&id)
    }

    pub fn is_creating(&self) -> bool {
        self.creating
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.issued += 1;
        self.loading = true;
        self.error = None;
        FetchTicket {
            generation: self.issued,
            query: self.query.clone(),
        }
    }

    /// Load one page for `query`. Does not touch any list state.
    pub async fn fetch(client: &ApiClient, query: &QueryState) -> Result<ResourcePage<T>, ApiError> {
        let body = client
            .get(&T::ENDPOINT.collection(), &query.params())
            .await?;
        Ok(ResourcePage::from_normalized(normalize(&body), query))
    }

    pub fn apply(
        &mut self,
        ticket: &FetchTicket,
        result: Result<ResourcePage<T>, ApiError>,
    ) -> FetchApplied {
        if ticket.generation != self.issued {
            debug!(
                resource = T::ENDPOINT.name,
                generation = ticket.generation,
                latest = self.issued,
                "dropping stale list response"
            );
            return FetchApplied::Stale;
        }
        self.loading = false;
        match result {
            Ok(page) => {
                info!(
                    resource = T::ENDPOINT.name,
                    page = page.page,
                    items = page.items.len(),
                    total = page.total_count,
                    "list loaded"
                );
                self.page = page;
                FetchApplied::Applied
            }
            Err(err) => {
                warn!(resource = T::ENDPOINT.name, %err, "list load failed");
                self.error = Some(err.user_message(LOAD_FAILED));
                FetchApplied::Failed
            }
        }
    }

    #[instrument(skip_all, fields(resource = T::ENDPOINT.name))]
    pub async fn refresh(&mut self) -> FetchApplied {
        let ticket = self.begin_fetch();
        let result = Self::fetch(&self.client, &ticket.query).await;
        self.apply(&ticket, result)
    }

    /// Go to `page`, refetching only if it changed.
    pub async fn change_page(&mut self, page: u32) -> Option<FetchApplied> {
        if !self.query.set_page(page) {
            return None;
        }
        Some(self.refresh().await)
    }

    pub async fn change_filter(&mut self, key: &str, value: Option<&str>) -> Option<FetchApplied> {
        if !self.query.set_filter(key, value) {
            return None;
        }
        Some(self.refresh().await)
    }

    pub async fn change_search(&mut self, text: &str) -> Option<FetchApplied> {
        if !self.query.set_search(text) {
            return None;
        }
        Some(self.refresh().await)
    }
}
