//! Query state for one list view and the page it produced.
use std::collections::BTreeMap;

use crate::envelope::Normalized;
use crate::model::Resource;

/// Page number, page size, filters and search text for a single list.
///
/// Changing a filter or the search text resets to page 1; changing only the
/// page keeps filters. Setters return whether anything changed, i.e. whether
/// the current page is now stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryState {
    page: u32,
    page_size: u32,
    filters: BTreeMap<String, String>,
    search: String,
}

impl QueryState {
    pub fn new(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
            filters: BTreeMap::new(),
            search: String::new(),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn filters(&self) -> &BTreeMap<String, String> {
        &self.filters
    }

    pub fn filter(&self, key: &str) -> Option<&str> {
        self.filters.get(key).map(String::as_str)
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_page(&mut self, page: u32) -> bool {
        let page = page.max(1);
        if page == self.page {
            return false;
        }
        self.page = page;
        true
    }

    /// `None` or a blank value removes the constraint.
    pub fn set_filter(&mut self, key: &str, value: Option<&str>) -> bool {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        let changed = match value {
            Some(v) => self.filters.get(key).map(String::as_str) != Some(v),
            None => self.filters.contains_key(key),
        };
        if !changed {
            return false;
        }
        match value {
            Some(v) => {
                self.filters.insert(key.to_string(), v.to_string());
            }
            None => {
                self.filters.remove(key);
            }
        }
        self.page = 1;
        true
    }

    pub fn clear_filters(&mut self) -> bool {
        if self.filters.is_empty() {
            return false;
        }
        self.filters.clear();
        self.page = 1;
        true
    }

    /// Search is applied by the server, so it resets pagination like a filter.
    pub fn set_search(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text == self.search {
            return false;
        }
        self.search = text.to_string();
        self.page = 1;
        true
    }

    /// Request parameters: `page`, `page_size`, every filter, then `search`.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("page".to_string(), self.page.to_string()),
            ("page_size".to_string(), self.page_size.to_string()),
        ];
        params.extend(self.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
        if !self.search.is_empty() {
            params.push(("search".to_string(), self.search.clone()));
        }
        params
    }
}

pub fn total_pages(total_count: u64, page_size: u32) -> u32 {
    let size = u64::from(page_size.max(1));
    let pages = total_count.div_ceil(size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// One fetched page of a resource collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePage<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u32,
    /// False when the server returned the whole collection at once.
    pub paginated: bool,
}

impl<T> Default for ResourcePage<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            page: 1,
            page_size: 1,
            total_count: 0,
            total_pages: 1,
            paginated: false,
        }
    }
}

impl<T: Resource> ResourcePage<T> {
    /// Build a page from a normalized body. Unpaginated bodies become a single
    /// page holding every item.
    pub fn from_normalized(normalized: Normalized, query: &QueryState) -> Self {
        let paginated = normalized.is_paginated();
        let server_total = normalized.total_count;
        let (items, skipped) = normalized.decode::<T>();
        if paginated {
            Self {
                items,
                page: query.page(),
                page_size: query.page_size(),
                total_count: server_total,
                total_pages: total_pages(server_total, query.page_size()),
                paginated,
            }
        } else {
            let total_count = server_total.saturating_sub(skipped as u64);
            let page_size = u32::try_from(items.len()).unwrap_or(u32::MAX).max(1);
            Self {
                items,
                page: 1,
                page_size,
                total_count,
                total_pages: 1,
                paginated,
            }
        }
    }

    pub fn position(&self, id: i64) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    /// Swap in the server's copy of an item. Returns false when the id is not
    /// on this page.
    pub fn replace(&mut self, item: T) -> bool {
        match self.position(item.id()) {
            Some(idx) => {
                self.items[idx] = item;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: i64) -> Option<T> {
        let idx = self.position(id)?;
        let removed = self.items.remove(idx);
        self.total_count = self.total_count.saturating_sub(1);
        self.total_pages = total_pages(self.total_count, self.page_size);
        Some(removed)
    }
}

impl<T> ResourcePage<T> {
    /// 1-based inclusive range of the items shown, `None` for an empty page.
    pub fn showing_range(&self) -> Option<(u64, u64)> {
        if self.items.is_empty() || self.total_count == 0 {
            return None;
        }
        let start = u64::from(self.page - 1) * u64::from(self.page_size) + 1;
        let end = (u64::from(self.page) * u64::from(self.page_size)).min(self.total_count);
        Some((start, end.max(start)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLink {
    Page(u32),
    Gap,
}

const MAX_VISIBLE_PAGES: u32 = 5;

/// Numbered page links for a pager, with gaps once there are more than five
/// pages. Empty when there is only one page.
pub fn page_window(current: u32, total: u32) -> Vec<PageLink> {
    if total <= 1 {
        return Vec::new();
    }
    let current = current.clamp(1, total);
    if total <= MAX_VISIBLE_PAGES {
        return (1..=total).map(PageLink::Page).collect();
    }

    let mut links = Vec::with_capacity(7);
    if current <= 3 {
        links.extend((1..=4).map(PageLink::Page));
        links.push(PageLink::Gap);
        links.push(PageLink::Page(total));
    } else if current >= total - 2 {
        links.push(PageLink::Page(1));
        links.push(PageLink::Gap);
        links.extend((total - 3..=total).map(PageLink::Page));
    } else {
        links.push(PageLink::Page(1));
        links.push(PageLink::Gap);
        links.extend((current - 1..=current + 1).map(PageLink::Page));
        links.push(PageLink::Gap);
        links.push(PageLink::Page(total));
    }
    links
}
