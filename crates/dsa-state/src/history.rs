use dsa_protocol::{HistoryItem, HistoryPage};

/// Paginated history list bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryView {
    pub items: Vec<HistoryItem>,
    /// Last page loaded, 1-indexed. 0 before the first load.
    pub page: u32,
    /// Total rows reported by the backend.
    pub total: u64,
    pub has_more: bool,
    /// A first-page load is in flight.
    pub is_loading: bool,
    /// A next-page load is in flight.
    pub is_loading_more: bool,
    /// Bumped whenever the list restarts from page 1. Pages requested under
    /// an older generation are dropped.
    pub generation: u64,
}

impl Default for HistoryView {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            page: 0,
            total: 0,
            has_more: true,
            is_loading: false,
            is_loading_more: false,
            generation: 0,
        }
    }
}

impl HistoryView {
    /// Mark a first-page load as started and invalidate in-flight pages.
    pub fn begin_refresh(&mut self) -> u64 {
        self.is_loading = true;
        self.generation += 1;
        self.generation
    }

    /// Replace the list with page 1.
    pub fn apply_first_page(&mut self, page: HistoryPage) {
        self.items = page.items;
        self.page = 1;
        self.total = page.total;
        self.has_more = (self.items.len() as u64) < self.total;
    }

    /// Append page `number`.
    pub fn apply_next_page(&mut self, number: u32, page: HistoryPage) {
        self.items.extend(page.items);
        self.page = number;
        self.total = page.total;
        self.has_more = (self.items.len() as u64) < self.total;
    }

    /// Whether `load_more` should issue a request.
    pub fn can_load_more(&self) -> bool {
        self.has_more && !self.is_loading_more && !self.is_loading && self.page > 0
    }

    /// Every row inside the history window is loaded.
    pub fn all_loaded(&self) -> bool {
        self.page > 0 && !self.has_more && !self.items.is_empty()
    }
}
