//! Page arithmetic.

use serde::Serialize;

/// Row limit applied when a query sets none.
pub const DEFAULT_LIMIT: u64 = 100;

/// Window and totals of the last read.
///
/// `total_count` and the derived counts are only meaningful after a read
/// that did not skip counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationState {
    limit: Option<u64>,
    offset: u64,
    total_count: u64,
    page_count: u64,
    current_page: u64,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self {
            limit: Some(DEFAULT_LIMIT),
            offset: 0,
            total_count: 0,
            page_count: 0,
            current_page: 1,
        }
    }
}

impl PaginationState {
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    pub fn current_page(&self) -> u64 {
        self.current_page
    }

    /// Record the window a read used. `None` means unlimited.
    pub fn set_window(&mut self, limit: Option<u64>, offset: u64) {
        self.limit = limit;
        self.offset = offset;
    }

    /// Whether a read returning `rows` rows needs a `COUNT(*)` to know the
    /// total.
    ///
    /// A full page may have more rows behind it, and an empty page past the
    /// first says nothing about earlier pages. A short page is trusted: the
    /// total is then `offset + rows`, which can be wrong if rows were added
    /// or removed between pages.
    pub fn needs_count(&self, rows: u64) -> bool {
        match self.limit {
            Some(limit) => rows >= limit || (rows == 0 && self.offset > 0),
            None => false,
        }
    }

    /// Total implied by a short page.
    pub fn implied_total(&self, rows: u64) -> u64 {
        self.offset + rows
    }

    /// Recompute page count and current page for a new total.
    pub fn update(&mut self, total_count: u64) {
        self.total_count = total_count;
        self.page_count = match self.limit {
            Some(limit) if limit > 0 => total_count.div_ceil(limit),
            _ => u64::from(total_count > 0),
        };
        let page = match self.limit {
            Some(limit) if limit > 0 => self.offset / limit + 1,
            _ => 1,
        };
        self.current_page = page.clamp(1, self.page_count.max(1));
    }
}

/// Offset of a 1-based page. Pages below 1 are treated as page 1.
pub fn page_offset(page: u64, per_page: u64) -> u64 {
    page.max(1).saturating_sub(1).saturating_mul(per_page)
}
