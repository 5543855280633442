//! Page window arithmetic.

use serde::{Deserialize, Serialize};

/// The slice of a result set one page covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    /// Requested page after clamping, 1-based.
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub page_count: usize,
    pub offset: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl PageWindow {
    /// Window for `requested` (1-based) over `total` rows.
    ///
    /// `page_count` is `ceil(total / per_page)` and `0` for an empty result;
    /// the page is clamped into `[1, max(page_count, 1)]`.
    pub fn compute(total: usize, requested: i64, per_page: usize) -> Self {
        let per_page = per_page.max(1);
        let page_count = total.div_ceil(per_page);
        let last = page_count.max(1);
        let page = usize::try_from(requested.max(1)).unwrap_or(1).min(last);
        Self {
            page,
            per_page,
            total,
            page_count,
            offset: (page - 1) * per_page,
            has_next_page: page < page_count,
            has_previous_page: page > 1,
        }
    }

    /// Number of rows on this page.
    pub fn len(&self) -> usize {
        self.total.saturating_sub(self.offset).min(self.per_page)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn end(&self) -> usize {
        self.offset + self.len()
    }
}
