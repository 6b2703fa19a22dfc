//! `page`/`limit` handling for list endpoints.

use crate::config::ApiConfig;
use crate::store::Page;
use serde::Serialize;

pub const MAX_PAGE_SIZE: u32 = 500;

/// Resolved page request: `page` starts at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u32,
}

impl Pagination {
    /// Applies defaults and clamps: `limit` to `[1, max_page_size]`,
    /// `page` to at least 1. `max_page_size` itself never exceeds
    /// `MAX_PAGE_SIZE`.
    pub fn resolve(page: Option<i64>, limit: Option<i64>, config: &ApiConfig) -> Self {
        let max = i64::from(config.max_page_size.clamp(1, MAX_PAGE_SIZE));
        let limit = limit
            .unwrap_or(i64::from(config.default_page_size))
            .clamp(1, max) as u32;
        let page = page.unwrap_or(1).max(1) as u64;
        Self { page, limit }
    }

    pub fn window(&self) -> Page {
        Page {
            limit: self.limit,
            offset: (self.page - 1).saturating_mul(u64::from(self.limit)),
        }
    }

    pub fn info(&self, total_count: u64) -> PageInfo {
        let total_pages = total_count.div_ceil(u64::from(self.limit));
        PageInfo {
            page: self.page,
            limit: self.limit,
            total_count,
            total_pages,
            has_next: self.page < total_pages,
            has_prev: self.page > 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u64,
    pub limit: u32,
    pub total_count: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

/// List response envelope
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: PageInfo,
}
