//! HTTP route handlers, grouped by resource.

pub mod admin;
pub mod chat_tools;
pub mod documents;
pub mod health;
pub mod history;
pub mod metrics;
pub mod offers;
pub mod products;
pub mod vendors;
pub mod whatsapp;

use serde::Deserialize;

/// Shared `?limit=&offset=` pair for list endpoints.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Pagination {
    pub fn limit(&self, default: u32, max: u32) -> u32 {
        self.limit.unwrap_or(default).clamp(1, max)
    }

    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    /// Offset for the next page, when one exists.
    pub fn next_offset(&self, default_limit: u32, max: u32, total: u64) -> Option<u32> {
        let next = self.offset().saturating_add(self.limit(default_limit, max));
        (u64::from(next) < total).then_some(next)
    }
}
