//! Offset pagination with totals.

use serde::Serialize;

use super::Query;
use crate::context::Context;
use crate::entity::Entity;
use crate::error::Result;

/// Requested window. A zero page ([`Page::ALL`]) asks for every row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
}

impl Page {
    pub const ALL: Page = Page { limit: 0, offset: 0 };

    pub fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }

    /// `limit` rows of the 1-based page `number`.
    pub fn number(number: u64, limit: u64) -> Self {
        Self::new(limit, number.saturating_sub(1).saturating_mul(limit))
    }

    /// The zero sentinel. The offset is ignored once the limit is zero.
    pub fn is_all(&self) -> bool {
        self.limit == 0
    }
}

/// One page of results and the total of the unpaged query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    /// The window actually applied
    pub page: Page,
}

impl<T> PageResult<T> {
    pub fn has_next(&self) -> bool {
        self.page.offset.saturating_add(self.items.len() as u64) < self.total_count
    }
}

impl<E: Entity> Query<E> {
    /// Count the unpaged query, then fetch the requested window.
    ///
    /// The count ignores ordering, eager loads and any limit or offset
    /// already set on the query, so `total_count` is the same for every
    /// page.
    pub fn paginate(self, ctx: &Context, page: Page) -> Result<PageResult<E>> {
        let ctx = self.client.context(ctx);

        let mut counter = self.clone();
        counter.withs.clear();
        counter.spec.clear_order();
        counter.spec.set_limit(None);
        counter.spec.set_offset(None);
        let total_count = counter.count(&ctx)?;

        let page = if page.is_all() {
            Page::new(total_count, 0)
        } else {
            page
        };
        if page.limit == 0 {
            return Ok(PageResult {
                items: Vec::new(),
                total_count,
                page,
            });
        }
        let items = self.limit(page.limit).offset(page.offset).all(&ctx)?;
        Ok(PageResult {
            items,
            total_count,
            page,
        })
    }

    pub fn paginate_x(self, ctx: &Context, page: Page) -> PageResult<E> {
        self.paginate(ctx, page).unwrap_or_else(|e| panic!("{e}"))
    }
}
