//! Offset pagination primitives shared by every "load more" listing.

use crate::error::{CatalogError, CatalogResult};
use serde::Serialize;

/// A contiguous `(skip, take)` slice of an ordered collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageWindow {
    skip: i64,
    take: i64,
}

impl PageWindow {
    /// Validate and build a window. `take` must be in `1..=max_take`.
    pub fn new(skip: i64, take: i64, max_take: i64) -> CatalogResult<Self> {
        if skip < 0 {
            return Err(CatalogError::InvalidArgument(format!(
                "skip must be non-negative, got {skip}"
            )));
        }

        if take <= 0 {
            return Err(CatalogError::InvalidArgument(format!(
                "take must be positive, got {take}"
            )));
        }

        if take > max_take {
            return Err(CatalogError::InvalidArgument(format!(
                "take must not exceed {max_take}, got {take}"
            )));
        }

        Ok(Self { skip, take })
    }

    pub fn skip(&self) -> i64 {
        self.skip
    }

    pub fn take(&self) -> i64 {
        self.take
    }

    /// Rows to request from the store: one past the window so `has_more`
    /// falls out without a count query.
    pub fn fetch_limit(&self) -> i64 {
        self.take + 1
    }
}

/// One page of a load-more listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Build a page from a fetch of up to `window.fetch_limit()` items.
    pub fn from_overfetch(mut items: Vec<T>, window: &PageWindow) -> Self {
        let take = window.take() as usize;
        let has_more = items.len() > take;
        items.truncate(take);

        Self {
            data: items,
            has_more,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Transform every item while keeping `has_more`
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            data: self.data.into_iter().map(f).collect(),
            has_more: self.has_more,
        }
    }
}
