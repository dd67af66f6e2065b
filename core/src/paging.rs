//! Paged queries.
//!
//! A [`PageRequest`] is validated when it is built; [`paginate`] turns it and
//! a [`Specification`] into one count and one bounded slice query, and wraps
//! the outcome in a [`PagedResult`] with derived navigation metadata.
//!
//! Ordering is always total: the sort key is followed by the entity
//! identifier ascending, so consecutive pages never overlap or skip rows.

use crate::capability::Has;
use crate::effect::{access, Effect};
use crate::entity::{Entity, Field};
use crate::error::{DataError, Result};
use crate::repository::RepositoryRef;
use crate::specification::Specification;
use crate::value::{FieldType, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortDirection {
    /// Smallest first
    #[default]
    #[serde(rename = "asc")]
    Ascending,
    /// Largest first
    #[serde(rename = "desc")]
    Descending,
}

impl SortDirection {
    /// Parse `asc`/`ascending` or `desc`/`descending`, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Validation`] for anything else.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Ascending),
            "desc" | "descending" => Ok(Self::Descending),
            _ => Err(DataError::validation(format!("unknown sort direction '{raw}'"))),
        }
    }

    /// SQL keyword.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Ordering of a query result: one field plus a direction.
pub struct SortKey<E> {
    field: &'static str,
    direction: SortDirection,
    _entity: PhantomData<fn(&E)>,
}

impl<E> Clone for SortKey<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for SortKey<E> {}

impl<E> PartialEq for SortKey<E> {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field && self.direction == other.direction
    }
}

impl<E> fmt::Debug for SortKey<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortKey")
            .field("field", &self.field)
            .field("direction", &self.direction)
            .finish()
    }
}

impl<E: Entity> SortKey<E> {
    const fn of(field: &'static str, direction: SortDirection) -> Self {
        Self {
            field,
            direction,
            _entity: PhantomData,
        }
    }

    /// Ascending by `field`.
    #[must_use]
    pub const fn asc<V: FieldType>(field: Field<E, V>) -> Self {
        Self::of(field.name(), SortDirection::Ascending)
    }

    /// Descending by `field`.
    #[must_use]
    pub const fn desc<V: FieldType>(field: Field<E, V>) -> Self {
        Self::of(field.name(), SortDirection::Descending)
    }

    /// Ascending by identifier.
    #[must_use]
    pub const fn by_id() -> Self {
        Self::of(E::ID_FIELD, SortDirection::Ascending)
    }

    /// Sort key for a field and direction named at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Validation`] for an unknown field or direction.
    pub fn parse(field: &str, direction: &str) -> Result<Self> {
        let def = E::require_field(field)?;
        Ok(Self::of(def.name, SortDirection::parse(direction)?))
    }

    /// Sort field name.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        self.field
    }

    /// Sort direction.
    #[must_use]
    pub const fn direction(&self) -> SortDirection {
        self.direction
    }

    /// Whether the identifier tie-break adds anything beyond this key.
    #[must_use]
    pub fn needs_tie_break(&self) -> bool {
        self.field != E::ID_FIELD
    }

    /// Total order of two entities under this key, identifier ascending as tie-break.
    ///
    /// Nulls sort last ascending and first descending, as in PostgreSQL.
    #[must_use]
    pub fn compare(&self, a: &E, b: &E) -> Ordering {
        let left = a.value_of(self.field).unwrap_or(Value::Null);
        let right = b.value_of(self.field).unwrap_or(Value::Null);
        let primary = match self.direction {
            SortDirection::Ascending => left.cmp(&right),
            SortDirection::Descending => right.cmp(&left),
        };
        primary.then_with(|| a.id_value().cmp(&b.id_value()))
    }
}

/// Upper bounds applied to page requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingLimits {
    /// Largest accepted page size
    pub max_page_size: u64,
}

impl PagingLimits {
    /// Default largest page size.
    pub const DEFAULT_MAX_PAGE_SIZE: u64 = 1000;
}

impl Default for PagingLimits {
    fn default() -> Self {
        Self {
            max_page_size: Self::DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

/// A validated request for one page of results.
///
/// Page numbers are 1-based.
pub struct PageRequest<E> {
    page_number: u64,
    page_size: u64,
    sort: SortKey<E>,
}

impl<E> Clone for PageRequest<E> {
    fn clone(&self) -> Self {
        Self {
            page_number: self.page_number,
            page_size: self.page_size,
            sort: self.sort,
        }
    }
}

impl<E> Copy for PageRequest<E> {}

impl<E> fmt::Debug for PageRequest<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageRequest")
            .field("page_number", &self.page_number)
            .field("page_size", &self.page_size)
            .field("sort", &self.sort)
            .finish()
    }
}

impl<E: Entity> PageRequest<E> {
    /// Validate a page request against the default [`PagingLimits`].
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Validation`] if `page_number < 1`, `page_size < 1`
    /// or `page_size` exceeds the limit.
    pub fn new(page_number: i64, page_size: i64, sort: SortKey<E>) -> Result<Self> {
        Self::with_limits(page_number, page_size, sort, PagingLimits::default())
    }

    /// Validate a page request against explicit limits.
    ///
    /// # Errors
    ///
    /// See [`PageRequest::new`].
    pub fn with_limits(
        page_number: i64,
        page_size: i64,
        sort: SortKey<E>,
        limits: PagingLimits,
    ) -> Result<Self> {
        let page_number = u64::try_from(page_number)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| DataError::validation(format!("page number must be at least 1, got {page_number}")))?;
        let page_size = u64::try_from(page_size)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| DataError::validation(format!("page size must be at least 1, got {page_size}")))?;
        if page_size > limits.max_page_size {
            return Err(DataError::validation(format!(
                "page size {page_size} exceeds the maximum of {}",
                limits.max_page_size
            )));
        }
        Ok(Self {
            page_number,
            page_size,
            sort,
        })
    }

    /// 1-based page number.
    #[must_use]
    pub const fn page_number(&self) -> u64 {
        self.page_number
    }

    /// Requested page size.
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Sort key.
    #[must_use]
    pub const fn sort(&self) -> &SortKey<E> {
        &self.sort
    }

    /// Number of rows to skip.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.page_number - 1).saturating_mul(self.page_size)
    }
}

/// One page of results with navigation metadata.
///
/// Deserializing checks that the navigation fields agree with the counts,
/// so a decoded page upholds the same invariants as [`PagedResult::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    try_from = "RawPage<T>",
    bound(deserialize = "T: Deserialize<'de>")
)]
pub struct PagedResult<T> {
    items: Vec<T>,
    total_count: u64,
    page_number: u64,
    page_size: u64,
    total_pages: u64,
    has_previous_page: bool,
    has_next_page: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPage<T> {
    items: Vec<T>,
    total_count: u64,
    page_number: u64,
    page_size: u64,
    total_pages: u64,
    has_previous_page: bool,
    has_next_page: bool,
}

impl<T> TryFrom<RawPage<T>> for PagedResult<T> {
    type Error = DataError;

    fn try_from(raw: RawPage<T>) -> Result<Self> {
        if raw.page_number == 0 || raw.page_size == 0 {
            return Err(DataError::validation("page number and page size must be positive"));
        }
        if u64::try_from(raw.items.len()).unwrap_or(u64::MAX) > raw.page_size {
            return Err(DataError::validation(format!(
                "page holds {} items but its size is {}",
                raw.items.len(),
                raw.page_size
            )));
        }
        let page = Self::new(raw.items, raw.total_count, raw.page_number, raw.page_size);
        let consistent = page.total_pages == raw.total_pages
            && page.has_previous_page == raw.has_previous_page
            && page.has_next_page == raw.has_next_page;
        if !consistent {
            return Err(DataError::validation(
                "page navigation fields disagree with its counts",
            ));
        }
        Ok(page)
    }
}

impl<T> PagedResult<T> {
    /// Assemble a page, deriving the navigation fields.
    ///
    /// `items` is cut to `page_size` if an adapter returned more.
    #[must_use]
    pub fn new(mut items: Vec<T>, total_count: u64, page_number: u64, page_size: u64) -> Self {
        let page_size = page_size.max(1);
        items.truncate(usize::try_from(page_size).unwrap_or(usize::MAX));
        let total_pages = total_count.div_ceil(page_size);
        Self {
            items,
            total_count,
            page_number,
            page_size,
            total_pages,
            has_previous_page: page_number > 1 && total_pages > 0,
            has_next_page: page_number < total_pages,
        }
    }

    /// Items of this page, in sort order.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Consume the page, keeping its items.
    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Number of entities matching the filter across all pages.
    #[must_use]
    pub const fn total_count(&self) -> u64 {
        self.total_count
    }

    /// 1-based page number.
    #[must_use]
    pub const fn page_number(&self) -> u64 {
        self.page_number
    }

    /// Requested page size.
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        self.page_size
    }

    /// `ceil(total_count / page_size)`.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.total_pages
    }

    /// Whether an earlier, non-empty page exists.
    #[must_use]
    pub const fn has_previous_page(&self) -> bool {
        self.has_previous_page
    }

    /// Whether a later page exists.
    #[must_use]
    pub const fn has_next_page(&self) -> bool {
        self.has_next_page
    }

    /// Transform the items, keeping the metadata.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> PagedResult<U>
    where
        F: FnMut(T) -> U,
    {
        PagedResult {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page_number: self.page_number,
            page_size: self.page_size,
            total_pages: self.total_pages,
            has_previous_page: self.has_previous_page,
            has_next_page: self.has_next_page,
        }
    }
}

/// Fetch one page of entities matching `spec`.
///
/// Issues a count and a slice query through the bound repository; a failure
/// of either is the failure of the whole effect. A page past the end yields
/// no items with the true total count.
pub fn paginate<Env, E>(spec: Specification<E>, request: PageRequest<E>) -> Effect<Env, PagedResult<E>>
where
    Env: Has<RepositoryRef<E>> + Send + Sync + 'static,
    E: Entity,
{
    access(move |repository: RepositoryRef<E>| async move {
        let total_count = repository.count(&spec).await?;
        let items = repository
            .find_slice(&spec, request.sort(), request.offset(), request.page_size())
            .await?;
        tracing::debug!(
            entity = E::NAME,
            page = request.page_number(),
            total_count,
            "Fetched page"
        );
        Ok(PagedResult::new(
            items,
            total_count,
            request.page_number(),
            request.page_size(),
        ))
    })
}
