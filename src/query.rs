use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::store::{RecordStore, StoreError};
use crate::types::{DelegationRecord, YearFilter};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("couldn't parse value {value:?} for query parameter {param}")]
pub struct ValidationError {
    pub param: &'static str,
    pub value: String,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Query-string parameters as received; parsed by [`PageRequest::parse`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<String>,
    pub size: Option<String>,
    pub year: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub size: u64,
    pub year: YearFilter,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            size: DEFAULT_PAGE_SIZE,
            year: YearFilter::ALL,
        }
    }
}

impl PageRequest {
    /// Malformed integers are rejected; missing, empty, zero or negative
    /// page/size fall back to the defaults.
    pub fn parse(params: &PageParams) -> Result<Self, ValidationError> {
        let page = parse_int("page", params.page.as_deref())?;
        let size = parse_int("size", params.size.as_deref())?;
        let year = parse_int("year", params.year.as_deref())?;

        Ok(Self {
            page: positive_or(page, DEFAULT_PAGE),
            size: positive_or(size, DEFAULT_PAGE_SIZE),
            year: YearFilter::from_param(year),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationPage {
    pub records: Vec<DelegationRecord>,
    pub total_count: u64,
    pub total_pages: u64,
}

/// Ceiling division; zero records means zero pages.
pub fn total_pages(total_count: u64, size: u64) -> u64 {
    if size == 0 {
        return 0;
    }
    let pages = total_count / size;
    if total_count % size != 0 {
        pages + 1
    } else {
        pages
    }
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn RecordStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn handle(&self, params: &PageParams) -> Result<DelegationPage, QueryError> {
        let request = PageRequest::parse(params)?;
        Ok(self.page(request).await?)
    }

    pub async fn page(&self, request: PageRequest) -> Result<DelegationPage, StoreError> {
        let records = self
            .store
            .query(request.page, request.size, request.year)
            .await?;
        let total_count = self.store.count(request.year).await?;
        let total_pages = total_pages(total_count, request.size);
        debug!(
            page = request.page,
            size = request.size,
            year = ?request.year.year(),
            returned = records.len(),
            total_count,
            total_pages,
            "served delegation page"
        );
        Ok(DelegationPage {
            records,
            total_count,
            total_pages,
        })
    }
}

fn parse_int(param: &'static str, raw: Option<&str>) -> Result<i64, ValidationError> {
    match raw {
        None | Some("") => Ok(0),
        Some(value) => value.parse::<i64>().map_err(|_| ValidationError {
            param,
            value: value.to_string(),
        }),
    }
}

fn positive_or(value: i64, default: u64) -> u64 {
    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
