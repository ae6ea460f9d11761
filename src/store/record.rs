//! Generic versioned records and list queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A stored record. `version` starts at 1 and grows by one per accepted update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Record {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub category: String,
    pub version: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRecord {
    pub title: String,
    pub body: String,
    pub category: String,
}

/// Columns a listing may be ordered by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortColumn {
    Id,
    Title,
    CreatedAt,
}

impl SortColumn {
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Title => "title",
            Self::CreatedAt => "created_at",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordSort {
    pub column: SortColumn,
    pub descending: bool,
}

impl RecordSort {
    /// Sort keys accepted by the list endpoint.
    pub const SAFELIST: [&'static str; 6] =
        ["id", "title", "created_at", "-id", "-title", "-created_at"];

    /// Parse a safelisted sort key; a leading `-` means descending.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (descending, name) = match value.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, value),
        };
        let column = match name {
            "id" => SortColumn::Id,
            "title" => SortColumn::Title,
            "created_at" => SortColumn::CreatedAt,
            _ => return None,
        };
        Some(Self { column, descending })
    }

    #[must_use]
    pub const fn direction(self) -> &'static str {
        if self.descending { "DESC" } else { "ASC" }
    }
}

impl Default for RecordSort {
    fn default() -> Self {
        Self {
            column: SortColumn::Id,
            descending: false,
        }
    }
}

/// Filters and pagination for a record listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordQuery {
    /// Case-insensitive substring match on the title; empty matches everything.
    pub title: String,
    pub page: u32,
    pub page_size: u32,
    pub sort: RecordSort,
}

impl RecordQuery {
    #[must_use]
    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    #[must_use]
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            title: String::new(),
            page: 1,
            page_size: 20,
            sort: RecordSort::default(),
        }
    }
}

/// Pagination metadata returned next to a listing. All zero when nothing matched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Metadata {
    pub current_page: u32,
    pub page_size: u32,
    pub first_page: u32,
    pub last_page: u32,
    pub total_records: u64,
}

impl Metadata {
    #[must_use]
    pub fn new(total_records: u64, page: u32, page_size: u32) -> Self {
        if total_records == 0 || page_size == 0 {
            return Self::default();
        }
        let last_page = total_records.div_ceil(u64::from(page_size));
        Self {
            current_page: page,
            page_size,
            first_page: 1,
            last_page: u32::try_from(last_page).unwrap_or(u32::MAX),
            total_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_parses_safelist() {
        for key in RecordSort::SAFELIST {
            assert!(RecordSort::parse(key).is_some(), "{key} should parse");
        }
        assert_eq!(
            RecordSort::parse("-title"),
            Some(RecordSort {
                column: SortColumn::Title,
                descending: true
            })
        );
    }

    #[test]
    fn sort_rejects_unknown_columns() {
        assert_eq!(RecordSort::parse("body"), None);
        assert_eq!(RecordSort::parse("--id"), None);
        assert_eq!(RecordSort::parse("id; DROP TABLE records"), None);
    }

    #[test]
    fn query_offset_uses_one_based_pages() {
        let query = RecordQuery {
            page: 3,
            page_size: 10,
            ..RecordQuery::default()
        };
        assert_eq!(query.limit(), 10);
        assert_eq!(query.offset(), 20);
    }

    #[test]
    fn metadata_rounds_last_page_up() {
        let metadata = Metadata::new(21, 2, 10);
        assert_eq!(metadata.first_page, 1);
        assert_eq!(metadata.last_page, 3);
        assert_eq!(metadata.current_page, 2);
        assert_eq!(metadata.total_records, 21);
    }

    #[test]
    fn metadata_is_empty_without_matches() {
        assert_eq!(Metadata::new(0, 1, 20), Metadata::default());
    }
}
