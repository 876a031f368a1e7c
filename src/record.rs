use std::time::SystemTime;

use compact_str::CompactString;
use serde::Serialize;

/// A record as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: i64,
    pub external_id: CompactString,
    pub title: String,
    pub score: u64,
    pub comment_count: u64,
    pub link: Option<String>,
    #[serde(serialize_with = "crate::util::http_date")]
    pub scraped_at: SystemTime,
}

/// A freshly extracted record that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub external_id: CompactString,
    pub title: String,
    pub score: u64,
    pub comment_count: u64,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    /// The rendered markup held no element at all.
    NoElement,
    MissingIdentifier,
    MissingTitle,
}

/// Outcome of running the field extractor over one rendered element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Valid(Candidate),
    Rejected { reason: RejectReason },
}

impl Extraction {
    pub const fn rejected(reason: RejectReason) -> Self {
        Self::Rejected { reason }
    }
}

/// Result of an insert against the unique external identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    Fresh,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Place {
    pub id: i64,
    pub search_term: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub country: Option<String>,
    pub category: Option<String>,
    pub phone: Option<String>,
    #[serde(serialize_with = "crate::util::http_date")]
    pub scraped_at: SystemTime,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceCandidate {
    pub search_term: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub country: Option<String>,
    pub category: Option<String>,
    pub phone: Option<String>,
}

impl PlaceCandidate {
    /// A place is worth keeping once it has a name or an address.
    pub const fn is_storable(&self) -> bool {
        self.name.is_some() || self.address.is_some()
    }
}
