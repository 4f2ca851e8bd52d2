//! Points a contact has collected across address books.

use serde::{Deserialize, Serialize};

/// Which points to total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointsKind {
    /// Accreditation credits, earned per event with an accreditation code.
    Accreditation,
    /// Bonus points for viewing, asking questions, and answering polls.
    Bonus,
}

/// One event the points were earned at, as recorded in one book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsEntry {
    pub book: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub event_date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub event_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub accreditation_code: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub credits: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub certificate: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub points_view: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub points_question: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub points_poll: String,
}

/// Totals for the current year and quarter, plus what they were built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsSummary {
    pub year_points: u32,
    pub quarter_points: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<PointsEntry>,
}
