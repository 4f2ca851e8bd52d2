//! Mailing campaign metrics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A sent campaign as listed by the mailing service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSummary {
    pub id: u64,
    pub name: String,

    /// `YYYY-MM-DD HH:MM:SS`, as the service reports it.
    pub delivery_time: String,

    pub tag_utm: String,
    pub source_utm: String,
    pub medium_utm: String,
    pub content_utm: String,
    pub term_utm: String,
}

impl fmt::Display for CampaignSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "campaign {}", self.id)
    }
}

/// Delivery statistics for one campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStats {
    pub sent: u64,
    pub clicked: u64,
    pub opened: u64,
    pub unique_opened: u64,
    pub unique_clicked: u64,
    pub unsubscribed: u64,
    pub spam_complained: u64,
    pub spam_blocked: u64,
    pub spam_marked: u64,
    pub mail_system_blocked: u64,
    pub hard_bounced: u64,
    pub soft_bounced: u64,

    pub first_sent: String,
    pub first_open: String,
    pub last_open: String,
    pub first_click: String,
    pub last_click: String,
}

/// One row of the campaign report: the listing joined with its statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignReport {
    #[serde(flatten)]
    pub summary: CampaignSummary,

    #[serde(flatten)]
    pub stats: CampaignStats,
}
