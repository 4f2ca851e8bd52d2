//! Mailing-list contact profiles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Subscription state of a contact in an address book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Unsubscribed,
    Bounced,
    Inactive,
    Unconfirmed,
    Unknown,
}

impl SubscriptionStatus {
    pub fn parse(state: &str) -> Self {
        match state {
            "active" => Self::Active,
            "unsubscribed" => Self::Unsubscribed,
            "bounced" => Self::Bounced,
            "inactive" => Self::Inactive,
            "unconfirmed" => Self::Unconfirmed,
            _ => Self::Unknown,
        }
    }
}

/// One contact from a mailing-list address book.
///
/// Every field is optional in the book; empty strings mean "not set".
/// When the lookup itself was refused by the service, only `message` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubscriptionStatus>,

    // ── Profile ──
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub phone: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub citizenship: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub district: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub city: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub specialization: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub specialization_extra: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub work_place: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub position: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub other: String,

    // ── Certificates ──
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
    pub visit_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub academic_hours: String,

    // ── Points ──
    #[serde(skip_serializing_if = "String::is_empty")]
    pub points_view: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub points_question: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub points_poll: String,
}

/// Result of writing rows back into an address book.
///
/// Contacts the service refused are listed with its reason; they don't stop
/// the rest of the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookUpdate {
    pub written: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rejected: BTreeMap<String, String>,
}

impl Contact {
    /// A placeholder for a contact the service refused to return.
    pub fn unreadable(reason: impl std::fmt::Display) -> Self {
        Self {
            message: format!("could not read contact: {reason}"),
            ..Self::default()
        }
    }

    /// Set the field a book column is titled for.
    ///
    /// Returns `false` for titles this profile doesn't carry.
    pub fn set_titled(&mut self, title: &str, value: String) -> bool {
        let field = match title {
            "name" => &mut self.name,
            "phone" => &mut self.phone,
            "citizenship" => &mut self.citizenship,
            "federal_district" => &mut self.district,
            "region" => &mut self.region,
            "city" => &mut self.city,
            "primary_specialization" => &mut self.specialization,
            "secondary_specialization" => &mut self.specialization_extra,
            "workplace" => &mut self.work_place,
            "position" => &mut self.position,
            "other" => &mut self.other,
            "event_date" => &mut self.event_date,
            "event_name" => &mut self.event_name,
            "accreditation_code" => &mut self.accreditation_code,
            "credit_units" => &mut self.credits,
            "certificate_link" => &mut self.certificate,
            "visit_type" => &mut self.visit_type,
            "academic_hours" => &mut self.academic_hours,
            "points_for_viewing" => &mut self.points_view,
            "points_for_question" => &mut self.points_question,
            "points_for_poll" => &mut self.points_poll,
            _ => return false,
        };
        *field = value;
        true
    }
}
