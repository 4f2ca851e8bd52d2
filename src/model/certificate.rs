//! Certificate issuance data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Why a contact is owed a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttendeeKind {
    /// Holds an accreditation code and has no certificate yet.
    Accredited,

    /// A student who attended in person and has no certificate yet.
    Student,
}

/// What goes on one person's certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateHolder {
    pub kind: AttendeeKind,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub accreditation_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub academic_hours: Option<String>,
}

/// Everything needed to print certificates for one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    pub event_name: String,
    pub event_date: String,

    /// Keyed by email.
    pub holders: BTreeMap<String, CertificateHolder>,
}
