//! Domain data model.
//!
//! Plain value types produced by the remote adapters and the reports:
//! contacts, campaigns, webinar events, viewers, certificates and points.
//! None of them carry behavior beyond small lookups; the merge and the
//! reports live elsewhere.

mod campaign;
mod certificate;
mod contact;
mod points;
mod viewer;
mod webinar;

pub use campaign::{CampaignReport, CampaignStats, CampaignSummary};
pub use certificate::{AttendeeKind, CertificateHolder, CertificateInfo};
pub use contact::{BookUpdate, Contact, SubscriptionStatus};
pub use points::{PointsEntry, PointsKind, PointsSummary};
pub use viewer::{Grant, ViewRegime, ViewerRecord, max_points};
pub use webinar::{EventInfo, Roster, RosterEntry, WebinarReport};
