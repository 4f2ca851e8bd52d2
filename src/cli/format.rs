//! Output formatting for CLI display.

use std::collections::BTreeMap;

use crate::fanout::Progress;
use crate::model::{
    AttendeeKind, BookUpdate, CampaignReport, CertificateInfo, Contact, PointsKind, PointsSummary,
    WebinarReport,
};

pub(super) fn progress_line(progress: &Progress) -> String {
    let total = progress.done + progress.left;
    format!("[{}/{total}] {}", progress.done, progress.label)
}

pub(super) fn describe_campaigns(reports: &[CampaignReport]) -> String {
    let sent: u64 = reports.iter().map(|r| r.stats.sent).sum();
    let opened: u64 = reports.iter().map(|r| r.stats.unique_opened).sum();
    format!(
        "{} campaign(s), {sent} sent, {opened} unique opens",
        reports.len()
    )
}

pub(super) fn describe_contacts(contacts: &BTreeMap<String, Contact>) -> String {
    let unreadable = contacts.values().filter(|c| !c.message.is_empty()).count();
    if unreadable == 0 {
        format!("{} contact(s)", contacts.len())
    } else {
        format!("{} contact(s), {unreadable} unreadable", contacts.len())
    }
}

pub(super) fn describe_webinar(report: &WebinarReport) -> String {
    format!(
        "{}: {} viewer(s), {} watched",
        report.name,
        report.viewers.len(),
        report.event.viewers_total
    )
}

pub(super) fn describe_certificates(info: &CertificateInfo) -> String {
    let students = info
        .holders
        .values()
        .filter(|h| h.kind == AttendeeKind::Student)
        .count();
    format!(
        "{} certificate(s) for {} on {} ({students} student)",
        info.holders.len(),
        info.event_name,
        info.event_date
    )
}

pub(super) fn describe_points(summary: &PointsSummary, kind: PointsKind) -> String {
    let kind = match kind {
        PointsKind::Accreditation => "accreditation",
        PointsKind::Bonus => "bonus",
    };
    format!(
        "{} {kind} point(s) this year, {} this quarter, {} event(s)",
        summary.year_points,
        summary.quarter_points,
        summary.entries.len()
    )
}

pub(super) fn describe_update(update: &BookUpdate) -> String {
    if update.rejected.is_empty() {
        format!("{} contact(s) written", update.written)
    } else {
        format!(
            "{} contact(s) written, {} rejected",
            update.written,
            update.rejected.len()
        )
    }
}
