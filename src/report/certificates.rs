//! Certificate data: who in an address book is owed a certificate, and what
//! goes on it.

use super::{ReportError, Result, Services};
use crate::model::{AttendeeKind, CertificateHolder, CertificateInfo, Contact};
use crate::remote::Remote;
use crate::trace::StageTrace;

pub async fn build<R: Remote + 'static>(
    services: &Services<R>,
    book: Option<&str>,
    trace: &mut StageTrace,
) -> Result<CertificateInfo> {
    let book = services.settings.book(book)?;
    let members = services.mailer.members(book, trace).await?;
    tracing::debug!(book, members = members.len(), "book loaded");

    trace.set_last_stage("select certificate holders");
    let mut info = CertificateInfo::default();
    for (email, contact) in &members {
        let Some(kind) = classify(contact) else {
            continue;
        };
        if let Some(field) = missing_field(contact, kind) {
            return Err(ReportError::MissingField {
                email: email.clone(),
                field,
            });
        }

        if info.event_name.is_empty() {
            info.event_name.clone_from(&contact.event_name);
        }
        if info.event_date.is_empty() {
            info.event_date.clone_from(&contact.event_date);
        }
        info.holders.insert(email.clone(), holder(contact, kind));
    }

    if info.holders.is_empty() {
        return Err(ReportError::NoHolders);
    }
    if info.event_name.is_empty() {
        return Err(ReportError::MissingEventDetail("event name"));
    }
    if info.event_date.is_empty() {
        return Err(ReportError::MissingEventDetail("event date"));
    }
    Ok(info)
}

/// Whether `contact` is owed a certificate, and as what.
///
/// Anyone who already has one is skipped. In-person students take
/// precedence over accreditation.
fn classify(contact: &Contact) -> Option<AttendeeKind> {
    if !contact.certificate.is_empty() {
        return None;
    }
    let in_person = contact.visit_type.trim().eq_ignore_ascii_case("in person");
    let student = contact.position.trim().eq_ignore_ascii_case("student");
    if in_person && student {
        Some(AttendeeKind::Student)
    } else if !contact.accreditation_code.is_empty() {
        Some(AttendeeKind::Accredited)
    } else {
        None
    }
}

/// The first required field that is empty, checked in a fixed order.
fn missing_field(contact: &Contact, kind: AttendeeKind) -> Option<&'static str> {
    let required = [
        ("name", &contact.name),
        ("event_name", &contact.event_name),
        ("event_date", &contact.event_date),
    ];
    let specific = match kind {
        AttendeeKind::Accredited => ("credit_units", &contact.credits),
        AttendeeKind::Student => ("academic_hours", &contact.academic_hours),
    };
    required
        .into_iter()
        .chain([specific])
        .find(|(_, value)| value.is_empty())
        .map(|(field, _)| field)
}

fn holder(contact: &Contact, kind: AttendeeKind) -> CertificateHolder {
    let (credits, accreditation_code, academic_hours) = match kind {
        AttendeeKind::Accredited => (
            Some(contact.credits.clone()),
            Some(contact.accreditation_code.clone()),
            None,
        ),
        AttendeeKind::Student => (None, None, Some(contact.academic_hours.clone())),
    };
    CertificateHolder {
        kind,
        name: contact.name.clone(),
        credits,
        accreditation_code,
        academic_hours,
    }
}
