//! Campaign report: every campaign sent in a date range with its delivery
//! statistics, oldest first.

use std::sync::Arc;

use futures::FutureExt;
use jiff::civil::Date;

use super::{ReportError, Result, Services};
use crate::fanout::run_collect;
use crate::model::{CampaignReport, CampaignSummary};
use crate::remote::{Remote, RemoteError};
use crate::trace::StageTrace;

pub async fn build<R: Remote + 'static>(
    services: &Services<R>,
    from: Date,
    to: Date,
    trace: &mut StageTrace,
) -> Result<Vec<CampaignReport>> {
    if from > to {
        return Err(ReportError::DateRange { from, to });
    }

    let summaries = services.mailer.campaigns(from, to, trace).await?;
    tracing::debug!(campaigns = summaries.len(), "campaigns listed");

    let mailer = Arc::clone(&services.mailer);
    let mut reports = run_collect(
        summaries,
        &services.settings.fanout("campaign details"),
        trace,
        move |summary: CampaignSummary, trace| {
            let mailer = Arc::clone(&mailer);
            async move {
                let stats = mailer.campaign_detail(summary.id, trace).await?;
                Ok::<_, RemoteError>(CampaignReport { summary, stats })
            }
            .boxed()
        },
    )
    .await?;

    reports.sort_by(|a, b| {
        a.summary
            .delivery_time
            .cmp(&b.summary.delivery_time)
            .then(a.summary.id.cmp(&b.summary.id))
    });
    Ok(reports)
}
