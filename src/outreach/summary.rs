use serde::Serialize;

use crate::error::OutreachError;
use crate::store::Database;
use crate::store::model::{EmailEngagement, StatusCounts};

/// Per-status counts plus engagement for every dispatched email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignSummary {
    pub campaign_id: i64,
    pub name: String,
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub sent_emails: Vec<EmailEngagement>,
}

pub async fn campaign_summary(
    db: &dyn Database,
    campaign_id: i64,
) -> Result<CampaignSummary, OutreachError> {
    let campaign = db
        .get_campaign(campaign_id)
        .await?
        .ok_or_else(|| OutreachError::not_found("campaign", campaign_id))?;

    Ok(CampaignSummary {
        campaign_id,
        name: campaign.name,
        counts: db.status_counts(campaign_id).await?,
        sent_emails: db.sent_engagement(campaign_id).await?,
    })
}
