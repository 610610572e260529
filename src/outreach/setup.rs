//! Campaign setup from confirmed contact rows.

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::OutreachError;
use crate::store::model::{NewCampaign, NewContact};
use crate::store::{CampaignSetup, Database};

/// One contact row as confirmed by the user. Every field may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactRow {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub hobbies: Option<String>,
    #[serde(default)]
    pub mbti_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetupRequest {
    pub campaign_name: String,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub product_description: Option<String>,
    #[serde(default)]
    pub base_prompt_template: Option<String>,
    pub contacts: Vec<ContactRow>,
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl ContactRow {
    /// `None` for rows without a usable email address.
    fn to_contact(&self) -> Option<NewContact> {
        let email = clean(&self.email).filter(|e| e.contains('@'))?;
        Some(NewContact {
            email,
            first_name: clean(&self.first_name),
            company: clean(&self.company),
            role: clean(&self.role),
            hobbies: clean(&self.hobbies),
            mbti_type: clean(&self.mbti_type),
        })
    }
}

/// Create a campaign with the default steps and the valid contact rows.
pub async fn setup_campaign(
    db: &dyn Database,
    request: &SetupRequest,
) -> Result<CampaignSetup, OutreachError> {
    let contacts: Vec<NewContact> = request
        .contacts
        .iter()
        .filter_map(ContactRow::to_contact)
        .collect();

    let dropped = request.contacts.len() - contacts.len();
    if dropped > 0 {
        debug!(dropped, "Dropped contact rows without an email address");
    }
    if contacts.is_empty() {
        return Err(OutreachError::InvalidState("no valid contacts".to_string()));
    }

    let name = request.campaign_name.trim();
    if name.is_empty() {
        return Err(OutreachError::InvalidState("campaign name is required".to_string()));
    }

    let setup = db
        .create_campaign(
            &NewCampaign {
                name: name.to_string(),
                product_name: clean(&request.product_name),
                product_description: clean(&request.product_description),
                base_prompt_template: clean(&request.base_prompt_template),
            },
            &contacts,
        )
        .await?;

    info!(
        campaign_id = setup.campaign.id,
        contacts = setup.contacts.len(),
        "Campaign set up"
    );
    Ok(setup)
}
