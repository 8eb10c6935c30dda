//! Sequence tools: `list-sequences` and `add-to-sequence`

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use rust_mcp_sdk::macros;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::{
    mock,
    registry::{parse_arguments, HandlerError, ToolHandler, ToolOutput},
    utils::{
        clean_list, clean_text, normalize_page, normalize_per_page, pagination, pick, records,
        validate_identifier,
    },
};
use crate::upstream::CrmClient;

pub const MAX_CONTACTS_PER_ENROLLMENT: usize = 100;

const SEQUENCE_FIELDS: [&str; 5] = ["id", "name", "active", "num_steps", "created_at"];

#[macros::mcp_tool(
    name = "list-sequences",
    description = "List outreach sequences, optionally filtered by name"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ListSequencesTool {
    pub q_name: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[macros::mcp_tool(
    name = "add-to-sequence",
    description = "Enroll one or more contacts in an outreach sequence"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct AddToSequenceTool {
    pub sequence_id: String,
    pub contact_ids: Vec<String>,
    pub email_account_id: Option<String>,
}

pub struct SequenceTools {
    client: Option<Arc<dyn CrmClient>>,
}

impl SequenceTools {
    pub fn new(client: Option<Arc<dyn CrmClient>>) -> Self {
        Self { client }
    }

    async fn list(&self, arguments: &Map<String, Value>) -> Result<ToolOutput, HandlerError> {
        let params: ListSequencesTool = parse_arguments("list-sequences", arguments)?;
        let name = clean_text(params.q_name);
        let page = normalize_page(params.page);
        let per_page = normalize_per_page(params.per_page)?;

        let Some(client) = self.client.as_ref() else {
            let sequences = mock::filter_by_name(mock::sequences(), name.as_deref());
            let returned = sequences.len();
            return Ok(ToolOutput::new(
                format!("Found {returned} sequences ({})", mock::MOCK_NOTICE),
                json!({
                    "sequences": sequences,
                    "pagination": pagination(&Value::Null, page, per_page, returned),
                    "mock": true,
                }),
            ));
        };

        let mut body = json!({ "page": page, "per_page": per_page });
        if let Some(name) = name {
            body["q_name"] = json!(name);
        }

        let response = client.post("emailer_campaigns/search", body).await?;
        let sequences = records(&response, "emailer_campaigns")
            .iter()
            .map(|sequence| pick(sequence, &SEQUENCE_FIELDS))
            .collect::<Vec<_>>();
        let pagination = pagination(&response, page, per_page, sequences.len());

        Ok(ToolOutput::new(
            format!(
                "Found {} sequences, showing {} on page {page}",
                pagination["total_entries"],
                sequences.len()
            ),
            json!({ "sequences": sequences, "pagination": pagination }),
        ))
    }

    async fn add(&self, arguments: &Map<String, Value>) -> Result<ToolOutput, HandlerError> {
        let params: AddToSequenceTool = parse_arguments("add-to-sequence", arguments)?;
        let sequence_id = validate_identifier("sequence_id", &params.sequence_id)?;
        let contact_ids = validate_contact_ids(params.contact_ids)?;
        let email_account_id = clean_text(params.email_account_id)
            .map(|id| validate_identifier("email_account_id", &id))
            .transpose()?;

        let Some(client) = self.client.as_ref() else {
            return Err(HandlerError::mock_mode("add-to-sequence"));
        };

        let mut body = json!({
            "emailer_campaign_id": sequence_id,
            "contact_ids": contact_ids,
        });
        if let Some(email_account_id) = email_account_id {
            body["send_email_from_email_account_id"] = json!(email_account_id);
        }

        let response = client
            .post(&format!("emailer_campaigns/{sequence_id}/add_contact_ids"), body)
            .await?;
        let enrolled = records(&response, "contacts").len();

        Ok(ToolOutput::new(
            format!(
                "Added {} of {} contacts to sequence {sequence_id}",
                enrolled,
                contact_ids.len()
            ),
            json!({
                "sequence_id": sequence_id,
                "requested": contact_ids,
                "enrolled": enrolled,
            }),
        ))
    }
}

fn validate_contact_ids(contact_ids: Vec<String>) -> Result<Vec<String>, HandlerError> {
    let mut ids = clean_list(Some(contact_ids))
        .iter()
        .map(|id| validate_identifier("contact_ids", id))
        .collect::<Result<Vec<_>, _>>()?;
    let mut seen = HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));

    if ids.is_empty() {
        return Err(HandlerError::invalid("contact_ids must contain at least one id"));
    }
    if ids.len() > MAX_CONTACTS_PER_ENROLLMENT {
        return Err(HandlerError::invalid(format!(
            "contact_ids must not contain more than {MAX_CONTACTS_PER_ENROLLMENT} ids"
        )));
    }
    Ok(ids)
}

#[async_trait]
impl ToolHandler for SequenceTools {
    async fn call(
        &self,
        operation: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolOutput, HandlerError> {
        match operation {
            "list-sequences" => self.list(arguments).await,
            "add-to-sequence" => self.add(arguments).await,
            other => Err(HandlerError::Internal(format!(
                "sequence tools cannot handle operation {other}"
            ))),
        }
    }
}
