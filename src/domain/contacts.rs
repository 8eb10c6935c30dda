//! Contact tools: `search-contacts`, `get-contact`, and `create-contact`

use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::macros;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::{
    mock,
    registry::{parse_arguments, HandlerError, ToolHandler, ToolOutput},
    utils::{
        clean_list, clean_text, normalize_page, normalize_per_page, pagination, pick, records,
        require_text, validate_email, validate_identifier,
    },
};
use crate::upstream::CrmClient;

const CONTACT_FIELDS: [&str; 9] = [
    "id",
    "name",
    "first_name",
    "last_name",
    "title",
    "email",
    "organization_name",
    "contact_stage_id",
    "created_at",
];

#[macros::mcp_tool(
    name = "search-contacts",
    description = "Search contacts already saved in the CRM"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct SearchContactsTool {
    pub q_keywords: Option<String>,
    pub contact_stage_ids: Option<Vec<String>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[macros::mcp_tool(name = "get-contact", description = "Fetch a single contact by id")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetContactTool {
    pub contact_id: String,
}

#[macros::mcp_tool(
    name = "create-contact",
    description = "Create a new contact in the CRM"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateContactTool {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub title: Option<String>,
    pub organization_name: Option<String>,
}

pub struct ContactTools {
    client: Option<Arc<dyn CrmClient>>,
}

impl ContactTools {
    pub fn new(client: Option<Arc<dyn CrmClient>>) -> Self {
        Self { client }
    }

    async fn search(&self, arguments: &Map<String, Value>) -> Result<ToolOutput, HandlerError> {
        let params: SearchContactsTool = parse_arguments("search-contacts", arguments)?;
        let keywords = clean_text(params.q_keywords);
        let stage_ids = clean_list(params.contact_stage_ids)
            .iter()
            .map(|id| validate_identifier("contact_stage_ids", id))
            .collect::<Result<Vec<_>, _>>()?;
        let page = normalize_page(params.page);
        let per_page = normalize_per_page(params.per_page)?;

        let Some(client) = self.client.as_ref() else {
            let contacts = mock::filter_by_name(mock::contacts(), keywords.as_deref());
            let returned = contacts.len();
            return Ok(ToolOutput::new(
                format!("Found {returned} contacts ({})", mock::MOCK_NOTICE),
                json!({
                    "contacts": contacts,
                    "pagination": pagination(&Value::Null, page, per_page, returned),
                    "mock": true,
                }),
            ));
        };

        let mut body = json!({ "page": page, "per_page": per_page });
        if let Some(keywords) = keywords {
            body["q_keywords"] = json!(keywords);
        }
        if !stage_ids.is_empty() {
            body["contact_stage_ids"] = json!(stage_ids);
        }

        let response = client.post("contacts/search", body).await?;
        let contacts = records(&response, "contacts")
            .iter()
            .map(|contact| pick(contact, &CONTACT_FIELDS))
            .collect::<Vec<_>>();
        let pagination = pagination(&response, page, per_page, contacts.len());

        Ok(ToolOutput::new(
            format!(
                "Found {} contacts, showing {} on page {page}",
                pagination["total_entries"],
                contacts.len()
            ),
            json!({ "contacts": contacts, "pagination": pagination }),
        ))
    }

    async fn get(&self, arguments: &Map<String, Value>) -> Result<ToolOutput, HandlerError> {
        let params: GetContactTool = parse_arguments("get-contact", arguments)?;
        let contact_id = validate_identifier("contact_id", &params.contact_id)?;

        let Some(client) = self.client.as_ref() else {
            return Ok(ToolOutput::new(
                format!("Fetched contact {contact_id} ({})", mock::MOCK_NOTICE),
                json!({ "contact": mock::contact(&contact_id), "mock": true }),
            ));
        };

        let response = client.get(&format!("contacts/{contact_id}"), &[]).await?;
        let contact = response
            .get("contact")
            .filter(|contact| !contact.is_null())
            .ok_or_else(|| HandlerError::Api {
                status: None,
                message: format!("contact {contact_id} was not found"),
            })?;

        Ok(ToolOutput::new(
            format!("Fetched contact {contact_id}"),
            json!({ "contact": pick(contact, &CONTACT_FIELDS) }),
        ))
    }

    async fn create(&self, arguments: &Map<String, Value>) -> Result<ToolOutput, HandlerError> {
        let params: CreateContactTool = parse_arguments("create-contact", arguments)?;
        let first_name = require_text("first_name", &params.first_name)?;
        let last_name = require_text("last_name", &params.last_name)?;
        let email = clean_text(params.email)
            .map(|email| validate_email(&email))
            .transpose()?;

        let Some(client) = self.client.as_ref() else {
            return Err(HandlerError::mock_mode("create-contact"));
        };

        let mut body = json!({ "first_name": first_name, "last_name": last_name });
        if let Some(email) = email {
            body["email"] = json!(email);
        }
        if let Some(title) = clean_text(params.title) {
            body["title"] = json!(title);
        }
        if let Some(organization_name) = clean_text(params.organization_name) {
            body["organization_name"] = json!(organization_name);
        }

        let response = client.post("contacts", body).await?;
        let contact = response.get("contact").cloned().unwrap_or(Value::Null);
        let created = pick(&contact, &CONTACT_FIELDS);

        Ok(ToolOutput::new(
            format!("Created contact {first_name} {last_name}"),
            json!({ "contact": created }),
        ))
    }
}

#[async_trait]
impl ToolHandler for ContactTools {
    async fn call(
        &self,
        operation: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolOutput, HandlerError> {
        match operation {
            "search-contacts" => self.search(arguments).await,
            "get-contact" => self.get(arguments).await,
            "create-contact" => self.create(arguments).await,
            other => Err(HandlerError::Internal(format!(
                "contact tools cannot handle operation {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingClient(HandlerError);

    #[async_trait]
    impl CrmClient for FailingClient {
        async fn get(&self, _path: &str, _query: &[(&str, String)]) -> Result<Value, HandlerError> {
            Err(self.0.clone())
        }

        async fn post(&self, _path: &str, _body: Value) -> Result<Value, HandlerError> {
            Err(self.0.clone())
        }
    }

    struct StaticClient(Value);

    #[async_trait]
    impl CrmClient for StaticClient {
        async fn get(&self, _path: &str, _query: &[(&str, String)]) -> Result<Value, HandlerError> {
            Ok(self.0.clone())
        }

        async fn post(&self, _path: &str, _body: Value) -> Result<Value, HandlerError> {
            Ok(self.0.clone())
        }
    }

    fn arguments(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object arguments")
    }

    #[tokio::test]
    async fn create_contact_is_unavailable_in_mock_mode() {
        let tools = ContactTools::new(None);
        let error = tools
            .call(
                "create-contact",
                &arguments(json!({"first_name": "Ada", "last_name": "Lovelace"})),
            )
            .await
            .expect_err("writes need an upstream client");

        assert!(matches!(error, HandlerError::MockMode(_)));
    }

    #[tokio::test]
    async fn create_contact_validates_before_mock_check() {
        let tools = ContactTools::new(None);
        let error = tools
            .call(
                "create-contact",
                &arguments(json!({"first_name": " ", "last_name": "Lovelace"})),
            )
            .await
            .expect_err("blank first name");

        assert!(matches!(error, HandlerError::InvalidParameters(ref message) if message.contains("first_name")));
    }

    #[tokio::test]
    async fn get_contact_rejects_path_like_ids() {
        let tools = ContactTools::new(None);
        let error = tools
            .call("get-contact", &arguments(json!({"contact_id": "../users"})))
            .await
            .expect_err("invalid id");

        assert!(matches!(error, HandlerError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn mock_search_filters_by_keyword() {
        let tools = ContactTools::new(None);
        let output = tools
            .call("search-contacts", &arguments(json!({"q_keywords": "margaret"})))
            .await
            .expect("mock search");

        assert_eq!(output.data["contacts"].as_array().map(Vec::len), Some(1));
        assert_eq!(output.data["contacts"][0]["id"], json!("mock-contact-2"));
    }

    #[tokio::test]
    async fn upstream_failures_pass_through_unchanged() {
        let tools = ContactTools::new(Some(Arc::new(FailingClient(HandlerError::Authentication(
            "bad key".to_string(),
        )))));
        let error = tools
            .call("get-contact", &arguments(json!({"contact_id": "c-1"})))
            .await
            .expect_err("upstream failure");

        assert!(matches!(error, HandlerError::Authentication(_)));
    }

    #[tokio::test]
    async fn missing_contact_in_response_is_an_api_error() {
        let tools = ContactTools::new(Some(Arc::new(StaticClient(json!({})))));
        let error = tools
            .call("get-contact", &arguments(json!({"contact_id": "c-1"})))
            .await
            .expect_err("missing contact");

        assert!(matches!(error, HandlerError::Api { .. }));
    }

    #[tokio::test]
    async fn live_search_summarizes_upstream_total() {
        let tools = ContactTools::new(Some(Arc::new(StaticClient(json!({
            "contacts": [{"id": "c-1", "name": "Ada", "email": "ada@example.com", "phone": "secret"}],
            "pagination": {"total_entries": 7, "total_pages": 7}
        })))));

        let output = tools
            .call("search-contacts", &arguments(json!({"per_page": 1})))
            .await
            .expect("search");

        assert_eq!(output.summary, "Found 7 contacts, showing 1 on page 1");
        assert!(output.data["contacts"][0].get("phone").is_none());
    }
}
