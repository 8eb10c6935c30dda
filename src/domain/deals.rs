//! Deal (opportunity) tools: `search-deals`, `get-deal`, and `create-deal`

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_mcp_sdk::macros;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::{
    mock,
    registry::{parse_arguments, HandlerError, ToolHandler, ToolOutput},
    utils::{
        clean_text, normalize_page, normalize_per_page, pagination, pick, records, require_text,
        validate_identifier,
    },
};
use crate::upstream::CrmClient;

const DEAL_FIELDS: [&str; 7] = [
    "id",
    "name",
    "amount",
    "opportunity_stage_id",
    "owner_id",
    "account_id",
    "closed_date",
];

#[macros::mcp_tool(name = "search-deals", description = "Search deals in the CRM pipeline")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct SearchDealsTool {
    pub q_name: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[macros::mcp_tool(name = "get-deal", description = "Fetch a single deal by id")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetDealTool {
    pub deal_id: String,
}

#[macros::mcp_tool(name = "create-deal", description = "Create a new deal in the CRM pipeline")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateDealTool {
    pub name: String,
    pub amount: Option<f64>,
    pub account_id: Option<String>,
    pub owner_id: Option<String>,
    pub opportunity_stage_id: Option<String>,
    pub closed_date: Option<String>,
}

pub struct DealTools {
    client: Option<Arc<dyn CrmClient>>,
}

impl DealTools {
    pub fn new(client: Option<Arc<dyn CrmClient>>) -> Self {
        Self { client }
    }

    async fn search(&self, arguments: &Map<String, Value>) -> Result<ToolOutput, HandlerError> {
        let params: SearchDealsTool = parse_arguments("search-deals", arguments)?;
        let name = clean_text(params.q_name);
        let page = normalize_page(params.page);
        let per_page = normalize_per_page(params.per_page)?;

        let Some(client) = self.client.as_ref() else {
            let deals = mock::filter_by_name(mock::deals(), name.as_deref());
            let returned = deals.len();
            return Ok(ToolOutput::new(
                format!("Found {returned} deals ({})", mock::MOCK_NOTICE),
                json!({
                    "deals": deals,
                    "pagination": pagination(&Value::Null, page, per_page, returned),
                    "mock": true,
                }),
            ));
        };

        let mut query = vec![("page", page.to_string()), ("per_page", per_page.to_string())];
        if let Some(name) = name {
            query.push(("q_name", name));
        }

        let response = client.get("opportunities/search", &query).await?;
        let deals = records(&response, "opportunities")
            .iter()
            .map(|deal| pick(deal, &DEAL_FIELDS))
            .collect::<Vec<_>>();
        let pagination = pagination(&response, page, per_page, deals.len());

        Ok(ToolOutput::new(
            format!(
                "Found {} deals, showing {} on page {page}",
                pagination["total_entries"],
                deals.len()
            ),
            json!({ "deals": deals, "pagination": pagination }),
        ))
    }

    async fn get(&self, arguments: &Map<String, Value>) -> Result<ToolOutput, HandlerError> {
        let params: GetDealTool = parse_arguments("get-deal", arguments)?;
        let deal_id = validate_identifier("deal_id", &params.deal_id)?;

        let Some(client) = self.client.as_ref() else {
            return Ok(ToolOutput::new(
                format!("Fetched deal {deal_id} ({})", mock::MOCK_NOTICE),
                json!({ "deal": mock::deal(&deal_id), "mock": true }),
            ));
        };

        let response = client.get(&format!("opportunities/{deal_id}"), &[]).await?;
        let deal = response
            .get("opportunity")
            .filter(|deal| !deal.is_null())
            .ok_or_else(|| HandlerError::Api {
                status: None,
                message: format!("deal {deal_id} was not found"),
            })?;

        Ok(ToolOutput::new(
            format!("Fetched deal {deal_id}"),
            json!({ "deal": pick(deal, &DEAL_FIELDS) }),
        ))
    }

    async fn create(&self, arguments: &Map<String, Value>) -> Result<ToolOutput, HandlerError> {
        let params: CreateDealTool = parse_arguments("create-deal", arguments)?;
        let body = build_create_body(params)?;

        let Some(client) = self.client.as_ref() else {
            return Err(HandlerError::mock_mode("create-deal"));
        };

        let response = client.post("opportunities", body).await?;
        let deal = response.get("opportunity").cloned().unwrap_or(Value::Null);
        let created = pick(&deal, &DEAL_FIELDS);

        Ok(ToolOutput::new(
            format!(
                "Created deal {}",
                created["name"].as_str().unwrap_or("(unnamed)")
            ),
            json!({ "deal": created }),
        ))
    }
}

fn build_create_body(params: CreateDealTool) -> Result<Value, HandlerError> {
    let name = require_text("name", &params.name)?;
    let mut body = json!({ "name": name });

    if let Some(amount) = params.amount {
        if !amount.is_finite() || amount < 0.0 {
            return Err(HandlerError::invalid("amount must be a non-negative number"));
        }
        body["amount"] = json!(amount);
    }

    for (key, value) in [
        ("account_id", params.account_id),
        ("owner_id", params.owner_id),
        ("opportunity_stage_id", params.opportunity_stage_id),
    ] {
        if let Some(value) = clean_text(value) {
            body[key] = json!(validate_identifier(key, &value)?);
        }
    }

    if let Some(closed_date) = clean_text(params.closed_date) {
        NaiveDate::parse_from_str(&closed_date, "%Y-%m-%d")
            .map_err(|_| HandlerError::invalid("closed_date must be formatted as YYYY-MM-DD"))?;
        body["closed_date"] = json!(closed_date);
    }

    Ok(body)
}

#[async_trait]
impl ToolHandler for DealTools {
    async fn call(
        &self,
        operation: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolOutput, HandlerError> {
        match operation {
            "search-deals" => self.search(arguments).await,
            "get-deal" => self.get(arguments).await,
            "create-deal" => self.create(arguments).await,
            other => Err(HandlerError::Internal(format!(
                "deal tools cannot handle operation {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_params(amount: Option<f64>, closed_date: Option<&str>) -> CreateDealTool {
        CreateDealTool {
            name: "Expansion".to_string(),
            amount,
            account_id: None,
            owner_id: None,
            opportunity_stage_id: None,
            closed_date: closed_date.map(str::to_string),
        }
    }

    #[test]
    fn create_body_rejects_negative_amount() {
        let error = build_create_body(create_params(Some(-1.0), None)).expect_err("negative");
        assert!(matches!(error, HandlerError::InvalidParameters(_)));
    }

    #[test]
    fn create_body_rejects_malformed_date() {
        let error =
            build_create_body(create_params(None, Some("31/12/2026"))).expect_err("bad date");
        assert!(matches!(error, HandlerError::InvalidParameters(ref message) if message.contains("YYYY-MM-DD")));
    }

    #[test]
    fn create_body_includes_validated_fields() {
        let body = build_create_body(create_params(Some(1500.0), Some("2026-12-31")))
            .expect("valid body");
        assert_eq!(body["name"], json!("Expansion"));
        assert_eq!(body["amount"], json!(1500.0));
        assert_eq!(body["closed_date"], json!("2026-12-31"));
    }

    #[tokio::test]
    async fn mock_get_deal_returns_requested_id() {
        let tools = DealTools::new(None);
        let arguments = json!({"deal_id": "d-77"});
        let output = tools
            .call("get-deal", arguments.as_object().expect("object"))
            .await
            .expect("mock deal");

        assert_eq!(output.data["deal"]["id"], json!("d-77"));
        assert_eq!(output.data["mock"], json!(true));
    }

    #[tokio::test]
    async fn create_deal_is_unavailable_in_mock_mode() {
        let tools = DealTools::new(None);
        let arguments = json!({"name": "Pilot"});
        let error = tools
            .call("create-deal", arguments.as_object().expect("object"))
            .await
            .expect_err("mock mode");

        assert!(matches!(error, HandlerError::MockMode(_)));
    }
}
