//! Lead prospecting tools: `search-leads` and `enrich-lead`

use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::macros;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::{
    mock,
    registry::{parse_arguments, HandlerError, ToolHandler, ToolOutput},
    utils::{
        clean_list, clean_text, normalize_domain, normalize_page, normalize_per_page, pagination,
        records, validate_email,
    },
};
use crate::upstream::CrmClient;

pub const VALID_SENIORITIES: [&str; 11] = [
    "owner", "founder", "c_suite", "partner", "vp", "head", "director", "manager", "senior",
    "entry", "intern",
];

#[macros::mcp_tool(
    name = "search-leads",
    description = "Search the people database for prospective leads. At least one criterion is required."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct SearchLeadsTool {
    pub person_titles: Option<Vec<String>>,
    pub person_locations: Option<Vec<String>>,
    pub person_seniorities: Option<Vec<String>>,
    pub organization_domains: Option<Vec<String>>,
    pub q_keywords: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[macros::mcp_tool(
    name = "enrich-lead",
    description = "Enrich a person record from an email address"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct EnrichLeadTool {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization_name: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
struct LeadCriteria {
    person_titles: Vec<String>,
    person_locations: Vec<String>,
    person_seniorities: Vec<String>,
    organization_domains: Vec<String>,
    q_keywords: Option<String>,
}

impl LeadCriteria {
    fn is_empty(&self) -> bool {
        self.person_titles.is_empty()
            && self.person_locations.is_empty()
            && self.person_seniorities.is_empty()
            && self.organization_domains.is_empty()
            && self.q_keywords.is_none()
    }
}

fn build_criteria(params: &SearchLeadsTool) -> Result<LeadCriteria, HandlerError> {
    let person_seniorities = clean_list(params.person_seniorities.clone())
        .into_iter()
        .map(|value| value.to_ascii_lowercase())
        .map(|value| {
            if VALID_SENIORITIES.contains(&value.as_str()) {
                Ok(value)
            } else {
                Err(HandlerError::invalid(format!(
                    "person_seniorities must be drawn from: {}",
                    VALID_SENIORITIES.join(", ")
                )))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let organization_domains = clean_list(params.organization_domains.clone())
        .iter()
        .map(|domain| normalize_domain(domain))
        .collect::<Result<Vec<_>, _>>()?;

    let criteria = LeadCriteria {
        person_titles: clean_list(params.person_titles.clone()),
        person_locations: clean_list(params.person_locations.clone()),
        person_seniorities,
        organization_domains,
        q_keywords: clean_text(params.q_keywords.clone()),
    };

    if criteria.is_empty() {
        return Err(HandlerError::invalid(
            "At least one search criterion is required: person_titles, person_locations, \
             person_seniorities, organization_domains, or q_keywords",
        ));
    }

    Ok(criteria)
}

fn summarize_person(person: &Value) -> Value {
    let organization = person.get("organization");
    json!({
        "id": person.get("id"),
        "name": person.get("name"),
        "title": person.get("title"),
        "seniority": person.get("seniority"),
        "email": person.get("email"),
        "linkedin_url": person.get("linkedin_url"),
        "organization": organization.and_then(|org| org.get("name")),
        "organization_domain": organization.and_then(|org| org.get("primary_domain")),
        "city": person.get("city"),
        "country": person.get("country"),
    })
}

pub struct LeadTools {
    client: Option<Arc<dyn CrmClient>>,
}

impl LeadTools {
    pub fn new(client: Option<Arc<dyn CrmClient>>) -> Self {
        Self { client }
    }

    async fn search_leads(&self, arguments: &Map<String, Value>) -> Result<ToolOutput, HandlerError> {
        let params: SearchLeadsTool = parse_arguments("search-leads", arguments)?;
        let criteria = build_criteria(&params)?;
        let page = normalize_page(params.page);
        let per_page = normalize_per_page(params.per_page)?;

        let Some(client) = self.client.as_ref() else {
            let leads = mock::filter_by_name(mock::leads(), criteria.q_keywords.as_deref());
            let returned = leads.len();
            return Ok(ToolOutput::new(
                format!("Found {returned} leads ({})", mock::MOCK_NOTICE),
                json!({
                    "leads": leads,
                    "pagination": pagination(&Value::Null, page, per_page, returned),
                    "mock": true,
                }),
            ));
        };

        let mut body = json!({ "page": page, "per_page": per_page });
        if !criteria.person_titles.is_empty() {
            body["person_titles"] = json!(criteria.person_titles);
        }
        if !criteria.person_locations.is_empty() {
            body["person_locations"] = json!(criteria.person_locations);
        }
        if !criteria.person_seniorities.is_empty() {
            body["person_seniorities"] = json!(criteria.person_seniorities);
        }
        if !criteria.organization_domains.is_empty() {
            body["q_organization_domains_list"] = json!(criteria.organization_domains);
        }
        if let Some(keywords) = criteria.q_keywords.as_ref() {
            body["q_keywords"] = json!(keywords);
        }

        let response = client.post("mixed_people/search", body).await?;
        let leads = records(&response, "people")
            .iter()
            .map(summarize_person)
            .collect::<Vec<_>>();
        let pagination = pagination(&response, page, per_page, leads.len());
        let total = pagination["total_entries"].as_u64().unwrap_or_default();

        Ok(ToolOutput::new(
            format!("Found {total} leads, showing {} on page {page}", leads.len()),
            json!({ "leads": leads, "pagination": pagination }),
        ))
    }

    async fn enrich_lead(&self, arguments: &Map<String, Value>) -> Result<ToolOutput, HandlerError> {
        let params: EnrichLeadTool = parse_arguments("enrich-lead", arguments)?;
        let email = validate_email(&params.email)?;

        let Some(client) = self.client.as_ref() else {
            return Ok(ToolOutput::new(
                format!("Enriched {email} ({})", mock::MOCK_NOTICE),
                json!({ "person": mock::person(&email), "mock": true }),
            ));
        };

        let mut body = json!({ "email": email });
        for (key, value) in [
            ("first_name", clean_text(params.first_name)),
            ("last_name", clean_text(params.last_name)),
            ("organization_name", clean_text(params.organization_name)),
        ] {
            if let Some(value) = value {
                body[key] = json!(value);
            }
        }

        let response = client.post("people/match", body).await?;
        match response.get("person").filter(|person| !person.is_null()) {
            Some(person) => Ok(ToolOutput::new(
                format!("Enriched {email}"),
                json!({ "person": summarize_person(person) }),
            )),
            None => Ok(ToolOutput::new(
                format!("No match found for {email}"),
                json!({ "person": null }),
            )),
        }
    }
}

#[async_trait]
impl ToolHandler for LeadTools {
    async fn call(
        &self,
        operation: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolOutput, HandlerError> {
        match operation {
            "search-leads" => self.search_leads(arguments).await,
            "enrich-lead" => self.enrich_lead(arguments).await,
            other => Err(HandlerError::Internal(format!(
                "lead tools cannot handle operation {other}"
            ))),
        }
    }
}
