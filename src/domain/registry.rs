//! Handler interface and the static tool registration table
//!
//! The table is built once at startup and never mutated; resolving a tool is
//! a plain map lookup.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use rust_mcp_sdk::schema::Tool;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::domain::{
    contacts::{ContactTools, CreateContactTool, GetContactTool, SearchContactsTool},
    deals::{CreateDealTool, DealTools, GetDealTool, SearchDealsTool},
    leads::{EnrichLeadTool, LeadTools, SearchLeadsTool},
    sequences::{AddToSequenceTool, ListSequencesTool, SequenceTools},
};
use crate::upstream::CrmClient;

/// Failure kinds a handler may report. The dispatch core maps each kind to
/// a response error code without inspecting the message text.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("mock mode: {0}")]
    MockMode(String),
    #[error("api error: {message}")]
    Api { status: Option<u16>, message: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameters(message.into())
    }

    pub fn mock_mode(operation: &str) -> Self {
        Self::MockMode(format!(
            "{operation} requires a configured CRM API key; the server is running in mock mode"
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub summary: String,
    pub data: Value,
}

impl ToolOutput {
    pub fn new(summary: impl Into<String>, data: Value) -> Self {
        Self {
            summary: summary.into(),
            data,
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        operation: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolOutput, HandlerError>;
}

pub struct ToolRegistration {
    pub name: &'static str,
    pub required: &'static [&'static str],
    pub definition: Tool,
    pub handler: Arc<dyn ToolHandler>,
}

pub struct ToolRegistry {
    entries: Vec<ToolRegistration>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    /// Builds a registry from `entries`, keeping the first registration of
    /// any duplicated name.
    pub fn new(entries: Vec<ToolRegistration>) -> Self {
        let mut kept = Vec::with_capacity(entries.len());
        let mut index = HashMap::with_capacity(entries.len());

        for entry in entries {
            if index.contains_key(entry.name) {
                warn!(tool = entry.name, "duplicate tool registration ignored");
                continue;
            }
            index.insert(entry.name, kept.len());
            kept.push(entry);
        }

        Self {
            entries: kept,
            index,
        }
    }

    /// The fixed catalog. Without a `client` every group runs in mock mode.
    pub fn standard(client: Option<Arc<dyn CrmClient>>) -> Self {
        let leads: Arc<dyn ToolHandler> = Arc::new(LeadTools::new(client.clone()));
        let contacts: Arc<dyn ToolHandler> = Arc::new(ContactTools::new(client.clone()));
        let deals: Arc<dyn ToolHandler> = Arc::new(DealTools::new(client.clone()));
        let sequences: Arc<dyn ToolHandler> = Arc::new(SequenceTools::new(client));

        Self::new(vec![
            ToolRegistration {
                name: "search-leads",
                required: &[],
                definition: SearchLeadsTool::tool(),
                handler: leads.clone(),
            },
            ToolRegistration {
                name: "enrich-lead",
                required: &["email"],
                definition: EnrichLeadTool::tool(),
                handler: leads,
            },
            ToolRegistration {
                name: "search-contacts",
                required: &[],
                definition: SearchContactsTool::tool(),
                handler: contacts.clone(),
            },
            ToolRegistration {
                name: "get-contact",
                required: &["contact_id"],
                definition: GetContactTool::tool(),
                handler: contacts.clone(),
            },
            ToolRegistration {
                name: "create-contact",
                required: &["first_name", "last_name"],
                definition: CreateContactTool::tool(),
                handler: contacts,
            },
            ToolRegistration {
                name: "search-deals",
                required: &[],
                definition: SearchDealsTool::tool(),
                handler: deals.clone(),
            },
            ToolRegistration {
                name: "get-deal",
                required: &["deal_id"],
                definition: GetDealTool::tool(),
                handler: deals.clone(),
            },
            ToolRegistration {
                name: "create-deal",
                required: &["name"],
                definition: CreateDealTool::tool(),
                handler: deals,
            },
            ToolRegistration {
                name: "list-sequences",
                required: &[],
                definition: ListSequencesTool::tool(),
                handler: sequences.clone(),
            },
            ToolRegistration {
                name: "add-to-sequence",
                required: &["sequence_id", "contact_ids"],
                definition: AddToSequenceTool::tool(),
                handler: sequences,
            },
        ])
    }

    pub fn resolve(&self, name: &str) -> Option<&ToolRegistration> {
        self.index.get(name).map(|position| &self.entries[*position])
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|entry| entry.name)
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.entries
            .iter()
            .map(|entry| entry.definition.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deserializes a tool's argument bag into its typed argument struct.
pub fn parse_arguments<T: DeserializeOwned>(
    operation: &str,
    arguments: &Map<String, Value>,
) -> Result<T, HandlerError> {
    serde_json::from_value(Value::Object(arguments.clone()))
        .map_err(|err| HandlerError::invalid(format!("invalid arguments for {operation}: {err}")))
}
