//! Named operations the execution engine may dispatch to.

pub mod store;

use crate::error::ToolError;
use crate::types::Args;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Whether a tool may run during a dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    Mutating,
}

/// The fixed tool catalog the planner is allowed to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    GetSalesStats,
    GetPurchaseStats,
    GetInventorySnapshot,
    RunReport,
    RunSql,
    CreateDoctype,
    UpdateDoctype,
    CreateWorkflow,
    CreateQueryReport,
    CreateScriptReport,
    CreateTask,
    EnqueueBackgroundJob,
}

impl ToolName {
    pub const ALL: [ToolName; 12] = [
        Self::GetSalesStats,
        Self::GetPurchaseStats,
        Self::GetInventorySnapshot,
        Self::RunReport,
        Self::RunSql,
        Self::CreateDoctype,
        Self::UpdateDoctype,
        Self::CreateWorkflow,
        Self::CreateQueryReport,
        Self::CreateScriptReport,
        Self::CreateTask,
        Self::EnqueueBackgroundJob,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetSalesStats => "get_sales_stats",
            Self::GetPurchaseStats => "get_purchase_stats",
            Self::GetInventorySnapshot => "get_inventory_snapshot",
            Self::RunReport => "run_report",
            Self::RunSql => "run_sql",
            Self::CreateDoctype => "create_doctype",
            Self::UpdateDoctype => "update_doctype",
            Self::CreateWorkflow => "create_workflow",
            Self::CreateQueryReport => "create_query_report",
            Self::CreateScriptReport => "create_script_report",
            Self::CreateTask => "create_task",
            Self::EnqueueBackgroundJob => "enqueue_background_job",
        }
    }

    pub fn access(self) -> Access {
        match self {
            Self::GetSalesStats
            | Self::GetPurchaseStats
            | Self::GetInventorySnapshot
            | Self::RunReport
            | Self::RunSql => Access::ReadOnly,
            _ => Access::Mutating,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| format!("unknown tool {s}"))
    }
}

/// Only catalog names known to be read-only are safe under dry run;
/// anything else is treated as mutating.
pub fn is_read_only(tool: &str) -> bool {
    tool.parse::<ToolName>()
        .map(|t| t.access() == Access::ReadOnly)
        .unwrap_or(false)
}

/// A single request/response operation. Mutating handlers receive the
/// command's idempotency token and must not repeat an effect for a token
/// they have already seen.
pub trait ToolHandler: Send + Sync {
    fn call(&self, args: &Args, idempotency_token: Option<&str>) -> Result<Value, ToolError>;
}

impl<F> ToolHandler for F
where
    F: Fn(&Args, Option<&str>) -> Result<Value, ToolError> + Send + Sync,
{
    fn call(&self, args: &Args, idempotency_token: Option<&str>) -> Result<Value, ToolError> {
        self(args, idempotency_token)
    }
}

/// Outcome of a registry lookup plus call.
#[derive(Debug)]
pub enum Dispatch {
    Ok(Value),
    Failed(ToolError),
    UnknownTool(String),
}

impl Dispatch {
    /// Payload recorded in the step outcome.
    pub fn into_payload(self) -> Value {
        match self {
            Self::Ok(value) => value,
            Self::Failed(err) => json!({ "error": err.to_string() }),
            Self::UnknownTool(name) => json!({ "error": format!("unknown tool {name}") }),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Box<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, name: ToolName, handler: H)
    where
        H: ToolHandler + 'static,
    {
        self.handlers.insert(name.as_str().to_string(), Box::new(handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Looks up `name` and calls it. Read-only tools never see the token.
    pub fn dispatch(&self, name: &str, args: &Args, idempotency_token: &str) -> Dispatch {
        let Some(handler) = self.handlers.get(name) else {
            return Dispatch::UnknownTool(name.to_string());
        };
        let token = if is_read_only(name) {
            None
        } else {
            Some(idempotency_token)
        };
        match handler.call(args, token) {
            Ok(value) => Dispatch::Ok(value),
            Err(err) => Dispatch::Failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn catalog_round_trips_names() {
        for tool in ToolName::ALL {
            assert_eq!(tool.as_str().parse::<ToolName>(), Ok(tool));
        }
        assert!("drop_database".parse::<ToolName>().is_err());
    }

    #[test]
    fn read_only_set_matches_query_tools() {
        let read_only: Vec<_> = ToolName::ALL
            .into_iter()
            .filter(|t| t.access() == Access::ReadOnly)
            .map(ToolName::as_str)
            .collect();
        assert_eq!(
            read_only,
            ["get_sales_stats", "get_purchase_stats", "get_inventory_snapshot", "run_report", "run_sql"]
        );
        assert!(!is_read_only("something_new"));
    }

    #[test]
    fn unknown_tool_is_a_typed_result() {
        let registry = ToolRegistry::new();
        let payload = registry.dispatch("teleport", &Args::new(), "tok").into_payload();
        assert_eq!(payload, json!({"error": "unknown tool teleport"}));
    }

    #[test]
    fn only_mutating_tools_receive_the_token() {
        let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::default();
        let mut registry = ToolRegistry::new();
        for name in [ToolName::GetSalesStats, ToolName::CreateTask] {
            let seen = Arc::clone(&seen);
            registry.register(name, move |_: &Args, token: Option<&str>| -> Result<Value, ToolError> {
                seen.lock().unwrap().push(token.map(str::to_owned));
                Ok(json!({}))
            });
        }

        registry.dispatch("get_sales_stats", &Args::new(), "tok-1");
        registry.dispatch("create_task", &Args::new(), "tok-1");

        assert_eq!(*seen.lock().unwrap(), vec![None, Some("tok-1".to_owned())]);
    }

    #[test]
    fn handler_errors_become_error_payloads() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolName::RunSql, |_: &Args, _: Option<&str>| -> Result<Value, ToolError> {
            Err(ToolError::MissingArgument("sql".to_owned()))
        });
        let payload = registry.dispatch("run_sql", &Args::new(), "t").into_payload();
        assert_eq!(payload, json!({"error": "missing argument `sql`"}));
    }
}
