use crate::dates::DateWindow;
use crate::error::{LlmError, PlanError, PlanParseError};
use crate::llm::Completion;
use crate::router::fastpath::{fast_path, sales_by};
use crate::tools::ToolName;
use crate::types::{Args, Intent, Plan, Step, MAX_STEPS};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

pub const FALLBACK_RISK: &str = "planner_fallback";

/// Instruction sent with every planning request.
pub fn system_prompt() -> String {
    let tools = ToolName::ALL.map(ToolName::as_str).join(", ");
    format!(
        r#"You are an ERP agent planner.
ONLY return machine-executable tool calls; DO NOT describe UI navigation.
Available tools: {tools}.
Return STRICT JSON: {{"intent": <one of: analytics|structural_change|reporting|tasking>, "steps": [{{"tool": <tool_name>, "args": {{...}}}}], "risks": ["..."], "confirm_required": <true|false>}}.
Limit steps<={MAX_STEPS}. Use safe defaults. No prose, no UI steps."#
    )
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    intent: Option<String>,
    steps: Vec<Value>,
    #[serde(default)]
    risks: Vec<Value>,
    #[serde(default)]
    confirm_required: bool,
}

fn json_object(reply: &str) -> Result<&str, PlanParseError> {
    let reply = reply.trim();
    match (reply.find('{'), reply.rfind('}')) {
        (Some(s), Some(e)) if e > s => Ok(&reply[s..=e]),
        _ => Err(PlanParseError::NoJson),
    }
}

/// Decodes a planner reply. Steps without a tool name are dropped and
/// non-object args become `{}`; nothing else is repaired.
pub fn parse_plan(reply: &str) -> Result<Plan, PlanParseError> {
    let raw: RawPlan = serde_json::from_str(json_object(reply)?)?;

    let intent = match raw.intent.as_deref() {
        None => Intent::Analytics,
        Some(name) => Intent::parse(name).ok_or_else(|| PlanParseError::UnknownIntent(name.to_string()))?,
    };

    let steps = raw
        .steps
        .into_iter()
        .filter_map(|step| {
            let tool = step.get("tool")?.as_str()?.trim();
            if tool.is_empty() {
                return None;
            }
            let args = step.get("args").and_then(Value::as_object).cloned().unwrap_or_default();
            Some(Step::new(tool, args))
        })
        .collect();

    Ok(Plan {
        intent,
        steps,
        risks: raw.risks.iter().filter_map(|r| r.as_str().map(String::from)).collect(),
        confirm_required: raw.confirm_required,
    })
}

/// Keeps catalog tools only, fills aggregation defaults, then caps the
/// plan and forces confirmation for structural changes.
pub fn normalize(mut plan: Plan, today: NaiveDate) -> Plan {
    let window = DateWindow::trailing_months(today, 12);
    plan.steps.retain(|step| {
        let known = step.tool.parse::<ToolName>().is_ok();
        if !known {
            warn!(tool = %step.tool, "dropping step with unknown tool");
        }
        known
    });

    for step in &mut plan.steps {
        if matches!(
            step.tool.parse::<ToolName>(),
            Ok(ToolName::GetSalesStats | ToolName::GetPurchaseStats)
        ) {
            fill_default(&mut step.args, "by", json!("month"));
            fill_default(&mut step.args, "from_date", json!(window.from_iso()));
            fill_default(&mut step.args, "to_date", json!(window.to_iso()));
        }
    }

    if plan.steps.len() > MAX_STEPS {
        warn!(steps = plan.steps.len(), "truncating plan to {MAX_STEPS} steps");
    }
    plan.enforce_invariants()
}

fn fill_default(args: &mut Args, key: &str, value: Value) {
    args.entry(key).or_insert(value);
}

/// Sales by month over the trailing twelve months.
pub fn fallback_plan(today: NaiveDate) -> Plan {
    Plan::new(Intent::Analytics, vec![sales_by("month", today)]).with_risk(FALLBACK_RISK)
}

/// Fast path first, then the model. Anything short of an open circuit
/// degrades to the fallback plan.
pub fn plan(llm: &dyn Completion, text: &str, today: NaiveDate) -> Result<Plan, PlanError> {
    if let Some(plan) = fast_path(text, today) {
        debug!("fast path matched");
        return Ok(plan);
    }

    match llm.complete(&system_prompt(), text) {
        Ok(reply) => match parse_plan(&reply) {
            Ok(parsed) => Ok(normalize(parsed, today)),
            Err(err) => {
                warn!(error = %err, "planner reply rejected; using fallback plan");
                Ok(fallback_plan(today))
            }
        },
        Err(LlmError::CircuitOpen) => Err(PlanError::CircuitOpen),
        Err(LlmError::Backend(err)) => {
            warn!(error = %err, "planner unavailable; using fallback plan");
            Ok(fallback_plan(today))
        }
    }
}
