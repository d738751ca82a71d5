use crate::docs::{DocsLookup, DEFAULT_TOP_K};
use crate::error::{AgentError, PlanError};
use crate::llm::Completion;
use crate::planner;
use crate::router;
use crate::safety::{self, Gate, StepAction};
use crate::tools::{ToolName, ToolRegistry};
use crate::types::{Command, ExecutionResult, Intent, Plan, Status, StepOutcome};
use chrono::{Local, NaiveDate};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Plans and runs commands against a tool registry.
pub struct Agent {
    llm: Arc<dyn Completion>,
    tools: ToolRegistry,
    docs: Box<dyn DocsLookup>,
    docs_top_k: usize,
    today: Option<NaiveDate>,
}

impl Agent {
    pub fn new(llm: Arc<dyn Completion>, tools: ToolRegistry, docs: Box<dyn DocsLookup>) -> Self {
        Self {
            llm,
            tools,
            docs,
            docs_top_k: DEFAULT_TOP_K,
            today: None,
        }
    }

    /// Pins the date relative windows are computed from.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// How many documentation chunks a docs answer draws on.
    pub fn with_docs_top_k(mut self, k: usize) -> Self {
        self.docs_top_k = k.max(1);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Plan only, no tool calls.
    pub fn plan(&self, text: &str) -> Result<Plan, PlanError> {
        planner::plan(self.llm.as_ref(), text, self.today())
    }

    pub fn execute(&self, command: &Command) -> Result<ExecutionResult, AgentError> {
        self.execute_with(command, Uuid::new_v4().to_string())
    }

    fn execute_with(&self, command: &Command, correlation_id: String) -> Result<ExecutionResult, AgentError> {
        let span = info_span!("command", correlation_id = %correlation_id, user = %command.user);
        let _enter = span.enter();

        let plan = self.plan(&command.text)?;
        info!(intent = ?plan.intent, steps = plan.steps.len(), "planned");
        Ok(self.run(plan, command, correlation_id))
    }

    /// Runs a caller-built plan under the same gating as `execute`.
    pub fn execute_plan(&self, plan: Plan, command: &Command) -> ExecutionResult {
        let correlation_id = Uuid::new_v4().to_string();
        let span = info_span!("command", correlation_id = %correlation_id, user = %command.user);
        let _enter = span.enter();
        self.run(plan.enforce_invariants(), command, correlation_id)
    }

    /// Deterministic router first; the planner only sees what the router
    /// could not answer or anything that asks for a change.
    pub fn smart_execute(&self, command: &Command) -> Result<ExecutionResult, AgentError> {
        let correlation_id = Uuid::new_v4().to_string();
        match self.answer_directly(command, &correlation_id) {
            Some(output) => Ok(ExecutionResult {
                status: Status::Completed,
                correlation_id,
                plan: Plan::new(Intent::Auto, Vec::new()),
                results: vec![StepOutcome::Executed {
                    step: 1,
                    tool: "router".to_string(),
                    result: output,
                }],
                summary: None,
            }),
            None => self.execute_with(command, correlation_id),
        }
    }

    fn answer_directly(&self, command: &Command, correlation_id: &str) -> Option<Value> {
        let span = info_span!("command", correlation_id = %correlation_id, user = %command.user);
        let _enter = span.enter();

        let route = router::route(&command.text, self.today());
        if !router::answers_directly(&route, &command.text) {
            debug!(?route, "route needs planning");
            return None;
        }
        debug!(?route, "routed");
        match router::execute_route(&route, &self.tools, self.docs.as_ref(), self.docs_top_k) {
            Ok(output) if router::has_content(&output) => Some(output),
            Ok(_) => {
                debug!("router produced nothing; planning");
                None
            }
            Err(err) => {
                warn!(error = %err, "router failed; planning");
                None
            }
        }
    }

    fn run(&self, plan: Plan, command: &Command, correlation_id: String) -> ExecutionResult {
        if safety::assess(&plan, command) == Gate::AwaitConfirmation {
            info!("awaiting confirmation");
            return ExecutionResult {
                status: Status::AwaitingConfirmation,
                correlation_id,
                plan,
                results: Vec::new(),
                summary: None,
            };
        }

        let idempotency_token = Uuid::new_v4().to_string();
        let mut results = Vec::with_capacity(plan.steps.len());
        for (i, step) in plan.steps.iter().enumerate() {
            let n = i + 1;
            match safety::step_action(&step.tool, command.dry_run) {
                StepAction::SkipDryRun => {
                    debug!(step = n, tool = %step.tool, "skipped under dry run");
                    results.push(StepOutcome::Skipped {
                        step: n,
                        tool: step.tool.clone(),
                        dry_run: true,
                        args: step.args.clone(),
                    });
                }
                StepAction::Dispatch => {
                    let result = self.tools.dispatch(&step.tool, &step.args, &idempotency_token).into_payload();
                    if result.get("error").is_some() {
                        warn!(step = n, tool = %step.tool, error = %result["error"], "step failed");
                    } else {
                        debug!(step = n, tool = %step.tool, "step done");
                    }
                    results.push(StepOutcome::Executed {
                        step: n,
                        tool: step.tool.clone(),
                        result,
                    });
                }
            }
        }

        let summary = summarize(&results);
        ExecutionResult {
            status: Status::Completed,
            correlation_id,
            plan,
            results,
            summary,
        }
    }
}

fn number(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Names the best month from the first monthly sales aggregation.
pub fn summarize(results: &[StepOutcome]) -> Option<String> {
    results
        .iter()
        .filter(|r| r.tool() == ToolName::GetSalesStats.as_str())
        .filter_map(StepOutcome::result)
        .find_map(best_month)
}

fn best_month(data: &Value) -> Option<String> {
    let rows = data.get("rows")?.as_array()?;
    let first = rows.first()?.as_object()?;

    let (period_key, revenue_key) = if first.contains_key("period") && first.contains_key("revenue") {
        ("period", "revenue")
    } else if data.get("group_by").and_then(Value::as_str) == Some("month")
        && first.contains_key("label")
        && first.contains_key("total")
    {
        ("label", "total")
    } else {
        return None;
    };

    let best = rows
        .iter()
        .max_by(|a, b| {
            number(&a[revenue_key])
                .partial_cmp(&number(&b[revenue_key]))
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;

    let window = match (
        data.get("from_date").and_then(Value::as_str),
        data.get("to_date").and_then(Value::as_str),
    ) {
        (Some(from), Some(to)) => format!("{from} to {to}"),
        _ => "last 12 months".to_string(),
    };
    Some(format!(
        "Best selling month ({window}): {} • Revenue={}",
        display(&best[period_key]),
        display(&best[revenue_key])
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales(result: Value) -> StepOutcome {
        StepOutcome::Executed { step: 1, tool: "get_sales_stats".into(), result }
    }

    #[test]
    fn summary_names_the_highest_revenue_period() {
        let results = [sales(json!({"rows": [
            {"period": "2024-01", "revenue": 10},
            {"period": "2024-02", "revenue": 42.5},
        ]}))];
        assert_eq!(
            summarize(&results).as_deref(),
            Some("Best selling month (last 12 months): 2024-02 • Revenue=42.5")
        );
    }

    #[test]
    fn monthly_label_total_rows_also_summarize() {
        let results = [sales(json!({
            "group_by": "month", "from_date": "2023-04-01", "to_date": "2024-03-15",
            "rows": [{"label": "2023-11", "total": 900.0}, {"label": "2024-01", "total": 300.0}],
        }))];
        assert_eq!(
            summarize(&results).as_deref(),
            Some("Best selling month (2023-04-01 to 2024-03-15): 2023-11 • Revenue=900.0")
        );
    }

    #[test]
    fn non_monthly_or_failed_results_have_no_summary() {
        let by_customer = sales(json!({"group_by": "customer", "rows": [{"label": "Acme", "total": 1.0}]}));
        assert_eq!(summarize(&[by_customer]), None);
        assert_eq!(summarize(&[sales(json!({"error": "boom"}))]), None);
        let skipped = StepOutcome::Skipped { step: 1, tool: "get_sales_stats".into(), dry_run: true, args: Default::default() };
        assert_eq!(summarize(&[skipped]), None);
    }

    #[test]
    fn summary_skips_sales_results_of_another_shape() {
        let by_customer = sales(json!({"group_by": "customer", "rows": [{"label": "Acme", "total": 99.0}]}));
        let monthly = StepOutcome::Executed {
            step: 2,
            tool: "get_sales_stats".into(),
            result: json!({"rows": [{"period": "2024-01", "revenue": 5}, {"period": "2023-12", "revenue": 8}]}),
        };
        assert_eq!(
            summarize(&[by_customer, monthly]).as_deref(),
            Some("Best selling month (last 12 months): 2023-12 • Revenue=8")
        );
    }

    /// Shared buffer the log capture writes into.
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Reply(&'static str);

    impl Completion for Reply {
        fn complete(&self, _: &str, _: &str) -> Result<String, crate::error::LlmError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn one_correlation_id_spans_routing_and_planning() {
        let agent = Agent::new(
            Arc::new(Reply(r#"{"intent": "tasking", "steps": []}"#)),
            ToolRegistry::new(),
            Box::new(crate::docs::KeywordDocs::new(Vec::new())),
        )
        .with_today(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let result = tracing::subscriber::with_default(subscriber, || {
            agent.smart_execute(&Command::new("create a task to call Acme", "ops")).unwrap()
        });

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let ids: Vec<&str> = regex::Regex::new(r"correlation_id=([0-9a-f-]{36})")
            .unwrap()
            .captures_iter(&logs)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        assert!(logs.contains("route needs planning"), "{logs}");
        assert!(logs.contains("planned"), "{logs}");
        assert!(ids.len() >= 2, "{logs}");
        assert!(ids.iter().all(|id| *id == result.correlation_id), "{logs}");
    }
}
