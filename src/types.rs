use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Hard cap on plan length.
pub const MAX_STEPS: usize = 8;

pub type Args = Map<String, Value>;

/// A caller's instruction. `confirm_token` empty means "not provided".
#[derive(Debug, Clone, Default)]
pub struct Command {
    pub text: String,
    pub user: String,
    pub dry_run: bool,
    pub confirm_token: String,
}

impl Command {
    pub fn new(text: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user: user.into(),
            ..Self::default()
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn confirmed_with(mut self, token: impl Into<String>) -> Self {
        self.confirm_token = token.into();
        self
    }

    pub fn has_confirmation(&self) -> bool {
        !self.confirm_token.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Analytics,
    StructuralChange,
    Reporting,
    Tasking,
    DocHelp,
    Auto,
}

impl Intent {
    const ALL: [Intent; 6] = [
        Self::Analytics,
        Self::StructuralChange,
        Self::Reporting,
        Self::Tasking,
        Self::DocHelp,
        Self::Auto,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analytics => "analytics",
            Self::StructuralChange => "structural_change",
            Self::Reporting => "reporting",
            Self::Tasking => "tasking",
            Self::DocHelp => "doc_help",
            Self::Auto => "auto",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|i| i.as_str() == raw)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub tool: String,
    #[serde(default)]
    pub args: Args,
}

impl Step {
    pub fn new(tool: impl Into<String>, args: Args) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub intent: Intent,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub confirm_required: bool,
}

impl Plan {
    pub fn new(intent: Intent, steps: Vec<Step>) -> Self {
        Self {
            intent,
            steps,
            risks: Vec::new(),
            confirm_required: false,
        }
    }

    pub fn with_risk(mut self, risk: impl Into<String>) -> Self {
        self.risks.push(risk.into());
        self
    }

    pub fn requiring_confirmation(mut self) -> Self {
        self.confirm_required = true;
        self
    }

    /// Caps the step count and forces confirmation for structural changes.
    /// Idempotent.
    pub fn enforce_invariants(mut self) -> Self {
        self.steps.truncate(MAX_STEPS);
        if self.intent == Intent::StructuralChange {
            self.confirm_required = true;
        }
        self
    }

    pub fn needs_confirmation(&self) -> bool {
        self.confirm_required || self.intent == Intent::StructuralChange
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    AwaitingConfirmation,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StepOutcome {
    Executed {
        step: usize,
        tool: String,
        result: Value,
    },
    Skipped {
        step: usize,
        tool: String,
        dry_run: bool,
        args: Args,
    },
}

impl StepOutcome {
    pub fn tool(&self) -> &str {
        match self {
            Self::Executed { tool, .. } | Self::Skipped { tool, .. } => tool,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Executed { result, .. } => Some(result),
            Self::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub status: Status,
    pub correlation_id: String,
    pub plan: Plan,
    pub results: Vec<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(tool: &str) -> Step {
        Step::new(tool, Args::new())
    }

    #[test]
    fn structural_change_always_requires_confirmation() {
        let plan = Plan::new(Intent::StructuralChange, vec![step("create_doctype")]);
        assert!(!plan.confirm_required);
        assert!(plan.needs_confirmation());
        assert!(plan.enforce_invariants().confirm_required);
    }

    #[test]
    fn enforce_invariants_caps_steps() {
        let steps = (0..12).map(|_| step("get_sales_stats")).collect();
        let plan = Plan::new(Intent::Analytics, steps).enforce_invariants();
        assert_eq!(plan.steps.len(), MAX_STEPS);
        assert!(!plan.confirm_required);
    }

    #[test]
    fn blank_confirm_token_is_not_a_confirmation() {
        assert!(!Command::new("x", "u").confirmed_with("  ").has_confirmation());
        assert!(Command::new("x", "u").confirmed_with("ok").has_confirmation());
    }

    #[test]
    fn skipped_outcome_serializes_dry_run_marker() {
        let mut args = Args::new();
        args.insert("subject".to_owned(), json!("Follow up"));
        let outcome = StepOutcome::Skipped {
            step: 2,
            tool: "create_task".to_owned(),
            dry_run: true,
            args,
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"step": 2, "tool": "create_task", "dry_run": true, "args": {"subject": "Follow up"}})
        );
    }

    #[test]
    fn intent_parse_accepts_known_names_only() {
        assert_eq!(Intent::parse("Structural_Change"), Some(Intent::StructuralChange));
        assert_eq!(Intent::parse("delete_everything"), None);
    }
}
