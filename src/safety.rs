use crate::tools::is_read_only;
use crate::types::{Command, Plan, Step};

/// Whether a plan may run as asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    AwaitConfirmation,
}

/// What happens to one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Dispatch,
    SkipDryRun,
}

/// A plan that needs confirmation waits unless the caller confirmed it or
/// only asked for a dry run.
pub fn assess(plan: &Plan, command: &Command) -> Gate {
    if plan.needs_confirmation() && !command.has_confirmation() && !command.dry_run {
        Gate::AwaitConfirmation
    } else {
        Gate::Proceed
    }
}

/// Under dry run only read-only catalog tools are dispatched.
pub fn step_action(tool: &str, dry_run: bool) -> StepAction {
    if dry_run && !is_read_only(tool) {
        StepAction::SkipDryRun
    } else {
        StepAction::Dispatch
    }
}

/// Steps that would change business data.
pub fn mutating_steps(plan: &Plan) -> impl Iterator<Item = &Step> {
    plan.steps.iter().filter(|s| !is_read_only(&s.tool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Args, Intent};

    fn plan(intent: Intent, tools: &[&str]) -> Plan {
        Plan::new(intent, tools.iter().map(|t| Step::new(*t, Args::new())).collect())
    }

    #[test]
    fn structural_change_waits_without_a_token() {
        let p = plan(Intent::StructuralChange, &["create_doctype"]);
        assert_eq!(assess(&p, &Command::new("x", "u")), Gate::AwaitConfirmation);
        assert_eq!(assess(&p, &Command::new("x", "u").confirmed_with("yes")), Gate::Proceed);
        assert_eq!(assess(&p, &Command::new("x", "u").dry_run(true)), Gate::Proceed);
    }

    #[test]
    fn explicit_confirm_flag_is_honoured() {
        let p = plan(Intent::Tasking, &["create_task"]).requiring_confirmation();
        assert_eq!(assess(&p, &Command::new("x", "u").confirmed_with(" ")), Gate::AwaitConfirmation);
        let read = plan(Intent::Analytics, &["get_sales_stats"]);
        assert_eq!(assess(&read, &Command::new("x", "u")), Gate::Proceed);
    }

    #[test]
    fn dry_run_skips_writes_and_unknown_tools() {
        assert_eq!(step_action("run_sql", true), StepAction::Dispatch);
        assert_eq!(step_action("create_task", true), StepAction::SkipDryRun);
        assert_eq!(step_action("mystery", true), StepAction::SkipDryRun);
        assert_eq!(step_action("create_task", false), StepAction::Dispatch);
    }

    #[test]
    fn mutating_steps_are_listed_in_order() {
        let p = plan(Intent::Tasking, &["get_sales_stats", "create_task", "enqueue_background_job"]);
        let tools: Vec<_> = mutating_steps(&p).map(|s| s.tool.as_str()).collect();
        assert_eq!(tools, ["create_task", "enqueue_background_job"]);
    }
}
