use askerp::safety::mutating_steps;
use askerp::tools::store::Metric;
use askerp::{ExecutionResult, Plan, Status, StepOutcome};
use serde_json::Value;

const MAX_ROWS: usize = 50;

pub fn print_plan(plan: &Plan) {
    println!();
    println!("  intent: {}", plan.intent);

    for (i, step) in plan.steps.iter().enumerate() {
        let args = Value::Object(step.args.clone());
        if plan.steps.len() > 1 {
            println!("  {}. {} {}", i + 1, step.tool, args);
        } else {
            println!("  {} {}", step.tool, args);
        }
    }

    if mutating_steps(plan).next().is_some() {
        println!();
        println!("  warning: this plan changes business data");
    }

    for risk in &plan.risks {
        println!("  note: {}", risk);
    }
}

pub fn prompt_confirm() -> bool {
    println!("[y] run  [enter/q] cancel");

    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn print_rows(result: &Value) {
    if let Some(title) = result.get("title").and_then(Value::as_str) {
        println!("  {}", title);
    }
    if let (Some(from), Some(to)) = (
        result.get("from_date").and_then(Value::as_str),
        result.get("to_date").and_then(Value::as_str),
    ) {
        let widened = if result.get("widened").and_then(Value::as_bool) == Some(true) {
            " (widened: no data in the asked window)"
        } else {
            ""
        };
        println!("  {} .. {}{}", from, to, widened);
    }
    if let Some(answer) = result.get("answer").and_then(Value::as_str) {
        println!();
        println!("{}", answer);
        if let Some(sources) = result.get("sources").and_then(Value::as_array) {
            for s in sources {
                println!("  source: {}", display(s));
            }
        }
        return;
    }

    let Some(rows) = result.get("rows").and_then(Value::as_array) else {
        println!("  {}", result);
        return;
    };
    if rows.is_empty() {
        println!("  (no rows)");
        return;
    }
    for row in rows.iter().take(MAX_ROWS) {
        let line = match row {
            Value::Object(map) if map.contains_key("label") => {
                format!("{:<24} {}", display(&map["label"]), display(&map["total"]))
            }
            Value::Array(cells) => cells.iter().map(display).collect::<Vec<_>>().join("  "),
            other => other.to_string(),
        };
        println!("    {}", line);
    }
    if rows.len() > MAX_ROWS {
        println!("    ... [{} rows truncated] ...", rows.len() - MAX_ROWS);
    }
}

pub fn print_result(result: &ExecutionResult) {
    match result.status {
        Status::AwaitingConfirmation => {
            print_plan(&result.plan);
            println!();
            println!("  confirmation required");
            return;
        }
        Status::Completed => {}
    }

    for outcome in &result.results {
        println!();
        match outcome {
            StepOutcome::Skipped { step, tool, args, .. } => {
                println!("{}. {} (dry run, skipped) {}", step, tool, Value::Object(args.clone()));
            }
            StepOutcome::Executed { step, tool, result } => {
                println!("{}. {}", step, tool);
                match result.get("error").and_then(Value::as_str) {
                    Some(err) => println!("  error: {}", err),
                    None => print_rows(result),
                }
            }
        }
    }

    if let Some(summary) = &result.summary {
        println!();
        println!("{}", summary);
    }
    println!();
    println!("  id: {}", result.correlation_id);
}

pub fn print_metric(metric: &Metric) {
    let change = match metric.change_pct {
        Some(pct) => format!("{:+.1}%", pct),
        None => "n/a".to_string(),
    };
    println!("  {:<16} {:>14.2}  {:>8}", metric.name, metric.value, change);
    println!(
        "    {} .. {} vs {} .. {} ({:.2})",
        metric.period[0], metric.period[1], metric.compare_period[0], metric.compare_period[1], metric.previous
    );
}
