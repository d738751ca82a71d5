use crate::dates::DateWindow;
use crate::tools::ToolName;
use crate::types::{Args, Intent, Plan, Step};
use chrono::NaiveDate;
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;

fn best_month_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(best|top|highest).*(selling|sales).*(month)")
            .unwrap_or_else(|e| panic!("bad fast path pattern: {e}"))
    })
}

/// Sales aggregation over the month-aligned trailing twelve months.
pub fn sales_by(by: &str, today: NaiveDate) -> Step {
    let window = DateWindow::trailing_months(today, 12);
    let mut args = Args::new();
    args.insert("by".into(), json!(by));
    args.insert("from_date".into(), json!(window.from_iso()));
    args.insert("to_date".into(), json!(window.to_iso()));
    Step::new(ToolName::GetSalesStats.as_str(), args)
}

/// Literal high-confidence phrasings that never need the planner.
pub fn fast_path(text: &str, today: NaiveDate) -> Option<Plan> {
    let lc = text.trim().to_lowercase();

    if best_month_pattern().is_match(&lc) || lc.contains("best selling month") {
        let plan = Plan::new(Intent::Analytics, vec![sales_by("month", today)])
            .with_risk("Assumes last 12 months; adjust if needed.");
        return Some(plan);
    }
    if lc.contains("top customers") {
        return Some(Plan::new(Intent::Analytics, vec![sales_by("customer", today)]));
    }
    if lc.contains("top items") || lc.contains("best sellers") {
        return Some(Plan::new(Intent::Analytics, vec![sales_by("item", today)]));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn best_selling_month_plan() {
        let plan = fast_path("What was our Best Selling Month?", today()).unwrap();
        assert_eq!(plan.intent, Intent::Analytics);
        assert!(!plan.confirm_required);
        assert_eq!(plan.risks, ["Assumes last 12 months; adjust if needed."]);
        assert_eq!(plan.steps.len(), 1);
        let args = &plan.steps[0].args;
        assert_eq!(args["by"], "month");
        assert_eq!(args["from_date"], "2023-04-01");
        assert_eq!(args["to_date"], "2024-03-15");
    }

    #[test]
    fn highest_sales_month_matches_the_pattern() {
        let plan = fast_path("which month had the highest sales this month vs last", today()).unwrap();
        assert_eq!(plan.steps[0].args["by"], "month");
    }

    #[test]
    fn customers_and_items() {
        assert_eq!(fast_path("top customers please", today()).unwrap().steps[0].args["by"], "customer");
        assert_eq!(fast_path("our best sellers", today()).unwrap().steps[0].args["by"], "item");
        assert!(fast_path("top customers", today()).unwrap().risks.is_empty());
    }

    #[test]
    fn other_text_has_no_fast_path() {
        assert!(fast_path("create a workflow for leave approval", today()).is_none());
        assert!(fast_path("top 5 customers", today()).is_none());
    }
}
