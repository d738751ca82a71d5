use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Preset {
    pub label: &'static str,
    pub prompt: &'static str,
    pub category: &'static str,
}

const fn preset(label: &'static str, prompt: &'static str, category: &'static str) -> Preset {
    Preset { label, prompt, category }
}

/// Curated management questions.
pub const PRESETS: &[Preset] = &[
    preset("Sales vs target (Today)", "sales today vs target vs same weekday last week by hour", "Sales"),
    preset("Pipeline coverage (MTD)", "pipeline coverage this month by stage; flag deals slipping >7 days", "Sales"),
    preset("Top customers (YTD)", "top 10 customers by revenue and gross margin this year", "Sales"),
    preset("Best selling month", "best selling month last 12 months", "Sales"),
    preset("New vs returning (L12M)", "sales by customer_type (new/returning) by month last 12 months", "Sales"),
    preset("Vendor spend (L12M)", "purchases by supplier last 12 months", "Purchasing"),
    preset("Lead time drift", "average PO to PR lead time by supplier vs last quarter", "Purchasing"),
    preset("Supplier scorecard", "supplier on-time %, price variance vs last 3 POs, and NCR count last 90 days", "Purchasing"),
    preset("Stock on hand", "stock by warehouse", "Inventory"),
    preset("Dead stock", "items with zero movement >120 days and current stock > 0", "Inventory"),
    preset("Margin by line (L12M)", "gross margin % by item_group and region last 12 months", "Inventory"),
    preset("Capacity & bottlenecks", "work center capacity utilization, WIP aging, bottlenecks this week", "Manufacturing"),
    preset("Returns & causes", "returns rate and top 5 root causes by item last quarter", "Quality"),
    preset("AR ageing owners", "accounts receivable aging with top 20 overdue and assigned owners", "Finance"),
    preset("Cash runway (90d)", "cash balance and 90-day runway projection from last 90 days burn", "Finance"),
    preset("Project margin", "project gross margin and variance vs estimate; list negative margin projects", "Projects"),
    preset("Support health", "CSAT trend, SLA breaches last 30 days, churn risk accounts from tickets", "Support"),
];

pub const PRO_TIPS: &[&str] = &[
    "Include the date window when it matters: \"from 2025-04-01 to 2025-06-30\", \"last month\", \"ytd\".",
    "Ask for the grouping you want: \"by month\", \"by item\", \"by region\", \"by supplier\".",
    "Use \"top N\" to keep long rankings short.",
    "Keep the model temperature low (LLM_TEMPERATURE=0.1) for stable plans.",
    "Start questions with how/what/why to search the documentation instead of the data.",
];

/// Presets grouped by category, in first-seen order.
pub fn by_category() -> Vec<(&'static str, Vec<&'static Preset>)> {
    let mut groups: Vec<(&'static str, Vec<&'static Preset>)> = Vec::new();
    for p in PRESETS {
        match groups.iter_mut().find(|(cat, _)| *cat == p.category) {
            Some((_, items)) => items.push(p),
            None => groups.push((p.category, vec![p])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_keep_first_seen_order() {
        let groups = by_category();
        assert_eq!(groups[0].0, "Sales");
        assert_eq!(groups[1].0, "Purchasing");
        assert_eq!(groups.iter().map(|(_, v)| v.len()).sum::<usize>(), PRESETS.len());
    }

    #[test]
    fn labels_are_unique() {
        let mut labels: Vec<_> = PRESETS.iter().map(|p| p.label).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), PRESETS.len());
    }

    #[test]
    fn data_presets_reach_the_data() {
        let today = chrono::NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        for p in PRESETS.iter().filter(|p| matches!(p.category, "Sales" | "Purchasing" | "Inventory")) {
            let route = crate::router::route(p.prompt, today);
            assert!(
                !matches!(route, crate::router::Route::DocHelp { .. }),
                "{} routes to documentation",
                p.label
            );
        }
    }
}
