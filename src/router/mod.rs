//! Deterministic routing of common business questions to a single tool
//! call, without a model in the loop.

pub mod fastpath;

use crate::dates::{detect_window, DateWindow};
use crate::docs::DocsLookup;
use crate::error::ToolError;
use crate::tools::{Dispatch, ToolName, ToolRegistry};
use crate::types::{Args, Intent, Step};
use chrono::NaiveDate;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;
use tracing::{debug, info};

const MAX_TOP_N: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Sales,
    Purchase,
    Inventory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Month,
    Customer,
    Item,
    Region,
    Supplier,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Month => "month",
            Self::Customer => "customer",
            Self::Item => "item",
            Self::Region => "region",
            Self::Supplier => "supplier",
        }
    }

    /// Grouping label the analytics reports expect.
    pub fn report_label(self) -> &'static str {
        match self {
            Self::Month => "Month",
            Self::Customer => "Customer",
            Self::Item => "Item Code",
            Self::Region => "Territory",
            Self::Supplier => "Supplier",
        }
    }
}

struct Lexicon {
    sales: Regex,
    purchase: Regex,
    inventory: Regex,
    dimensions: [(Dimension, Regex); 5],
    top_n: Regex,
    docs: Regex,
    run_report: Regex,
    mutation: Regex,
}

fn words(alternatives: &[&str]) -> Regex {
    let body = alternatives
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{body})\b")).unwrap_or_else(|e| panic!("bad word list {body}: {e}"))
}

fn lexicon() -> &'static Lexicon {
    static LEXICON: OnceLock<Lexicon> = OnceLock::new();
    LEXICON.get_or_init(|| {
        let re = |p: &str| Regex::new(p).unwrap_or_else(|e| panic!("bad router pattern {p}: {e}"));
        Lexicon {
            sales: words(&[
                "sales", "sale", "sold", "sell", "selling", "sellers", "revenue", "turnover", "customer",
                "customers", "invoice", "invoices", "item", "items", "product", "products",
            ]),
            purchase: words(&["buy", "bought", "vendor", "supplier", "po", "purchase", "spend", "ap"]),
            inventory: words(&["stock", "inventory", "warehouse", "qty", "available"]),
            dimensions: [
                (Dimension::Month, words(&["month", "monthly"])),
                (Dimension::Customer, words(&["customer", "customers", "party"])),
                (Dimension::Item, words(&["item", "sku", "product"])),
                (Dimension::Region, words(&["region", "territory", "country", "state"])),
                (Dimension::Supplier, words(&["supplier", "vendor"])),
            ],
            top_n: re(r"\btop\s+(\d{1,3})\b"),
            docs: re(r"^\s*(how|what|why|when|where|explain|guide|docs?)\b"),
            run_report: re(r"\brun\s+report\b"),
            mutation: words(&[
                "create", "update", "add", "remind", "enqueue", "schedule", "assign", "delete", "rename",
            ]),
        }
    })
}

/// `top N` with N clamped to 1..=200.
pub fn detect_top_n(text: &str) -> Option<usize> {
    let lower = text.to_lowercase();
    let caps = lexicon().top_n.captures(&lower)?;
    let n: usize = caps.get(1)?.as_str().parse().ok()?;
    Some(n.clamp(1, MAX_TOP_N))
}

/// Purchase vocabulary wins over inventory; everything else is sales.
pub fn detect_domain(text: &str) -> Domain {
    let t = text.to_lowercase();
    let lx = lexicon();
    if lx.purchase.is_match(&t) {
        Domain::Purchase
    } else if lx.inventory.is_match(&t) {
        Domain::Inventory
    } else {
        Domain::Sales
    }
}

pub fn detect_dimension(text: &str, domain: Domain) -> Dimension {
    let t = text.to_lowercase();
    for (dim, re) in &lexicon().dimensions {
        if !re.is_match(&t) {
            continue;
        }
        if *dim != Dimension::Supplier || domain == Domain::Purchase {
            return *dim;
        }
    }
    match domain {
        Domain::Sales => Dimension::Customer,
        Domain::Purchase => Dimension::Supplier,
        Domain::Inventory => Dimension::Month,
    }
}

pub fn is_docs_question(text: &str) -> bool {
    lexicon().docs.is_match(&text.trim().to_lowercase())
}

/// Whether the text asks for a change rather than a figure.
pub fn implies_mutation(text: &str) -> bool {
    lexicon().mutation.is_match(&text.to_lowercase())
}

/// Whether routed output may stand in for a planned execution. Documentation
/// questions always do. Anything that implies a change goes to the planner,
/// and a sales aggregation counts only when sales vocabulary was used, since
/// sales is also the fallback domain.
pub fn answers_directly(route: &Route, text: &str) -> bool {
    match route {
        Route::DocHelp { .. } => true,
        _ if implies_mutation(text) => false,
        Route::Report { .. } | Route::InventorySnapshot { .. } => true,
        Route::Aggregation { domain: Domain::Sales, .. } => lexicon().sales.is_match(&text.to_lowercase()),
        Route::Aggregation { .. } => true,
    }
}

/// Where a question is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    DocHelp {
        query: String,
    },
    Report {
        report_name: &'static str,
        filters: Args,
    },
    InventorySnapshot {
        warehouse: Option<String>,
    },
    Aggregation {
        domain: Domain,
        by: Dimension,
        window: DateWindow,
        top_n: Option<usize>,
    },
}

impl Route {
    pub fn intent(&self) -> Intent {
        match self {
            Self::DocHelp { .. } => Intent::DocHelp,
            Self::Report { .. } => Intent::Reporting,
            Self::InventorySnapshot { .. } | Self::Aggregation { .. } => Intent::Analytics,
        }
    }

    /// The catalog call this route stands for. Documentation questions are
    /// answered by the docs lookup, not by a tool.
    pub fn to_step(&self) -> Option<Step> {
        match self {
            Self::DocHelp { .. } => None,
            Self::Report { report_name, filters } => {
                let mut args = Args::new();
                args.insert("report_name".into(), json!(report_name));
                args.insert("filters".into(), Value::Object(filters.clone()));
                Some(Step::new(ToolName::RunReport.as_str(), args))
            }
            Self::InventorySnapshot { warehouse } => {
                let mut args = Args::new();
                args.insert("warehouse".into(), json!(warehouse));
                Some(Step::new(ToolName::GetInventorySnapshot.as_str(), args))
            }
            Self::Aggregation { domain, by, window, .. } => {
                let tool = match domain {
                    Domain::Purchase => ToolName::GetPurchaseStats,
                    _ => ToolName::GetSalesStats,
                };
                Some(Step::new(tool.as_str(), aggregation_args(*by, window)))
            }
        }
    }
}

fn aggregation_args(by: Dimension, window: &DateWindow) -> Args {
    let mut args = Args::new();
    args.insert("by".into(), json!(by.as_str()));
    args.insert("from_date".into(), json!(window.from_iso()));
    args.insert("to_date".into(), json!(window.to_iso()));
    args
}

/// Classifies `text` relative to `today`.
pub fn route(text: &str, today: NaiveDate) -> Route {
    let q = text.trim();
    if is_docs_question(q) {
        return Route::DocHelp { query: q.to_string() };
    }

    let domain = detect_domain(q);
    let window = detect_window(q, today);
    let top_n = detect_top_n(q);
    let by = detect_dimension(q, domain);

    if lexicon().run_report.is_match(&q.to_lowercase()) {
        let report_name = if domain == Domain::Sales {
            "Sales Analytics"
        } else {
            "Purchase Analytics"
        };
        let mut filters = Args::new();
        filters.insert("from_date".into(), json!(window.from_iso()));
        filters.insert("to_date".into(), json!(window.to_iso()));
        filters.insert("group_by".into(), json!(by.report_label()));
        return Route::Report { report_name, filters };
    }

    match domain {
        Domain::Inventory => Route::InventorySnapshot { warehouse: None },
        Domain::Purchase | Domain::Sales => Route::Aggregation { domain, by, window, top_n },
    }
}

fn call(registry: &ToolRegistry, step: &Step) -> Result<Value, ToolError> {
    match registry.dispatch(&step.tool, &step.args, "") {
        Dispatch::Ok(value) => Ok(value),
        Dispatch::Failed(err) => Err(err),
        Dispatch::UnknownTool(name) => Err(ToolError::Collaborator(format!("unknown tool {name}"))),
    }
}

fn row_count(data: &Value) -> usize {
    data.get("rows").and_then(Value::as_array).map_or(0, Vec::len)
}

fn total_of(row: &Value) -> f64 {
    match row.get("total") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

const LABEL_COLUMNS: [&str; 8] = ["customer", "supplier", "item", "month", "territory", "region", "label", "name"];
const TOTAL_COLUMNS: [&str; 5] = ["grand total", "total", "amount", "value", "net total"];

/// Turns a `{columns, rows: [[..]]}` report into `{label, total}` rows when
/// it has a recognizable total column.
fn reshape_report(report: Value, filters: &Args) -> Value {
    let columns: Vec<String> = report
        .get("columns")
        .and_then(Value::as_array)
        .map(|cols| {
            cols.iter()
                .map(|c| c.as_str().unwrap_or_default().to_lowercase())
                .collect()
        })
        .unwrap_or_default();
    let Some(rows) = report.get("rows").and_then(Value::as_array) else {
        return report;
    };
    if columns.is_empty() || !rows.first().is_some_and(Value::is_array) {
        return report;
    }

    let label_idx = columns
        .iter()
        .position(|c| LABEL_COLUMNS.contains(&c.as_str()))
        .unwrap_or(0);
    let Some(total_idx) = columns.iter().position(|c| TOTAL_COLUMNS.contains(&c.as_str())) else {
        return report;
    };

    let shaped: Vec<Value> = rows
        .iter()
        .filter_map(Value::as_array)
        .filter(|r| r.len() > label_idx.max(total_idx))
        .map(|r| json!({ "label": r[label_idx], "total": r[total_idx] }))
        .collect();

    json!({
        "title": report.get("title").cloned().unwrap_or(Value::Null),
        "group_by": columns[label_idx],
        "from_date": filters.get("from_date").cloned().unwrap_or(Value::Null),
        "to_date": filters.get("to_date").cloned().unwrap_or(Value::Null),
        "rows": shaped,
        "raw": report,
    })
}

/// Runs `route` against the tool registry or the docs lookup. Aggregations
/// that come back empty are retried once over three years.
pub fn execute_route(
    route: &Route,
    registry: &ToolRegistry,
    docs: &dyn DocsLookup,
    docs_top_k: usize,
) -> Result<Value, ToolError> {
    match route {
        Route::DocHelp { query } => {
            let ans = docs.answer(query, docs_top_k)?;
            Ok(json!({
                "title": "Documentation Answer",
                "columns": ["answer"],
                "rows": [[ans.answer]],
                "answer": ans.answer,
                "sources": ans.sources,
            }))
        }
        Route::InventorySnapshot { .. } => {
            let step = route.to_step().ok_or_else(|| ToolError::Collaborator("no step for route".into()))?;
            call(registry, &step)
        }
        Route::Report { filters, .. } => {
            let step = route.to_step().ok_or_else(|| ToolError::Collaborator("no step for route".into()))?;
            let report = call(registry, &step)?;
            Ok(reshape_report(report, filters))
        }
        Route::Aggregation { domain, by, window, top_n } => {
            let tool = match domain {
                Domain::Purchase => ToolName::GetPurchaseStats,
                _ => ToolName::GetSalesStats,
            };
            let mut effective = *window;
            let mut data = call(registry, &Step::new(tool.as_str(), aggregation_args(*by, &effective)))?;
            let mut widened = false;

            if row_count(&data) == 0 {
                effective = window.widened();
                info!(tool = %tool, from = %effective.from, to = %effective.to, "no rows; widening window");
                data = call(registry, &Step::new(tool.as_str(), aggregation_args(*by, &effective)))?;
                widened = true;
            }

            let Value::Object(mut out) = data else {
                return Err(ToolError::Collaborator(format!("{tool} returned a non-object result")));
            };

            if let (Some(n), Some(Value::Array(rows))) = (top_n, out.get_mut("rows")) {
                rows.sort_by(|a, b| total_of(b).partial_cmp(&total_of(a)).unwrap_or(std::cmp::Ordering::Equal));
                rows.truncate(*n);
            }

            let noun = if *domain == Domain::Purchase { "Purchases" } else { "Sales" };
            let mut title_by = by.as_str().to_string();
            if let Some(first) = title_by.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            out.entry("title").or_insert_with(|| json!(format!("{noun} by {title_by}")));
            out.entry("group_by").or_insert_with(|| json!(by.as_str()));
            out.insert("from_date".into(), json!(effective.from_iso()));
            out.insert("to_date".into(), json!(effective.to_iso()));
            out.insert("widened".into(), json!(widened));

            let rows = out.get("rows").and_then(Value::as_array).map_or(0, Vec::len);
            debug!(tool = %tool, rows, widened, "route executed");
            Ok(Value::Object(out))
        }
    }
}

/// Whether routed output is worth returning to the caller.
pub fn has_content(output: &Value) -> bool {
    let rows = output.get("rows").and_then(Value::as_array).is_some_and(|r| !r.is_empty());
    let answer = output
        .get("answer")
        .and_then(Value::as_str)
        .is_some_and(|a| !a.trim().is_empty());
    rows || answer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docs::DocAnswer;
    use std::sync::{Arc, Mutex};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    struct NoDocs;

    impl DocsLookup for NoDocs {
        fn answer(&self, question: &str, _: usize) -> Result<DocAnswer, ToolError> {
            Ok(DocAnswer { answer: format!("about {question}"), sources: vec!["guide.md".into()] })
        }
    }

    #[test]
    fn top_n_is_clamped() {
        assert_eq!(detect_top_n("top 250 customers"), Some(200));
        assert_eq!(detect_top_n("top 0 items"), Some(1));
        assert_eq!(detect_top_n("Top 5 suppliers"), Some(5));
        assert_eq!(detect_top_n("top customers"), None);
    }

    #[test]
    fn purchase_words_beat_inventory_and_sales() {
        assert_eq!(detect_domain("stock bought from vendor"), Domain::Purchase);
        assert_eq!(detect_domain("warehouse qty"), Domain::Inventory);
        assert_eq!(detect_domain("revenue by month"), Domain::Sales);
        assert_eq!(detect_domain("anything else"), Domain::Sales);
        // Whole words only.
        assert_eq!(detect_domain("apple sales"), Domain::Sales);
    }

    #[test]
    fn supplier_dimension_needs_purchase_domain() {
        assert_eq!(detect_dimension("sales by supplier", Domain::Sales), Dimension::Customer);
        assert_eq!(detect_dimension("spend by vendor", Domain::Purchase), Dimension::Supplier);
        assert_eq!(detect_dimension("spend by month", Domain::Purchase), Dimension::Month);
        assert_eq!(detect_dimension("stock levels", Domain::Inventory), Dimension::Month);
        assert_eq!(detect_dimension("sales by sku", Domain::Sales), Dimension::Item);
    }

    #[test]
    fn month_in_a_window_phrase_still_picks_the_month_dimension() {
        assert_eq!(detect_dimension("sales by customer last month", Domain::Sales), Dimension::Month);
        let r = route("sales by customer last month", today());
        assert!(matches!(r, Route::Aggregation { by: Dimension::Month, .. }), "{r:?}");
    }

    #[test]
    fn only_explicit_read_routes_answer_directly() {
        let direct = |text: &str| answers_directly(&route(text, today()), text);
        assert!(direct("top 5 customers ytd"));
        assert!(direct("revenue by month"));
        assert!(direct("spend by supplier last 12 months"));
        assert!(direct("stock in warehouse"));
        assert!(direct("run report sales by item"));
        assert!(direct("how do I create a workflow?"));

        assert!(!direct("create a workflow for leave approval"));
        assert!(!direct("remind me to call Acme"));
        assert!(!direct("add a purchase approval step"));
        assert!(!direct("make the dashboard faster"));
    }

    #[test]
    fn docs_lookup_gets_the_requested_depth() {
        struct Depth(Mutex<Vec<usize>>);
        impl DocsLookup for Depth {
            fn answer(&self, _: &str, k: usize) -> Result<DocAnswer, ToolError> {
                self.0.lock().unwrap().push(k);
                Ok(DocAnswer { answer: "ok".into(), sources: Vec::new() })
            }
        }
        let docs = Depth(Mutex::default());
        execute_route(&route("how do reports work", today()), &ToolRegistry::new(), &docs, 3).unwrap();
        assert_eq!(*docs.0.lock().unwrap(), vec![3]);
    }

    #[test]
    fn docs_questions_go_to_doc_help() {
        let r = route("  How do I create a workflow?", today());
        assert_eq!(r, Route::DocHelp { query: "How do I create a workflow?".into() });
        assert_eq!(r.intent(), Intent::DocHelp);
        assert!(r.to_step().is_none());
        assert!(!is_docs_question("show me what sold"));
    }

    #[test]
    fn run_report_uses_display_group_names() {
        let r = route("run report of purchases by supplier ytd", today());
        let Route::Report { report_name, filters } = &r else {
            panic!("expected report route, got {r:?}");
        };
        assert_eq!(*report_name, "Purchase Analytics");
        assert_eq!(filters["group_by"], "Supplier");
        assert_eq!(filters["from_date"], "2024-01-01");
        assert_eq!(filters["to_date"], "2024-03-15");
        assert_eq!(r.intent(), Intent::Reporting);
    }

    #[test]
    fn inventory_and_aggregation_routes() {
        assert_eq!(route("stock in warehouse", today()), Route::InventorySnapshot { warehouse: None });

        let r = route("top 5 customers ytd", today());
        let step = r.to_step().unwrap();
        assert_eq!(step.tool, "get_sales_stats");
        assert_eq!(step.args["by"], "customer");
        assert_eq!(step.args["from_date"], "2024-01-01");
        assert!(matches!(r, Route::Aggregation { top_n: Some(5), .. }));
    }

    fn recording_registry(responses: Vec<Value>) -> (ToolRegistry, Arc<Mutex<Vec<Args>>>) {
        let calls: Arc<Mutex<Vec<Args>>> = Arc::default();
        let queue = Arc::new(Mutex::new(responses));
        let mut registry = ToolRegistry::new();
        let seen = Arc::clone(&calls);
        registry.register(ToolName::GetSalesStats, move |args: &Args, _: Option<&str>| -> Result<Value, ToolError> {
            seen.lock().unwrap().push(args.clone());
            Ok(queue.lock().unwrap().remove(0))
        });
        (registry, calls)
    }

    #[test]
    fn empty_aggregation_is_widened_once() {
        let (registry, calls) = recording_registry(vec![
            json!({"rows": []}),
            json!({"rows": [{"label": "Acme", "total": 10.0}]}),
        ]);
        let r = route("sales by customer yesterday", today());
        let out = execute_route(&r, &registry, &NoDocs, 6).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["from_date"], "2024-03-14");
        assert_eq!(calls[1]["to_date"], "2024-03-14");
        assert_eq!(calls[1]["from_date"], "2021-03-15");
        assert_eq!(out["widened"], true);
        assert_eq!(out["from_date"], "2021-03-15");
        assert_eq!(out["title"], "Sales by Customer");
    }

    #[test]
    fn widening_happens_at_most_once() {
        let (registry, calls) = recording_registry(vec![json!({"rows": []}), json!({"rows": []})]);
        let out = execute_route(&route("sales", today()), &registry, &NoDocs, 6).unwrap();
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert!(!has_content(&out));
    }

    #[test]
    fn top_n_sorts_and_truncates() {
        let (registry, _) = recording_registry(vec![json!({"rows": [
            {"label": "a", "total": 1.0},
            {"label": "b", "total": 30.0},
            {"label": "c", "total": 7.0},
        ]})]);
        let out = execute_route(&route("top 2 customers", today()), &registry, &NoDocs, 6).unwrap();
        assert_eq!(out["rows"], json!([{"label": "b", "total": 30.0}, {"label": "c", "total": 7.0}]));
        assert_eq!(out["widened"], false);
    }

    #[test]
    fn reports_are_reshaped_into_label_total_rows() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolName::RunReport, |_: &Args, _: Option<&str>| -> Result<Value, ToolError> {
            Ok(json!({"title": "Sales Analytics", "columns": ["Customer", "Total"], "rows": [["Acme", 12.5]]}))
        });
        let out = execute_route(&route("run report sales by customer", today()), &registry, &NoDocs, 6).unwrap();
        assert_eq!(out["rows"], json!([{"label": "Acme", "total": 12.5}]));
        assert_eq!(out["group_by"], "customer");
        assert_eq!(out["raw"]["title"], "Sales Analytics");
    }

    #[test]
    fn doc_help_returns_an_answer() {
        let out = execute_route(&route("what is a workflow", today()), &ToolRegistry::new(), &NoDocs, 6).unwrap();
        assert_eq!(out["answer"], "about what is a workflow");
        assert!(has_content(&out));
    }
}
