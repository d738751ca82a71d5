use crate::dates::DateWindow;
use crate::error::ToolError;
use crate::tools::{ToolName, ToolRegistry};
use crate::types::Args;
use chrono::{Duration, Local, NaiveDate, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const APP_NAME: &str = "askerp";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS customers (
    name TEXT PRIMARY KEY,
    region TEXT
);
CREATE TABLE IF NOT EXISTS suppliers (
    name TEXT PRIMARY KEY,
    region TEXT
);
CREATE TABLE IF NOT EXISTS sales_invoices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer TEXT NOT NULL,
    posting_date TEXT NOT NULL,
    docstatus INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS sales_invoice_items (
    invoice_id INTEGER NOT NULL REFERENCES sales_invoices(id),
    item_code TEXT NOT NULL,
    net_amount REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS purchase_invoices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    supplier TEXT NOT NULL,
    posting_date TEXT NOT NULL,
    docstatus INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS purchase_invoice_items (
    invoice_id INTEGER NOT NULL REFERENCES purchase_invoices(id),
    item_code TEXT NOT NULL,
    net_amount REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS stock (
    warehouse TEXT NOT NULL,
    item_code TEXT NOT NULL,
    qty REAL NOT NULL,
    PRIMARY KEY (warehouse, item_code)
);
CREATE TABLE IF NOT EXISTS documents (
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    definition TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (kind, name)
);
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject TEXT NOT NULL,
    description TEXT,
    assigned_to TEXT,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS idempotency (
    token TEXT NOT NULL,
    tool TEXT NOT NULL,
    args TEXT NOT NULL,
    result TEXT NOT NULL,
    PRIMARY KEY (token, tool, args)
);
";

pub fn get_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("erp.db")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ledger {
    Sales,
    Purchase,
}

impl Ledger {
    fn title(self) -> &'static str {
        match self {
            Self::Sales => "Sales",
            Self::Purchase => "Purchases",
        }
    }

    fn joins(self) -> &'static str {
        match self {
            Self::Sales => {
                "sales_invoices inv
                 JOIN sales_invoice_items it ON it.invoice_id = inv.id
                 LEFT JOIN customers party ON party.name = inv.customer"
            }
            Self::Purchase => {
                "purchase_invoices inv
                 JOIN purchase_invoice_items it ON it.invoice_id = inv.id
                 LEFT JOIN suppliers party ON party.name = inv.supplier"
            }
        }
    }

    /// Whitelisted label expression for a normalized grouping key.
    fn label_expr(self, by: &str) -> &'static str {
        match (self, by) {
            (Self::Sales, "customer") => "inv.customer",
            (Self::Purchase, "supplier") => "inv.supplier",
            (_, "item") => "it.item_code",
            (_, "region") => "COALESCE(party.region, '')",
            _ => "strftime('%Y-%m', inv.posting_date)",
        }
    }

    fn accepts(self, by: &str) -> bool {
        match self {
            Self::Sales => matches!(by, "month" | "customer" | "item" | "region"),
            Self::Purchase => matches!(by, "month" | "supplier" | "item" | "region"),
        }
    }
}

/// Accepts the aliases planners and routers emit for a grouping key.
pub fn normalize_group_key(args: &Args) -> String {
    let raw = ["by", "fieldname", "group_by"]
        .iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .unwrap_or("month")
        .trim()
        .to_lowercase();

    let by = match raw.as_str() {
        "months" | "mth" | "mon" | "monthly" => "month",
        "customers" | "cust" | "party" => "customer",
        "items" | "sku" | "product" | "item code" => "item",
        "vendors" | "vendor" | "suppliers" => "supplier",
        "territory" | "country" | "state" => "region",
        other => other,
    };

    match by {
        "month" | "customer" | "item" | "supplier" | "region" => by.to_string(),
        _ => "month".to_string(),
    }
}

fn str_arg<'a>(args: &'a Args, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn required_str<'a>(args: &'a Args, key: &str) -> Result<&'a str, ToolError> {
    str_arg(args, key).ok_or_else(|| ToolError::MissingArgument(key.to_string()))
}

fn date_arg(args: &Args, key: &str) -> Result<Option<NaiveDate>, ToolError> {
    match str_arg(args, key) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| ToolError::InvalidArgument {
                name: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

/// Missing bounds fall back to the trailing 365 days.
fn date_range(args: &Args) -> Result<(NaiveDate, NaiveDate), ToolError> {
    match (date_arg(args, "from_date")?, date_arg(args, "to_date")?) {
        (Some(from), Some(to)) => Ok((from, to)),
        _ => {
            let end = Local::now().date_naive();
            Ok((end - Duration::days(365), end))
        }
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => json!(String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => json!(format!("<{} bytes>", b.len())),
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339()
}

/// A headline figure compared with the same elapsed span a month earlier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: &'static str,
    pub value: f64,
    pub previous: f64,
    pub period: [String; 2],
    pub compare_period: [String; 2],
    /// Percent change against `previous`; absent when there is nothing to compare with.
    pub change_pct: Option<f64>,
    pub explain: &'static str,
}

/// Business data behind the tool catalog.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, ToolError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ToolError::Collaborator(format!("cannot create {parent:?}: {e}")))?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, ToolError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, ToolError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ToolError> {
        self.conn
            .lock()
            .map_err(|_| ToolError::Collaborator("store lock poisoned".to_string()))
    }

    fn aggregate(&self, ledger: Ledger, args: &Args) -> Result<Value, ToolError> {
        let mut by = normalize_group_key(args);
        if !ledger.accepts(&by) {
            by = "month".to_string();
        }
        let (from, to) = date_range(args)?;
        let label = ledger.label_expr(&by);

        let sql = format!(
            "SELECT {label} AS label, SUM(it.net_amount) AS total
             FROM {joins}
             WHERE inv.docstatus = 1 AND inv.posting_date BETWEEN ?1 AND ?2
             GROUP BY label
             ORDER BY total DESC",
            joins = ledger.joins()
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<Value> = stmt
            .query_map(params![from.to_string(), to.to_string()], |row| {
                let label: Option<String> = row.get(0)?;
                let total: f64 = row.get(1)?;
                Ok(json!({ "label": label.unwrap_or_default(), "total": total }))
            })?
            .collect::<Result<_, _>>()?;

        debug!(ledger = ledger.title(), by = %by, rows = rows.len(), "aggregated");

        let mut title_by = by.clone();
        if let Some(first) = title_by.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        Ok(json!({
            "title": format!("{} by {}", ledger.title(), title_by),
            "group_by": by,
            "from_date": from.to_string(),
            "to_date": to.to_string(),
            "highest": rows.first().cloned(),
            "rows": rows,
        }))
    }

    pub fn sales_stats(&self, args: &Args) -> Result<Value, ToolError> {
        self.aggregate(Ledger::Sales, args)
    }

    pub fn purchase_stats(&self, args: &Args) -> Result<Value, ToolError> {
        self.aggregate(Ledger::Purchase, args)
    }

    pub fn inventory_snapshot(&self, args: &Args) -> Result<Value, ToolError> {
        let warehouse = str_arg(args, "warehouse");
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT warehouse, item_code, qty FROM stock
             WHERE ?1 IS NULL OR warehouse = ?1
             ORDER BY warehouse, item_code",
        )?;
        let rows: Vec<Value> = stmt
            .query_map(params![warehouse], |row| {
                let w: String = row.get(0)?;
                let item: String = row.get(1)?;
                let qty: f64 = row.get(2)?;
                Ok(json!([w, item, qty]))
            })?
            .collect::<Result<_, _>>()?;

        Ok(json!({
            "title": "Inventory Snapshot",
            "columns": ["Warehouse", "Item", "Qty"],
            "rows": rows,
        }))
    }

    /// Named reports return a plain table: one label column and a total.
    pub fn run_report(&self, args: &Args) -> Result<Value, ToolError> {
        let name = required_str(args, "report_name")?;
        let filters = args
            .get("filters")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let ledger = match name.to_lowercase().as_str() {
            "sales analytics" => Ledger::Sales,
            "purchase analytics" => Ledger::Purchase,
            "stock summary" => {
                let mut snapshot = self.inventory_snapshot(&filters)?;
                snapshot["title"] = json!(name);
                return Ok(snapshot);
            }
            _ => {
                return Err(ToolError::InvalidArgument {
                    name: "report_name".to_string(),
                    reason: format!("no report named {name}"),
                })
            }
        };

        let data = self.aggregate(ledger, &filters)?;
        let group_label = filters
            .get("group_by")
            .and_then(Value::as_str)
            .unwrap_or("Month")
            .to_string();
        let rows: Vec<Value> = data["rows"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|r| json!([r["label"].clone(), r["total"].clone()]))
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "title": name,
            "columns": [group_label, "Total"],
            "rows": rows,
        }))
    }

    /// Read-only SQL. Anything SQLite does not consider read-only is refused.
    pub fn run_sql(&self, args: &Args) -> Result<Value, ToolError> {
        let sql = required_str(args, "sql")?;
        let bound: Vec<SqlValue> = args
            .get("params")
            .and_then(Value::as_array)
            .map(|vals| vals.iter().map(json_to_sql).collect())
            .unwrap_or_default();

        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(ToolError::Refused("run_sql only accepts read-only statements".to_string()));
        }
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows: Vec<Value> = stmt
            .query_map(params_from_iter(bound.iter()), |row| {
                let mut obj = Map::new();
                for (i, col) in columns.iter().enumerate() {
                    obj.insert(col.clone(), sql_to_json(row.get_ref(i)?));
                }
                Ok(Value::Object(obj))
            })?
            .collect::<Result<_, _>>()?;

        Ok(json!({ "rows": rows }))
    }

    /// Runs `apply` at most once per (token, tool, args). A replay returns
    /// the stored result.
    fn once<F>(&self, tool: ToolName, args: &Args, token: Option<&str>, apply: F) -> Result<Value, ToolError>
    where
        F: FnOnce(&Connection) -> Result<Value, ToolError>,
    {
        let mut conn = self.conn()?;
        let Some(token) = token else {
            return apply(&conn);
        };
        let key = Value::Object(args.clone()).to_string();

        let tx = conn.transaction()?;
        let previous: Option<String> = tx
            .query_row(
                "SELECT result FROM idempotency WHERE token = ?1 AND tool = ?2 AND args = ?3",
                params![token, tool.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(stored) = previous {
            info!(tool = %tool, "replayed idempotent call");
            return serde_json::from_str(&stored)
                .map_err(|e| ToolError::Collaborator(format!("corrupt idempotency record: {e}")));
        }

        let result = apply(&tx)?;
        tx.execute(
            "INSERT INTO idempotency (token, tool, args, result) VALUES (?1, ?2, ?3, ?4)",
            params![token, tool.as_str(), key, result.to_string()],
        )?;
        tx.commit()?;
        Ok(result)
    }

    pub fn create_document(&self, kind: ToolName, args: &Args, token: Option<&str>) -> Result<Value, ToolError> {
        let name = required_str(args, "name")?.to_string();
        let label = match kind {
            ToolName::CreateDoctype => "DocType",
            ToolName::CreateWorkflow => "Workflow",
            ToolName::CreateQueryReport => "Query Report",
            ToolName::CreateScriptReport => "Script Report",
            other => {
                return Err(ToolError::Refused(format!("{other} does not create documents")));
            }
        };

        self.once(kind, args, token, |conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM documents WHERE kind = ?1 AND name = ?2",
                    params![label, name],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(ToolError::InvalidArgument {
                    name: "name".to_string(),
                    reason: format!("{label} {name} already exists"),
                });
            }
            conn.execute(
                "INSERT INTO documents (kind, name, definition, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![label, name, Value::Object(args.clone()).to_string(), now_stamp()],
            )?;
            Ok(json!({ "created": label, "name": name }))
        })
    }

    pub fn update_doctype(&self, args: &Args, token: Option<&str>) -> Result<Value, ToolError> {
        let name = required_str(args, "name")?.to_string();
        self.once(ToolName::UpdateDoctype, args, token, |conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT definition FROM documents WHERE kind = 'DocType' AND name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Err(ToolError::InvalidArgument {
                    name: "name".to_string(),
                    reason: format!("DocType {name} does not exist"),
                });
            };
            let mut definition: Map<String, Value> = serde_json::from_str(&current).unwrap_or_default();
            for (k, v) in args {
                definition.insert(k.clone(), v.clone());
            }
            conn.execute(
                "UPDATE documents SET definition = ?1, updated_at = ?2 WHERE kind = 'DocType' AND name = ?3",
                params![Value::Object(definition).to_string(), now_stamp(), name],
            )?;
            Ok(json!({ "updated": "DocType", "name": name }))
        })
    }

    pub fn create_task(&self, args: &Args, token: Option<&str>) -> Result<Value, ToolError> {
        let subject = str_arg(args, "subject")
            .or_else(|| str_arg(args, "title"))
            .ok_or_else(|| ToolError::MissingArgument("subject".to_string()))?
            .to_string();
        self.once(ToolName::CreateTask, args, token, |conn| {
            conn.execute(
                "INSERT INTO tasks (subject, description, assigned_to, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![subject, str_arg(args, "description"), str_arg(args, "assigned_to"), now_stamp()],
            )?;
            Ok(json!({ "task_id": conn.last_insert_rowid(), "subject": subject }))
        })
    }

    pub fn enqueue_job(&self, args: &Args, token: Option<&str>) -> Result<Value, ToolError> {
        let method = required_str(args, "method")?.to_string();
        let payload = args.get("kwargs").cloned().unwrap_or_else(|| json!({}));
        self.once(ToolName::EnqueueBackgroundJob, args, token, |conn| {
            conn.execute(
                "INSERT INTO jobs (method, payload, status, enqueued_at) VALUES (?1, ?2, 'queued', ?3)",
                params![method, payload.to_string(), now_stamp()],
            )?;
            Ok(json!({ "job_id": conn.last_insert_rowid(), "status": "queued" }))
        })
    }

    fn ledger_total(&self, ledger: Ledger, window: &DateWindow) -> Result<f64, ToolError> {
        let sql = format!(
            "SELECT COALESCE(SUM(it.net_amount), 0.0)
             FROM {joins}
             WHERE inv.docstatus = 1 AND inv.posting_date BETWEEN ?1 AND ?2",
            joins = ledger.joins()
        );
        let conn = self.conn()?;
        let total: f64 = conn.query_row(&sql, params![window.from_iso(), window.to_iso()], |row| row.get(0))?;
        Ok(total)
    }

    fn month_to_date(
        &self,
        ledger: Ledger,
        today: NaiveDate,
        name: &'static str,
        explain: &'static str,
    ) -> Result<Metric, ToolError> {
        let current = DateWindow::month_to_date(today);
        let compare = current.same_elapsed_in_previous_month();
        let value = self.ledger_total(ledger, &current)?;
        let previous = self.ledger_total(ledger, &compare)?;
        let change_pct = (previous != 0.0).then(|| (value - previous) / previous * 100.0);
        debug!(metric = name, value, previous, "metric computed");
        Ok(Metric {
            name,
            value,
            previous,
            period: [current.from_iso(), current.to_iso()],
            compare_period: [compare.from_iso(), compare.to_iso()],
            change_pct,
            explain,
        })
    }

    pub fn metric_sales_mtd(&self, today: NaiveDate) -> Result<Metric, ToolError> {
        self.month_to_date(
            Ledger::Sales,
            today,
            "Sales MTD",
            "Net sales invoices for the month to date, against the same elapsed days last month.",
        )
    }

    pub fn metric_purchases_mtd(&self, today: NaiveDate) -> Result<Metric, ToolError> {
        self.month_to_date(
            Ledger::Purchase,
            today,
            "Purchases MTD",
            "Net purchase invoices for the month to date, against the same elapsed days last month.",
        )
    }

    pub fn counts(&self) -> Result<Vec<(&'static str, i64)>, ToolError> {
        let conn = self.conn()?;
        let mut out = Vec::new();
        for table in ["sales_invoices", "purchase_invoices", "stock", "documents", "tasks", "jobs"] {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            out.push((table, n));
        }
        Ok(out)
    }

    /// Loads a small deterministic demo ledger covering the fourteen months
    /// before `today`.
    pub fn seed_demo(&self, today: NaiveDate) -> Result<usize, ToolError> {
        let customers = [("Acme Corp", "North"), ("Globex", "South"), ("Initech", "West")];
        let suppliers = [("Northwind Supply", "North"), ("Contoso Parts", "East")];
        let items = ["WIDGET-01", "GADGET-02", "BOLT-10"];

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (name, region) in customers {
            tx.execute("INSERT OR REPLACE INTO customers (name, region) VALUES (?1, ?2)", params![name, region])?;
        }
        for (name, region) in suppliers {
            tx.execute("INSERT OR REPLACE INTO suppliers (name, region) VALUES (?1, ?2)", params![name, region])?;
        }

        let mut invoices = 0;
        for day in (0..420).step_by(9) {
            let date = (today - Duration::days(day)).to_string();
            let n = day as usize / 9;
            let customer = customers[n % customers.len()].0;
            tx.execute(
                "INSERT INTO sales_invoices (customer, posting_date) VALUES (?1, ?2)",
                params![customer, date],
            )?;
            let id = tx.last_insert_rowid();
            let amount = 100.0 + ((n * 37) % 11) as f64 * 45.0;
            tx.execute(
                "INSERT INTO sales_invoice_items (invoice_id, item_code, net_amount) VALUES (?1, ?2, ?3)",
                params![id, items[n % items.len()], amount],
            )?;

            if n % 2 == 0 {
                let supplier = suppliers[n % suppliers.len()].0;
                tx.execute(
                    "INSERT INTO purchase_invoices (supplier, posting_date) VALUES (?1, ?2)",
                    params![supplier, date],
                )?;
                let id = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO purchase_invoice_items (invoice_id, item_code, net_amount) VALUES (?1, ?2, ?3)",
                    params![id, items[(n + 1) % items.len()], amount * 0.6],
                )?;
            }
            invoices += 1;
        }

        for (warehouse, item, qty) in [
            ("Main", "WIDGET-01", 120.0),
            ("Main", "GADGET-02", 35.0),
            ("Overflow", "BOLT-10", 900.0),
        ] {
            tx.execute(
                "INSERT OR REPLACE INTO stock (warehouse, item_code, qty) VALUES (?1, ?2, ?3)",
                params![warehouse, item, qty],
            )?;
        }
        tx.commit()?;
        Ok(invoices)
    }
}

/// Registers every catalog tool against `store`.
pub fn register_all(store: Arc<Store>, registry: &mut ToolRegistry) {
    for tool in ToolName::ALL {
        let store = Arc::clone(&store);
        registry.register(tool, move |args: &Args, token: Option<&str>| -> Result<Value, ToolError> {
            match tool {
                ToolName::GetSalesStats => store.sales_stats(args),
                ToolName::GetPurchaseStats => store.purchase_stats(args),
                ToolName::GetInventorySnapshot => store.inventory_snapshot(args),
                ToolName::RunReport => store.run_report(args),
                ToolName::RunSql => store.run_sql(args),
                ToolName::CreateDoctype
                | ToolName::CreateWorkflow
                | ToolName::CreateQueryReport
                | ToolName::CreateScriptReport => store.create_document(tool, args, token),
                ToolName::UpdateDoctype => store.update_doctype(args, token),
                ToolName::CreateTask => store.create_task(args, token),
                ToolName::EnqueueBackgroundJob => store.enqueue_job(args, token),
            }
        });
    }
}
