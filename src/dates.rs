use chrono::{Datelike, Duration, Months, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

/// A closed date range in local-date granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub label: &'static str,
}

impl DateWindow {
    pub fn new(from: NaiveDate, to: NaiveDate, label: &'static str) -> Self {
        Self { from, to, label }
    }

    /// Trailing 365 days ending `today`.
    pub fn trailing_year(today: NaiveDate) -> Self {
        Self::new(today - Duration::days(365), today, "last 12 months")
    }

    /// Month-aligned trailing window: first day of the month `months - 1`
    /// months back through `today`.
    pub fn trailing_months(today: NaiveDate, months: u32) -> Self {
        let first = first_day_of_month(today);
        let from = first
            .checked_sub_months(Months::new(months.saturating_sub(1)))
            .unwrap_or(first);
        Self::new(from, today, "last 12 months")
    }

    /// First of the month through `today`.
    pub fn month_to_date(today: NaiveDate) -> Self {
        Self::new(first_day_of_month(today), today, "this month")
    }

    /// The same number of elapsed days starting on the first of the previous
    /// month, kept inside that month.
    pub fn same_elapsed_in_previous_month(&self) -> Self {
        let start = first_day_of_month(self.from);
        let prev_last = start.pred_opt().unwrap_or(start);
        let prev_first = first_day_of_month(prev_last);
        let to = (prev_first + (self.to - self.from)).min(prev_last);
        Self::new(prev_first, to, "same period last month")
    }

    /// Three years ending at the same end date.
    pub fn widened(&self) -> Self {
        Self::new(self.to - Duration::days(365 * 3), self.to, "last 3 years")
    }

    pub fn from_iso(&self) -> String {
        self.from.format("%Y-%m-%d").to_string()
    }

    pub fn to_iso(&self) -> String {
        self.to.format("%Y-%m-%d").to_string()
    }
}

fn first_day_of_month(d: NaiveDate) -> NaiveDate {
    d.with_day(1).unwrap_or(d)
}

fn first_day_of_year(d: NaiveDate) -> NaiveDate {
    d.with_ordinal(1).unwrap_or(d)
}

struct WindowPatterns {
    ytd: Regex,
    l12m: Regex,
    l30d: Regex,
    mtd: Regex,
    last_month: Regex,
    today: Regex,
    yesterday: Regex,
}

fn patterns() -> &'static WindowPatterns {
    static PATTERNS: OnceLock<WindowPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).unwrap_or_else(|e| panic!("bad window pattern {p}: {e}"));
        WindowPatterns {
            ytd: re(r"\b(ytd|this year|year to date)\b"),
            l12m: re(r"\b(last\s+12\s+months|l12m)\b"),
            l30d: re(r"\blast\s+30\s+days\b"),
            mtd: re(r"\b(this month|mtd|month to date)\b"),
            last_month: re(r"\blast month\b"),
            today: re(r"\btoday\b"),
            yesterday: re(r"\byesterday\b"),
        }
    })
}

/// Detects the date window a question talks about, relative to `today`.
/// Falls back to the trailing 365 days.
pub fn detect_window(text: &str, today: NaiveDate) -> DateWindow {
    let t = text.to_lowercase();
    let p = patterns();

    if p.ytd.is_match(&t) {
        return DateWindow::new(first_day_of_year(today), today, "this year");
    }
    if p.l12m.is_match(&t) {
        return DateWindow::trailing_year(today);
    }
    if p.l30d.is_match(&t) {
        return DateWindow::new(today - Duration::days(30), today, "last 30 days");
    }
    if p.mtd.is_match(&t) {
        return DateWindow::month_to_date(today);
    }
    if p.last_month.is_match(&t) {
        let first = first_day_of_month(today);
        let last = first.pred_opt().unwrap_or(first);
        return DateWindow::new(first_day_of_month(last), last, "last month");
    }
    if p.today.is_match(&t) {
        return DateWindow::new(today, today, "today");
    }
    if p.yesterday.is_match(&t) {
        let y = today.pred_opt().unwrap_or(today);
        return DateWindow::new(y, y, "yesterday");
    }
    DateWindow::trailing_year(today)
}
