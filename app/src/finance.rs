//! Ledger entries and the two reports built from them: the income statement
//! (DRE, accrual basis) and the monthly cash-flow statement (DFC).

use serde::{Deserialize, Serialize};
use time::{Date, Month};

use crate::error::{Error, Result};
use crate::locale::parse_ymd;
use crate::model::round_cents;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Revenue,
    Expense,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Revenue => "REVENUE",
            EntryKind::Expense => "EXPENSE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REVENUE" => Some(EntryKind::Revenue),
            "EXPENSE" => Some(EntryKind::Expense),
            _ => None,
        }
    }
}

/// Income statement line an entry is booked against. The category fixes the
/// entry's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    GrossRevenue,
    Deduction,
    Cost,
    OperatingExpense,
    FinancialIncome,
    FinancialExpense,
    IncomeTax,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::GrossRevenue,
        Category::Deduction,
        Category::Cost,
        Category::OperatingExpense,
        Category::FinancialIncome,
        Category::FinancialExpense,
        Category::IncomeTax,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::GrossRevenue => "GROSS_REVENUE",
            Category::Deduction => "DEDUCTION",
            Category::Cost => "COST",
            Category::OperatingExpense => "OPERATING_EXPENSE",
            Category::FinancialIncome => "FINANCIAL_INCOME",
            Category::FinancialExpense => "FINANCIAL_EXPENSE",
            Category::IncomeTax => "INCOME_TAX",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let norm = s.trim().replace('-', "_");
        Self::ALL.into_iter().find(|c| c.as_str().eq_ignore_ascii_case(&norm))
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Category::GrossRevenue | Category::FinancialIncome => EntryKind::Revenue,
            _ => EntryKind::Expense,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub kind: EntryKind,
    pub category: Category,
    pub description: String,
    pub amount: f64,
    /// Accrual date, `YYYY-MM-DD`.
    pub competence_date: String,
    #[serde(default)]
    pub due_date: Option<String>,
    /// Cash date, `YYYY-MM-DD`. Unsettled entries never reach the DFC.
    #[serde(default)]
    pub settled_at: Option<String>,
    #[serde(default)]
    pub quote_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLedgerEntry {
    pub category: Category,
    pub description: String,
    pub amount: f64,
    pub competence_date: String,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub settled_at: Option<String>,
    #[serde(default)]
    pub quote_id: Option<String>,
}

fn trimmed(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl NewLedgerEntry {
    /// Trims optional fields and rejects malformed input.
    pub fn normalized(self) -> Result<Self> {
        let description = self.description.trim().to_string();
        if description.is_empty() {
            return Err(Error::Validation("description is required".to_string()));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(Error::Validation("amount must be greater than 0".to_string()));
        }
        let competence_date = self.competence_date.trim().to_string();
        parse_ymd(&competence_date)?;

        let due_date = trimmed(self.due_date);
        let settled_at = trimmed(self.settled_at);
        for d in due_date.iter().chain(settled_at.iter()) {
            parse_ymd(d)?;
        }

        Ok(NewLedgerEntry {
            category: self.category,
            description,
            amount: round_cents(self.amount),
            competence_date,
            due_date,
            settled_at,
            quote_id: trimmed(self.quote_id),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DreReport {
    pub from: String,
    pub to: String,
    pub gross_revenue: f64,
    pub deductions: f64,
    pub net_revenue: f64,
    pub costs: f64,
    pub gross_profit: f64,
    pub operating_expenses: f64,
    pub operating_result: f64,
    pub financial_result: f64,
    pub taxes: f64,
    pub net_income: f64,
}

impl DreReport {
    /// Statement lines in print order, keyed by label id.
    pub fn lines(&self) -> [(&'static str, f64); 10] {
        [
            ("dreGrossRevenue", self.gross_revenue),
            ("dreDeductions", -self.deductions),
            ("dreNetRevenue", self.net_revenue),
            ("dreCosts", -self.costs),
            ("dreGrossProfit", self.gross_profit),
            ("dreOperatingExpenses", -self.operating_expenses),
            ("dreOperatingResult", self.operating_result),
            ("dreFinancialResult", self.financial_result),
            ("dreTaxes", -self.taxes),
            ("dreNetIncome", self.net_income),
        ]
    }
}

fn check_range(from: &str, to: &str) -> Result<(Date, Date)> {
    let f = parse_ymd(from)?;
    let t = parse_ymd(to)?;
    if f > t {
        return Err(Error::Validation(format!("range start {from} is after end {to}")));
    }
    Ok((f, t))
}

/// Accrual-basis income statement over entries whose competence date falls in
/// `[from, to]`.
pub fn build_dre(entries: &[LedgerEntry], from: &str, to: &str) -> Result<DreReport> {
    let (f, t) = check_range(from, to)?;

    let mut sums = [0.0_f64; 7];
    for e in entries {
        let Ok(d) = parse_ymd(&e.competence_date) else {
            tracing::warn!(id = %e.id, date = %e.competence_date, "skipping entry with bad competence date");
            continue;
        };
        if d < f || d > t {
            continue;
        }
        let idx = Category::ALL.iter().position(|c| *c == e.category).unwrap_or(0);
        sums[idx] += e.amount;
    }
    let [gross_revenue, deductions, costs, operating_expenses, fin_income, fin_expense, taxes] =
        sums.map(round_cents);

    let net_revenue = round_cents(gross_revenue - deductions);
    let gross_profit = round_cents(net_revenue - costs);
    let operating_result = round_cents(gross_profit - operating_expenses);
    let financial_result = round_cents(fin_income - fin_expense);
    let net_income = round_cents(operating_result + financial_result - taxes);

    Ok(DreReport {
        from: from.to_string(),
        to: to.to_string(),
        gross_revenue,
        deductions,
        net_revenue,
        costs,
        gross_profit,
        operating_expenses,
        operating_result,
        financial_result,
        taxes,
        net_income,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DfcMonth {
    /// `YYYY-MM`
    pub month: String,
    pub inflows: f64,
    pub outflows: f64,
    pub net: f64,
    /// Closing balance of the month.
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DfcReport {
    pub from: String,
    pub to: String,
    pub opening_balance: f64,
    pub months: Vec<DfcMonth>,
    pub closing_balance: f64,
}

fn month_key(year: i32, month: Month) -> String {
    format!("{:04}-{:02}", year, month as u8)
}

/// Cash-basis statement: settled entries bucketed by settlement month, one
/// row per calendar month touched by `[from, to]`, empty months included.
pub fn build_dfc(entries: &[LedgerEntry], from: &str, to: &str, opening_balance: f64) -> Result<DfcReport> {
    let (f, t) = check_range(from, to)?;

    let mut months: Vec<DfcMonth> = Vec::new();
    let (mut y, mut m) = (f.year(), f.month());
    loop {
        months.push(DfcMonth {
            month: month_key(y, m),
            inflows: 0.0,
            outflows: 0.0,
            net: 0.0,
            balance: 0.0,
        });
        if (y, m as u8) >= (t.year(), t.month() as u8) {
            break;
        }
        if m == Month::December {
            y += 1;
        }
        m = m.next();
    }

    for e in entries {
        let Some(settled) = e.settled_at.as_deref() else {
            continue;
        };
        let Ok(d) = parse_ymd(settled) else {
            tracing::warn!(id = %e.id, date = %settled, "skipping entry with bad settlement date");
            continue;
        };
        if d < f || d > t {
            continue;
        }
        let key = month_key(d.year(), d.month());
        let Some(row) = months.iter_mut().find(|r| r.month == key) else {
            continue;
        };
        match e.kind {
            EntryKind::Revenue => row.inflows += e.amount,
            EntryKind::Expense => row.outflows += e.amount,
        }
    }

    let mut balance = round_cents(opening_balance);
    for row in &mut months {
        row.inflows = round_cents(row.inflows);
        row.outflows = round_cents(row.outflows);
        row.net = round_cents(row.inflows - row.outflows);
        balance = round_cents(balance + row.net);
        row.balance = balance;
    }

    Ok(DfcReport {
        from: from.to_string(),
        to: to.to_string(),
        opening_balance: round_cents(opening_balance),
        months,
        closing_balance: balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(category: Category, amount: f64, competence: &str, settled: Option<&str>) -> LedgerEntry {
        LedgerEntry {
            id: format!("{}-{}", category.as_str(), competence),
            kind: category.kind(),
            category,
            description: "x".to_string(),
            amount,
            competence_date: competence.to_string(),
            due_date: None,
            settled_at: settled.map(str::to_string),
            quote_id: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn dre_cascades_lines() {
        let entries = vec![
            entry(Category::GrossRevenue, 10_000.0, "2024-03-05", None),
            entry(Category::GrossRevenue, 2_000.0, "2024-03-20", Some("2024-04-02")),
            entry(Category::Deduction, 1_200.0, "2024-03-20", None),
            entry(Category::Cost, 4_000.0, "2024-03-10", None),
            entry(Category::OperatingExpense, 2_500.0, "2024-03-31", None),
            entry(Category::FinancialIncome, 50.0, "2024-03-15", None),
            entry(Category::FinancialExpense, 150.0, "2024-03-15", None),
            entry(Category::IncomeTax, 600.0, "2024-03-31", None),
            // outside the range
            entry(Category::GrossRevenue, 99_999.0, "2024-04-01", None),
        ];
        let r = build_dre(&entries, "2024-03-01", "2024-03-31").unwrap();
        assert_eq!(r.gross_revenue, 12_000.0);
        assert_eq!(r.net_revenue, 10_800.0);
        assert_eq!(r.gross_profit, 6_800.0);
        assert_eq!(r.operating_result, 4_300.0);
        assert_eq!(r.financial_result, -100.0);
        assert_eq!(r.net_income, 3_600.0);
        assert_eq!(r.lines()[1], ("dreDeductions", -1_200.0));
    }

    #[test]
    fn dfc_uses_settlement_month_and_running_balance() {
        let entries = vec![
            entry(Category::GrossRevenue, 1_000.0, "2024-01-10", Some("2024-02-05")),
            entry(Category::Cost, 300.0, "2024-01-12", Some("2024-01-30")),
            entry(Category::OperatingExpense, 200.0, "2024-02-01", Some("2024-02-28")),
            // unsettled: accrued but no cash movement
            entry(Category::GrossRevenue, 5_000.0, "2024-02-10", None),
        ];
        let r = build_dfc(&entries, "2024-01-01", "2024-03-31", 500.0).unwrap();
        assert_eq!(r.months.len(), 3);

        assert_eq!(r.months[0].month, "2024-01");
        assert_eq!(r.months[0].outflows, 300.0);
        assert_eq!(r.months[0].balance, 200.0);

        assert_eq!(r.months[1].inflows, 1_000.0);
        assert_eq!(r.months[1].net, 800.0);
        assert_eq!(r.months[1].balance, 1_000.0);

        assert_eq!(r.months[2].net, 0.0);
        assert_eq!(r.closing_balance, 1_000.0);
    }

    #[test]
    fn dfc_spans_year_boundary() {
        let r = build_dfc(&[], "2023-11-15", "2024-02-01", 0.0).unwrap();
        let months: Vec<_> = r.months.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(months, vec!["2023-11", "2023-12", "2024-01", "2024-02"]);
    }

    #[test]
    fn reversed_range_is_rejected() {
        assert!(build_dre(&[], "2024-05-01", "2024-04-01").is_err());
    }

    #[test]
    fn new_entry_normalization() {
        let ok = NewLedgerEntry {
            category: Category::Cost,
            description: "  Compra de retentores ".to_string(),
            amount: 10.005,
            competence_date: "2024-03-01".to_string(),
            due_date: Some("  ".to_string()),
            settled_at: None,
            quote_id: None,
        }
        .normalized()
        .unwrap();
        assert_eq!(ok.description, "Compra de retentores");
        assert_eq!(ok.due_date, None);

        let bad = NewLedgerEntry {
            category: Category::Cost,
            description: "x".to_string(),
            amount: 0.0,
            competence_date: "2024-03-01".to_string(),
            due_date: None,
            settled_at: None,
            quote_id: None,
        };
        assert!(matches!(bad.normalized(), Err(Error::Validation(_))));
    }

    #[test]
    fn category_parse_and_kind() {
        assert_eq!(Category::parse("operating-expense"), Some(Category::OperatingExpense));
        assert_eq!(Category::parse("gross_revenue").map(|c| c.kind()), Some(EntryKind::Revenue));
        assert_eq!(Category::parse("payroll"), None);
    }
}
