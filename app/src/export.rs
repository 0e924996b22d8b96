//! CSV export of quotes and ledger entries.
//!
//! RFC 4180 quoting, CRLF line endings, dot decimal separator and two
//! decimals for money, whatever the display language.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::finance::LedgerEntry;
use crate::locale::parse_ymd;
use crate::model::Quote;
use crate::store::DbState;

fn csv_escape_field(input: &str) -> String {
    let needs_quotes = input.contains(',') || input.contains('"') || input.contains('\n') || input.contains('\r');
    if !needs_quotes {
        return input.to_string();
    }
    format!("\"{}\"", input.replace('"', "\"\""))
}

fn csv_join_row(fields: &[String]) -> String {
    let mut out = String::new();
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&csv_escape_field(f));
    }
    out
}

fn format_money_csv(v: f64) -> String {
    format!("{:.2}", v)
}

fn format_quantity_csv(v: f64) -> String {
    let s = format!("{:.6}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn finish(header: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(csv_join_row(&header.iter().map(|s| s.to_string()).collect::<Vec<_>>()));
    lines.extend(rows.iter().map(|r| csv_join_row(r)));
    lines.join("\r\n") + "\r\n"
}

/// One row per line item, quote columns repeated. A quote without items
/// still gets one row so it is not lost from the export.
pub fn quotes_csv(quotes: &[Quote]) -> String {
    let header = [
        "quoteId",
        "quoteNumber",
        "revision",
        "issueDate",
        "validUntil",
        "clientName",
        "equipment",
        "serialNumber",
        "quoteTotal",
        "group",
        "itemCode",
        "itemDescription",
        "itemQuantity",
        "itemUnitPrice",
        "itemTotal",
    ];

    let mut rows = Vec::new();
    for q in quotes {
        let h = &q.header;
        let base = vec![
            q.id.clone(),
            q.number.clone(),
            q.revision.to_string(),
            h.issue_date.clone(),
            h.valid_until.clone().unwrap_or_default(),
            h.client_name.clone(),
            h.equipment.clone(),
            h.serial_number.clone(),
            format_money_csv(q.grand_total()),
        ];

        let mut wrote_item = false;
        for group in &q.groups {
            for item in &group.items {
                let mut row = base.clone();
                row.extend([
                    group.kind.as_str().to_string(),
                    item.code.clone().unwrap_or_default(),
                    item.description.clone(),
                    format_quantity_csv(item.quantity()),
                    format_money_csv(item.unit_price()),
                    format_money_csv(item.total_price()),
                ]);
                rows.push(row);
                wrote_item = true;
            }
        }
        if !wrote_item {
            let mut row = base;
            row.extend(vec![String::new(); 6]);
            rows.push(row);
        }
    }

    finish(&header, rows)
}

pub fn ledger_csv(entries: &[LedgerEntry]) -> String {
    let header = [
        "entryId",
        "kind",
        "category",
        "description",
        "amount",
        "competenceDate",
        "dueDate",
        "settledAt",
        "quoteId",
        "createdAt",
    ];

    let rows = entries
        .iter()
        .map(|e| {
            vec![
                e.id.clone(),
                e.kind.as_str().to_string(),
                e.category.as_str().to_string(),
                e.description.clone(),
                format_money_csv(e.amount),
                e.competence_date.clone(),
                e.due_date.clone().unwrap_or_default(),
                e.settled_at.clone().unwrap_or_default(),
                e.quote_id.clone().unwrap_or_default(),
                e.created_at.clone(),
            ]
        })
        .collect();

    finish(&header, rows)
}

fn write_text_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

impl DbState {
    /// Quotes issued within `from..=to`, written to `output_path`.
    pub async fn export_quotes_csv(&self, from: String, to: String, output_path: PathBuf) -> Result<PathBuf> {
        parse_ymd(&from)?;
        parse_ymd(&to)?;
        let quotes = self.list_quotes_range(from, to).await?;
        write_text_file(&output_path, &quotes_csv(&quotes))?;
        tracing::info!(path = %output_path.display(), quotes = quotes.len(), "quotes exported");
        Ok(output_path)
    }

    /// Ledger entries by competence date within `from..=to`.
    pub async fn export_ledger_csv(&self, from: String, to: String, output_path: PathBuf) -> Result<PathBuf> {
        parse_ymd(&from)?;
        parse_ymd(&to)?;
        let entries = self.list_entries(Some(from), Some(to)).await?;
        write_text_file(&output_path, &ledger_csv(&entries))?;
        tracing::info!(path = %output_path.display(), entries = entries.len(), "ledger exported");
        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finance::{Category, NewLedgerEntry};
    use crate::model::{ItemGroup, LineItem, LineItemGroup, QuoteHeader, QuoteInput};

    #[test]
    fn escapes_only_when_needed() {
        assert_eq!(csv_escape_field("plain"), "plain");
        assert_eq!(csv_escape_field("a,b"), "\"a,b\"");
        assert_eq!(csv_escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn numbers_use_dot_decimal() {
        assert_eq!(format_money_csv(1234.5), "1234.50");
        assert_eq!(format_quantity_csv(2.0), "2");
        assert_eq!(format_quantity_csv(1.25), "1.25");
        assert_eq!(format_quantity_csv(0.0), "0");
    }

    fn input(client: &str, date: &str, groups: Vec<LineItemGroup>) -> QuoteInput {
        QuoteInput {
            header: QuoteHeader {
                client_name: client.to_string(),
                issue_date: date.to_string(),
                show_values: true,
                ..Default::default()
            },
            groups,
            photos: Vec::new(),
        }
    }

    #[tokio::test]
    async fn quotes_export_has_one_row_per_item() {
        let db = DbState::open_in_memory().unwrap();
        db.create_quote(input(
            "Metalúrgica \"Alfa\", Ltda",
            "2024-03-02",
            vec![
                LineItemGroup {
                    kind: ItemGroup::Parts,
                    items: vec![
                        LineItem::new(Some("RT-40".to_string()), "Retentor", 2.0, 10.0),
                        LineItem::new(None, "Anel", 1.0, 5.0),
                    ],
                },
                LineItemGroup {
                    kind: ItemGroup::Services,
                    items: vec![LineItem::new(None, "Montagem", 1.5, 100.0)],
                },
            ],
        ))
        .await
        .unwrap();
        db.create_quote(input("Fora", "2024-05-01", vec![])).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("quotes.csv");
        db.export_quotes_csv("2024-03-01".to_string(), "2024-03-31".to_string(), path.clone())
            .await
            .unwrap();

        let csv = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = csv.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("quoteId,quoteNumber,revision"));
        assert!(lines[1].contains("\"Metalúrgica \"\"Alfa\"\", Ltda\""));
        assert!(lines[1].contains(",175.00,PARTS,RT-40,Retentor,2,10.00,20.00"));
        assert!(lines[3].ends_with(",SERVICES,,Montagem,1.5,100.00,150.00"));
    }

    #[test]
    fn quote_without_items_keeps_a_row() {
        let q = Quote {
            id: "q".to_string(),
            number: "ORC-0001".to_string(),
            revision: 1,
            header: QuoteHeader {
                client_name: "C".to_string(),
                issue_date: "2024-01-01".to_string(),
                ..Default::default()
            },
            groups: Vec::new(),
            photos: Vec::new(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        let csv = quotes_csv(&[q]);
        let lines: Vec<&str> = csv.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "q,ORC-0001,1,2024-01-01,,C,,,0.00,,,,,,");
    }

    #[tokio::test]
    async fn ledger_export_filters_by_competence_date() {
        let db = DbState::open_in_memory().unwrap();
        for (date, amount) in [("2024-01-31", 100.0), ("2024-02-10", 50.5)] {
            db.create_entry(NewLedgerEntry {
                category: Category::GrossRevenue,
                description: "Serviço".to_string(),
                amount,
                competence_date: date.to_string(),
                due_date: None,
                settled_at: None,
                quote_id: None,
            })
            .await
            .unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        db.export_ledger_csv("2024-02-01".to_string(), "2024-02-29".to_string(), path.clone())
            .await
            .unwrap();

        let csv = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = csv.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains(",REVENUE,GROSS_REVENUE,Serviço,50.50,2024-02-10,,,,"));
    }

    #[tokio::test]
    async fn malformed_range_is_rejected() {
        let db = DbState::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = db
            .export_ledger_csv("2024-13-01".to_string(), "2024-12-31".to_string(), dir.path().join("x.csv"))
            .await;
        assert!(err.is_err());
    }
}
