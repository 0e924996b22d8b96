use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{now_iso, DbState};
use crate::error::{Error, Result};
use crate::finance::{build_dfc, build_dre, Category, DfcReport, DreReport, EntryKind, LedgerEntry, NewLedgerEntry};
use crate::locale::parse_ymd;

const ENTRY_COLUMNS: &str =
    "id, kind, category, description, amount, competenceDate, dueDate, settledAt, quoteId, createdAt";

fn bad_enum(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unknown value {value:?}").into(),
    )
}

fn entry_from_row(r: &rusqlite::Row<'_>) -> Result<LedgerEntry, rusqlite::Error> {
    let kind: String = r.get(1)?;
    let category: String = r.get(2)?;
    Ok(LedgerEntry {
        id: r.get(0)?,
        kind: EntryKind::parse(&kind).ok_or_else(|| bad_enum(1, &kind))?,
        category: Category::parse(&category).ok_or_else(|| bad_enum(2, &category))?,
        description: r.get(3)?,
        amount: r.get(4)?,
        competence_date: r.get(5)?,
        due_date: r.get(6)?,
        settled_at: r.get(7)?,
        quote_id: r.get(8)?,
        created_at: r.get(9)?,
    })
}

fn read_entry_from_conn(conn: &Connection, id: &str) -> Result<Option<LedgerEntry>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE id = ?1"),
        params![id],
        entry_from_row,
    )
    .optional()
}

/// Entries whose competence date or settlement date falls in the range, so
/// both reports can be built from one read.
fn read_entries_touching(conn: &Connection, from: &str, to: &str) -> Result<Vec<LedgerEntry>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        r#"SELECT {ENTRY_COLUMNS} FROM ledger_entries
           WHERE (competenceDate >= ?1 AND competenceDate <= ?2)
              OR (settledAt IS NOT NULL AND settledAt >= ?1 AND settledAt <= ?2)
           ORDER BY competenceDate ASC, createdAt ASC"#
    ))?;
    let rows = stmt.query_map(params![from, to], entry_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

impl DbState {
    pub async fn create_entry(&self, input: NewLedgerEntry) -> Result<LedgerEntry> {
        let input = input.normalized()?;
        self.with_write("create_entry", move |conn| {
            let created = LedgerEntry {
                id: Uuid::new_v4().to_string(),
                kind: input.category.kind(),
                category: input.category,
                description: input.description,
                amount: input.amount,
                competence_date: input.competence_date,
                due_date: input.due_date,
                settled_at: input.settled_at,
                quote_id: input.quote_id,
                created_at: now_iso(),
            };
            conn.execute(
                &format!("INSERT INTO ledger_entries ({ENTRY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    created.id,
                    created.kind.as_str(),
                    created.category.as_str(),
                    created.description,
                    created.amount,
                    created.competence_date,
                    created.due_date,
                    created.settled_at,
                    created.quote_id,
                    created.created_at,
                ],
            )?;
            Ok(created)
        })
        .await
    }

    /// Entries with competence date in `[from, to]`, both optional, newest first.
    pub async fn list_entries(&self, from: Option<String>, to: Option<String>) -> Result<Vec<LedgerEntry>> {
        for d in from.iter().chain(to.iter()) {
            parse_ymd(d)?;
        }
        self.with_read("list_entries", move |conn| {
            let mut stmt = conn.prepare(&format!(
                r#"SELECT {ENTRY_COLUMNS} FROM ledger_entries
                   WHERE (?1 IS NULL OR competenceDate >= ?1)
                     AND (?2 IS NULL OR competenceDate <= ?2)
                   ORDER BY competenceDate DESC, createdAt DESC"#
            ))?;
            let rows = stmt.query_map(params![from, to], entry_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// Marks an entry as paid/received on `settled_at`. Settling again moves
    /// the cash date.
    pub async fn settle_entry(&self, id: String, settled_at: String) -> Result<LedgerEntry> {
        let settled_at = settled_at.trim().to_string();
        parse_ymd(&settled_at)?;
        self.with_write("settle_entry", move |conn| {
            let n = conn.execute(
                "UPDATE ledger_entries SET settledAt = ?2 WHERE id = ?1",
                params![id, settled_at],
            )?;
            if n == 0 {
                return Err(Error::not_found("ledger entry", id));
            }
            read_entry_from_conn(conn, &id)?.ok_or_else(|| Error::not_found("ledger entry", id))
        })
        .await
    }

    pub async fn delete_entry(&self, id: String) -> Result<bool> {
        self.with_write("delete_entry", move |conn| {
            let n = conn.execute("DELETE FROM ledger_entries WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }

    pub async fn dre_report(&self, from: String, to: String) -> Result<DreReport> {
        self.with_read("dre_report", move |conn| {
            let entries = read_entries_touching(conn, &from, &to)?;
            build_dre(&entries, &from, &to)
        })
        .await
    }

    pub async fn dfc_report(&self, from: String, to: String, opening_balance: f64) -> Result<DfcReport> {
        self.with_read("dfc_report", move |conn| {
            let entries = read_entries_touching(conn, &from, &to)?;
            build_dfc(&entries, &from, &to, opening_balance)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entry(category: Category, amount: f64, competence: &str) -> NewLedgerEntry {
        NewLedgerEntry {
            category,
            description: format!("{} {}", category.as_str(), competence),
            amount,
            competence_date: competence.to_string(),
            due_date: None,
            settled_at: None,
            quote_id: None,
        }
    }

    #[tokio::test]
    async fn create_list_settle_delete() {
        let db = DbState::open_in_memory().unwrap();
        let e = db
            .create_entry(new_entry(Category::GrossRevenue, 1500.0, "2024-03-10"))
            .await
            .unwrap();
        assert_eq!(e.kind, EntryKind::Revenue);
        db.create_entry(new_entry(Category::Cost, 400.0, "2024-04-02")).await.unwrap();

        let march = db
            .list_entries(Some("2024-03-01".to_string()), Some("2024-03-31".to_string()))
            .await
            .unwrap();
        assert_eq!(march.len(), 1);
        assert_eq!(march[0], e);
        assert_eq!(db.list_entries(None, None).await.unwrap().len(), 2);

        let settled = db.settle_entry(e.id.clone(), "2024-04-05".to_string()).await.unwrap();
        assert_eq!(settled.settled_at.as_deref(), Some("2024-04-05"));

        assert!(db.delete_entry(e.id.clone()).await.unwrap());
        assert!(matches!(
            db.settle_entry(e.id, "2024-04-05".to_string()).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn reports_read_from_store() {
        let db = DbState::open_in_memory().unwrap();
        let rev = db
            .create_entry(new_entry(Category::GrossRevenue, 2000.0, "2024-03-10"))
            .await
            .unwrap();
        // Accrued in February, paid in March.
        let mut cost = new_entry(Category::Cost, 500.0, "2024-02-20");
        cost.settled_at = Some("2024-03-01".to_string());
        db.create_entry(cost).await.unwrap();
        db.settle_entry(rev.id, "2024-03-28".to_string()).await.unwrap();

        let dre = db.dre_report("2024-03-01".to_string(), "2024-03-31".to_string()).await.unwrap();
        assert_eq!(dre.gross_revenue, 2000.0);
        assert_eq!(dre.costs, 0.0);

        let dfc = db
            .dfc_report("2024-03-01".to_string(), "2024-03-31".to_string(), 100.0)
            .await
            .unwrap();
        assert_eq!(dfc.months.len(), 1);
        assert_eq!(dfc.months[0].inflows, 2000.0);
        assert_eq!(dfc.months[0].outflows, 500.0);
        assert_eq!(dfc.closing_balance, 1600.0);
    }

    #[tokio::test]
    async fn invalid_dates_are_rejected() {
        let db = DbState::open_in_memory().unwrap();
        assert!(db.create_entry(new_entry(Category::Cost, 10.0, "03/10/2024")).await.is_err());
        assert!(db.list_entries(Some("2024-13-01".to_string()), None).await.is_err());
    }
}
