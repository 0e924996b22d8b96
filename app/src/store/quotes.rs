use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::clients::read_client_from_conn;
use super::receipts::{read_analysis_from_conn, read_receipt_from_conn};
use super::settings::{read_settings_from_conn, take_next_number};
use super::{from_json_column, now_iso, today_ymd, DbState};
use crate::error::{Error, Result};
use crate::locale::{format_ymd, parse_ymd};
use crate::model::{
    normalize_groups, Analysis, Client, ItemGroup, LineItem, LineItemGroup, Photo, Quote, QuoteHeader,
    QuoteInput, QuoteSnapshot, Receipt, Revision,
};
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSummary {
    pub id: String,
    pub number: String,
    pub revision: i64,
    pub client_name: String,
    pub issue_date: String,
    pub total: f64,
    pub updated_at: String,
}

fn write_items(conn: &Connection, quote_id: &str, groups: &[LineItemGroup]) -> Result<(), rusqlite::Error> {
    conn.execute("DELETE FROM quote_items WHERE quoteId = ?1", params![quote_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO quote_items (quoteId, groupKind, position, code, description, quantity, unitPrice)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for g in groups {
        for (pos, it) in g.items.iter().enumerate() {
            stmt.execute(params![
                quote_id,
                g.kind.as_str(),
                pos as i64,
                it.code,
                it.description,
                it.quantity(),
                it.unit_price(),
            ])?;
        }
    }
    Ok(())
}

fn read_items(conn: &Connection, quote_id: &str) -> Result<Vec<LineItemGroup>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT groupKind, code, description, quantity, unitPrice FROM quote_items
         WHERE quoteId = ?1 ORDER BY position ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![quote_id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, Option<String>>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, f64>(3)?,
            r.get::<_, f64>(4)?,
        ))
    })?;

    let mut by_kind: BTreeMap<ItemGroup, Vec<LineItem>> = BTreeMap::new();
    for row in rows {
        let (kind, code, description, quantity, unit_price) = row?;
        let Some(kind) = ItemGroup::parse(&kind) else {
            tracing::warn!(quote_id, kind = %kind, "skipping line item with unknown group");
            continue;
        };
        // Totals are derived here; the table has no total column.
        by_kind
            .entry(kind)
            .or_default()
            .push(LineItem::new(code, description, quantity, unit_price));
    }

    Ok(by_kind
        .into_iter()
        .map(|(kind, items)| LineItemGroup { kind, items })
        .collect())
}

pub(crate) fn read_quote_from_conn(conn: &Connection, id: &str) -> Result<Option<Quote>, rusqlite::Error> {
    let row = conn
        .query_row(
            "SELECT id, number, revision, header_json, photos_json, createdAt, updatedAt FROM quotes WHERE id = ?1",
            params![id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((id, number, revision, header_json, photos_json, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let header: QuoteHeader = from_json_column(3, &header_json)?;
    let photos: Vec<Photo> = from_json_column(4, &photos_json)?;
    let groups = read_items(conn, &id)?;

    Ok(Some(Quote {
        id,
        number,
        revision,
        header,
        groups,
        photos,
        created_at,
        updated_at,
    }))
}

fn to_json_sql<T: Serialize>(v: &T) -> Result<String, rusqlite::Error> {
    serde_json::to_string(v).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn summary_from_row(r: &rusqlite::Row<'_>) -> Result<QuoteSummary, rusqlite::Error> {
    let header: QuoteHeader = from_json_column(3, &r.get::<_, String>(3)?)?;
    Ok(QuoteSummary {
        id: r.get(0)?,
        number: r.get(1)?,
        revision: r.get(2)?,
        client_name: header.client_name,
        issue_date: header.issue_date,
        total: r.get(4)?,
        updated_at: r.get(5)?,
    })
}

impl DbState {
    pub async fn create_quote(&self, input: QuoteInput) -> Result<Quote> {
        input.validate()?;
        self.with_write("create_quote", move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let number = take_next_number(&tx, true)?;
            let groups = normalize_groups(input.groups);
            let now = now_iso();
            let created = Quote {
                id: Uuid::new_v4().to_string(),
                number,
                revision: 0,
                header: input.header,
                groups,
                photos: input.photos,
                created_at: now.clone(),
                updated_at: now,
            };

            tx.execute(
                r#"INSERT INTO quotes (
                    id, number, revision, clientId, issueDate, totalAmount, createdAt, updatedAt, header_json, photos_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                params![
                    created.id,
                    created.number,
                    created.revision,
                    created.header.client_id,
                    created.header.issue_date,
                    created.grand_total(),
                    created.created_at,
                    created.updated_at,
                    to_json_sql(&created.header)?,
                    to_json_sql(&created.photos)?,
                ],
            )?;
            write_items(&tx, &created.id, &created.groups)?;

            tx.commit()?;
            tracing::info!(quote = %created.number, items = created.item_count(), "quote created");
            Ok(created)
        })
        .await
    }

    /// Saves an edit over an existing quote. The persisted state is archived
    /// as the next revision first; then the header is overwritten and the
    /// items are replaced wholesale. All of it commits or none of it does.
    pub async fn save_quote_edit(&self, id: String, input: QuoteInput) -> Result<Quote> {
        input.validate()?;
        self.with_write("save_quote_edit", move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some(current) = read_quote_from_conn(&tx, &id)? else {
                return Err(Error::not_found("quote", id));
            };

            let sequence: i64 = tx.query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM quote_revisions WHERE quoteId = ?1",
                params![id],
                |r| r.get(0),
            )?;
            let now = now_iso();
            tx.execute(
                "INSERT INTO quote_revisions (id, quoteId, sequence, snapshot_json, createdAt) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    id,
                    sequence,
                    to_json_sql(&current.snapshot())?,
                    now,
                ],
            )?;

            let updated = Quote {
                id: current.id,
                number: current.number,
                revision: sequence,
                header: input.header,
                groups: normalize_groups(input.groups),
                photos: input.photos,
                created_at: current.created_at,
                updated_at: now,
            };
            tx.execute(
                r#"UPDATE quotes SET revision = ?2, clientId = ?3, issueDate = ?4, totalAmount = ?5,
                   updatedAt = ?6, header_json = ?7, photos_json = ?8 WHERE id = ?1"#,
                params![
                    updated.id,
                    updated.revision,
                    updated.header.client_id,
                    updated.header.issue_date,
                    updated.grand_total(),
                    updated.updated_at,
                    to_json_sql(&updated.header)?,
                    to_json_sql(&updated.photos)?,
                ],
            )?;
            write_items(&tx, &updated.id, &updated.groups)?;

            tx.commit()?;
            tracing::info!(quote = %updated.number, revision = updated.revision, "quote revised");
            Ok(updated)
        })
        .await
    }

    pub async fn get_quote(&self, id: String) -> Result<Option<Quote>> {
        self.with_read("get_quote", move |conn| Ok(read_quote_from_conn(conn, &id)?))
            .await
    }

    pub async fn find_quote_by_number(&self, number: String) -> Result<Option<Quote>> {
        self.with_read("find_quote_by_number", move |conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT id FROM quotes WHERE number = ?1 ORDER BY createdAt DESC LIMIT 1",
                    params![number.trim()],
                    |r| r.get(0),
                )
                .optional()?;
            match id {
                Some(id) => Ok(read_quote_from_conn(conn, &id)?),
                None => Ok(None),
            }
        })
        .await
    }

    /// Newest first.
    pub async fn list_quotes(&self) -> Result<Vec<QuoteSummary>> {
        self.with_read("list_quotes", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, number, revision, header_json, totalAmount, updatedAt FROM quotes
                 ORDER BY issueDate DESC, createdAt DESC",
            )?;
            let rows = stmt.query_map([], summary_from_row)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
        .await
    }

    /// Quotes issued within `[from, to]` (inclusive, `YYYY-MM-DD`), oldest first.
    pub async fn list_quotes_range(&self, from: String, to: String) -> Result<Vec<Quote>> {
        parse_ymd(&from)?;
        parse_ymd(&to)?;
        self.with_read("list_quotes_range", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM quotes WHERE issueDate >= ?1 AND issueDate <= ?2 ORDER BY issueDate ASC, number ASC",
            )?;
            let ids = stmt
                .query_map(params![from, to], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(q) = read_quote_from_conn(conn, &id)? {
                    out.push(q);
                }
            }
            Ok(out)
        })
        .await
    }

    pub async fn delete_quote(&self, id: String) -> Result<bool> {
        self.with_write("delete_quote", move |conn| {
            let n = conn.execute("DELETE FROM quotes WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }

    /// Oldest first.
    pub async fn list_revisions(&self, quote_id: String) -> Result<Vec<Revision>> {
        self.with_read("list_revisions", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, quoteId, sequence, snapshot_json, createdAt FROM quote_revisions
                 WHERE quoteId = ?1 ORDER BY sequence ASC",
            )?;
            let rows = stmt.query_map(params![quote_id], revision_from_row)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn get_revision(&self, quote_id: String, sequence: i64) -> Result<Option<Revision>> {
        self.with_read("get_revision", move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, quoteId, sequence, snapshot_json, createdAt FROM quote_revisions
                     WHERE quoteId = ?1 AND sequence = ?2",
                    params![quote_id, sequence],
                    revision_from_row,
                )
                .optional()?)
        })
        .await
    }

    pub async fn draft_quote_from_receipt(&self, receipt_id: String) -> Result<QuoteInput> {
        self.with_read("draft_quote_from_receipt", move |conn| {
            let settings = read_settings_from_conn(conn)?;
            let Some(receipt) = read_receipt_from_conn(conn, &receipt_id)? else {
                return Err(Error::not_found("receipt", receipt_id));
            };
            let client = read_client_from_conn(conn, &receipt.client_id)?;
            Ok(quote_draft_from_receipt(&settings, &receipt, client.as_ref(), &today_ymd()))
        })
        .await
    }

    pub async fn draft_quote_from_analysis(&self, analysis_id: String) -> Result<QuoteInput> {
        self.with_read("draft_quote_from_analysis", move |conn| {
            let settings = read_settings_from_conn(conn)?;
            let Some(analysis) = read_analysis_from_conn(conn, &analysis_id)? else {
                return Err(Error::not_found("analysis", analysis_id));
            };
            let Some(receipt) = read_receipt_from_conn(conn, &analysis.receipt_id)? else {
                return Err(Error::not_found("receipt", analysis.receipt_id));
            };
            let client = read_client_from_conn(conn, &receipt.client_id)?;
            Ok(quote_draft_from_analysis(
                &settings,
                &receipt,
                &analysis,
                client.as_ref(),
                &today_ymd(),
            ))
        })
        .await
    }
}

fn revision_from_row(r: &rusqlite::Row<'_>) -> Result<Revision, rusqlite::Error> {
    let snapshot: QuoteSnapshot = from_json_column(3, &r.get::<_, String>(3)?)?;
    Ok(Revision {
        id: r.get(0)?,
        quote_id: r.get(1)?,
        sequence: r.get(2)?,
        snapshot,
        created_at: r.get(4)?,
    })
}

fn valid_until(settings: &Settings, issue_date: &str) -> Option<String> {
    if settings.quote_validity_days <= 0 {
        return None;
    }
    let d = parse_ymd(issue_date).ok()?;
    let until = d.checked_add(time::Duration::days(settings.quote_validity_days))?;
    Some(format_ymd(until))
}

/// Pre-fills a quote from an intake record: client, equipment and the shop's
/// default commercial terms. No line items.
pub fn quote_draft_from_receipt(
    settings: &Settings,
    receipt: &Receipt,
    client: Option<&Client>,
    issue_date: &str,
) -> QuoteInput {
    let header = QuoteHeader {
        client_id: Some(receipt.client_id.clone()),
        client_name: client.map(|c| c.name.clone()).unwrap_or_default(),
        client_tax_id: client.map(|c| c.tax_id.clone()).unwrap_or_default(),
        client_address: client.map(Client::full_address).unwrap_or_default(),
        client_contact: client.map(Client::contact).unwrap_or_default(),
        receipt_id: Some(receipt.id.clone()),
        receipt_number: Some(receipt.number.clone()),
        equipment: receipt.equipment.clone(),
        brand: receipt.brand.clone(),
        model: receipt.model.clone(),
        serial_number: receipt.serial_number.clone(),
        issue_date: issue_date.to_string(),
        valid_until: valid_until(settings, issue_date),
        payment_terms: settings.default_payment_terms.clone(),
        delivery_time: settings.default_delivery_time.clone(),
        warranty: settings.default_warranty.clone(),
        notes: receipt.reported_issue.trim().to_string(),
        show_values: true,
    };
    QuoteInput {
        header,
        groups: Vec::new(),
        photos: receipt.photos.clone(),
    }
}

/// Like [`quote_draft_from_receipt`], plus the analysis' itemized findings
/// and photos. Findings replace the reported issue in the notes.
pub fn quote_draft_from_analysis(
    settings: &Settings,
    receipt: &Receipt,
    analysis: &Analysis,
    client: Option<&Client>,
    issue_date: &str,
) -> QuoteInput {
    let mut draft = quote_draft_from_receipt(settings, receipt, client, issue_date);
    draft.groups = normalize_groups(analysis.groups.clone());
    if !analysis.findings.trim().is_empty() {
        draft.header.notes = analysis.findings.trim().to_string();
    }
    draft.photos.extend(analysis.photos.iter().cloned());
    draft
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewAnalysis;
    use crate::settings::SettingsPatch;
    use crate::store::receipts::tests::seed_receipt;

    fn input(client: &str, items: Vec<(ItemGroup, &str, f64, f64)>) -> QuoteInput {
        let mut groups: Vec<LineItemGroup> = Vec::new();
        for (kind, desc, q, p) in items {
            groups.push(LineItemGroup {
                kind,
                items: vec![LineItem::new(None, desc, q, p)],
            });
        }
        QuoteInput {
            header: QuoteHeader {
                client_name: client.to_string(),
                issue_date: "2024-05-02".to_string(),
                show_values: true,
                ..Default::default()
            },
            groups,
            photos: vec![],
        }
    }

    #[tokio::test]
    async fn create_assigns_number_and_roundtrips_items() {
        let db = DbState::open_in_memory().unwrap();
        let q = db
            .create_quote(input(
                "Alfa",
                vec![
                    (ItemGroup::Services, "Desmontagem", 1.0, 150.0),
                    (ItemGroup::Parts, "Retentor", 2.0, 10.0),
                    (ItemGroup::Parts, "Anel O", 1.0, 5.0),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(q.number, "ORC-0001");
        assert_eq!(q.revision, 0);

        let loaded = db.get_quote(q.id.clone()).await.unwrap().unwrap();
        assert_eq!(loaded, q);
        assert_eq!(loaded.items(ItemGroup::Parts).len(), 2);
        assert_eq!(loaded.grand_total(), 175.0);
    }

    #[tokio::test]
    async fn each_edit_archives_the_previous_state() {
        let db = DbState::open_in_memory().unwrap();
        let q = db
            .create_quote(input("Alfa", vec![(ItemGroup::Parts, "Retentor", 1.0, 10.0)]))
            .await
            .unwrap();

        let mut states = vec![q.clone()];
        for n in 1..=3 {
            let edit = input("Alfa", vec![(ItemGroup::Parts, "Retentor", (n + 1) as f64, 10.0)]);
            let saved = db.save_quote_edit(q.id.clone(), edit).await.unwrap();
            assert_eq!(saved.revision, n);
            states.push(saved);
        }

        let revisions = db.list_revisions(q.id.clone()).await.unwrap();
        assert_eq!(revisions.len(), 3);
        for (i, rev) in revisions.iter().enumerate() {
            assert_eq!(rev.sequence, i as i64 + 1);
            assert_eq!(rev.snapshot, states[i].snapshot());
        }

        let live = db.get_quote(q.id.clone()).await.unwrap().unwrap();
        assert_eq!(live.items(ItemGroup::Parts)[0].quantity(), 4.0);
        assert_eq!(live.revision, 3);

        let second = db.get_revision(q.id.clone(), 2).await.unwrap().unwrap();
        assert_eq!(second.snapshot.groups[0].items[0].quantity(), 2.0);
    }

    #[tokio::test]
    async fn edit_replaces_items_wholesale() {
        let db = DbState::open_in_memory().unwrap();
        let q = db
            .create_quote(input(
                "Alfa",
                vec![
                    (ItemGroup::Parts, "Retentor", 1.0, 10.0),
                    (ItemGroup::Machining, "Retífica", 1.0, 80.0),
                ],
            ))
            .await
            .unwrap();

        let saved = db
            .save_quote_edit(q.id.clone(), input("Alfa", vec![(ItemGroup::Services, "Teste em bancada", 1.0, 90.0)]))
            .await
            .unwrap();
        let live = db.get_quote(q.id).await.unwrap().unwrap();
        assert_eq!(live, saved);
        assert_eq!(live.groups.len(), 1);
        assert_eq!(live.groups[0].kind, ItemGroup::Services);
    }

    #[tokio::test]
    async fn failed_edit_leaves_no_revision() {
        let db = DbState::open_in_memory().unwrap();
        let q = db
            .create_quote(input("Alfa", vec![(ItemGroup::Parts, "Retentor", 1.0, 10.0)]))
            .await
            .unwrap();
        assert!(db.save_quote_edit(q.id.clone(), input("", vec![])).await.is_err());
        assert!(db.list_revisions(q.id.clone()).await.unwrap().is_empty());

        let missing = db.save_quote_edit("nope".to_string(), input("Alfa", vec![])).await;
        assert!(matches!(missing, Err(Error::NotFound { kind: "quote", .. })));
    }

    #[tokio::test]
    async fn delete_cascades_items_and_revisions() {
        let db = DbState::open_in_memory().unwrap();
        let q = db
            .create_quote(input("Alfa", vec![(ItemGroup::Parts, "Retentor", 1.0, 10.0)]))
            .await
            .unwrap();
        db.save_quote_edit(q.id.clone(), input("Alfa", vec![])).await.unwrap();
        assert!(db.delete_quote(q.id.clone()).await.unwrap());

        let leftovers = db
            .with_read("count", |conn| {
                let items: i64 = conn.query_row("SELECT COUNT(1) FROM quote_items", [], |r| r.get(0))?;
                let revs: i64 = conn.query_row("SELECT COUNT(1) FROM quote_revisions", [], |r| r.get(0))?;
                Ok(items + revs)
            })
            .await
            .unwrap();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn list_and_range_queries() {
        let db = DbState::open_in_memory().unwrap();
        let mut a = input("Alfa", vec![(ItemGroup::Parts, "Retentor", 1.0, 10.0)]);
        a.header.issue_date = "2024-01-15".to_string();
        let mut b = input("Beta", vec![(ItemGroup::Parts, "Bucha", 2.0, 7.5)]);
        b.header.issue_date = "2024-02-20".to_string();
        db.create_quote(a).await.unwrap();
        let qb = db.create_quote(b).await.unwrap();

        let all = db.list_quotes().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].client_name, "Beta");
        assert_eq!(all[0].total, 15.0);

        let feb = db
            .list_quotes_range("2024-02-01".to_string(), "2024-02-29".to_string())
            .await
            .unwrap();
        assert_eq!(feb.len(), 1);
        assert_eq!(feb[0].id, qb.id);

        let found = db.find_quote_by_number("ORC-0002".to_string()).await.unwrap().unwrap();
        assert_eq!(found.id, qb.id);
    }

    #[tokio::test]
    async fn drafts_prefill_from_intake_and_analysis() {
        let db = DbState::open_in_memory().unwrap();
        db.update_settings(SettingsPatch {
            default_payment_terms: Some("28 dias".to_string()),
            quote_validity_days: Some(10),
            ..Default::default()
        })
        .await
        .unwrap();
        let r = seed_receipt(&db).await;

        let draft = db.draft_quote_from_receipt(r.id.clone()).await.unwrap();
        assert_eq!(draft.header.client_name, "Mineração Ômega");
        assert_eq!(draft.header.receipt_number.as_deref(), Some("REC-0001"));
        assert_eq!(draft.header.equipment, "Cilindro hidráulico");
        assert_eq!(draft.header.payment_terms, "28 dias");
        assert_eq!(draft.header.notes, "Vazamento na haste");
        assert!(draft.groups.is_empty());

        let a = db
            .create_analysis(NewAnalysis {
                receipt_id: r.id.clone(),
                technician: "Carlos".to_string(),
                findings: "Haste riscada".to_string(),
                groups: vec![LineItemGroup {
                    kind: ItemGroup::Parts,
                    items: vec![LineItem::new(None, "Kit de vedação", 1.0, 320.0)],
                }],
                photos: vec![],
            })
            .await
            .unwrap();
        let draft = db.draft_quote_from_analysis(a.id).await.unwrap();
        assert_eq!(draft.header.notes, "Haste riscada");
        assert_eq!(draft.groups.len(), 1);
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn validity_window_is_added_to_issue_date() {
        let mut s = Settings::default();
        s.quote_validity_days = 15;
        assert_eq!(valid_until(&s, "2024-02-20").as_deref(), Some("2024-03-06"));
        s.quote_validity_days = 0;
        assert_eq!(valid_until(&s, "2024-02-20"), None);
    }
}
