use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use super::clients::read_client_from_conn;
use super::settings::take_next_number;
use super::{from_json_column, now_iso, DbState};
use crate::error::{Error, Result};
use crate::model::{normalize_groups, Analysis, NewAnalysis, NewReceipt, Receipt};

pub(crate) fn read_receipt_from_conn(conn: &Connection, id: &str) -> Result<Option<Receipt>, rusqlite::Error> {
    let json: Option<String> = conn
        .query_row("SELECT data_json FROM receipts WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?;
    json.map(|j| from_json_column(0, &j)).transpose()
}

pub(crate) fn read_analysis_from_conn(conn: &Connection, id: &str) -> Result<Option<Analysis>, rusqlite::Error> {
    let json: Option<String> = conn
        .query_row("SELECT data_json FROM analyses WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?;
    json.map(|j| from_json_column(0, &j)).transpose()
}

fn collect_json<T: serde::de::DeserializeOwned>(
    rows: impl Iterator<Item = Result<String, rusqlite::Error>>,
) -> Result<Vec<T>, rusqlite::Error> {
    let mut out = Vec::new();
    for r in rows {
        out.push(from_json_column(0, &r?)?);
    }
    Ok(out)
}

impl DbState {
    pub async fn create_receipt(&self, input: NewReceipt) -> Result<Receipt> {
        input.validate()?;
        self.with_write("create_receipt", move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if read_client_from_conn(&tx, &input.client_id)?.is_none() {
                return Err(Error::not_found("client", input.client_id));
            }

            let number = take_next_number(&tx, false)?;
            let created = Receipt {
                id: Uuid::new_v4().to_string(),
                number,
                client_id: input.client_id,
                equipment: input.equipment.trim().to_string(),
                brand: input.brand,
                model: input.model,
                serial_number: input.serial_number,
                received_at: input.received_at.trim().to_string(),
                reported_issue: input.reported_issue,
                notes: input.notes,
                photos: input.photos,
                created_at: now_iso(),
            };
            let json = serde_json::to_string(&created)?;
            tx.execute(
                "INSERT INTO receipts (id, number, clientId, receivedAt, createdAt, data_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    created.id,
                    created.number,
                    created.client_id,
                    created.received_at,
                    created.created_at,
                    json
                ],
            )?;
            tx.commit()?;
            Ok(created)
        })
        .await
    }

    pub async fn get_receipt(&self, id: String) -> Result<Option<Receipt>> {
        self.with_read("get_receipt", move |conn| Ok(read_receipt_from_conn(conn, &id)?))
            .await
    }

    /// Newest first.
    pub async fn list_receipts(&self, client_id: Option<String>) -> Result<Vec<Receipt>> {
        self.with_read("list_receipts", move |conn| {
            let out = match client_id {
                Some(cid) => {
                    let mut stmt = conn.prepare(
                        "SELECT data_json FROM receipts WHERE clientId = ?1 ORDER BY receivedAt DESC, createdAt DESC",
                    )?;
                    let rows = stmt.query_map(params![cid], |r| r.get::<_, String>(0))?;
                    collect_json(rows)?
                }
                None => {
                    let mut stmt =
                        conn.prepare("SELECT data_json FROM receipts ORDER BY receivedAt DESC, createdAt DESC")?;
                    let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
                    collect_json(rows)?
                }
            };
            Ok(out)
        })
        .await
    }

    pub async fn delete_receipt(&self, id: String) -> Result<bool> {
        self.with_write("delete_receipt", move |conn| {
            let n = conn.execute("DELETE FROM receipts WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }

    pub async fn create_analysis(&self, input: NewAnalysis) -> Result<Analysis> {
        for g in &input.groups {
            for it in &g.items {
                if it.description.trim().is_empty() {
                    return Err(Error::Validation("line item description is required".to_string()));
                }
            }
        }
        self.with_write("create_analysis", move |conn| {
            if read_receipt_from_conn(conn, &input.receipt_id)?.is_none() {
                return Err(Error::not_found("receipt", input.receipt_id));
            }
            let created = Analysis {
                id: Uuid::new_v4().to_string(),
                receipt_id: input.receipt_id,
                technician: input.technician,
                findings: input.findings,
                groups: normalize_groups(input.groups),
                photos: input.photos,
                created_at: now_iso(),
            };
            let json = serde_json::to_string(&created)?;
            conn.execute(
                "INSERT INTO analyses (id, receiptId, createdAt, data_json) VALUES (?1, ?2, ?3, ?4)",
                params![created.id, created.receipt_id, created.created_at, json],
            )?;
            Ok(created)
        })
        .await
    }

    pub async fn get_analysis(&self, id: String) -> Result<Option<Analysis>> {
        self.with_read("get_analysis", move |conn| Ok(read_analysis_from_conn(conn, &id)?))
            .await
    }

    pub async fn list_analyses_for_receipt(&self, receipt_id: String) -> Result<Vec<Analysis>> {
        self.with_read("list_analyses_for_receipt", move |conn| {
            let mut stmt =
                conn.prepare("SELECT data_json FROM analyses WHERE receiptId = ?1 ORDER BY createdAt ASC")?;
            let rows = stmt.query_map(params![receipt_id], |r| r.get::<_, String>(0))?;
            Ok(collect_json(rows)?)
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{ItemGroup, LineItem, LineItemGroup, NewClient};

    pub(crate) async fn seed_receipt(db: &DbState) -> Receipt {
        let client = db
            .create_client(NewClient {
                name: "Mineração Ômega".to_string(),
                tax_id: "11.222.333/0001-44".to_string(),
                address: "Rod. BR-101, km 30".to_string(),
                city: "Itajaí".to_string(),
                state: "SC".to_string(),
                postal_code: "88300-000".to_string(),
                email: "manutencao@omega.com.br".to_string(),
                phone: "(47) 3000-1000".to_string(),
            })
            .await
            .unwrap();
        db.create_receipt(NewReceipt {
            client_id: client.id,
            equipment: "Cilindro hidráulico".to_string(),
            brand: "Parker".to_string(),
            model: "2H".to_string(),
            serial_number: "SN-778".to_string(),
            received_at: "2024-04-10".to_string(),
            reported_issue: "Vazamento na haste".to_string(),
            notes: String::new(),
            photos: vec![],
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn receipts_are_numbered_sequentially() {
        let db = DbState::open_in_memory().unwrap();
        let a = seed_receipt(&db).await;
        let b = seed_receipt(&db).await;
        assert_eq!(a.number, "REC-0001");
        assert_eq!(b.number, "REC-0002");
        assert_eq!(db.list_receipts(None).await.unwrap().len(), 2);
        assert_eq!(db.list_receipts(Some(a.client_id.clone())).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn receipt_requires_existing_client() {
        let db = DbState::open_in_memory().unwrap();
        let err = db
            .create_receipt(NewReceipt {
                client_id: "ghost".to_string(),
                equipment: "Bomba".to_string(),
                brand: String::new(),
                model: String::new(),
                serial_number: String::new(),
                received_at: "2024-04-10".to_string(),
                reported_issue: String::new(),
                notes: String::new(),
                photos: vec![],
            })
            .await;
        assert!(matches!(err, Err(Error::NotFound { kind: "client", .. })));
        // The failed attempt must not consume a number.
        let s = db.get_settings().await.unwrap();
        assert_eq!(s.next_receipt_number, 1);
    }

    #[tokio::test]
    async fn analyses_attach_to_receipt_and_cascade() {
        let db = DbState::open_in_memory().unwrap();
        let r = seed_receipt(&db).await;
        let a = db
            .create_analysis(NewAnalysis {
                receipt_id: r.id.clone(),
                technician: "Carlos".to_string(),
                findings: "Haste riscada, vedações gastas".to_string(),
                groups: vec![LineItemGroup {
                    kind: ItemGroup::Parts,
                    items: vec![LineItem::new(Some("VD-01".to_string()), "Kit de vedação", 1.0, 320.0)],
                }],
                photos: vec![],
            })
            .await
            .unwrap();
        assert_eq!(db.list_analyses_for_receipt(r.id.clone()).await.unwrap().len(), 1);

        assert!(db.delete_receipt(r.id.clone()).await.unwrap());
        assert!(db.get_analysis(a.id).await.unwrap().is_none());
    }
}
