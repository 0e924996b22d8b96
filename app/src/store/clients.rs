use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{from_json_column, now_iso, DbState};
use crate::error::{Error, Result};
use crate::model::{Client, ClientPatch, NewClient};

pub(crate) fn read_client_from_conn(conn: &Connection, id: &str) -> Result<Option<Client>, rusqlite::Error> {
    let json: Option<String> = conn
        .query_row("SELECT data_json FROM clients WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?;
    json.map(|j| from_json_column(0, &j)).transpose()
}

fn write_client(conn: &Connection, c: &Client) -> Result<(), rusqlite::Error> {
    let json = serde_json::to_string(c).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        r#"INSERT INTO clients (id, name, taxId, createdAt, data_json) VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(id) DO UPDATE SET name = excluded.name, taxId = excluded.taxId, data_json = excluded.data_json"#,
        params![c.id, c.name, c.tax_id, c.created_at, json],
    )?;
    Ok(())
}

/// Digits only, so `12.345.678/0001-90` matches `12345678000190`.
fn tax_id_digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

impl DbState {
    pub async fn create_client(&self, input: NewClient) -> Result<Client> {
        input.validate()?;
        self.with_write("create_client", move |conn| {
            let created = Client {
                id: Uuid::new_v4().to_string(),
                name: input.name.trim().to_string(),
                tax_id: input.tax_id.trim().to_string(),
                address: input.address,
                city: input.city,
                state: input.state,
                postal_code: input.postal_code,
                email: input.email,
                phone: input.phone,
                created_at: now_iso(),
            };
            write_client(conn, &created)?;
            Ok(created)
        })
        .await
    }

    pub async fn get_client(&self, id: String) -> Result<Option<Client>> {
        self.with_read("get_client", move |conn| Ok(read_client_from_conn(conn, &id)?))
            .await
    }

    /// Case-insensitive match on name; digit match on tax id.
    pub async fn list_clients(&self, search: Option<String>) -> Result<Vec<Client>> {
        self.with_read("list_clients", move |conn| {
            let mut stmt = conn.prepare("SELECT data_json FROM clients ORDER BY name COLLATE NOCASE ASC")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            let mut out = Vec::new();
            for r in rows {
                out.push(from_json_column::<Client>(0, &r?)?);
            }

            let q = search.as_deref().map(str::trim).filter(|s| !s.is_empty());
            if let Some(q) = q {
                let q_lower = q.to_lowercase();
                let q_digits = tax_id_digits(q);
                out.retain(|c| {
                    c.name.to_lowercase().contains(&q_lower)
                        || (!q_digits.is_empty() && tax_id_digits(&c.tax_id).contains(&q_digits))
                });
            }
            Ok(out)
        })
        .await
    }

    pub async fn update_client(&self, id: String, patch: ClientPatch) -> Result<Client> {
        self.with_write("update_client", move |conn| {
            let Some(mut existing) = read_client_from_conn(conn, &id)? else {
                return Err(Error::not_found("client", id));
            };
            if let Some(v) = patch.name {
                if v.trim().is_empty() {
                    return Err(Error::Validation("client name is required".to_string()));
                }
                existing.name = v.trim().to_string();
            }
            if let Some(v) = patch.tax_id {
                existing.tax_id = v.trim().to_string();
            }
            if let Some(v) = patch.address {
                existing.address = v;
            }
            if let Some(v) = patch.city {
                existing.city = v;
            }
            if let Some(v) = patch.state {
                existing.state = v;
            }
            if let Some(v) = patch.postal_code {
                existing.postal_code = v;
            }
            if let Some(v) = patch.email {
                existing.email = v;
            }
            if let Some(v) = patch.phone {
                existing.phone = v;
            }
            write_client(conn, &existing)?;
            Ok(existing)
        })
        .await
    }

    pub async fn delete_client(&self, id: String) -> Result<bool> {
        self.with_write("delete_client", move |conn| {
            let n = conn.execute("DELETE FROM clients WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_client(name: &str, tax_id: &str) -> NewClient {
        NewClient {
            name: name.to_string(),
            tax_id: tax_id.to_string(),
            address: String::new(),
            city: String::new(),
            state: String::new(),
            postal_code: String::new(),
            email: String::new(),
            phone: String::new(),
        }
    }

    #[tokio::test]
    async fn create_get_update_delete() {
        let db = DbState::open_in_memory().unwrap();
        let c = db.create_client(new_client(" Usina Beta ", "")).await.unwrap();
        assert_eq!(c.name, "Usina Beta");

        let found = db.get_client(c.id.clone()).await.unwrap().unwrap();
        assert_eq!(found.id, c.id);

        let updated = db
            .update_client(
                c.id.clone(),
                ClientPatch {
                    phone: Some("(47) 3333-0000".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.phone, "(47) 3333-0000");

        assert!(db.delete_client(c.id.clone()).await.unwrap());
        assert!(db.get_client(c.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_rejects_blank_name() {
        let db = DbState::open_in_memory().unwrap();
        assert!(matches!(
            db.create_client(new_client("  ", "")).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn update_missing_client_is_not_found() {
        let db = DbState::open_in_memory().unwrap();
        let err = db.update_client("nope".to_string(), ClientPatch::default()).await;
        assert!(matches!(err, Err(Error::NotFound { kind: "client", .. })));
    }

    #[tokio::test]
    async fn search_by_name_and_tax_id() {
        let db = DbState::open_in_memory().unwrap();
        db.create_client(new_client("Agro Gama", "12.345.678/0001-90")).await.unwrap();
        db.create_client(new_client("Construtora Delta", "98.765.432/0001-10")).await.unwrap();

        let all = db.list_clients(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "Agro Gama");

        let by_name = db.list_clients(Some("delta".to_string())).await.unwrap();
        assert_eq!(by_name.len(), 1);

        let by_tax = db.list_clients(Some("12345678".to_string())).await.unwrap();
        assert_eq!(by_tax.len(), 1);
        assert_eq!(by_tax[0].name, "Agro Gama");
    }
}
