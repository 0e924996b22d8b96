use rusqlite::{params, Connection, OptionalExtension};

use super::{from_json_column, now_iso, DbState};
use crate::error::Result;
use crate::settings::{Settings, SettingsPatch};

const SETTINGS_ID: &str = "default";

pub(super) fn ensure_settings_row(conn: &Connection) -> Result<(), rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(1) FROM settings WHERE id = ?1",
        params![SETTINGS_ID],
        |row| row.get(0),
    )?;
    if count > 0 {
        return Ok(());
    }

    let s = Settings::default();
    write_settings(conn, &s)
}

fn write_settings(conn: &Connection, s: &Settings) -> Result<(), rusqlite::Error> {
    let data_json = serde_json::to_string(s)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        r#"INSERT INTO settings (id, quotePrefix, nextQuoteNumber, receiptPrefix, nextReceiptNumber, data_json, updatedAt)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT(id) DO UPDATE SET
             quotePrefix = excluded.quotePrefix,
             nextQuoteNumber = excluded.nextQuoteNumber,
             receiptPrefix = excluded.receiptPrefix,
             nextReceiptNumber = excluded.nextReceiptNumber,
             data_json = excluded.data_json,
             updatedAt = excluded.updatedAt"#,
        params![
            SETTINGS_ID,
            s.quote_prefix,
            s.next_quote_number,
            s.receipt_prefix,
            s.next_receipt_number,
            data_json,
            now_iso(),
        ],
    )?;
    Ok(())
}

pub(crate) fn read_settings_from_conn(conn: &Connection) -> Result<Settings, rusqlite::Error> {
    let row = conn
        .query_row(
            "SELECT data_json, quotePrefix, nextQuoteNumber, receiptPrefix, nextReceiptNumber FROM settings WHERE id = ?1",
            params![SETTINGS_ID],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((data_json, quote_prefix, next_quote, receipt_prefix, next_receipt)) = row else {
        return Ok(Settings::default());
    };

    let mut parsed: Settings = from_json_column(0, &data_json)?;
    // Number counters are bumped in place by create_quote / create_receipt
    // without rewriting data_json, so the dedicated columns win.
    parsed.quote_prefix = quote_prefix;
    parsed.next_quote_number = next_quote;
    parsed.receipt_prefix = receipt_prefix;
    parsed.next_receipt_number = next_receipt;
    Ok(parsed)
}

/// Returns the number to use and advances the counter. Must run inside the
/// caller's transaction.
pub(crate) fn take_next_number(conn: &Connection, quote: bool) -> Result<String, rusqlite::Error> {
    let (prefix_col, next_col) = if quote {
        ("quotePrefix", "nextQuoteNumber")
    } else {
        ("receiptPrefix", "nextReceiptNumber")
    };
    let (prefix, next): (String, i64) = conn.query_row(
        &format!("SELECT {prefix_col}, {next_col} FROM settings WHERE id = ?1"),
        params![SETTINGS_ID],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    conn.execute(
        &format!("UPDATE settings SET {next_col} = {next_col} + 1, updatedAt = ?2 WHERE id = ?1"),
        params![SETTINGS_ID, now_iso()],
    )?;
    Ok(crate::settings::format_document_number(&prefix, next))
}

impl DbState {
    pub async fn get_settings(&self) -> Result<Settings> {
        self.with_read("get_settings", |conn| Ok(read_settings_from_conn(conn)?))
            .await
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        self.with_write("update_settings", move |conn| {
            let tx = conn.transaction()?;
            let mut s = read_settings_from_conn(&tx)?;
            s.apply(patch)?;
            write_settings(&tx, &s)?;
            tx.commit()?;
            Ok(s)
        })
        .await
    }

    pub async fn preview_next_quote_number(&self) -> Result<String> {
        self.with_read("preview_next_quote_number", |conn| {
            let s = read_settings_from_conn(conn)?;
            Ok(crate::settings::format_document_number(&s.quote_prefix, s.next_quote_number))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_are_seeded() {
        let db = DbState::open_in_memory().unwrap();
        let s = db.get_settings().await.unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(db.preview_next_quote_number().await.unwrap(), "ORC-0001");
    }

    #[tokio::test]
    async fn update_persists_patch() {
        let db = DbState::open_in_memory().unwrap();
        let s = db
            .update_settings(SettingsPatch {
                company_name: Some("Hidrotec".to_string()),
                quote_prefix: Some("Q".to_string()),
                next_quote_number: Some(41),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(s.is_configured);

        let again = db.get_settings().await.unwrap();
        assert_eq!(again.company_name, "Hidrotec");
        assert_eq!(db.preview_next_quote_number().await.unwrap(), "Q-0041");
    }

    #[tokio::test]
    async fn counters_advance_without_touching_json() {
        let db = DbState::open_in_memory().unwrap();
        let n = db
            .with_write("take", |conn| Ok(take_next_number(conn, false)?))
            .await
            .unwrap();
        assert_eq!(n, "REC-0001");
        let s = db.get_settings().await.unwrap();
        assert_eq!(s.next_receipt_number, 2);
        assert_eq!(s.next_quote_number, 1);
    }
}
