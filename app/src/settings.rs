use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::locale::Language;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub is_configured: bool,
    pub company_name: String,
    #[serde(default)]
    pub company_tax_id: String,
    #[serde(default)]
    pub company_address: String,
    #[serde(default)]
    pub company_phone: String,
    #[serde(default)]
    pub company_email: String,
    /// `data:image/*;base64,...` as stored from the UI.
    #[serde(default)]
    pub logo_url: String,
    pub language: String,
    pub quote_prefix: String,
    pub next_quote_number: i64,
    pub receipt_prefix: String,
    pub next_receipt_number: i64,
    #[serde(default)]
    pub default_payment_terms: String,
    #[serde(default)]
    pub default_delivery_time: String,
    #[serde(default)]
    pub default_warranty: String,
    /// Validity in days applied to new quotes.
    #[serde(default)]
    pub quote_validity_days: i64,
    /// TTF used for PDF text and width measurement. Built-in Helvetica when empty.
    #[serde(default)]
    pub font_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            is_configured: false,
            company_name: String::new(),
            company_tax_id: String::new(),
            company_address: String::new(),
            company_phone: String::new(),
            company_email: String::new(),
            logo_url: String::new(),
            language: "pt".to_string(),
            quote_prefix: "ORC".to_string(),
            next_quote_number: 1,
            receipt_prefix: "REC".to_string(),
            next_receipt_number: 1,
            default_payment_terms: String::new(),
            default_delivery_time: String::new(),
            default_warranty: String::new(),
            quote_validity_days: 15,
            font_path: String::new(),
        }
    }
}

impl Settings {
    pub fn language(&self) -> Result<Language> {
        Language::parse(Some(&self.language))
    }

    pub fn apply(&mut self, patch: SettingsPatch) -> Result<()> {
        if let Some(v) = patch.company_name {
            self.company_name = v;
        }
        if let Some(v) = patch.company_tax_id {
            self.company_tax_id = v;
        }
        if let Some(v) = patch.company_address {
            self.company_address = v;
        }
        if let Some(v) = patch.company_phone {
            self.company_phone = v;
        }
        if let Some(v) = patch.company_email {
            self.company_email = v;
        }
        if let Some(v) = patch.logo_url {
            self.logo_url = v;
        }
        if let Some(v) = patch.language {
            Language::parse(Some(&v))?;
            self.language = v;
        }
        if let Some(v) = patch.quote_prefix {
            self.quote_prefix = v;
        }
        if let Some(v) = patch.next_quote_number {
            if v < 1 {
                return Err(Error::Validation("next quote number must be positive".to_string()));
            }
            self.next_quote_number = v;
        }
        if let Some(v) = patch.receipt_prefix {
            self.receipt_prefix = v;
        }
        if let Some(v) = patch.next_receipt_number {
            if v < 1 {
                return Err(Error::Validation("next receipt number must be positive".to_string()));
            }
            self.next_receipt_number = v;
        }
        if let Some(v) = patch.default_payment_terms {
            self.default_payment_terms = v;
        }
        if let Some(v) = patch.default_delivery_time {
            self.default_delivery_time = v;
        }
        if let Some(v) = patch.default_warranty {
            self.default_warranty = v;
        }
        if let Some(v) = patch.quote_validity_days {
            self.quote_validity_days = v.max(0);
        }
        if let Some(v) = patch.font_path {
            self.font_path = v;
        }
        self.is_configured = !self.company_name.trim().is_empty();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub company_name: Option<String>,
    pub company_tax_id: Option<String>,
    pub company_address: Option<String>,
    pub company_phone: Option<String>,
    pub company_email: Option<String>,
    pub logo_url: Option<String>,
    pub language: Option<String>,
    pub quote_prefix: Option<String>,
    pub next_quote_number: Option<i64>,
    pub receipt_prefix: Option<String>,
    pub next_receipt_number: Option<i64>,
    pub default_payment_terms: Option<String>,
    pub default_delivery_time: Option<String>,
    pub default_warranty: Option<String>,
    pub quote_validity_days: Option<i64>,
    pub font_path: Option<String>,
}

pub fn format_document_number(prefix: &str, next: i64) -> String {
    format!("{}-{:0>4}", prefix, next)
}
