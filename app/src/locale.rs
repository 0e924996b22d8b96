use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Language {
    Pt,
    En,
}

impl Language {
    /// Language selection must be explicit: no silent fallback to Portuguese.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty());
        let Some(l) = raw else {
            return Err(Error::InvalidLanguage(String::new()));
        };
        let lower = l.to_ascii_lowercase();
        if lower == "pt" || lower.starts_with("pt-") || lower.starts_with("pt_") {
            Ok(Language::Pt)
        } else if lower == "en" || lower.starts_with("en-") || lower.starts_with("en_") {
            Ok(Language::En)
        } else {
            Err(Error::InvalidLanguage(l.to_string()))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Pt => "pt",
            Language::En => "en",
        }
    }

    pub fn format(&self) -> NumberFormat {
        match self {
            Language::Pt => NumberFormat {
                currency_symbol: "R$",
                symbol_space: true,
                thousands: '.',
                decimal: ',',
            },
            Language::En => NumberFormat {
                currency_symbol: "$",
                symbol_space: false,
                thousands: ',',
                decimal: '.',
            },
        }
    }

    pub fn format_money(&self, v: f64) -> String {
        self.format().money(v)
    }

    pub fn format_number(&self, v: f64) -> String {
        self.format().number(v)
    }

    /// Quantities print without trailing zeros (`2`, `1,5`).
    pub fn format_qty(&self, v: f64) -> String {
        let s = format!("{:.3}", v);
        let s = s.trim_end_matches('0').trim_end_matches('.');
        let s = if s.is_empty() || s == "-0" { "0" } else { s };
        match self {
            Language::Pt => s.replace('.', ","),
            Language::En => s.to_string(),
        }
    }

    pub fn format_date(&self, d: Date) -> String {
        let (day, month, year) = (d.day(), u8::from(d.month()), d.year());
        match self {
            Language::Pt => format!("{:02}/{:02}/{:04}", day, month, year),
            Language::En => format!("{:02}/{:02}/{:04}", month, day, year),
        }
    }

    pub fn format_timestamp(&self, ts: OffsetDateTime) -> String {
        format!("{} {:02}:{:02}", self.format_date(ts.date()), ts.hour(), ts.minute())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberFormat {
    pub currency_symbol: &'static str,
    pub symbol_space: bool,
    pub thousands: char,
    pub decimal: char,
}

impl NumberFormat {
    /// Two decimals with locale grouping, e.g. `16.200,00` or `16,200.00`.
    pub fn number(&self, v: f64) -> String {
        let s = format!("{:.2}", v.abs());
        let (int_part, dec_part) = s.split_once('.').unwrap_or((s.as_str(), "00"));

        let mut out = String::new();
        let chars: Vec<char> = int_part.chars().collect();
        let mut cnt = 0;
        for i in (0..chars.len()).rev() {
            if cnt == 3 {
                out.push(self.thousands);
                cnt = 0;
            }
            out.push(chars[i]);
            cnt += 1;
        }
        let int_with_sep: String = out.chars().rev().collect();
        let negative = v < 0.0 && (int_part != "0" || dec_part != "00");
        format!(
            "{}{}{}{}",
            if negative { "-" } else { "" },
            int_with_sep,
            self.decimal,
            dec_part
        )
    }

    pub fn money(&self, v: f64) -> String {
        let n = self.number(v);
        let (sign, digits) = match n.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", n.as_str()),
        };
        let space = if self.symbol_space { " " } else { "" };
        format!("{}{}{}{}", sign, self.currency_symbol, space, digits)
    }
}

/// Parses `YYYY-MM-DD`.
pub fn parse_ymd(s: &str) -> Result<Date> {
    let fmt = time::macros::format_description!("[year]-[month]-[day]");
    Date::parse(s.trim(), &fmt).map_err(|e| Error::Validation(format!("invalid date {s:?}: {e}")))
}

pub fn format_ymd(d: Date) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), u8::from(d.month()), d.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn parse_accepts_region_variants() {
        assert_eq!(Language::parse(Some("pt-BR")).unwrap(), Language::Pt);
        assert_eq!(Language::parse(Some(" PT ")).unwrap(), Language::Pt);
        assert_eq!(Language::parse(Some("en")).unwrap(), Language::En);
        assert_eq!(Language::parse(Some("en_US")).unwrap(), Language::En);
    }

    #[test]
    fn parse_rejects_missing_or_unknown() {
        assert!(Language::parse(None).is_err());
        assert!(Language::parse(Some("  ")).is_err());
        assert!(matches!(
            Language::parse(Some("sr")),
            Err(Error::InvalidLanguage(l)) if l == "sr"
        ));
    }

    #[test]
    fn money_changes_symbol_and_separators_only() {
        let v = 1234567.891;
        assert_eq!(Language::Pt.format_money(v), "R$ 1.234.567,89");
        assert_eq!(Language::En.format_money(v), "$1,234,567.89");
        assert_eq!(v, 1234567.891);
    }

    #[test]
    fn money_small_and_negative_values() {
        assert_eq!(Language::Pt.format_money(0.0), "R$ 0,00");
        assert_eq!(Language::En.format_money(5.0), "$5.00");
        assert_eq!(Language::En.format_money(-1500.5), "-$1,500.50");
        assert_eq!(Language::Pt.format_money(-0.001), "R$ 0,00");
    }

    #[test]
    fn quantities_drop_trailing_zeros() {
        assert_eq!(Language::Pt.format_qty(2.0), "2");
        assert_eq!(Language::Pt.format_qty(1.5), "1,5");
        assert_eq!(Language::En.format_qty(0.25), "0.25");
        assert_eq!(Language::En.format_qty(0.0), "0");
    }

    #[test]
    fn dates_follow_locale_order() {
        let d = date!(2024 - 03 - 07);
        assert_eq!(Language::Pt.format_date(d), "07/03/2024");
        assert_eq!(Language::En.format_date(d), "03/07/2024");
        assert_eq!(
            Language::Pt.format_timestamp(datetime!(2024-03-07 14:05 UTC)),
            "07/03/2024 14:05"
        );
    }

    #[test]
    fn ymd_roundtrip_and_rejects_garbage() {
        let d = parse_ymd("2024-12-31").unwrap();
        assert_eq!(format_ymd(d), "2024-12-31");
        assert!(parse_ymd("31/12/2024").is_err());
    }
}
