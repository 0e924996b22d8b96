use std::collections::HashMap;
use std::sync::OnceLock;

use serde::Deserialize;

use crate::locale::Language;

#[derive(Debug, Clone, Deserialize)]
struct LabelsFile {
    pt: HashMap<String, String>,
    en: HashMap<String, String>,
}

static LABELS: OnceLock<Result<LabelsFile, String>> = OnceLock::new();

fn labels_file() -> Result<&'static LabelsFile, String> {
    let file = LABELS.get_or_init(|| {
        let json = include_str!("../assets/labels.json");
        serde_json::from_str::<LabelsFile>(json)
            .map_err(|e| format!("Failed to parse embedded assets/labels.json: {e}"))
    });
    file.as_ref().map_err(|e| e.clone())
}

/// Translation table for one language. Unknown keys render as the key itself
/// so a missing entry shows up in the output instead of vanishing.
#[derive(Debug, Clone, Copy)]
pub struct Labels {
    map: Option<&'static HashMap<String, String>>,
}

impl Labels {
    pub fn for_language(lang: Language) -> Self {
        let map = match labels_file() {
            Ok(file) => Some(match lang {
                Language::Pt => &file.pt,
                Language::En => &file.en,
            }),
            Err(e) => {
                tracing::error!(error = %e, "embedded labels unavailable");
                None
            }
        };
        Self { map }
    }

    pub fn get<'a>(&self, key: &'a str) -> &'a str {
        match self.map.and_then(|m| m.get(key)) {
            Some(v) => v.as_str(),
            None => {
                tracing::debug!(key, "missing label");
                key
            }
        }
    }

    /// Looks up `key` and substitutes `{NAME}` placeholders.
    pub fn fill(&self, key: &str, vars: &[(&str, &str)]) -> String {
        let mut out = self.get(key).to_string();
        for (name, value) in vars {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        out
    }
}

/// Translation lookup keyed by string id and locale.
pub fn translate(lang: Language, key: &str) -> String {
    Labels::for_language(lang).get(key).to_string()
}

/// Never panics: reports problems with the embedded table at startup.
pub fn sanity_check_embedded_labels() {
    match labels_file() {
        Ok(file) => {
            for key in file.pt.keys() {
                if !file.en.contains_key(key) {
                    tracing::warn!(key = %key, "label missing for en");
                }
            }
            for key in file.en.keys() {
                if !file.pt.contains_key(key) {
                    tracing::warn!(key = %key, "label missing for pt");
                }
            }
        }
        Err(e) => tracing::error!(error = %e, "labels.json unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_locales_have_the_same_keys() {
        let file = labels_file().unwrap();
        let mut pt: Vec<_> = file.pt.keys().collect();
        let mut en: Vec<_> = file.en.keys().collect();
        pt.sort();
        en.sort();
        assert_eq!(pt, en);
    }

    #[test]
    fn lookup_by_locale() {
        assert_eq!(translate(Language::Pt, "groupParts"), "Peças");
        assert_eq!(translate(Language::En, "groupParts"), "Parts");
    }

    #[test]
    fn unknown_key_falls_back_to_key() {
        assert_eq!(Labels::for_language(Language::En).get("noSuchKey"), "noSuchKey");
    }

    #[test]
    fn fill_substitutes_placeholders() {
        let l = Labels::for_language(Language::En);
        assert_eq!(l.fill("footerPage", &[("PAGE", "2"), ("PAGES", "5")]), "Page 2 of 5");
    }
}
