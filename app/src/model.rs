//! Records kept by the shop: clients, equipment intake, technical analysis and
//! quotes with their revision history.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemGroup {
    Parts,
    Services,
    Machining,
}

impl ItemGroup {
    pub const ALL: [ItemGroup; 3] = [ItemGroup::Parts, ItemGroup::Services, ItemGroup::Machining];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemGroup::Parts => "PARTS",
            ItemGroup::Services => "SERVICES",
            ItemGroup::Machining => "MACHINING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_str().eq_ignore_ascii_case(s.trim()))
    }

    pub fn label_key(&self) -> &'static str {
        match self {
            ItemGroup::Parts => "groupParts",
            ItemGroup::Services => "groupServices",
            ItemGroup::Machining => "groupMachining",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLineItem {
    #[serde(default)]
    code: Option<String>,
    description: String,
    quantity: f64,
    unit_price: f64,
}

/// One itemized charge. `total_price` always equals
/// `round_cents(quantity * unit_price)`; a total arriving from outside is
/// ignored and recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawLineItem")]
pub struct LineItem {
    pub code: Option<String>,
    pub description: String,
    quantity: f64,
    unit_price: f64,
    total_price: f64,
}

impl From<RawLineItem> for LineItem {
    fn from(raw: RawLineItem) -> Self {
        LineItem::new(raw.code, raw.description, raw.quantity, raw.unit_price)
    }
}

impl LineItem {
    pub fn new(code: Option<String>, description: impl Into<String>, quantity: f64, unit_price: f64) -> Self {
        let mut it = LineItem {
            code: code.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            description: description.into(),
            quantity,
            unit_price,
            total_price: 0.0,
        };
        it.recompute();
        it
    }

    fn recompute(&mut self) {
        self.total_price = round_cents(self.quantity * self.unit_price);
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn unit_price(&self) -> f64 {
        self.unit_price
    }

    pub fn total_price(&self) -> f64 {
        self.total_price
    }

    pub fn set_quantity(&mut self, quantity: f64) {
        self.quantity = quantity;
        self.recompute();
    }

    pub fn set_unit_price(&mut self, unit_price: f64) {
        self.unit_price = unit_price;
        self.recompute();
    }

    fn validate(&self) -> Result<()> {
        if self.description.trim().is_empty() {
            return Err(Error::Validation("line item description is required".to_string()));
        }
        if !self.quantity.is_finite() || self.quantity < 0.0 {
            return Err(Error::Validation(format!(
                "invalid quantity {} for {:?}",
                self.quantity, self.description
            )));
        }
        if !self.unit_price.is_finite() || self.unit_price < 0.0 {
            return Err(Error::Validation(format!(
                "invalid unit price {} for {:?}",
                self.unit_price, self.description
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemGroup {
    pub kind: ItemGroup,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

impl LineItemGroup {
    pub fn total(&self) -> f64 {
        round_cents(self.items.iter().map(LineItem::total_price).sum())
    }
}

/// Merges groups of the same kind and orders them parts, services, machining.
pub fn normalize_groups(groups: Vec<LineItemGroup>) -> Vec<LineItemGroup> {
    ItemGroup::ALL
        .into_iter()
        .filter_map(|kind| {
            let items: Vec<LineItem> = groups
                .iter()
                .filter(|g| g.kind == kind)
                .flat_map(|g| g.items.iter().cloned())
                .collect();
            if items.is_empty() {
                None
            } else {
                Some(LineItemGroup { kind, items })
            }
        })
        .collect()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default = "default_true")]
    pub include_in_document: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tax_id: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub created_at: String,
}

impl Client {
    /// `Rua X, 10, 01000-000 São Paulo/SP`
    pub fn full_address(&self) -> String {
        let city_state = [self.city.trim(), self.state.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        let postal_and_city = [self.postal_code.trim(), city_state.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        [self.address.trim(), postal_and_city.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn contact(&self) -> String {
        [self.phone.trim(), self.email.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClient {
    pub name: String,
    #[serde(default)]
    pub tax_id: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

impl NewClient {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("client name is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPatch {
    pub name: Option<String>,
    pub tax_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Equipment intake ("recebimento").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: String,
    pub number: String,
    pub client_id: String,
    pub equipment: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial_number: String,
    pub received_at: String,
    #[serde(default)]
    pub reported_issue: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub photos: Vec<Photo>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReceipt {
    pub client_id: String,
    pub equipment: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial_number: String,
    pub received_at: String,
    #[serde(default)]
    pub reported_issue: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub photos: Vec<Photo>,
}

impl NewReceipt {
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Validation("receipt requires a client".to_string()));
        }
        if self.equipment.trim().is_empty() {
            return Err(Error::Validation("receipt requires an equipment description".to_string()));
        }
        crate::locale::parse_ymd(&self.received_at)?;
        Ok(())
    }
}

/// Technical analysis of a received equipment (service order).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: String,
    pub receipt_id: String,
    #[serde(default)]
    pub technician: String,
    #[serde(default)]
    pub findings: String,
    #[serde(default)]
    pub groups: Vec<LineItemGroup>,
    #[serde(default)]
    pub photos: Vec<Photo>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnalysis {
    pub receipt_id: String,
    #[serde(default)]
    pub technician: String,
    #[serde(default)]
    pub findings: String,
    #[serde(default)]
    pub groups: Vec<LineItemGroup>,
    #[serde(default)]
    pub photos: Vec<Photo>,
}

/// Editable part of a quote. Revisions snapshot this together with the items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteHeader {
    #[serde(default)]
    pub client_id: Option<String>,
    pub client_name: String,
    #[serde(default)]
    pub client_tax_id: String,
    #[serde(default)]
    pub client_address: String,
    #[serde(default)]
    pub client_contact: String,
    #[serde(default)]
    pub receipt_id: Option<String>,
    #[serde(default)]
    pub receipt_number: Option<String>,
    #[serde(default)]
    pub equipment: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial_number: String,
    pub issue_date: String,
    #[serde(default)]
    pub valid_until: Option<String>,
    #[serde(default)]
    pub payment_terms: String,
    #[serde(default)]
    pub delivery_time: String,
    #[serde(default)]
    pub warranty: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "default_true")]
    pub show_values: bool,
}

/// Input for both creating a quote and saving an edit over an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteInput {
    #[serde(flatten)]
    pub header: QuoteHeader,
    #[serde(default)]
    pub groups: Vec<LineItemGroup>,
    #[serde(default)]
    pub photos: Vec<Photo>,
}

impl QuoteInput {
    pub fn validate(&self) -> Result<()> {
        if self.header.client_name.trim().is_empty() {
            return Err(Error::Validation("quote requires a client name".to_string()));
        }
        crate::locale::parse_ymd(&self.header.issue_date)?;
        if let Some(v) = self.header.valid_until.as_deref() {
            crate::locale::parse_ymd(v)?;
        }
        for g in &self.groups {
            for it in &g.items {
                it.validate()?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: String,
    pub number: String,
    pub revision: i64,
    #[serde(flatten)]
    pub header: QuoteHeader,
    pub groups: Vec<LineItemGroup>,
    pub photos: Vec<Photo>,
    pub created_at: String,
    pub updated_at: String,
}

impl Quote {
    pub fn items(&self, kind: ItemGroup) -> &[LineItem] {
        self.groups
            .iter()
            .find(|g| g.kind == kind)
            .map(|g| g.items.as_slice())
            .unwrap_or(&[])
    }

    pub fn item_count(&self) -> usize {
        self.groups.iter().map(|g| g.items.len()).sum()
    }

    pub fn grand_total(&self) -> f64 {
        round_cents(self.groups.iter().map(LineItemGroup::total).sum())
    }

    pub fn snapshot(&self) -> QuoteSnapshot {
        QuoteSnapshot {
            number: self.number.clone(),
            revision: self.revision,
            header: self.header.clone(),
            groups: self.groups.clone(),
        }
    }

    /// Checks run before rendering; a failing quote never reaches the renderer.
    pub fn validate_for_render(&self) -> Result<()> {
        if self.number.trim().is_empty() {
            return Err(Error::Validation("quote number is missing".to_string()));
        }
        if self.header.client_name.trim().is_empty() {
            return Err(Error::Validation("quote requires a client name".to_string()));
        }
        if self.item_count() == 0 {
            return Err(Error::Validation(format!("quote {} has no line items", self.number)));
        }
        Ok(())
    }
}

/// State of a quote as it was persisted right before an edit was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSnapshot {
    pub number: String,
    pub revision: i64,
    #[serde(flatten)]
    pub header: QuoteHeader,
    pub groups: Vec<LineItemGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub id: String,
    pub quote_id: String,
    pub sequence: i64,
    pub snapshot: QuoteSnapshot,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_recomputed_on_every_mutation() {
        let mut it = LineItem::new(None, "Retentor", 3.0, 12.345);
        assert_eq!(it.total_price(), round_cents(3.0 * 12.345));

        it.set_quantity(7.0);
        assert_eq!(it.total_price(), round_cents(7.0 * 12.345));

        it.set_unit_price(0.1);
        assert_eq!(it.total_price(), 0.7);
    }

    #[test]
    fn incoming_total_is_ignored() {
        let json = r#"{"description":"Vedação","quantity":2,"unitPrice":10.5,"totalPrice":999}"#;
        let it: LineItem = serde_json::from_str(json).unwrap();
        assert_eq!(it.total_price(), 21.0);

        let back = serde_json::to_value(&it).unwrap();
        assert_eq!(back["totalPrice"], 21.0);
    }

    #[test]
    fn group_total_sums_rows() {
        let g = LineItemGroup {
            kind: ItemGroup::Parts,
            items: vec![
                LineItem::new(None, "A", 2.0, 10.0),
                LineItem::new(None, "B", 1.0, 5.0),
                LineItem::new(None, "C", 0.0, 100.0),
            ],
        };
        assert_eq!(g.total(), 25.0);
    }

    #[test]
    fn normalize_merges_and_orders_groups() {
        let groups = vec![
            LineItemGroup { kind: ItemGroup::Machining, items: vec![LineItem::new(None, "M", 1.0, 1.0)] },
            LineItemGroup { kind: ItemGroup::Parts, items: vec![LineItem::new(None, "P1", 1.0, 1.0)] },
            LineItemGroup { kind: ItemGroup::Services, items: vec![] },
            LineItemGroup { kind: ItemGroup::Parts, items: vec![LineItem::new(None, "P2", 1.0, 1.0)] },
        ];
        let out = normalize_groups(groups);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kind, ItemGroup::Parts);
        assert_eq!(
            out[0].items.iter().map(|i| i.description.as_str()).collect::<Vec<_>>(),
            vec!["P1", "P2"]
        );
        assert_eq!(out[1].kind, ItemGroup::Machining);
    }

    #[test]
    fn quote_input_validation() {
        let mut input = QuoteInput {
            header: QuoteHeader {
                client_name: "Metalúrgica Alfa".to_string(),
                issue_date: "2024-05-02".to_string(),
                show_values: true,
                ..Default::default()
            },
            groups: vec![LineItemGroup {
                kind: ItemGroup::Services,
                items: vec![LineItem::new(None, "Desmontagem", 1.0, 150.0)],
            }],
            photos: vec![],
        };
        assert!(input.validate().is_ok());

        input.groups[0].items[0].set_quantity(-1.0);
        assert!(matches!(input.validate(), Err(Error::Validation(_))));

        input.groups[0].items[0].set_quantity(1.0);
        input.header.client_name = "  ".to_string();
        assert!(input.validate().is_err());
    }

    #[test]
    fn client_address_and_contact() {
        let c = Client {
            id: "c1".to_string(),
            name: "Hidro Sul".to_string(),
            tax_id: "12.345.678/0001-90".to_string(),
            address: "Rua das Bombas, 10".to_string(),
            city: "Joinville".to_string(),
            state: "SC".to_string(),
            postal_code: "89200-000".to_string(),
            email: "compras@hidrosul.com.br".to_string(),
            phone: "".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(c.full_address(), "Rua das Bombas, 10, 89200-000 Joinville/SC");
        assert_eq!(c.contact(), "compras@hidrosul.com.br");
    }

    #[test]
    fn item_group_parse() {
        assert_eq!(ItemGroup::parse("parts"), Some(ItemGroup::Parts));
        assert_eq!(ItemGroup::parse("MACHINING"), Some(ItemGroup::Machining));
        assert_eq!(ItemGroup::parse("labor"), None);
    }
}
