//! Back office for a hydraulic equipment repair shop.
//!
//! Equipment intake (receipts), technical analyses, quotes with revision
//! history and paginated PDF output, a cash ledger with DRE/DFC reports, and
//! CSV export. Everything persists in a single SQLite file behind [`DbState`].

pub mod error;
pub mod export;
pub mod finance;
pub mod labels;
pub mod locale;
pub mod model;
pub mod pdf;
pub mod photos;
pub mod settings;
pub mod store;

pub use error::{Error, Result};
pub use finance::{
    build_dfc, build_dre, Category, DfcMonth, DfcReport, DreReport, EntryKind, LedgerEntry, NewLedgerEntry,
};
pub use labels::{sanity_check_embedded_labels, translate, Labels};
pub use locale::Language;
pub use model::{
    Analysis, Client, ClientPatch, ItemGroup, LineItem, LineItemGroup, NewAnalysis, NewClient, NewReceipt, Photo,
    Quote, QuoteHeader, QuoteInput, QuoteSnapshot, Receipt, Revision,
};
pub use pdf::{quote_pdf_filename, render_quote_pdf, render_quote_pdf_with_images, CompanyInfo, FontSource, RenderContext};
pub use photos::PhotoLoader;
pub use settings::{Settings, SettingsPatch};
pub use store::{quote_draft_from_analysis, quote_draft_from_receipt, DatabaseInfo, DbState, QuoteSummary};
