//! Quote PDF rendering.
//!
//! Two phases: [`layout_quote`] paginates the document into positioned draw
//! operations, then the painter writes them with printpdf and stamps each
//! footer with `page i of N`. Photos are fetched before layout, one at a time
//! and in order.

use std::fmt;
use std::path::Path;

use printpdf::image_crate::DynamicImage;
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::labels::Labels;
use crate::locale::Language;
use crate::model::{Photo, Quote};
use crate::photos::{decode_logo, PhotoLoader};
use crate::settings::Settings;

mod layout;
mod paint;
mod text;

pub use layout::{
    layout_quote, DrawOp, Layout, LayoutInput, PageLayout, PhotoPlacement, PhotoSlot, RowPlacement, TotalPlacement,
    CONTENT_BOTTOM, PAGE_H, PAGE_W, PHOTOS_PER_PAGE,
};
pub use text::{wrap_text_by_width_mm, HelveticaMeasure, TextMeasure, TtfMeasure};

/// Shop identity printed in every page header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompanyInfo {
    pub name: String,
    pub tax_id: String,
    pub address: String,
    pub phone: String,
    pub email: String,
}

impl CompanyInfo {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            name: s.company_name.trim().to_string(),
            tax_id: s.company_tax_id.trim().to_string(),
            address: s.company_address.trim().to_string(),
            phone: s.company_phone.trim().to_string(),
            email: s.company_email.trim().to_string(),
        }
    }
}

/// Font used both for measuring and for the embedded text.
#[derive(Clone, Default)]
pub enum FontSource {
    /// Built-in Helvetica, measured with [`HelveticaMeasure`].
    #[default]
    Builtin,
    /// Raw TrueType bytes, embedded in the PDF.
    Ttf(Vec<u8>),
}

impl fmt::Debug for FontSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FontSource::Builtin => f.write_str("Builtin"),
            FontSource::Ttf(bytes) => write!(f, "Ttf({} bytes)", bytes.len()),
        }
    }
}

impl FontSource {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        TtfMeasure::parse(&bytes).map_err(|e| Error::Font(format!("{}: {e}", path.display())))?;
        Ok(FontSource::Ttf(bytes))
    }
}

/// Everything the renderer needs besides the quote itself.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub language: Language,
    pub company: CompanyInfo,
    pub generated_at: OffsetDateTime,
    pub logo: Option<DynamicImage>,
    pub font: FontSource,
}

impl RenderContext {
    pub fn new(language: Language, company: CompanyInfo) -> Self {
        Self {
            language,
            company,
            generated_at: OffsetDateTime::now_utc(),
            logo: None,
            font: FontSource::Builtin,
        }
    }

    /// Company identity, logo and font from the stored settings. The language
    /// is the caller's choice, not necessarily the settings default.
    pub fn from_settings(settings: &Settings, language: Language) -> Result<Self> {
        let font = match settings.font_path.trim() {
            "" => FontSource::Builtin,
            p => FontSource::load(Path::new(p))?,
        };
        Ok(Self {
            language,
            company: CompanyInfo::from_settings(settings),
            generated_at: OffsetDateTime::now_utc(),
            logo: decode_logo(&settings.logo_url),
            font,
        })
    }
}

/// Photos flagged for the printed document, in order.
pub fn included_photos(quote: &Quote) -> Vec<&Photo> {
    quote.photos.iter().filter(|p| p.include_in_document).collect()
}

/// `Quote_<number>.pdf`, or `Quote_<number>_REV<n>.pdf` once revised.
pub fn quote_pdf_filename(quote: &Quote) -> String {
    let mut base = String::with_capacity(quote.number.len());
    for ch in quote.number.trim().chars() {
        let ok = ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.';
        base.push(if ok { ch } else { '_' });
    }
    if base.is_empty() {
        base.push_str("draft");
    }
    if quote.revision > 0 {
        format!("Quote_{}_REV{}.pdf", base, quote.revision)
    } else {
        format!("Quote_{}.pdf", base)
    }
}

/// Loads the included photos sequentially, then renders.
pub async fn render_quote_pdf(quote: &Quote, ctx: &RenderContext, loader: &PhotoLoader) -> Result<Vec<u8>> {
    quote.validate_for_render()?;
    let photos = included_photos(quote);
    let images = loader.load_all(photos.iter().map(|p| p.url.as_str())).await;
    render_quote_pdf_with_images(quote, ctx, &images)
}

/// Renders with photos already loaded. `images[i]` belongs to the i-th
/// included photo; `None` (or a missing entry) leaves that slot blank.
pub fn render_quote_pdf_with_images(
    quote: &Quote,
    ctx: &RenderContext,
    images: &[Option<DynamicImage>],
) -> Result<Vec<u8>> {
    quote.validate_for_render()?;

    let labels = Labels::for_language(ctx.language);
    let slots: Vec<PhotoSlot> = included_photos(quote)
        .into_iter()
        .enumerate()
        .map(|(i, p)| PhotoSlot {
            px: images.get(i).and_then(Option::as_ref).map(|img| (img.width(), img.height())),
            caption: p.caption.clone(),
        })
        .collect();
    let failed = slots.iter().filter(|s| s.px.is_none()).count();

    let ttf;
    let measure: &dyn TextMeasure = match &ctx.font {
        FontSource::Builtin => &HelveticaMeasure,
        FontSource::Ttf(bytes) => {
            ttf = TtfMeasure::parse(bytes).map_err(|e| Error::Font(e.to_string()))?;
            &ttf
        }
    };

    let input = LayoutInput {
        quote,
        company: &ctx.company,
        language: ctx.language,
        labels,
        logo_px: ctx.logo.as_ref().map(|l| (l.width(), l.height())),
        photos: &slots,
    };
    let layout = layout_quote(&input, measure);
    tracing::info!(
        quote = %quote.number,
        revision = quote.revision,
        pages = layout.pages.len(),
        photos = slots.len(),
        failed_photos = failed,
        "quote laid out"
    );

    let title = format!("{} {}", labels.get("docTitle"), quote.number.trim());
    let generated_at = ctx.language.format_timestamp(ctx.generated_at);
    paint::paint(
        &layout,
        measure,
        &paint::PaintInput {
            title: &title,
            labels,
            generated_at: &generated_at,
            font: &ctx.font,
            logo: ctx.logo.as_ref(),
            photos: images,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemGroup, LineItem, LineItemGroup, QuoteHeader};

    fn quote() -> Quote {
        Quote {
            id: "q1".to_string(),
            number: "ORC-0007".to_string(),
            revision: 0,
            header: QuoteHeader {
                client_name: "Usina Beta".to_string(),
                issue_date: "2024-06-10".to_string(),
                show_values: true,
                ..Default::default()
            },
            groups: vec![LineItemGroup {
                kind: ItemGroup::Services,
                items: vec![LineItem::new(None, "Recuperação de haste", 1.0, 850.0)],
            }],
            photos: vec![
                Photo { url: "a.png".to_string(), caption: Some("Antes".to_string()), include_in_document: true },
                Photo { url: "skip.png".to_string(), caption: None, include_in_document: false },
                Photo { url: "missing.png".to_string(), caption: None, include_in_document: true },
            ],
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn ctx() -> RenderContext {
        RenderContext::new(
            Language::Pt,
            CompanyInfo {
                name: "Hidrotec".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn filename_carries_revision() {
        let mut q = quote();
        assert_eq!(quote_pdf_filename(&q), "Quote_ORC-0007.pdf");
        q.revision = 2;
        assert_eq!(quote_pdf_filename(&q), "Quote_ORC-0007_REV2.pdf");
        q.number = "ORC/07 A".to_string();
        assert_eq!(quote_pdf_filename(&q), "Quote_ORC_07_A_REV2.pdf");
    }

    #[test]
    fn only_included_photos_are_rendered() {
        let q = quote();
        let included = included_photos(&q);
        assert_eq!(included.len(), 2);
        assert_eq!(included[1].url, "missing.png");
    }

    #[test]
    fn renders_pdf_bytes_with_blank_slots() {
        let img = DynamicImage::ImageRgb8(printpdf::image_crate::RgbImage::new(8, 6));
        let bytes = render_quote_pdf_with_images(&quote(), &ctx(), &[Some(img), None]).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn invalid_quote_never_reaches_the_renderer() {
        let mut q = quote();
        q.groups.clear();
        assert!(matches!(
            render_quote_pdf_with_images(&q, &ctx(), &[]),
            Err(Error::Validation(_))
        ));

        let mut q = quote();
        q.header.client_name = " ".to_string();
        assert!(matches!(
            render_quote_pdf_with_images(&q, &ctx(), &[]),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn photo_failures_do_not_abort_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let img = DynamicImage::ImageRgb8(printpdf::image_crate::RgbImage::new(4, 4));
        img.save(dir.path().join("a.png")).unwrap();

        let loader = PhotoLoader::new().unwrap().with_base_dir(dir.path());
        let bytes = render_quote_pdf(&quote(), &ctx(), &loader).await.unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn unreadable_font_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        assert!(matches!(FontSource::load(&path), Err(Error::Font(_))));
        assert!(matches!(FontSource::load(&dir.path().join("none.ttf")), Err(Error::Io(_))));
    }
}
