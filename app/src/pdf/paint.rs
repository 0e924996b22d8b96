//! Phase 2: paint a finished [`Layout`] with printpdf and stamp each page's
//! footer, now that the page count is known.

use std::io::Cursor;

use printpdf::image_crate::DynamicImage;
use printpdf::path::PaintMode;
use printpdf::{
    BuiltinFont, Color, Image, ImageTransform, IndirectFontRef, Line, Mm, PdfDocument, PdfLayerReference, Point,
    Rect, Rgb,
};

use super::layout::{DrawOp, Layout, CONTENT_LEFT, CONTENT_RIGHT, IMAGE_DPI, MARGIN_BOTTOM, PAGE_H, PAGE_W};
use super::text::TextMeasure;
use super::FontSource;
use crate::error::{Error, Result};
use crate::labels::Labels;

const FOOTER_TEXT_SIZE: f32 = 7.0;

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
}

impl Fonts {
    fn pick(&self, bold: bool) -> &IndirectFontRef {
        if bold {
            &self.bold
        } else {
            &self.regular
        }
    }
}

pub(crate) struct PaintInput<'a> {
    pub title: &'a str,
    pub labels: Labels,
    /// Already formatted for the document's language.
    pub generated_at: &'a str,
    pub font: &'a FontSource,
    pub logo: Option<&'a DynamicImage>,
    pub photos: &'a [Option<DynamicImage>],
}

fn set_black_fill(layer: &PdfLayerReference) {
    layer.set_fill_color(Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None)));
}

fn draw_rule(layer: &PdfLayerReference, x1: f32, x2: f32, y: f32, thickness: f32) {
    layer.set_outline_thickness(thickness);
    layer.add_line(Line {
        points: vec![(Point::new(Mm(x1), Mm(y)), false), (Point::new(Mm(x2), Mm(y)), false)],
        is_closed: false,
    });
}

fn draw_image(layer: &PdfLayerReference, img: &DynamicImage, x: f32, y: f32, scale: f32) {
    // printpdf mishandles alpha; flatten to RGB first.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    Image::from_dynamic_image(&rgb).add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(x)),
            translate_y: Some(Mm(y)),
            rotate: None,
            scale_x: Some(scale),
            scale_y: Some(scale),
            dpi: Some(IMAGE_DPI),
        },
    );
}

fn paint_op(layer: &PdfLayerReference, fonts: &Fonts, input: &PaintInput<'_>, op: &DrawOp) {
    match op {
        DrawOp::Text { x, y, size, bold, text } => {
            layer.use_text(text.as_str(), *size, Mm(*x), Mm(*y), fonts.pick(*bold));
        }
        DrawOp::Rule { x1, x2, y, thickness } => draw_rule(layer, *x1, *x2, *y, *thickness),
        DrawOp::FillRect { x, y_top, w, h, gray } => {
            layer.set_fill_color(Color::Rgb(Rgb::new(*gray, *gray, *gray, None)));
            let rect = Rect::new(Mm(*x), Mm(y_top - h), Mm(x + w), Mm(*y_top)).with_mode(PaintMode::Fill);
            layer.add_rect(rect);
            set_black_fill(layer);
        }
        DrawOp::StrokeRect { x, y_top, w, h, thickness } => {
            layer.set_outline_thickness(*thickness);
            let rect = Rect::new(Mm(*x), Mm(y_top - h), Mm(x + w), Mm(*y_top)).with_mode(PaintMode::Stroke);
            layer.add_rect(rect);
        }
        DrawOp::Logo { x, y, scale } => {
            if let Some(img) = input.logo {
                draw_image(layer, img, *x, *y, *scale);
            }
        }
        DrawOp::Photo { index, x, y, scale } => {
            if let Some(Some(img)) = input.photos.get(*index) {
                draw_image(layer, img, *x, *y, *scale);
            }
        }
    }
}

fn stamp_footer(
    layer: &PdfLayerReference,
    fonts: &Fonts,
    m: &dyn TextMeasure,
    input: &PaintInput<'_>,
    page_no: usize,
    page_count: usize,
) {
    draw_rule(layer, CONTENT_LEFT, CONTENT_RIGHT, MARGIN_BOTTOM + 6.0, 0.3);

    let y = MARGIN_BOTTOM + 2.0;
    let generated = input.labels.fill("footerGenerated", &[("TIMESTAMP", input.generated_at)]);
    layer.use_text(generated, FOOTER_TEXT_SIZE, Mm(CONTENT_LEFT), Mm(y), &fonts.regular);

    let (page_no, page_count) = (page_no.to_string(), page_count.to_string());
    let page = input
        .labels
        .fill("footerPage", &[("PAGE", page_no.as_str()), ("PAGES", page_count.as_str())]);
    let x = (CONTENT_RIGHT - m.width_mm(&page, FOOTER_TEXT_SIZE)).max(0.0);
    layer.use_text(page, FOOTER_TEXT_SIZE, Mm(x), Mm(y), &fonts.regular);
}

pub(crate) fn paint(layout: &Layout, m: &dyn TextMeasure, input: &PaintInput<'_>) -> Result<Vec<u8>> {
    let (doc, first_page, first_layer) = PdfDocument::new(input.title, Mm(PAGE_W), Mm(PAGE_H), "Layer 1");

    let fonts = match input.font {
        FontSource::Builtin => Fonts {
            regular: doc.add_builtin_font(BuiltinFont::Helvetica)?,
            bold: doc.add_builtin_font(BuiltinFont::HelveticaBold)?,
        },
        FontSource::Ttf(bytes) => {
            // One embedded face serves both weights.
            let font = doc.add_external_font(Cursor::new(bytes.as_slice()))?;
            Fonts {
                regular: font.clone(),
                bold: font,
            }
        }
    };

    let page_count = layout.pages.len().max(1);
    let mut layers = Vec::with_capacity(page_count);
    layers.push(doc.get_page(first_page).get_layer(first_layer));
    for _ in 1..page_count {
        let (p, l) = doc.add_page(Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
        layers.push(doc.get_page(p).get_layer(l));
    }

    for (idx, layer) in layers.iter().enumerate() {
        set_black_fill(layer);
        if let Some(page) = layout.pages.get(idx) {
            for op in &page.ops {
                paint_op(layer, &fonts, input, op);
            }
        }
        stamp_footer(layer, &fonts, m, input, idx + 1, page_count);
    }

    let mut writer = std::io::BufWriter::new(Vec::<u8>::new());
    doc.save(&mut writer)?;
    let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    Ok(bytes)
}
