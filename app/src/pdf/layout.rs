//! Phase 1: turn a quote into positioned drawing operations, page by page.
//!
//! Nothing here touches printpdf. The output is plain data, so pagination can
//! be inspected (and tested) before a single byte of PDF is written. Footers
//! are not laid out here; they need the final page count and are stamped
//! during painting.

use crate::labels::Labels;
use crate::locale::{parse_ymd, Language};
use crate::model::{ItemGroup, LineItem, LineItemGroup, Quote};

use super::text::{wrap_text_by_width_mm, TextMeasure};
use super::CompanyInfo;

pub const PAGE_W: f32 = 210.0;
pub const PAGE_H: f32 = 297.0;
pub const MARGIN_X: f32 = 15.0;
pub const MARGIN_TOP: f32 = 12.0;
pub const MARGIN_BOTTOM: f32 = 12.0;
/// Band above the bottom margin kept free for the footer.
pub const FOOTER_RESERVE: f32 = 12.0;
pub const CONTENT_BOTTOM: f32 = MARGIN_BOTTOM + FOOTER_RESERVE;
pub const CONTENT_LEFT: f32 = MARGIN_X;
pub const CONTENT_RIGHT: f32 = PAGE_W - MARGIN_X;
pub const CONTENT_W: f32 = CONTENT_RIGHT - CONTENT_LEFT;

pub const CELL_PAD_X: f32 = 1.2;
pub const CELL_PAD_Y: f32 = 1.5;
pub const LINE_H: f32 = 4.0;
pub const MIN_ROW_H: f32 = 7.0;

pub const TEXT_SIZE: f32 = 8.5;
const HEADER_TEXT_SIZE: f32 = 8.3;
const COMPANY_NAME_SIZE: f32 = 11.0;
const DOC_TITLE_SIZE: f32 = 14.0;
const SECTION_TITLE_SIZE: f32 = 10.0;

const SECTION_TITLE_H: f32 = 7.0;
const TABLE_HEAD_H: f32 = 7.0;
const TOTAL_BOX_H: f32 = 8.0;
const TOTAL_BOX_W: f32 = 78.0;
const SECTION_GAP: f32 = 5.0;
const LABEL_COL_W: f32 = 38.0;

pub const IMAGE_DPI: f32 = 300.0;
const LOGO_AREA_W: f32 = 52.0;
const LOGO_GAP: f32 = 6.0;
const PHOTO_GRID_GAP: f32 = 6.0;
const PHOTO_CAPTION_H: f32 = 6.0;
pub const PHOTOS_PER_PAGE: usize = 4;

const EPS: f32 = 1e-3;

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Text {
        x: f32,
        y: f32,
        size: f32,
        bold: bool,
        text: String,
    },
    Rule {
        x1: f32,
        x2: f32,
        y: f32,
        thickness: f32,
    },
    FillRect {
        x: f32,
        y_top: f32,
        w: f32,
        h: f32,
        gray: f32,
    },
    StrokeRect {
        x: f32,
        y_top: f32,
        w: f32,
        h: f32,
        thickness: f32,
    },
    /// Bottom-left corner and uniform scale at [`IMAGE_DPI`].
    Logo { x: f32, y: f32, scale: f32 },
    Photo {
        index: usize,
        x: f32,
        y: f32,
        scale: f32,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub ops: Vec<DrawOp>,
}

impl PageLayout {
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowPlacement {
    pub group: ItemGroup,
    pub index: usize,
    pub page: usize,
    pub y_top: f32,
    pub height: f32,
}

/// A drawn total box. `group` is `None` for the grand total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TotalPlacement {
    pub group: Option<ItemGroup>,
    pub page: usize,
    pub value: f64,
}

/// Where a loaded photo ended up: its fitted rectangle (bottom-left origin).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotoPlacement {
    pub index: usize,
    pub page: usize,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub pages: Vec<PageLayout>,
    pub rows: Vec<RowPlacement>,
    pub totals: Vec<TotalPlacement>,
    pub photos: Vec<PhotoPlacement>,
    /// First page of the photo section, if any.
    pub photo_start_page: Option<usize>,
}

/// One included photo. `px` is `None` when the image could not be loaded.
#[derive(Debug, Clone, Default)]
pub struct PhotoSlot {
    pub px: Option<(u32, u32)>,
    pub caption: Option<String>,
}

pub struct LayoutInput<'a> {
    pub quote: &'a Quote,
    pub company: &'a CompanyInfo,
    pub language: Language,
    pub labels: Labels,
    pub logo_px: Option<(u32, u32)>,
    pub photos: &'a [PhotoSlot],
}

/// Vertical cursor over fixed-height pages. `top` is where content starts
/// once the page header is drawn.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Flow {
    pub top: f32,
    pub bottom: f32,
    pub y: f32,
    pub page: usize,
}

impl Flow {
    pub fn new(top: f32, bottom: f32) -> Self {
        Self {
            top,
            bottom,
            y: top,
            page: 0,
        }
    }

    pub fn fits(&self, h: f32) -> bool {
        self.y - h >= self.bottom - EPS
    }

    /// Height available on an empty page.
    pub fn capacity(&self) -> f32 {
        self.top - self.bottom
    }

    pub fn next_page(&mut self) {
        self.page += 1;
        self.y = self.top;
    }

    /// Reserves a band of height `h` on the current page. Returns the page and
    /// the band's top edge, or `None` when the band would cross the bottom.
    /// Moving to another page is the caller's job.
    pub fn place(&mut self, h: f32) -> Option<(usize, f32)> {
        if !self.fits(h) {
            return None;
        }
        let top = self.y;
        self.y -= h;
        Some((self.page, top))
    }
}

/// Text baseline for line `i` of a cell whose top edge is `row_top`.
fn baseline(m: &dyn TextMeasure, row_top: f32, i: usize) -> f32 {
    row_top - CELL_PAD_Y - m.ascent_mm(TEXT_SIZE) - (i as f32) * LINE_H
}

fn row_height(lines: usize) -> f32 {
    (lines as f32 * LINE_H + 2.0 * CELL_PAD_Y).max(MIN_ROW_H)
}

/// Most text lines a row can hold within `avail` mm. Zero when not even a
/// single-line row fits.
fn lines_within(avail: f32) -> usize {
    let n = ((avail - 2.0 * CELL_PAD_Y + EPS) / LINE_H).floor().max(0.0) as usize;
    if n > 0 && row_height(n) > avail + EPS {
        0
    } else {
        n
    }
}

const CLAMP_MARKER: &str = "...";

/// Cuts every cell down to `max_lines`, marking the last kept line of a cut
/// cell so the loss is visible on paper.
fn clamp_cells(cells: Vec<Vec<String>>, max_lines: usize) -> Vec<Vec<String>> {
    let max_lines = max_lines.max(1);
    cells
        .into_iter()
        .map(|mut lines| {
            if lines.len() > max_lines {
                lines.truncate(max_lines);
                if let Some(last) = lines.last_mut() {
                    last.push_str(CLAMP_MARKER);
                }
            }
            lines
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColKind {
    Code,
    Description,
    Qty,
    UnitPrice,
    Total,
}

struct Column {
    kind: ColKind,
    label_key: &'static str,
    left: f32,
    width: f32,
}

impl Column {
    fn right_aligned(&self) -> bool {
        matches!(self.kind, ColKind::Qty | ColKind::UnitPrice | ColKind::Total)
    }

    fn text_width(&self) -> f32 {
        (self.width - 2.0 * CELL_PAD_X).max(1.0)
    }
}

/// Fixed proportions of the content width, description widest. Price
/// columns only exist when values are shown.
fn table_columns(show_values: bool) -> Vec<Column> {
    let defs: &[(ColKind, &'static str, f32)] = if show_values {
        &[
            (ColKind::Code, "colCode", 0.12),
            (ColKind::Description, "colDescription", 0.46),
            (ColKind::Qty, "colQty", 0.10),
            (ColKind::UnitPrice, "colUnitPrice", 0.16),
            (ColKind::Total, "colTotal", 0.16),
        ]
    } else {
        &[
            (ColKind::Code, "colCode", 0.14),
            (ColKind::Description, "colDescription", 0.72),
            (ColKind::Qty, "colQty", 0.14),
        ]
    };

    let mut left = CONTENT_LEFT;
    defs.iter()
        .map(|&(kind, label_key, frac)| {
            let width = CONTENT_W * frac;
            let col = Column {
                kind,
                label_key,
                left,
                width,
            };
            left += width;
            col
        })
        .collect()
}

struct InfoRow {
    label: Option<&'static str>,
    value: String,
}

struct Composer<'a> {
    input: &'a LayoutInput<'a>,
    m: &'a dyn TextMeasure,
    flow: Flow,
    out: Layout,
}

impl<'a> Composer<'a> {
    fn new(input: &'a LayoutInput<'a>, m: &'a dyn TextMeasure) -> Self {
        let mut c = Composer {
            input,
            m,
            flow: Flow::new(PAGE_H - MARGIN_TOP, CONTENT_BOTTOM),
            out: Layout::default(),
        };
        c.out.pages.push(PageLayout::default());
        c.flow.y = PAGE_H - MARGIN_TOP;
        c.draw_page_header();
        c.flow.top = c.flow.y;
        c
    }

    fn push(&mut self, op: DrawOp) {
        if let Some(page) = self.out.pages.last_mut() {
            page.ops.push(op);
        }
    }

    fn text(&mut self, x: f32, y: f32, size: f32, bold: bool, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        self.push(DrawOp::Text { x, y, size, bold, text });
    }

    fn text_right(&mut self, x_right: f32, y: f32, size: f32, bold: bool, text: impl Into<String>) {
        let text = text.into();
        let w = self.m.width_mm(&text, size);
        self.text((x_right - w).max(0.0), y, size, bold, text);
    }

    fn rule(&mut self, y: f32, thickness: f32) {
        self.push(DrawOp::Rule {
            x1: CONTENT_LEFT,
            x2: CONTENT_RIGHT,
            y,
            thickness,
        });
    }

    fn break_page(&mut self) {
        self.flow.next_page();
        self.out.pages.push(PageLayout::default());
        self.flow.y = PAGE_H - MARGIN_TOP;
        self.draw_page_header();
        self.flow.y = self.flow.top;
    }

    /// Reserves `h` mm, breaking the page first when needed. Callers keep `h`
    /// within one page's capacity; a band that still does not fit is pinned
    /// to the bottom edge instead of running past it.
    fn place(&mut self, h: f32) -> (usize, f32) {
        if !self.flow.fits(h) {
            self.break_page();
        }
        match self.flow.place(h) {
            Some(slot) => slot,
            None => {
                let top = self.flow.y;
                self.flow.y = self.flow.bottom;
                (self.flow.page, top)
            }
        }
    }

    fn label(&self, key: &'static str) -> &'static str {
        self.input.labels.get(key)
    }

    fn draw_page_header(&mut self) {
        let q = self.input.quote;
        let mut y = self.flow.y;

        let title = format!("{}{}", self.label("quoteTitle"), q.number.trim());
        let title_w = self.m.width_mm(&title, DOC_TITLE_SIZE);
        let title_baseline = y - 5.0;
        self.text(
            CONTENT_LEFT + (CONTENT_W - title_w) / 2.0,
            title_baseline,
            DOC_TITLE_SIZE,
            true,
            title,
        );
        if q.revision > 0 {
            let marker = format!("{} {}", self.label("revision"), q.revision);
            self.text_right(CONTENT_RIGHT, title_baseline, 9.0, true, marker);
        }
        y -= 8.0;
        self.rule(y, 0.85);
        y -= 4.0;

        let company = self.input.company;
        let text_right = if self.input.logo_px.is_some() {
            (CONTENT_RIGHT - LOGO_AREA_W).max(CONTENT_LEFT + 20.0)
        } else {
            CONTENT_RIGHT
        };
        let text_w = (text_right - CONTENT_LEFT).max(10.0);

        let block_top = y;
        let mut baseline_y = y - self.m.ascent_mm(COMPANY_NAME_SIZE);
        if !company.name.trim().is_empty() {
            self.text(CONTENT_LEFT, baseline_y, COMPANY_NAME_SIZE, true, company.name.trim());
            baseline_y -= 4.6;
        }

        let mut lines: Vec<String> = Vec::new();
        let tagged = [
            ("taxId", company.tax_id.as_str()),
            ("address", company.address.as_str()),
            ("phone", company.phone.as_str()),
            ("email", company.email.as_str()),
        ];
        for (key, value) in tagged {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let line = format!("{}: {}", self.label(key), value);
            lines.extend(wrap_text_by_width_mm(self.m, &line, HEADER_TEXT_SIZE, text_w));
        }
        for line in lines {
            self.text(CONTENT_LEFT, baseline_y, HEADER_TEXT_SIZE, false, line);
            baseline_y -= 4.0;
        }
        let block_h = (block_top - baseline_y).max(8.0);

        let mut logo_h = 0.0;
        if let Some((px_w, px_h)) = self.input.logo_px {
            let natural_w = px_w.max(1) as f32 / IMAGE_DPI * 25.4;
            let natural_h = px_h.max(1) as f32 / IMAGE_DPI * 25.4;
            let box_left = (text_right + LOGO_GAP).min(CONTENT_RIGHT);
            let box_w = (CONTENT_RIGHT - box_left).max(1.0);
            let scale = (box_w / natural_w).min(block_h / natural_h).max(0.01);
            let w = natural_w * scale;
            logo_h = natural_h * scale;
            self.push(DrawOp::Logo {
                x: (CONTENT_RIGHT - w).max(box_left),
                y: block_top - logo_h,
                scale,
            });
        }

        y = block_top - block_h.max(logo_h) - 2.0;
        self.rule(y, 0.45);
        self.flow.y = y - SECTION_GAP;
    }

    fn section_title(&mut self, text: &str) {
        let (_, top) = self.place(SECTION_TITLE_H);
        self.text(CONTENT_LEFT, top - 5.0, SECTION_TITLE_SIZE, true, text);
    }

    fn info_row_lines(&self, row: &InfoRow) -> (Vec<String>, Vec<String>) {
        match row.label {
            Some(key) => {
                let label = wrap_text_by_width_mm(self.m, self.label(key), TEXT_SIZE, LABEL_COL_W - 2.0 * CELL_PAD_X);
                let value = wrap_text_by_width_mm(
                    self.m,
                    &row.value,
                    TEXT_SIZE,
                    CONTENT_W - LABEL_COL_W - 2.0 * CELL_PAD_X,
                );
                (label, value)
            }
            None => (
                Vec::new(),
                wrap_text_by_width_mm(self.m, &row.value, TEXT_SIZE, CONTENT_W - 2.0 * CELL_PAD_X),
            ),
        }
    }

    fn info_block(&mut self, title_key: &'static str, rows: Vec<InfoRow>) {
        let rows: Vec<InfoRow> = rows.into_iter().filter(|r| !r.value.trim().is_empty()).collect();
        let Some(first) = rows.first() else {
            return;
        };

        let (l, v) = self.info_row_lines(first);
        let mut first_h = row_height(l.len().max(v.len()));
        if SECTION_TITLE_H + first_h > self.flow.capacity() {
            // Oversized first row: it is split anyway, keep one line with the title.
            first_h = row_height(1);
        }
        if !self.flow.fits(SECTION_TITLE_H + first_h) {
            self.break_page();
        }
        self.section_title(self.label(title_key));

        for row in &rows {
            let (label_lines, value_lines) = self.info_row_lines(row);
            self.info_row(row.label.is_some(), label_lines, value_lines);
        }
        self.flow.y -= SECTION_GAP;
    }

    /// Draws one label/value row. A row taller than a page continues on the
    /// following pages, whole lines at a time.
    fn info_row(&mut self, labelled: bool, mut label_lines: Vec<String>, mut value_lines: Vec<String>) {
        let value_x = if labelled {
            CONTENT_LEFT + LABEL_COL_W + CELL_PAD_X
        } else {
            CONTENT_LEFT + CELL_PAD_X
        };

        loop {
            let lines = label_lines.len().max(value_lines.len());
            let h = row_height(lines);
            let take = if h <= self.flow.capacity() + EPS {
                lines
            } else {
                let mut n = lines_within(self.flow.y - self.flow.bottom);
                if n == 0 {
                    self.break_page();
                    n = lines_within(self.flow.y - self.flow.bottom).max(1);
                }
                n.min(lines)
            };

            let rest_label = label_lines.split_off(take.min(label_lines.len()));
            let rest_value = value_lines.split_off(take.min(value_lines.len()));
            let (_, top) = self.place(row_height(take));
            for (i, line) in label_lines.into_iter().enumerate() {
                let by = baseline(self.m, top, i);
                self.text(CONTENT_LEFT + CELL_PAD_X, by, TEXT_SIZE, true, line);
            }
            for (i, line) in value_lines.into_iter().enumerate() {
                let by = baseline(self.m, top, i);
                self.text(value_x, by, TEXT_SIZE, false, line);
            }

            if rest_label.is_empty() && rest_value.is_empty() {
                return;
            }
            label_lines = rest_label;
            value_lines = rest_value;
            self.break_page();
        }
    }

    fn display_date(&self, raw: &str) -> String {
        match parse_ymd(raw) {
            Ok(d) => self.input.language.format_date(d),
            Err(_) => raw.trim().to_string(),
        }
    }

    fn info_blocks(&mut self) {
        let q: &'a Quote = self.input.quote;
        let h = &q.header;

        let client_rows = vec![
            InfoRow { label: Some("client"), value: h.client_name.clone() },
            InfoRow { label: Some("taxId"), value: h.client_tax_id.clone() },
            InfoRow { label: Some("address"), value: h.client_address.clone() },
            InfoRow { label: Some("contact"), value: h.client_contact.clone() },
            InfoRow { label: Some("issueDate"), value: self.display_date(&h.issue_date) },
            InfoRow {
                label: Some("validUntil"),
                value: h.valid_until.as_deref().map(|v| self.display_date(v)).unwrap_or_default(),
            },
        ];
        self.info_block("clientTitle", client_rows);

        let equipment_rows = vec![
            InfoRow { label: Some("equipment"), value: h.equipment.clone() },
            InfoRow { label: Some("brand"), value: h.brand.clone() },
            InfoRow { label: Some("model"), value: h.model.clone() },
            InfoRow { label: Some("serialNumber"), value: h.serial_number.clone() },
            InfoRow { label: Some("receiptNumber"), value: h.receipt_number.clone().unwrap_or_default() },
        ];
        self.info_block("equipmentTitle", equipment_rows);

        let terms_rows = vec![
            InfoRow { label: Some("paymentTerms"), value: h.payment_terms.clone() },
            InfoRow { label: Some("deliveryTime"), value: h.delivery_time.clone() },
            InfoRow { label: Some("warranty"), value: h.warranty.clone() },
        ];
        self.info_block("termsTitle", terms_rows);

        self.info_block("notesTitle", vec![InfoRow { label: None, value: h.notes.clone() }]);
    }

    fn cell_text(&self, col: &Column, item: &LineItem) -> String {
        let lang = self.input.language;
        match col.kind {
            ColKind::Code => item.code.clone().unwrap_or_default(),
            ColKind::Description => item.description.clone(),
            ColKind::Qty => lang.format_qty(item.quantity()),
            ColKind::UnitPrice => lang.format_money(item.unit_price()),
            ColKind::Total => lang.format_money(item.total_price()),
        }
    }

    fn wrapped_cells(&self, cols: &[Column], item: &LineItem) -> Vec<Vec<String>> {
        cols.iter()
            .map(|c| wrap_text_by_width_mm(self.m, &self.cell_text(c, item), TEXT_SIZE, c.text_width()))
            .collect()
    }

    fn table_header_row(&mut self, cols: &[Column]) {
        let (_, top) = self.place(TABLE_HEAD_H);
        self.push(DrawOp::FillRect {
            x: CONTENT_LEFT,
            y_top: top,
            w: CONTENT_W,
            h: TABLE_HEAD_H,
            gray: 0.92,
        });
        let by = top - TABLE_HEAD_H / 2.0 - self.m.ascent_mm(TEXT_SIZE) / 2.0 + 0.3;
        for c in cols {
            let label = self.label(c.label_key);
            if c.right_aligned() {
                self.text_right(c.left + c.width - CELL_PAD_X, by, TEXT_SIZE, true, label);
            } else {
                self.text(c.left + CELL_PAD_X, by, TEXT_SIZE, true, label);
            }
        }
        self.rule(top - TABLE_HEAD_H, 0.6);
    }

    fn total_box(&mut self, label: String, value: f64, group: Option<ItemGroup>) {
        if !self.flow.fits(TOTAL_BOX_H + 2.0) {
            self.break_page();
        }
        self.flow.y -= 2.0;
        let (page, top) = self.place(TOTAL_BOX_H);
        let x = CONTENT_RIGHT - TOTAL_BOX_W;
        self.push(DrawOp::StrokeRect {
            x,
            y_top: top,
            w: TOTAL_BOX_W,
            h: TOTAL_BOX_H,
            thickness: 0.6,
        });
        let by = top - TOTAL_BOX_H / 2.0 - self.m.ascent_mm(9.0) / 2.0 + 0.3;
        self.text(x + 2.0 * CELL_PAD_X, by, 9.0, true, label);
        let money = self.input.language.format_money(value);
        self.text_right(CONTENT_RIGHT - 2.0 * CELL_PAD_X, by, 9.0, true, money);
        self.out.totals.push(TotalPlacement { group, page, value });
    }

    fn group_table(&mut self, group: &LineItemGroup) {
        if group.items.is_empty() {
            return;
        }
        let show_values = self.input.quote.header.show_values;
        let cols = table_columns(show_values);

        // Rows are never split; one taller than an empty page is clamped.
        let max_lines = lines_within(self.flow.capacity() - SECTION_TITLE_H - TABLE_HEAD_H);
        let first_lines = clamp_cells(self.wrapped_cells(&cols, &group.items[0]), max_lines);
        let first_h = row_height(first_lines.iter().map(Vec::len).max().unwrap_or(0));
        if !self.flow.fits(SECTION_TITLE_H + TABLE_HEAD_H + first_h) {
            self.break_page();
        }
        self.section_title(self.label(group.kind.label_key()));
        self.table_header_row(&cols);

        for (index, item) in group.items.iter().enumerate() {
            let cells = clamp_cells(self.wrapped_cells(&cols, item), max_lines);
            let h = row_height(cells.iter().map(Vec::len).max().unwrap_or(0));
            if !self.flow.fits(h) {
                self.break_page();
                self.table_header_row(&cols);
            }
            let (page, top) = self.place(h);

            for (col, lines) in cols.iter().zip(cells) {
                for (i, line) in lines.into_iter().enumerate() {
                    let by = baseline(self.m, top, i);
                    if col.right_aligned() {
                        self.text_right(col.left + col.width - CELL_PAD_X, by, TEXT_SIZE, false, line);
                    } else {
                        self.text(col.left + CELL_PAD_X, by, TEXT_SIZE, false, line);
                    }
                }
            }
            self.rule(top - h, 0.2);
            self.out.rows.push(RowPlacement {
                group: group.kind,
                index,
                page,
                y_top: top,
                height: h,
            });
        }

        if show_values && group.items.iter().any(|i| i.total_price() != 0.0) {
            let label = format!("{} {}", self.label("groupTotal"), self.label(group.kind.label_key()));
            self.total_box(label, group.total(), Some(group.kind));
        }
        self.flow.y -= SECTION_GAP;
    }

    fn photo_pages(&mut self) {
        let photos = self.input.photos;
        if photos.is_empty() {
            return;
        }

        let cell_w = (CONTENT_W - PHOTO_GRID_GAP) / 2.0;
        for (chunk_idx, chunk) in photos.chunks(PHOTOS_PER_PAGE).enumerate() {
            self.break_page();
            if chunk_idx == 0 {
                self.out.photo_start_page = Some(self.flow.page);
            }
            self.section_title(self.label("photosTitle"));

            let grid_top = self.flow.y;
            let cell_h = ((grid_top - CONTENT_BOTTOM - PHOTO_GRID_GAP) / 2.0).max(10.0);
            let box_h = (cell_h - PHOTO_CAPTION_H).max(1.0);

            for (k, slot) in chunk.iter().enumerate() {
                let index = chunk_idx * PHOTOS_PER_PAGE + k;
                let cell_x = CONTENT_LEFT + (k % 2) as f32 * (cell_w + PHOTO_GRID_GAP);
                let cell_top = grid_top - (k / 2) as f32 * (cell_h + PHOTO_GRID_GAP);

                // A photo that failed to load leaves its slot empty.
                let Some((px_w, px_h)) = slot.px else {
                    continue;
                };
                let natural_w = px_w.max(1) as f32 / IMAGE_DPI * 25.4;
                let natural_h = px_h.max(1) as f32 / IMAGE_DPI * 25.4;
                let scale = (cell_w / natural_w).min(box_h / natural_h);
                let w = natural_w * scale;
                let h = natural_h * scale;
                let x = cell_x + (cell_w - w) / 2.0;
                let y = cell_top - (box_h - h) / 2.0 - h;
                self.push(DrawOp::Photo { index, x, y, scale });
                self.out.photos.push(PhotoPlacement {
                    index,
                    page: self.flow.page,
                    x,
                    y,
                    w,
                    h,
                });

                if let Some(caption) = slot.caption.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                    let line = wrap_text_by_width_mm(self.m, caption, TEXT_SIZE, cell_w)
                        .into_iter()
                        .next()
                        .unwrap_or_default();
                    let cw = self.m.width_mm(&line, TEXT_SIZE);
                    self.text(
                        cell_x + (cell_w - cw) / 2.0,
                        cell_top - box_h - 4.0,
                        TEXT_SIZE,
                        false,
                        line,
                    );
                }
            }
        }
    }
}

/// Lays out the whole document. Always yields at least one page.
pub fn layout_quote(input: &LayoutInput<'_>, m: &dyn TextMeasure) -> Layout {
    let mut c = Composer::new(input, m);
    c.info_blocks();

    for group in &input.quote.groups {
        c.group_table(group);
    }

    let q = input.quote;
    if q.header.show_values && q.groups.iter().flat_map(|g| g.items.iter()).any(|i| i.total_price() != 0.0) {
        let label = c.label("grandTotal").to_string();
        c.total_box(label, q.grand_total(), None);
    }

    c.photo_pages();
    c.out
}
