//! Converter port and the Docling JSON adapter.
//!
//! The structurer does not parse PDFs itself. It asks a [`DocumentConverter`]
//! for the layout of a page range and gets back a [`ConversionResult`] holding
//! a [`DoclingDocument`]: text items, tables and pictures with page provenance
//! and bounding boxes, plus per-page sizes.
//!
//! [`DoclingJsonConverter`] reads a document exported by Docling
//! (`DoclingDocument.export_to_dict()` / `docling --to json`). The types here
//! model only the parts of that schema the structurer reads and tolerate
//! every other field.

use crate::error::EsgError;
use crate::model::{BBox, PageDimensions, TableCell, TextBlock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ── Port ─────────────────────────────────────────────────────────────────

/// Inclusive 1-indexed page range handed to the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, page: u32) -> bool {
        (self.start..=self.end).contains(&page)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    Success,
    PartialSuccess,
    Failure,
    Skipped,
}

impl ConversionStatus {
    /// Statuses the structurer accepts; anything else aborts the run.
    pub fn is_usable(&self) -> bool {
        matches!(self, ConversionStatus::Success | ConversionStatus::PartialSuccess)
    }
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversionStatus::Success => "success",
            ConversionStatus::PartialSuccess => "partial_success",
            ConversionStatus::Failure => "failure",
            ConversionStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub status: ConversionStatus,
    pub errors: Vec<String>,
    pub document: Option<DoclingDocument>,
}

/// Layout analysis for a page range of a PDF.
///
/// Implementations may block; the structurer calls them from
/// `spawn_blocking`.
pub trait DocumentConverter: Send + Sync {
    fn convert(&self, source: &Path, range: PageRange) -> Result<ConversionResult, EsgError>;
}

// ── Docling document model ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordOrigin {
    #[default]
    #[serde(rename = "BOTTOMLEFT")]
    BottomLeft,
    #[serde(rename = "TOPLEFT")]
    TopLeft,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub l: f64,
    pub t: f64,
    pub r: f64,
    pub b: f64,
    #[serde(default)]
    pub coord_origin: CoordOrigin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceItem {
    pub page_no: u32,
    pub bbox: BoundingBox,
}

/// JSON pointer reference such as `{"$ref": "#/texts/0"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    #[serde(rename = "$ref")]
    pub ref_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageItem {
    pub page_no: u32,
    pub size: Size,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextItem {
    #[serde(default)]
    pub self_ref: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub prov: Vec<ProvenanceItem>,
    #[serde(default)]
    pub children: Vec<ItemRef>,
    #[serde(default)]
    pub content_layer: Option<String>,
    #[serde(default)]
    pub level: Option<usize>,
    #[serde(default)]
    pub enumerated: bool,
    #[serde(default)]
    pub marker: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoclingTableCell {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub row_span: Option<usize>,
    #[serde(default)]
    pub col_span: Option<usize>,
    #[serde(default)]
    pub start_row_offset_idx: Option<usize>,
    #[serde(default)]
    pub start_col_offset_idx: Option<usize>,
    #[serde(default)]
    pub column_header: bool,
    #[serde(default)]
    pub row_header: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    #[serde(default)]
    pub num_rows: usize,
    #[serde(default)]
    pub num_cols: usize,
    #[serde(default)]
    pub grid: Vec<Vec<DoclingTableCell>>,
    #[serde(default)]
    pub table_cells: Vec<DoclingTableCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableItem {
    #[serde(default)]
    pub self_ref: String,
    #[serde(default)]
    pub prov: Vec<ProvenanceItem>,
    #[serde(default)]
    pub captions: Vec<ItemRef>,
    #[serde(default)]
    pub children: Vec<ItemRef>,
    #[serde(default)]
    pub content_layer: Option<String>,
    #[serde(default)]
    pub data: TableData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PictureItem {
    #[serde(default)]
    pub self_ref: String,
    #[serde(default)]
    pub prov: Vec<ProvenanceItem>,
    #[serde(default)]
    pub captions: Vec<ItemRef>,
    #[serde(default)]
    pub children: Vec<ItemRef>,
    #[serde(default)]
    pub content_layer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupItem {
    #[serde(default)]
    pub self_ref: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub children: Vec<ItemRef>,
    #[serde(default)]
    pub content_layer: Option<String>,
}

/// The parts of a Docling document the structurer needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoclingDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub texts: Vec<TextItem>,
    #[serde(default)]
    pub tables: Vec<TableItem>,
    #[serde(default)]
    pub pictures: Vec<PictureItem>,
    #[serde(default)]
    pub groups: Vec<GroupItem>,
    #[serde(default)]
    pub body: Option<GroupItem>,
    /// Keyed by page number as a string, as Docling serialises it.
    #[serde(default)]
    pub pages: BTreeMap<String, PageItem>,
}

/// A resolved item reference.
#[derive(Debug, Clone, Copy)]
enum Node<'a> {
    Text(&'a TextItem),
    Table(&'a TableItem),
    Picture(&'a PictureItem),
    Group(&'a GroupItem),
}

fn is_furniture(layer: &Option<String>) -> bool {
    layer.as_deref() == Some("furniture")
}

fn on_page(prov: &[ProvenanceItem], page_no: u32) -> bool {
    prov.iter().any(|p| p.page_no == page_no)
}

impl DoclingDocument {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn has_page(&self, page_no: u32) -> bool {
        self.pages.values().any(|p| p.page_no == page_no)
    }

    pub fn page_numbers(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.pages.values().map(|p| p.page_no).collect();
        pages.sort_unstable();
        pages
    }

    pub fn page_size(&self, page_no: u32) -> Option<PageDimensions> {
        self.pages
            .values()
            .find(|p| p.page_no == page_no)
            .map(|p| PageDimensions {
                width: p.size.width,
                height: p.size.height,
            })
    }

    /// Keep only the pages inside `range`. Items are left in place; they are
    /// filtered by provenance whenever a page is read.
    pub fn restrict_to(&mut self, range: PageRange) {
        self.pages.retain(|_, p| range.contains(p.page_no));
    }

    /// Convert a provenance box to bottom-up document coordinates.
    pub fn provenance_bbox(&self, prov: &ProvenanceItem) -> BBox {
        let b = &prov.bbox;
        match b.coord_origin {
            CoordOrigin::BottomLeft => BBox::new(b.l, b.t, b.r, b.b),
            CoordOrigin::TopLeft => {
                let h = self.page_size(prov.page_no).map_or(0.0, |s| s.height);
                BBox::new(b.l, h - b.t, b.r, h - b.b)
            }
        }
    }

    /// Bounding box of an item on `page_no`, from its first provenance there.
    pub fn item_bbox(&self, prov: &[ProvenanceItem], page_no: u32) -> Option<BBox> {
        prov.iter()
            .find(|p| p.page_no == page_no)
            .map(|p| self.provenance_bbox(p))
    }

    pub fn tables_on_page(&self, page_no: u32) -> Vec<&TableItem> {
        self.tables.iter().filter(|t| on_page(&t.prov, page_no)).collect()
    }

    pub fn pictures_on_page(&self, page_no: u32) -> Vec<&PictureItem> {
        self.pictures.iter().filter(|p| on_page(&p.prov, page_no)).collect()
    }

    /// Non-empty text items on the page with their boxes, for title lookup.
    pub fn text_blocks(&self, page_no: u32) -> Vec<TextBlock> {
        self.texts
            .iter()
            .filter_map(|t| {
                let text = t.text.trim();
                if text.is_empty() {
                    return None;
                }
                let prov = t.prov.iter().find(|p| p.page_no == page_no)?;
                Some(TextBlock {
                    text: text.to_string(),
                    bbox: self.provenance_bbox(prov),
                })
            })
            .collect()
    }

    fn resolve(&self, r: &ItemRef) -> Option<Node<'_>> {
        let path = r.ref_path.strip_prefix("#/")?;
        if path == "body" {
            return self.body.as_ref().map(Node::Group);
        }
        let (kind, idx) = path.split_once('/')?;
        let idx: usize = idx.parse().ok()?;
        match kind {
            "texts" => self.texts.get(idx).map(Node::Text),
            "tables" => self.tables.get(idx).map(Node::Table),
            "pictures" => self.pictures.get(idx).map(Node::Picture),
            "groups" => self.groups.get(idx).map(Node::Group),
            _ => None,
        }
    }

    /// Caption texts of a table or picture, joined by a space.
    pub fn caption_text(&self, captions: &[ItemRef]) -> Option<String> {
        let parts: Vec<&str> = captions
            .iter()
            .filter_map(|r| match self.resolve(r) {
                Some(Node::Text(t)) => Some(t.text.trim()),
                _ => None,
            })
            .filter(|t| !t.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }

    /// Markdown for one page in reading order.
    ///
    /// Pictures become `placeholder` lines; furniture (running headers and
    /// footers Docling already recognised) is left out.
    pub fn export_page_markdown(&self, page_no: u32, placeholder: &str) -> String {
        let mut blocks = Vec::new();
        let mut visited = HashSet::new();
        match &self.body {
            Some(body) => {
                for child in &body.children {
                    self.walk(child, page_no, placeholder, &mut visited, &mut blocks);
                }
            }
            None => {
                for t in &self.texts {
                    if on_page(&t.prov, page_no) {
                        blocks.extend(text_markdown(t));
                    }
                }
                for t in self.tables_on_page(page_no) {
                    blocks.push(table_markdown(&table_grid(&t.data)));
                }
                for _ in self.pictures_on_page(page_no) {
                    blocks.push(placeholder.to_string());
                }
            }
        }
        blocks.retain(|b| !b.trim().is_empty());
        blocks.join("\n\n")
    }

    fn walk(
        &self,
        r: &ItemRef,
        page_no: u32,
        placeholder: &str,
        visited: &mut HashSet<String>,
        out: &mut Vec<String>,
    ) {
        if !visited.insert(r.ref_path.clone()) {
            return;
        }
        let Some(node) = self.resolve(r) else {
            debug!("Unresolvable reference {}", r.ref_path);
            return;
        };
        let children = match node {
            Node::Text(t) => {
                if !is_furniture(&t.content_layer) && on_page(&t.prov, page_no) {
                    out.extend(text_markdown(t));
                }
                &t.children
            }
            Node::Table(t) => {
                if !is_furniture(&t.content_layer) && on_page(&t.prov, page_no) {
                    if let Some(caption) = self.caption_text(&t.captions) {
                        out.push(caption);
                    }
                    out.push(table_markdown(&table_grid(&t.data)));
                }
                visited.extend(t.captions.iter().map(|c| c.ref_path.clone()));
                &t.children
            }
            Node::Picture(p) => {
                if !is_furniture(&p.content_layer) && on_page(&p.prov, page_no) {
                    out.push(placeholder.to_string());
                    if let Some(caption) = self.caption_text(&p.captions) {
                        out.push(caption);
                    }
                }
                visited.extend(p.captions.iter().map(|c| c.ref_path.clone()));
                &p.children
            }
            Node::Group(g) => {
                if is_furniture(&g.content_layer) {
                    return;
                }
                &g.children
            }
        };
        for child in children {
            self.walk(child, page_no, placeholder, visited, out);
        }
    }
}

fn text_markdown(t: &TextItem) -> Option<String> {
    let text = t.text.trim();
    if text.is_empty() {
        return None;
    }
    let md = match t.label.as_str() {
        "title" => format!("# {text}"),
        "section_header" => {
            let level = (t.level.unwrap_or(1) + 1).min(6);
            format!("{} {text}", "#".repeat(level))
        }
        "list_item" => {
            let marker = if t.enumerated && !t.marker.is_empty() {
                t.marker.as_str()
            } else {
                "-"
            };
            format!("{marker} {text}")
        }
        "formula" => format!("$${text}$$"),
        "code" => format!("```\n{text}\n```"),
        _ => text.to_string(),
    };
    Some(md)
}

/// Row-major cell grid of a Docling table.
///
/// Uses `grid` when present, else rebuilds it from `table_cells`, repeating a
/// spanning cell over every position it covers as Docling's own grid does.
pub fn table_grid(data: &TableData) -> Vec<Vec<TableCell>> {
    let source: Vec<Vec<DoclingTableCell>> = if !data.grid.is_empty() {
        data.grid.clone()
    } else if !data.table_cells.is_empty() {
        let rows = data.num_rows.max(
            data.table_cells
                .iter()
                .map(|c| c.start_row_offset_idx.unwrap_or(0) + c.row_span.unwrap_or(1))
                .max()
                .unwrap_or(0),
        );
        let cols = data.num_cols.max(
            data.table_cells
                .iter()
                .map(|c| c.start_col_offset_idx.unwrap_or(0) + c.col_span.unwrap_or(1))
                .max()
                .unwrap_or(0),
        );
        let mut grid = vec![vec![DoclingTableCell::default(); cols]; rows];
        for cell in &data.table_cells {
            let r0 = cell.start_row_offset_idx.unwrap_or(0);
            let c0 = cell.start_col_offset_idx.unwrap_or(0);
            for r in r0..(r0 + cell.row_span.unwrap_or(1)).min(rows) {
                for c in c0..(c0 + cell.col_span.unwrap_or(1)).min(cols) {
                    grid[r][c] = cell.clone();
                }
            }
        }
        grid
    } else {
        Vec::new()
    };

    source
        .into_iter()
        .enumerate()
        .map(|(row, cells)| {
            cells
                .into_iter()
                .enumerate()
                .map(|(col, c)| TableCell {
                    row,
                    col,
                    text: c.text.trim().to_string(),
                    row_span: c.row_span.unwrap_or(1),
                    col_span: c.col_span.unwrap_or(1),
                    row_header: c.row_header,
                    column_header: c.column_header,
                })
                .collect()
        })
        .collect()
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\n', '\r'], " ")
}

/// GFM pipe table; the first grid row is the header.
pub fn table_markdown(grid: &[Vec<TableCell>]) -> String {
    let Some(header) = grid.first() else {
        return String::new();
    };
    let cols = grid.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let render = |row: &[TableCell]| {
        let mut cells: Vec<String> = row.iter().map(|c| escape_cell(&c.text)).collect();
        cells.resize(cols, String::new());
        format!("| {} |", cells.join(" | "))
    };
    let mut lines = vec![render(header.as_slice()), format!("|{}", "---|".repeat(cols))];
    lines.extend(grid[1..].iter().map(|row| render(row.as_slice())));
    lines.join("\n")
}

// ── JSON adapter ─────────────────────────────────────────────────────────

/// Reads a Docling JSON export produced ahead of time for the source PDF.
#[derive(Debug, Clone)]
pub struct DoclingJsonConverter {
    json_path: PathBuf,
}

impl DoclingJsonConverter {
    pub fn new(json_path: impl Into<PathBuf>) -> Self {
        Self {
            json_path: json_path.into(),
        }
    }

    fn load(&self) -> Result<DoclingDocument, EsgError> {
        let raw = std::fs::read_to_string(&self.json_path).map_err(|e| EsgError::ConverterOutput {
            path: self.json_path.clone(),
            detail: e.to_string(),
        })?;
        DoclingDocument::from_json(&raw).map_err(|e| EsgError::ConverterOutput {
            path: self.json_path.clone(),
            detail: e.to_string(),
        })
    }
}

impl DocumentConverter for DoclingJsonConverter {
    fn convert(&self, source: &Path, range: PageRange) -> Result<ConversionResult, EsgError> {
        debug!(
            "Reading converter output {} for {} pages {}-{}",
            self.json_path.display(),
            source.display(),
            range.start,
            range.end
        );
        let mut document = self.load()?;
        if document.pages.is_empty() {
            return Ok(ConversionResult {
                status: ConversionStatus::Failure,
                errors: vec!["converter output contains no pages".into()],
                document: None,
            });
        }
        document.restrict_to(range);

        let missing: Vec<u32> = (range.start..=range.end)
            .filter(|p| !document.has_page(*p))
            .collect();
        let status = if missing.is_empty() {
            ConversionStatus::Success
        } else {
            warn!("Converter output lacks pages {:?}", missing);
            ConversionStatus::PartialSuccess
        };
        let errors = missing
            .iter()
            .map(|p| format!("page {p} was not converted"))
            .collect();
        Ok(ConversionResult {
            status,
            errors,
            document: Some(document),
        })
    }
}
