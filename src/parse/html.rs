// src/parse/html.rs
//! Tolerant extraction of tables and links from server-rendered HTML pages.
//! The html5ever parser behind `scraper` closes unterminated rows and cells.

use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlTable {
    /// Cell texts of the first all-`<th>` row (may be empty).
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl HtmlTable {
    /// Index of the first header containing `needle` (case-insensitive).
    pub fn column(&self, needle: &str) -> Option<usize> {
        let needle = needle.to_ascii_lowercase();
        self.headers
            .iter()
            .position(|h| h.to_ascii_lowercase().contains(&needle))
    }
}

/// Text of an element with whitespace (including `&nbsp;`) collapsed.
fn cell_text(el: ElementRef<'_>) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    let text = el.text().collect::<Vec<_>>().join(" ");
    re_ws.replace_all(&text, " ").trim().to_string()
}

/// Every `<table>` in document order. A leading row made only of `<th>`
/// cells becomes the header; every other non-empty row is data.
pub fn tables(html: &str) -> Vec<HtmlTable> {
    let doc = Html::parse_document(html);
    let (Ok(table_sel), Ok(row_sel), Ok(cell_sel)) = (
        Selector::parse("table"),
        Selector::parse("tr"),
        Selector::parse("th, td"),
    ) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for table in doc.select(&table_sel) {
        let mut t = HtmlTable::default();
        for row in table.select(&row_sel) {
            let mut all_th = true;
            let mut cells = Vec::new();
            for cell in row.select(&cell_sel) {
                if cell.value().name() != "th" {
                    all_th = false;
                }
                cells.push(cell_text(cell));
            }
            if cells.is_empty() {
                continue;
            }
            if all_th && t.headers.is_empty() && t.rows.is_empty() {
                t.headers = cells;
            } else {
                t.rows.push(cells);
            }
        }
        out.push(t);
    }
    out
}

/// `href` targets of all anchors, entity-decoded, in document order.
pub fn links(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    doc.select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .map(str::to_string)
        .collect()
}
