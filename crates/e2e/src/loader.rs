//! Item source loader
//!
//! Reads a workbook (spreadsheet, JSON or YAML) into named sections of rows and
//! turns those rows into [`TestItem`]s and [`ConsoleTarget`]s.

use std::collections::HashMap;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use personalizer_common::{ConsoleTarget, TestItem};
use tracing::{debug, warn};

use crate::error::{E2eError, E2eResult};

/// A single cell value, independent of the source format
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    List(Vec<Cell>),
}

impl Cell {
    /// Text rendering, `None` for empty cells
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Cell::Number(n) => Some(n.to_string()),
            Cell::Bool(b) => Some(b.to_string()),
            Cell::List(items) => {
                let parts: Vec<String> = items.iter().filter_map(Cell::as_text).collect();
                (!parts.is_empty()).then(|| parts.join(","))
            }
        }
    }

    pub fn as_flag(&self) -> bool {
        match self {
            Cell::Bool(b) => *b,
            Cell::Number(n) => *n == 1.0,
            Cell::Text(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
            _ => false,
        }
    }

    /// Comma-separated text or list items, split and trimmed
    pub fn as_list(&self) -> Vec<String> {
        match self {
            Cell::List(items) => items.iter().filter_map(Cell::as_text).collect(),
            Cell::Text(s) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            other => other.as_text().into_iter().collect(),
        }
    }

    /// Numbers from a list, a number or a comma-separated string; bad tokens are dropped
    pub fn as_numbers(&self) -> Vec<f64> {
        match self {
            Cell::Number(n) => vec![*n],
            Cell::List(items) => items.iter().flat_map(Cell::as_numbers).collect(),
            Cell::Text(_) => self
                .as_list()
                .into_iter()
                .filter_map(|token| match token.parse::<f64>() {
                    Ok(n) if n.is_finite() => Some(n),
                    _ => {
                        warn!("Ignoring non-numeric weight '{}'", token);
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::DateTime(dt) => Cell::Number(dt.as_f64()),
            Data::Error(_) => Cell::Empty,
        }
    }
}

impl From<&serde_json::Value> for Cell {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Cell::Empty,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Empty),
            Value::String(s) => Cell::Text(s.clone()),
            Value::Array(items) => Cell::List(items.iter().map(Cell::from).collect()),
            // Hyperlink cells exported as {"text": ..., "hyperlink": ...}
            Value::Object(map) => map
                .get("hyperlink")
                .or_else(|| map.get("text"))
                .map(Cell::from)
                .unwrap_or(Cell::Empty),
        }
    }
}

/// One row keyed by column header
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: HashMap<String, Cell>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, cell: Cell) -> Self {
        self.cells.insert(column.to_string(), cell);
        self
    }

    /// First non-empty cell among `columns`, matching headers case-insensitively
    pub fn get(&self, columns: &[&str]) -> Option<&Cell> {
        columns.iter().find_map(|wanted| {
            self.cells
                .iter()
                .find(|(name, cell)| name.trim().eq_ignore_ascii_case(wanted) && **cell != Cell::Empty)
                .map(|(_, cell)| cell)
        })
    }

    pub fn text(&self, columns: &[&str]) -> Option<String> {
        self.get(columns).and_then(Cell::as_text)
    }
}

/// Named sections of rows
#[derive(Debug, Clone, Default)]
pub struct InputWorkbook {
    sections: Vec<(String, Vec<Row>)>,
}

const IDENTIFIER_COLUMNS: &[&str] = &["personalizerId", "identifier", "personalizer_id"];
const SELECTOR_COLUMNS: &[&str] = &["elementSelector", "element_selector", "selector"];
const WEIGHT_COLUMNS: &[&str] = &["weight", "weights"];
const EXPERIMENT_COLUMNS: &[&str] = &["exp_id", "experimentId", "experiment_id"];
const ERROR_TYPE_COLUMNS: &[&str] = &["type", "errorList", "error_types"];

impl InputWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_section(mut self, name: &str, rows: Vec<Row>) -> Self {
        self.sections.push((name.to_string(), rows));
        self
    }

    /// Open a workbook, choosing the reader from the file extension
    pub fn open(path: &Path) -> E2eResult<Self> {
        if !path.exists() {
            return Err(E2eError::InputNotFound(path.display().to_string()));
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Self::from_spreadsheet(path),
            "json" => {
                let content = std::fs::read_to_string(path)?;
                Self::from_json(&content)
            }
            "yaml" | "yml" => {
                let content = std::fs::read_to_string(path)?;
                Self::from_yaml(&content)
            }
            _ => Err(E2eError::UnsupportedInput(path.display().to_string())),
        }
    }

    /// Every worksheet becomes a section; the first row holds the headers
    pub fn from_spreadsheet(path: &Path) -> E2eResult<Self> {
        let mut workbook = open_workbook_auto(path)?;
        let mut book = Self::new();

        for name in workbook.sheet_names() {
            let range = workbook.worksheet_range(&name)?;
            let mut rows = range.rows();
            let headers: Vec<String> = match rows.next() {
                Some(header_row) => header_row
                    .iter()
                    .map(|cell| Cell::from(cell).as_text().unwrap_or_default())
                    .collect(),
                None => Vec::new(),
            };

            let parsed: Vec<Row> = rows
                .map(|cells| {
                    let mut row = Row::new();
                    for (header, cell) in headers.iter().zip(cells) {
                        if !header.is_empty() {
                            row.cells.insert(header.clone(), Cell::from(cell));
                        }
                    }
                    row
                })
                .filter(|row| row.cells.values().any(|c| *c != Cell::Empty))
                .collect();

            debug!("Sheet '{}': {} row(s)", name, parsed.len());
            book.sections.push((name, parsed));
        }

        Ok(book)
    }

    /// Document shaped `{ "<section>": [ { "<column>": value, ... }, ... ] }`
    pub fn from_json(content: &str) -> E2eResult<Self> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        Ok(Self::from_value(&value))
    }

    pub fn from_yaml(content: &str) -> E2eResult<Self> {
        let value: serde_json::Value = serde_yaml::from_str(content)?;
        Ok(Self::from_value(&value))
    }

    fn from_value(value: &serde_json::Value) -> Self {
        let mut book = Self::new();
        let Some(object) = value.as_object() else {
            warn!("Input document is not an object of sections");
            return book;
        };
        for (name, section) in object {
            let Some(entries) = section.as_array() else {
                debug!("Skipping non-list section '{}'", name);
                continue;
            };
            let rows = entries
                .iter()
                .filter_map(|entry| entry.as_object())
                .map(|entry| Row {
                    cells: entry
                        .iter()
                        .map(|(column, value)| (column.clone(), Cell::from(value)))
                        .collect(),
                })
                .collect();
            book.sections.push((name.clone(), rows));
        }
        book
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Rows of a section, matched case-insensitively
    pub fn section(&self, name: &str) -> E2eResult<&[Row]> {
        self.sections
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, rows)| rows.as_slice())
            .ok_or_else(|| E2eError::MissingSection(name.to_string()))
    }

    /// Personalizer items; rows missing url, identifier or selector are skipped
    pub fn test_items(&self, section: &str) -> E2eResult<Vec<TestItem>> {
        let rows = self.section(section)?;
        let mut items = Vec::with_capacity(rows.len());

        for (index, row) in rows.iter().enumerate() {
            let url = row.text(&["url"]);
            let identifier = row.text(IDENTIFIER_COLUMNS);
            let selector = row.text(SELECTOR_COLUMNS);

            let (Some(url), Some(identifier), Some(element_selector)) = (url, identifier, selector) else {
                warn!("Skipping row {} of '{}': url, identifier and selector are required", index + 2, section);
                continue;
            };

            items.push(TestItem {
                url,
                identifier,
                element_selector,
                recommendation: row.get(&["recommendation"]).map(Cell::as_flag).unwrap_or(false),
                expected_weights: row.get(WEIGHT_COLUMNS).map(Cell::as_numbers).unwrap_or_default(),
            });
        }

        debug!("Loaded {} item(s) from '{}'", items.len(), section);
        Ok(items)
    }

    /// Console audit targets; rows missing url, experiment id or error types are skipped
    pub fn console_targets(&self, section: &str) -> E2eResult<Vec<ConsoleTarget>> {
        let rows = self.section(section)?;
        let mut targets = Vec::with_capacity(rows.len());

        for (index, row) in rows.iter().enumerate() {
            let url = row.text(&["url"]);
            let experiment_id = row.text(EXPERIMENT_COLUMNS);
            let error_types = row.get(ERROR_TYPE_COLUMNS).map(Cell::as_list).unwrap_or_default();

            match (url, experiment_id) {
                (Some(url), Some(experiment_id)) if !error_types.is_empty() => targets.push(ConsoleTarget {
                    url,
                    experiment_id,
                    error_types,
                }),
                _ => warn!("Skipping row {} of '{}': url, exp_id and type are required", index + 2, section),
            }
        }

        Ok(targets)
    }
}

/// Load personalizer items, falling back to an empty list when the input is unusable
pub fn load_items_or_empty(path: &Path, section: &str) -> Vec<TestItem> {
    match InputWorkbook::open(path).and_then(|book| book.test_items(section)) {
        Ok(items) => items,
        Err(e) => {
            warn!("Could not load items from {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Load console targets, falling back to the fixture target when nothing loads
pub fn load_console_targets_or_fixture(path: &Path, section: &str) -> Vec<ConsoleTarget> {
    let targets = match InputWorkbook::open(path).and_then(|book| book.console_targets(section)) {
        Ok(targets) => targets,
        Err(e) => {
            warn!("Could not load console targets from {}: {}", path.display(), e);
            Vec::new()
        }
    };

    if targets.is_empty() {
        warn!("No console targets loaded, using fixture target");
        vec![ConsoleTarget::fixture()]
    } else {
        targets
    }
}
