//! Spreadsheet reports
//!
//! Each record type declares its columns up front through [`ReportRecord`]; the
//! writer renders records into a [`ReportSheet`] and saves it as
//! `report_<label>_<YYYY-MM-DD_HH-MM-SS>.xlsx` under the reports directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use personalizer_common::{ConsoleMessage, ObservedResult};
use rust_xlsxwriter::{Format, Workbook};
use tracing::{error, info, warn};

use crate::error::E2eResult;

/// Narrowest column the writer produces
pub const MIN_COLUMN_WIDTH: usize = 10;

/// Padding added to the longest value in a column
const WIDTH_PADDING: usize = 2;

/// Worksheet every report is written to
pub const SHEET_NAME: &str = "Test Result";

/// One column of a report schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportColumn {
    pub key: &'static str,
    pub label: &'static str,
    pub min_width: usize,
}

impl ReportColumn {
    pub const fn new(key: &'static str, label: &'static str) -> Self {
        Self {
            key,
            label,
            min_width: MIN_COLUMN_WIDTH,
        }
    }

    pub const fn with_min_width(mut self, min_width: usize) -> Self {
        self.min_width = min_width;
        self
    }
}

/// Typed cell written to the sheet
#[derive(Debug, Clone, PartialEq)]
pub enum ReportCell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl ReportCell {
    fn text(value: impl Into<String>) -> Self {
        ReportCell::Text(value.into())
    }

    fn optional(value: Option<&str>) -> Self {
        value.map(ReportCell::text).unwrap_or(ReportCell::Empty)
    }

    fn list(values: &[String]) -> Self {
        if values.is_empty() {
            ReportCell::Empty
        } else {
            ReportCell::Text(values.join(","))
        }
    }

    fn numbers(values: &[f64]) -> Self {
        if values.is_empty() {
            ReportCell::Empty
        } else {
            ReportCell::Text(values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
        }
    }

    /// Width-relevant rendering
    pub fn display(&self) -> String {
        match self {
            ReportCell::Empty => String::new(),
            ReportCell::Text(s) => s.clone(),
            ReportCell::Number(n) => n.to_string(),
            ReportCell::Bool(b) => b.to_string(),
        }
    }
}

/// A record type that can be written as one report row
pub trait ReportRecord {
    fn columns() -> &'static [ReportColumn];
    fn cells(&self) -> Vec<ReportCell>;
}

const RESULT_COLUMNS: &[ReportColumn] = &[
    ReportColumn::new("identifier", "PersonalizerId"),
    ReportColumn::new("flow_type", "Type"),
    ReportColumn::new("url", "Url"),
    ReportColumn::new("selector", "ElementSelector"),
    ReportColumn::new("recommendation_not_loaded", "RecommendationNotLoaded"),
    ReportColumn::new("dom_order", "DomOrder"),
    ReportColumn::new("rank_order", "RankOrder"),
    ReportColumn::new("rank_api_observed", "RankApiCall"),
    ReportColumn::new("reward_api_observed", "RewardApiCall"),
    ReportColumn::new("first_ranked_id", "RankFirstElement"),
    ReportColumn::new("first_dom_id", "DomFirstElement"),
    ReportColumn::new("order_matches", "DomOrderCheckWithRankOrder"),
    ReportColumn::new("rank_event_id", "RankEventId"),
    ReportColumn::new("reward_event_id", "RewardEventId"),
    ReportColumn::new("reward_weights", "RewardWeightList"),
    ReportColumn::new("reward_weight", "RewardWeight"),
    ReportColumn::new("page_errors", "PageErrors"),
    ReportColumn::new("error", "Error").with_min_width(20),
    ReportColumn::new("screenshot_path", "Screenshot"),
    ReportColumn::new("batch_number", "BatchNumber"),
    ReportColumn::new("retry_attempt", "RetryAttempt"),
];

impl ReportRecord for ObservedResult {
    fn columns() -> &'static [ReportColumn] {
        RESULT_COLUMNS
    }

    fn cells(&self) -> Vec<ReportCell> {
        vec![
            ReportCell::text(&self.identifier),
            ReportCell::text(self.flow_type.to_string()),
            ReportCell::text(&self.url),
            ReportCell::text(&self.selector),
            ReportCell::Bool(self.recommendation_not_loaded),
            ReportCell::list(&self.dom_order),
            ReportCell::list(&self.rank_order),
            ReportCell::Bool(self.rank_api_observed),
            ReportCell::Bool(self.reward_api_observed),
            ReportCell::optional(self.first_ranked_id.as_deref()),
            ReportCell::optional(self.first_dom_id.as_deref()),
            ReportCell::Bool(self.order_matches),
            ReportCell::optional(self.rank_event_id.as_deref()),
            ReportCell::optional(self.reward_event_id.as_deref()),
            ReportCell::numbers(&self.reward_weights),
            self.reward_weight.map(ReportCell::Number).unwrap_or(ReportCell::Empty),
            ReportCell::list(&self.page_errors),
            ReportCell::optional(self.error.as_deref()),
            ReportCell::optional(self.screenshot_path.as_deref()),
            ReportCell::Number(self.batch_number as f64),
            ReportCell::Number(f64::from(self.retry_attempt)),
        ]
    }
}

const CONSOLE_COLUMNS: &[ReportColumn] = &[
    ReportColumn::new("kind", "Type"),
    ReportColumn::new("level", "Level"),
    ReportColumn::new("message", "Message").with_min_width(20),
    ReportColumn::new("url", "URL"),
    ReportColumn::new("timestamp", "Timestamp"),
];

impl ReportRecord for ConsoleMessage {
    fn columns() -> &'static [ReportColumn] {
        CONSOLE_COLUMNS
    }

    fn cells(&self) -> Vec<ReportCell> {
        let kind = match self.kind {
            personalizer_common::ConsoleMessageKind::Console => "CONSOLE",
            personalizer_common::ConsoleMessageKind::PageError => "PAGE ERROR",
            personalizer_common::ConsoleMessageKind::RequestFailed => "REQUEST FAILED",
        };
        vec![
            ReportCell::text(kind),
            ReportCell::text(&self.level),
            ReportCell::text(&self.message),
            ReportCell::text(&self.url),
            ReportCell::text(&self.timestamp),
        ]
    }
}

/// Rendered sheet contents, independent of the file format
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<ReportCell>>,
    pub widths: Vec<usize>,
}

impl ReportSheet {
    pub fn render<R: ReportRecord>(records: &[R]) -> Self {
        let columns = R::columns();
        let headers: Vec<String> = columns.iter().map(|c| c.label.to_string()).collect();
        let rows: Vec<Vec<ReportCell>> = records.iter().map(ReportRecord::cells).collect();

        let widths = columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let longest = rows
                    .iter()
                    .filter_map(|row| row.get(i))
                    .map(|cell| cell.display().chars().count())
                    .chain(std::iter::once(column.label.chars().count()))
                    .max()
                    .unwrap_or(0);
                longest.max(column.min_width) + WIDTH_PADDING
            })
            .collect();

        Self { headers, rows, widths }
    }
}

/// `<base>_<YYYY-MM-DD_HH-MM-SS>.<extension>`
pub fn timestamped_file_name(base: &str, extension: &str, at: &DateTime<Local>) -> String {
    format!("{}_{}.{}", base, at.format("%Y-%m-%d_%H-%M-%S"), extension)
}

/// `report_<label>_<YYYY-MM-DD_HH-MM-SS>.xlsx`
pub fn report_file_name(label: &str, at: &DateTime<Local>) -> String {
    timestamped_file_name(&format!("report_{}", label), "xlsx", at)
}

/// Writes report workbooks into a single directory
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `records` stamped with the current local time
    pub fn write<R: ReportRecord>(&self, records: &[R], label: &str) -> E2eResult<Option<PathBuf>> {
        self.write_at(records, label, &Local::now())
    }

    /// Write `records`; no file is produced for an empty slice
    pub fn write_at<R: ReportRecord>(
        &self,
        records: &[R],
        label: &str,
        at: &DateTime<Local>,
    ) -> E2eResult<Option<PathBuf>> {
        if records.is_empty() {
            warn!("No results to write for report '{}'", label);
            return Ok(None);
        }

        let sheet = ReportSheet::render(records);
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(report_file_name(label, at));
        save_sheet(&sheet, &path)?;

        info!("Report written to: {}", path.display());
        Ok(Some(path))
    }

    /// Like [`ReportWriter::write`], but failures are logged and swallowed
    pub fn persist<R: ReportRecord>(&self, records: &[R], label: &str) -> Option<PathBuf> {
        match self.write(records, label) {
            Ok(path) => path,
            Err(e) => {
                error!("Failed to write report '{}': {}", label, e);
                None
            }
        }
    }
}

fn save_sheet(sheet: &ReportSheet, path: &Path) -> E2eResult<()> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, header) in sheet.headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, header, &bold)?;
    }

    for (r, row) in sheet.rows.iter().enumerate() {
        let row_idx = (r + 1) as u32;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            match cell {
                ReportCell::Empty => {}
                ReportCell::Text(s) => {
                    worksheet.write_string(row_idx, col, s)?;
                }
                ReportCell::Number(n) => {
                    worksheet.write_number(row_idx, col, *n)?;
                }
                ReportCell::Bool(b) => {
                    worksheet.write_boolean(row_idx, col, *b)?;
                }
            }
        }
    }

    for (col, width) in sheet.widths.iter().enumerate() {
        worksheet.set_column_width(col as u16, *width as f64)?;
    }

    workbook.save(path)?;
    Ok(())
}
