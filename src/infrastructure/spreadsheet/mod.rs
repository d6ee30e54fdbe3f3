//! Raw cell grids from step sheets (`.xlsx`, `.xls`, `.ods`, `.csv`) and CSV output.

use crate::domain::error::{AppError, Result};
use calamine::{open_workbook_auto, Data, Reader};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use encoding_rs::WINDOWS_1252;
use std::path::Path;
use tracing::{debug, info};

pub type Grid = Vec<Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Workbook,
    Csv,
}

impl SheetFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(SheetFormat::Workbook),
            "csv" => Ok(SheetFormat::Csv),
            other => Err(AppError::ValidationError(format!(
                "Unsupported sheet type: .{}",
                other
            ))),
        }
    }
}

/// Reads the first worksheet (or the CSV) as trimmed strings.
pub fn read_grid(path: &Path) -> Result<Grid> {
    let grid = match SheetFormat::from_path(path)? {
        SheetFormat::Workbook => read_workbook(path)?,
        SheetFormat::Csv => {
            let bytes = std::fs::read(path)
                .map_err(|e| AppError::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
            parse_csv_text(&decode_text(&bytes))?
        }
    };
    info!(path = %path.display(), rows = grid.len(), "Read step sheet");
    Ok(grid)
}

fn read_workbook(path: &Path) -> Result<Grid> {
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        AppError::ParseError(format!("Failed to open workbook {}: {}", path.display(), e))
    })?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::ParseError("No worksheet found".to_string()))?
        .map_err(|e| AppError::ParseError(format!("Failed to read worksheet: {}", e)))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        // Sheets store step numbers as floats.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string().trim().to_string(),
    }
}

/// UTF-8 (with or without BOM), else Windows-1252.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            debug!("Sheet is not UTF-8, decoding as Windows-1252");
            let (text, _, _) = WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}

pub fn parse_csv_text(content: &str) -> Result<Grid> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut grid = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            AppError::ParseError(format!("Failed to parse CSV row {}: {}", index + 1, e))
        })?;
        grid.push(record.iter().map(|field| field.to_string()).collect());
    }
    Ok(grid)
}

pub fn write_csv(path: &Path, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .map_err(|e| AppError::IoError(format!("Failed to create {}: {}", path.display(), e)))?;
    writer
        .write_record(header)
        .map_err(|e| AppError::IoError(format!("Failed to write CSV header: {}", e)))?;
    for row in rows {
        writer
            .write_record(row)
            .map_err(|e| AppError::IoError(format!("Failed to write CSV row: {}", e)))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::IoError(format!("Failed to flush CSV: {}", e)))?;
    Ok(())
}
