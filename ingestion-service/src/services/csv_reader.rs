//! Column-mapped CSV statement extraction.
//!
//! Banks disagree on everything: column names, date formats, whether
//! amounts are signed or split across debit/credit columns. The client
//! supplies a column mapping; extraction produces typed [`RawRow`]s and
//! the pipeline never sees loose strings.

use crate::models::RawRow;
use chrono::{NaiveDate, NaiveDateTime};
use service_core::error::AppError;

/// Client-supplied column mapping. Either `amount` or at least one of
/// `debit`/`credit` must be set.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub date: String,
    pub description: String,
    pub amount: Option<String>,
    pub debit: Option<String>,
    pub credit: Option<String>,
}

/// Structure probe of an uploaded CSV.
#[derive(Debug)]
pub struct CsvStructure {
    pub headers: Vec<String>,
    pub row_count: usize,
    pub sample: Vec<Vec<String>>,
}

const SAMPLE_ROWS: usize = 5;

/// Read headers, row count and a small sample without interpreting values.
pub fn parse_preview(content: &[u8]) -> Result<CsvStructure, AppError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(content);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Unreadable CSV header: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("CSV file has no header row")));
    }

    let mut row_count = 0usize;
    let mut sample = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| AppError::BadRequest(anyhow::anyhow!("Unparseable CSV: {}", e)))?;
        if sample.len() < SAMPLE_ROWS {
            sample.push(record.iter().map(|f| f.to_string()).collect());
        }
        row_count += 1;
    }

    Ok(CsvStructure {
        headers,
        row_count,
        sample,
    })
}

/// Extract typed rows using the supplied column mapping.
///
/// Rows whose date or amount cannot be parsed are skipped with a warning
/// rather than failing the whole statement; a bank export usually carries
/// a few balance/footer lines.
pub fn extract_rows(content: &[u8], mapping: &ColumnMapping) -> Result<Vec<RawRow>, AppError> {
    if mapping.amount.is_none() && mapping.debit.is_none() && mapping.credit.is_none() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Mapping needs an amount column or debit/credit columns"
        )));
    }

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(content);
    let headers = reader
        .headers()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Unreadable CSV header: {}", e)))?
        .clone();

    let date_idx = column_index(&headers, &mapping.date)?;
    let desc_idx = column_index(&headers, &mapping.description)?;
    let amount_idx = mapping
        .amount
        .as_deref()
        .map(|c| column_index(&headers, c))
        .transpose()?;
    let debit_idx = mapping
        .debit
        .as_deref()
        .map(|c| column_index(&headers, c))
        .transpose()?;
    let credit_idx = mapping
        .credit
        .as_deref()
        .map(|c| column_index(&headers, c))
        .transpose()?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;

    for (line, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| AppError::BadRequest(anyhow::anyhow!("Unparseable CSV: {}", e)))?;

        let date_field = record.get(date_idx).unwrap_or("").trim();
        let description = record.get(desc_idx).unwrap_or("").trim();
        if date_field.is_empty() && description.is_empty() {
            continue;
        }

        let Some(date) = parse_date(date_field) else {
            tracing::warn!(line = line + 2, value = %date_field, "Skipping row with unparseable date");
            skipped += 1;
            continue;
        };

        let amount = if let Some(idx) = amount_idx {
            parse_amount(record.get(idx).unwrap_or(""))
        } else {
            let debit = debit_idx
                .and_then(|idx| record.get(idx))
                .and_then(parse_amount_opt);
            let credit = credit_idx
                .and_then(|idx| record.get(idx))
                .and_then(parse_amount_opt);
            match (debit, credit) {
                (Some(d), _) if d != 0.0 => Some(-d.abs()),
                (_, Some(c)) if c != 0.0 => Some(c.abs()),
                (Some(_), _) | (_, Some(_)) => Some(0.0),
                (None, None) => None,
            }
        };

        let Some(amount) = amount else {
            tracing::warn!(line = line + 2, "Skipping row with unparseable amount");
            skipped += 1;
            continue;
        };

        rows.push(RawRow {
            date,
            description: description.to_string(),
            amount,
        });
    }

    if skipped > 0 {
        tracing::info!(skipped = skipped, extracted = rows.len(), "CSV extraction finished");
    }

    Ok(rows)
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize, AppError> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Column not found in CSV: {}", name)))
}

/// Accepted statement date formats, day-first preferred for ambiguity.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d/%m/%y", "%m/%d/%Y", "%Y/%m/%d", "%d %b %Y"];

fn parse_date(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn parse_amount(value: &str) -> Option<f64> {
    let cleaned = value.trim().replace(['$', ','], "");
    if cleaned.is_empty() {
        return None;
    }
    if let Some(inner) = cleaned.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        return inner.trim().parse::<f64>().ok().map(|v| -v.abs());
    }
    cleaned.parse::<f64>().ok()
}

fn parse_amount_opt(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        parse_amount(trimmed)
    }
}
