//! Decoder for the device's wire rows.
//!
//! A row is ten double-quoted fields joined by commas; the waveform fields
//! carry array-literal text (`[12, 13, 14]`) whose separators also contain
//! commas, so the split keys on the `","` boundary between quoted fields
//! rather than on bare commas.

use crate::error::DecodeError;
use crate::model::Row;

pub const FIELD_COUNT: usize = 10;

/// The device occasionally re-emits its column header mid-file; callers skip
/// these without counting them as decode failures.
pub fn is_header(line: &str) -> bool {
    line.split(',')
        .next()
        .map(|first| first.to_lowercase().contains("timestamp"))
        .unwrap_or(false)
}

pub fn decode(raw_line: &str) -> Result<Row, DecodeError> {
    let fields = split_fields(raw_line)?;

    Ok(Row {
        timestamp: fields[0].to_string(),
        device_id: fields[1].to_string(),
        battery: parse_u32("battery", fields[2])?,
        hr: parse_u32("hr", fields[3])?,
        o2: parse_u32("o2", fields[4])?,
        spo2_status: fields[5].to_string(),
        pleth: parse_i64_array("pleth", fields[6])?,
        red: parse_i64_array("red", fields[7])?,
        ir: parse_i64_array("ir", fields[8])?,
        perfusion: parse_f64_array("perfusion", fields[9])?,
    })
}

fn split_fields(raw_line: &str) -> Result<Vec<&str>, DecodeError> {
    let line = raw_line.trim();
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }

    let inner = line
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or(DecodeError::Unquoted)?;

    let fields: Vec<&str> = inner.split("\",\"").collect();
    if fields.len() != FIELD_COUNT {
        return Err(DecodeError::FieldCount {
            expected: FIELD_COUNT,
            found: fields.len(),
        });
    }

    Ok(fields)
}

fn parse_u32(name: &'static str, field: &str) -> Result<u32, DecodeError> {
    field.trim().parse::<u32>().map_err(|_| DecodeError::Numeric {
        name,
        value: field.to_string(),
    })
}

fn array_inner<'a>(name: &'static str, field: &'a str) -> Result<&'a str, DecodeError> {
    field
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| DecodeError::Array {
            name,
            reason: "missing brackets".to_string(),
        })
}

fn parse_i64_array(name: &'static str, field: &str) -> Result<Vec<i64>, DecodeError> {
    let inner = array_inner(name, field)?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|item| {
            item.trim().parse::<i64>().map_err(|_| DecodeError::Array {
                name,
                reason: format!("non-integer element `{}`", item.trim()),
            })
        })
        .collect()
}

fn parse_f64_array(name: &'static str, field: &str) -> Result<Vec<f64>, DecodeError> {
    let inner = array_inner(name, field)?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|item| {
            item.trim().parse::<f64>().map_err(|_| DecodeError::Array {
                name,
                reason: format!("non-numeric element `{}`", item.trim()),
            })
        })
        .collect()
}

/// Render a waveform sequence back to its wire form, `[1, 2, 3]`.
pub fn encode_i64_array(values: &[i64]) -> String {
    let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", items.join(", "))
}

pub fn encode_f64_array(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", items.join(", "))
}
