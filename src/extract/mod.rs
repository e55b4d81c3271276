//! Parsers for the tabular text tools leave on stdout
//!
//! Both formats are `|`-separated with a fixed column order. The categorical
//! parser is strict: any bad cell fails the job. The univariate parser is
//! lenient per cell: a cell that is not a number is left out of its record,
//! which is how "no raster coverage for this feature" shows up.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{JobError, Result};

pub const FIELD_SEPARATOR: char = '|';

/// Area, cell count and share of one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalRecord {
    #[serde(rename = "cat")]
    pub category: String,
    #[serde(rename = "name")]
    pub label: String,
    pub area: f64,
    pub cell_count: u64,
    pub percent: f64,
}

/// Numeric summary of one feature; only columns that parsed are present
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UnivariateRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fid: Option<String>,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

impl UnivariateRecord {
    /// Names of the numeric fields this record carries
    pub fn present(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatRecord {
    Categorical(CategoricalRecord),
    Univariate(UnivariateRecord),
}

fn malformed(line: usize, reason: impl Into<String>) -> JobError {
    JobError::MalformedOutput {
        line,
        reason: reason.into(),
    }
}

/// Parse `cat|label|area|cell_count|percent%` rows
pub fn parse_categorical(text: &str) -> Result<Vec<CategoricalRecord>> {
    let mut records = vec![];

    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let cells: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if cells.len() < 5 {
            return Err(malformed(
                line_no,
                format!("expected 5 columns, found {}", cells.len()),
            ));
        }

        let area = cells[2]
            .trim()
            .parse::<f64>()
            .map_err(|e| malformed(line_no, format!("area '{}': {}", cells[2], e)))?;
        let cell_count = cells[3]
            .trim()
            .parse::<u64>()
            .map_err(|e| malformed(line_no, format!("cell count '{}': {}", cells[3], e)))?;
        let percent_cell = cells[4].trim();
        let percent = percent_cell
            .split('%')
            .next()
            .unwrap_or_default()
            .trim()
            .parse::<f64>()
            .map_err(|e| malformed(line_no, format!("percent '{}': {}", percent_cell, e)))?;

        records.push(CategoricalRecord {
            category: cells[0].to_string(),
            label: cells[1].to_string(),
            area,
            cell_count,
            percent,
        });
    }

    Ok(records)
}

/// Parse a header line followed by rows zipped against it
pub fn parse_univariate(text: &str) -> Vec<UnivariateRecord> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    let Some(header) = lines.next() else {
        return vec![];
    };
    let keys: Vec<&str> = header.split(FIELD_SEPARATOR).collect();

    lines
        .map(|line| {
            let values: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
            let mut record = UnivariateRecord::default();

            for (i, key) in keys.iter().enumerate() {
                let Some(value) = values.get(i) else {
                    continue;
                };
                match *key {
                    "cat" => record.cat = Some(value.to_string()),
                    "fid" => record.fid = Some(value.to_string()),
                    _ => {
                        if let Ok(number) = value.trim().parse::<f64>() {
                            record.values.insert(key.to_string(), number);
                        }
                    }
                }
            }

            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorical_row() {
        let records = parse_categorical("1|Forest|523.4|2025000|36.22%\n").unwrap();
        assert_eq!(
            records,
            vec![CategoricalRecord {
                category: "1".to_string(),
                label: "Forest".to_string(),
                area: 523.4,
                cell_count: 2025000,
                percent: 36.22,
            }]
        );
    }

    #[test]
    fn test_categorical_null_category_and_blank_lines() {
        let text = "1|Forest|100|10|25.00%\n\n*|no data|300|30|75.00%\n";
        let records = parse_categorical(text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].category, "*");
        assert_eq!(records[1].label, "no data");

        let json = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(json["cat"], "1");
        assert_eq!(json["name"], "Forest");
    }

    #[test]
    fn test_categorical_is_strict() {
        let err = parse_categorical("1|Forest|523.4|2025000|36.22%\n2|Water|abc|1|1%\n")
            .unwrap_err();
        assert!(matches!(err, JobError::MalformedOutput { line: 2, .. }));

        let err = parse_categorical("1|Forest|523.4\n").unwrap_err();
        assert!(matches!(err, JobError::MalformedOutput { line: 1, .. }));

        let err = parse_categorical("1|Forest|523.4|12.5|1%\n").unwrap_err();
        assert!(matches!(err, JobError::MalformedOutput { .. }));
    }

    #[test]
    fn test_univariate_drops_empty_cells() {
        let records = parse_univariate("cat|fid|raster_number|raster_minimum\n1|tile|||\n");
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.cat.as_deref(), Some("1"));
        assert_eq!(record.fid.as_deref(), Some("tile"));
        assert_eq!(record.present().count(), 0);

        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json, serde_json::json!({"cat": "1", "fid": "tile"}));
    }

    #[test]
    fn test_univariate_full_row() {
        let text = "cat|fid|raster_number|raster_minimum|raster_maximum|raster_average\n\
                    1|swwake_10m.0|2025000|1|6|4.27381481481481\n";
        let records = parse_univariate(text);

        let record = &records[0];
        assert_eq!(record.get("raster_number"), Some(2025000.0));
        assert_eq!(record.get("raster_minimum"), Some(1.0));
        assert_eq!(record.get("raster_average"), Some(4.27381481481481));
        assert_eq!(
            record.present().collect::<Vec<_>>(),
            vec!["raster_average", "raster_maximum", "raster_minimum", "raster_number"]
        );
    }

    #[test]
    fn test_univariate_short_row_and_empty_text() {
        let records = parse_univariate("cat|fid|raster_sum\n2|x\n");
        assert_eq!(records[0].fid.as_deref(), Some("x"));
        assert!(records[0].get("raster_sum").is_none());

        assert!(parse_univariate("").is_empty());
    }
}
