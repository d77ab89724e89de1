use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context};
use tracing::{debug, info};

use crate::models::{LoanRecord, CATEGORICAL_COLUMNS, LABEL_COLUMN, NUMERIC_COLUMNS};

const MISSING_MARKERS: [&str; 8] = ["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None"];

const UNKNOWN_CATEGORY: &str = "unknown";

/// Reads the loan dataset and returns cleaned records.
///
/// Malformed cell values never fail the load; only I/O problems and missing
/// columns do.
pub fn load_clean(path: &Path) -> anyhow::Result<Vec<LoanRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open dataset {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let index_of = |column: &str| -> anyhow::Result<usize> {
        headers
            .iter()
            .position(|h| h.trim() == column)
            .with_context(|| format!("dataset is missing required column `{column}`"))
    };

    let numeric_idx = NUMERIC_COLUMNS
        .iter()
        .map(|c| index_of(*c))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let categorical_idx = CATEGORICAL_COLUMNS
        .iter()
        .map(|c| index_of(*c))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let label_idx = index_of(LABEL_COLUMN)?;

    let mut seen: HashSet<Vec<String>> = HashSet::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut duplicates = 0usize;

    for result in reader.records() {
        let record = result.with_context(|| format!("malformed row in {}", path.display()))?;
        let row: Vec<String> = record.iter().map(|v| v.to_string()).collect();
        if seen.insert(row.clone()) {
            rows.push(row);
        } else {
            duplicates += 1;
        }
    }
    debug!(rows = rows.len(), duplicates, "dataset read");

    let cell = |row: &Vec<String>, idx: usize| -> Option<String> {
        row.get(idx)
            .map(|v| v.trim())
            .filter(|v| !is_missing(v))
            .map(|v| v.to_string())
    };

    let numeric: Vec<Vec<f64>> = numeric_idx
        .iter()
        .map(|&idx| {
            let column: Vec<Option<f64>> = rows
                .iter()
                .map(|row| cell(row, idx).and_then(|v| parse_number(&v)))
                .collect();
            impute_median(&column)
        })
        .collect();
    let categorical: Vec<Vec<String>> = categorical_idx
        .iter()
        .map(|&idx| {
            let column: Vec<Option<String>> = rows.iter().map(|row| cell(row, idx)).collect();
            impute_mode(&column)
        })
        .collect();
    let labels_raw: Vec<Option<String>> = rows.iter().map(|row| cell(row, label_idx)).collect();
    let labels = normalize_labels(&labels_raw);

    let records: Vec<LoanRecord> = (0..rows.len())
        .map(|i| LoanRecord {
            person_age: numeric[0][i],
            person_income: numeric[1][i],
            person_emp_exp: numeric[2][i],
            loan_amnt: numeric[3][i],
            loan_int_rate: numeric[4][i],
            loan_percent_income: numeric[5][i],
            cb_person_cred_hist_length: numeric[6][i],
            credit_score: numeric[7][i],
            person_gender: categorical[0][i].clone(),
            person_education: categorical[1][i].clone(),
            person_home_ownership: categorical[2][i].clone(),
            loan_intent: categorical[3][i].clone(),
            previous_loan_defaults_on_file: categorical[4][i].clone(),
            loan_status: labels[i],
        })
        .collect();

    if records.is_empty() {
        bail!("dataset {} contains no rows", path.display());
    }

    info!(
        rows = records.len(),
        duplicates,
        defaults = records.iter().filter(|r| r.loan_status == 1).count(),
        "dataset cleaned"
    );
    Ok(records)
}

fn is_missing(value: &str) -> bool {
    MISSING_MARKERS.contains(&value)
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Fills gaps with the median of the present values, or 0.0 when none are present.
pub fn impute_median(column: &[Option<f64>]) -> Vec<f64> {
    let mut present: Vec<f64> = column.iter().flatten().copied().collect();
    let fill = median(&mut present).unwrap_or(0.0);
    column.iter().map(|v| v.unwrap_or(fill)).collect()
}

/// Fills gaps with the most frequent value; ties go to the smallest value.
pub fn impute_mode(column: &[Option<String>]) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in column.iter().flatten() {
        *counts.entry(value.as_str()).or_insert(0) += 1;
    }
    let mut fill = UNKNOWN_CATEGORY;
    let mut best = 0usize;
    for (value, count) in counts {
        if count > best {
            best = count;
            fill = value;
        }
    }
    column
        .iter()
        .map(|v| v.clone().unwrap_or_else(|| fill.to_string()))
        .collect()
}

pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Maps the target column to 0/1.
///
/// A fully numeric column passes through (non-zero after truncation is a
/// default). Otherwise values go through the label vocabulary, then numeric
/// coercion, then 0.
pub fn normalize_labels(column: &[Option<String>]) -> Vec<u8> {
    let all_numeric = column
        .iter()
        .flatten()
        .all(|v| v.trim().parse::<f64>().is_ok());

    column
        .iter()
        .map(|value| {
            let Some(value) = value else {
                return 0;
            };
            if all_numeric {
                return numeric_label(value);
            }
            match value.trim().to_lowercase().as_str() {
                "default" | "defaulter" | "charged off" | "yes" | "y" | "true" | "1" => 1,
                "no" | "n" | "false" | "0" | "paid" | "current" => 0,
                _ => numeric_label(value),
            }
        })
        .collect()
}

fn numeric_label(value: &str) -> u8 {
    match parse_number(value) {
        Some(v) if v.trunc() != 0.0 => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "person_age,person_gender,person_education,person_income,person_emp_exp,person_home_ownership,loan_amnt,loan_intent,loan_int_rate,loan_percent_income,cb_person_cred_hist_length,credit_score,previous_loan_defaults_on_file,loan_status";

    fn write_dataset(rows: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        file
    }

    #[test]
    fn imputes_numeric_median_and_categorical_mode() {
        let file = write_dataset(&[
            "22,female,Master,71948,0,RENT,35000,PERSONAL,16.02,0.49,3,561,No,1",
            "21,female,High School,12282,0,OWN,1000,EDUCATION,11.14,0.08,2,504,Yes,0",
            "abc,,Bachelor,12438,3,MORTGAGE,5500,MEDICAL,12.87,0.44,3,635,No,1",
            "25,male,,79753,0,RENT,,MEDICAL,,0.44,2,675,No,0",
        ]);
        let records = load_clean(file.path()).unwrap();
        assert_eq!(records.len(), 4);

        // age median of 22, 21, 25
        assert_eq!(records[2].person_age, 22.0);
        // loan amount median of 35000, 1000, 5500
        assert_eq!(records[3].loan_amnt, 5500.0);
        assert!((records[3].loan_int_rate - 12.87).abs() < 1e-9);
        assert_eq!(records[2].person_gender, "female");
        // three distinct educations tie; smallest wins
        assert_eq!(records[3].person_education, "Bachelor");
    }

    #[test]
    fn drops_exact_duplicates() {
        let row = "22,female,Master,71948,0,RENT,35000,PERSONAL,16.02,0.49,3,561,No,1";
        let file = write_dataset(&[
            row,
            row,
            "21,female,High School,12282,0,OWN,1000,EDUCATION,11.14,0.08,2,504,Yes,0",
        ]);
        let records = load_clean(file.path()).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn missing_column_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "person_age,loan_status").unwrap();
        writeln!(file, "22,1").unwrap();
        let err = load_clean(file.path()).unwrap_err();
        assert!(err.to_string().contains("person_income"));
    }

    #[test]
    fn textual_labels_use_vocabulary() {
        let labels = normalize_labels(&[
            Some("Charged Off".to_string()),
            Some("paid".to_string()),
            Some("YES".to_string()),
            Some("current".to_string()),
            Some("2".to_string()),
            Some("mystery".to_string()),
            None,
        ]);
        assert_eq!(labels, vec![1, 0, 1, 0, 1, 0, 0]);
    }

    #[test]
    fn numeric_labels_pass_through() {
        let labels = normalize_labels(&[
            Some("1".to_string()),
            Some("0".to_string()),
            Some("1.0".to_string()),
            None,
        ]);
        assert_eq!(labels, vec![1, 0, 1, 0]);
    }

    #[test]
    fn mode_falls_back_to_unknown() {
        let filled = impute_mode(&[None, None]);
        assert_eq!(filled, vec!["unknown".to_string(), "unknown".to_string()]);
    }

    #[test]
    fn median_handles_even_counts() {
        assert_eq!(median(&mut [300.0, 100.0]), Some(200.0));
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        let mut empty: Vec<f64> = Vec::new();
        assert_eq!(median(&mut empty), None);
    }
}
