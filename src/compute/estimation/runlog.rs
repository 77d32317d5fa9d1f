//! CSV emission for accepted evaluations.
//!
//! Two files: `results.csv` for the raw-objective front and
//! `meta/results.csv` for the meta front. Every field is quoted; the header
//! row is written once when a file is first created, so an interrupted run
//! can append to its own output.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// CSV writers for one run's output directory.
#[derive(Debug)]
pub struct RunLog {
    results_path: PathBuf,
    meta_path: PathBuf,
}

impl RunLog {
    /// Create the output layout and header rows.
    pub fn create(output_dir: &Path, headers: &[String]) -> io::Result<Self> {
        let meta_dir = output_dir.join("meta");
        fs::create_dir_all(&meta_dir)?;

        let results_path = output_dir.join("results.csv");
        let meta_path = meta_dir.join("results.csv");

        for path in [&results_path, &meta_path] {
            if !path.exists() {
                let mut file = fs::File::create(path)?;
                writeln!(file, "{}", quote_row(headers))?;
            }
        }

        Ok(Self {
            results_path,
            meta_path,
        })
    }

    /// Append rows to the results CSV.
    pub fn append(&self, rows: &[Vec<String>]) -> io::Result<()> {
        append_rows(&self.results_path, rows)
    }

    /// Append rows to the meta-front CSV.
    pub fn append_meta(&self, rows: &[Vec<String>]) -> io::Result<()> {
        append_rows(&self.meta_path, rows)
    }

    /// Prefix a CSV fragment with the timestamp and save-name columns.
    pub fn stamp(save_name: &str, fragment: &[String]) -> Vec<String> {
        let mut row = Vec::with_capacity(fragment.len() + 2);
        row.push(timestamp());
        row.push(save_name.to_string());
        row.extend(fragment.iter().cloned());
        row
    }
}

fn append_rows(path: &Path, rows: &[Vec<String>]) -> io::Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new().append(true).open(path)?;
    for row in rows {
        writeln!(file, "{}", quote_row(row))?;
    }
    file.flush()
}

fn quote_row<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(|f| format!("\"{}\"", f.as_ref().replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(",")
}

fn timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_row_escapes() {
        let row = vec!["a".to_string(), "say \"hi\"".to_string()];
        assert_eq!(quote_row(&row), "\"a\",\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_create_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let headers = vec!["Time".to_string(), "Name".to_string()];
        let log = RunLog::create(dir.path(), &headers).unwrap();

        log.append(&[vec!["1".to_string(), "abc".to_string()]])
            .unwrap();
        log.append_meta(&[vec!["2".to_string(), "def".to_string()]])
            .unwrap();

        let results = fs::read_to_string(dir.path().join("results.csv")).unwrap();
        assert!(results.starts_with("\"Time\",\"Name\"\n"));
        assert!(results.contains("\"abc\""));

        let meta = fs::read_to_string(dir.path().join("meta/results.csv")).unwrap();
        assert!(meta.contains("\"def\""));
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let headers = vec!["Time".to_string()];
        let _first = RunLog::create(dir.path(), &headers).unwrap();
        let _second = RunLog::create(dir.path(), &headers).unwrap();

        let results = fs::read_to_string(dir.path().join("results.csv")).unwrap();
        assert_eq!(results.matches("\"Time\"").count(), 1);
    }
}
