//! Daily attendance ledger.
//!
//! On disk the ledger is a wide CSV: a `Name` column followed by one column
//! per ISO date, cells `0`/`1`. In memory it is a row order plus a
//! date → name → present map, so adding a day never restructures a table.

use crate::persist::{self, FileLock};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const NAME_HEADER: &str = "Name";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("attendance ledger unavailable: {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("attendance ledger {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

/// Wide-format attendance table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceTable {
    names: Vec<String>,
    days: BTreeMap<NaiveDate, BTreeMap<String, bool>>,
}

impl AttendanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row names in first-seen order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Recorded dates, ascending.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.days.keys().copied()
    }

    pub fn has_date(&self, date: NaiveDate) -> bool {
        self.days.contains_key(&date)
    }

    /// Presence for `name` on `date`. Missing cells read as absent.
    pub fn is_present(&self, name: &str, date: NaiveDate) -> bool {
        self.days
            .get(&date)
            .and_then(|day| day.get(name))
            .copied()
            .unwrap_or(false)
    }

    fn ensure_row(&mut self, name: &str) {
        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
    }

    /// Merge one day's recognitions into the table.
    ///
    /// Every name in `all_known` or `recognized` gets a row. The `date`
    /// column is created if needed, and each row's cell becomes 1 when the
    /// name was recognized and 0 otherwise.
    pub fn merge_day(
        &mut self,
        all_known: &BTreeSet<String>,
        recognized: &BTreeSet<String>,
        date: NaiveDate,
    ) {
        for name in all_known.iter().chain(recognized.iter()) {
            self.ensure_row(name);
        }
        let day = self.days.entry(date).or_default();
        for name in &self.names {
            day.insert(name.clone(), recognized.contains(name));
        }
    }

    /// Number of days `name` was present.
    pub fn days_present(&self, name: &str) -> usize {
        self.days
            .values()
            .filter(|day| day.get(name).copied().unwrap_or(false))
            .count()
    }

    fn write_csv<W: io::Write>(&self, out: W) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(out);

        let mut header = vec![NAME_HEADER.to_string()];
        header.extend(self.dates().map(|d| d.format(DATE_FORMAT).to_string()));
        writer.write_record(&header)?;

        for name in &self.names {
            let mut record = Vec::with_capacity(self.days.len() + 1);
            record.push(name.clone());
            for date in self.days.keys() {
                let cell = if self.is_present(name, *date) { "1" } else { "0" };
                record.push(cell.to_string());
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn read_csv<R: io::Read>(input: R, path: &Path) -> Result<Self, LedgerError> {
        let corrupt = |reason: String| LedgerError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(input);

        let headers = reader.headers()?.clone();
        let mut columns = headers.iter();
        match columns.next() {
            Some(first) if first == NAME_HEADER => {}
            // Empty file: a ledger that was never written to.
            None => return Ok(Self::new()),
            Some(other) => return Err(corrupt(format!("first column is {other:?}, expected {NAME_HEADER:?}"))),
        }

        let mut dates = Vec::new();
        for col in columns {
            let date = NaiveDate::parse_from_str(col, DATE_FORMAT)
                .map_err(|e| corrupt(format!("column {col:?} is not a date: {e}")))?;
            if dates.contains(&date) {
                return Err(corrupt(format!("duplicate date column {col}")));
            }
            dates.push(date);
        }

        let mut table = Self::new();
        for date in &dates {
            table.days.insert(*date, BTreeMap::new());
        }

        let mut seen = HashSet::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let Some(name) = record.get(0).filter(|n| !n.is_empty()) else {
                continue;
            };
            if !seen.insert(name.to_string()) {
                return Err(corrupt(format!("duplicate row for {name:?}")));
            }
            table.names.push(name.to_string());

            for (i, date) in dates.iter().enumerate() {
                let present = match record.get(i + 1) {
                    None | Some("") => false,
                    Some(cell) => parse_cell(cell).ok_or_else(|| {
                        corrupt(format!("row {} column {date}: bad cell {cell:?}", line + 2))
                    })?,
                };
                if let Some(day) = table.days.get_mut(date) {
                    day.insert(name.to_string(), present);
                }
            }
        }

        Ok(table)
    }
}

/// Accept `0`/`1` and float spellings such as `1.0` left by spreadsheet tools.
fn parse_cell(cell: &str) -> Option<bool> {
    match cell {
        "0" => Some(false),
        "1" => Some(true),
        other => other.parse::<f64>().ok().map(|v| v != 0.0),
    }
}

/// Attendance CSV bound to a path.
#[derive(Debug, Clone)]
pub struct AttendanceLedger {
    path: PathBuf,
}

impl AttendanceLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the table. A missing file is an empty table.
    pub fn load(&self) -> Result<AttendanceTable, LedgerError> {
        match std::fs::File::open(&self.path) {
            Ok(file) => AttendanceTable::read_csv(file, &self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no attendance ledger yet");
                Ok(AttendanceTable::new())
            }
            Err(source) => Err(LedgerError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Record one day's attendance and persist the whole table.
    ///
    /// Repeating a call with the same arguments leaves the file unchanged.
    pub fn record(
        &self,
        all_known: &BTreeSet<String>,
        recognized: &BTreeSet<String>,
        date: NaiveDate,
    ) -> Result<AttendanceTable, LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        let _lock = FileLock::exclusive(&self.path).map_err(io_err)?;

        let mut table = self.load()?;
        let new_column = !table.has_date(date);
        table.merge_day(all_known, recognized, date);

        let mut csv_err = None;
        persist::write_atomic(&self.path, |w| {
            table.write_csv(w).map_err(|e| {
                let msg = e.to_string();
                csv_err = Some(e);
                io::Error::new(io::ErrorKind::Other, msg)
            })
        })
        .map_err(|e| match csv_err.take() {
            Some(c) => LedgerError::Csv(c),
            None => io_err(e),
        })?;

        tracing::info!(
            path = %self.path.display(),
            %date,
            new_column,
            present = recognized.len(),
            rows = table.names().len(),
            "attendance recorded"
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn ledger_in(dir: &tempfile::TempDir) -> AttendanceLedger {
        AttendanceLedger::new(dir.path().join("attendance.csv"))
    }

    #[test]
    fn test_first_record_on_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger
            .record(&set(&["Alice", "Bob"]), &set(&["Alice"]), day("2024-01-01"))
            .unwrap();

        let csv = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(csv, "Name,2024-01-01\nAlice,1\nBob,0\n");
    }

    #[test]
    fn test_record_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        let known = set(&["Alice", "Bob"]);
        let seen = set(&["Bob"]);

        ledger.record(&known, &seen, day("2024-01-01")).unwrap();
        let once = std::fs::read(ledger.path()).unwrap();
        ledger.record(&known, &seen, day("2024-01-01")).unwrap();
        assert_eq!(std::fs::read(ledger.path()).unwrap(), once);
    }

    #[test]
    fn test_second_date_adds_one_column() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        let known = set(&["Alice", "Bob"]);

        ledger.record(&known, &set(&["Alice"]), day("2024-01-01")).unwrap();
        let table = ledger.record(&known, &set(&["Bob"]), day("2024-01-02")).unwrap();

        assert_eq!(table.dates().count(), 2);
        assert!(table.is_present("Alice", day("2024-01-01")));
        assert!(!table.is_present("Bob", day("2024-01-01")));
        assert!(!table.is_present("Alice", day("2024-01-02")));
        assert!(table.is_present("Bob", day("2024-01-02")));

        let csv = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(csv, "Name,2024-01-01,2024-01-02\nAlice,1,0\nBob,0,1\n");
    }

    #[test]
    fn test_new_identity_gets_zero_for_past_days() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.record(&set(&["Alice"]), &set(&["Alice"]), day("2024-01-01")).unwrap();
        ledger
            .record(&set(&["Alice", "Carol"]), &set(&["Carol"]), day("2024-01-02"))
            .unwrap();

        let csv = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(csv, "Name,2024-01-01,2024-01-02\nAlice,1,0\nCarol,0,1\n");
    }

    #[test]
    fn test_removed_identity_keeps_row_marked_absent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.record(&set(&["Alice", "Bob"]), &set(&["Bob"]), day("2024-01-01")).unwrap();
        let table = ledger.record(&set(&["Alice"]), &set(&["Alice"]), day("2024-01-02")).unwrap();

        assert_eq!(table.names(), ["Alice", "Bob"]);
        assert!(!table.is_present("Bob", day("2024-01-02")));
        assert_eq!(table.days_present("Bob"), 1);
    }

    #[test]
    fn test_rerecording_a_day_overwrites_cells() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        let known = set(&["Alice", "Bob"]);
        ledger.record(&known, &set(&["Alice"]), day("2024-01-01")).unwrap();
        let table = ledger.record(&known, &set(&["Bob"]), day("2024-01-01")).unwrap();
        assert_eq!(table.dates().count(), 1);
        assert!(!table.is_present("Alice", day("2024-01-01")));
        assert!(table.is_present("Bob", day("2024-01-01")));
    }

    #[test]
    fn test_reads_spaced_header_and_float_cells() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        std::fs::write(ledger.path(), "Name, 2024-01-01\nAlice, 1.0\nBob, 0.0\n").unwrap();

        let table = ledger.load().unwrap();
        assert_eq!(table.names(), ["Alice", "Bob"]);
        assert!(table.is_present("Alice", day("2024-01-01")));
        assert!(!table.is_present("Bob", day("2024-01-01")));
    }

    #[test]
    fn test_non_date_column_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        std::fs::write(ledger.path(), "Name,yesterday\nAlice,1\n").unwrap();
        assert!(matches!(ledger.load(), Err(LedgerError::Corrupt { .. })));

        // A failed load must not clobber the file.
        assert!(ledger.record(&set(&["Alice"]), &set(&[]), day("2024-01-01")).is_err());
        assert_eq!(std::fs::read_to_string(ledger.path()).unwrap(), "Name,yesterday\nAlice,1\n");
    }

    #[test]
    fn test_missing_ledger_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = ledger_in(&dir).load().unwrap();
        assert!(table.names().is_empty());
        assert_eq!(table.dates().count(), 0);
    }

    #[test]
    fn test_merge_day_in_memory() {
        let mut table = AttendanceTable::new();
        table.merge_day(&set(&["Bob", "Alice"]), &set(&["Alice"]), day("2024-03-05"));
        // BTreeSet yields sorted names on first insert.
        assert_eq!(table.names(), ["Alice", "Bob"]);
        assert!(table.has_date(day("2024-03-05")));
    }
}
