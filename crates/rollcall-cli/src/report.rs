//! Plain-text rendering of the attendance sheet.

use rollcall_core::AttendanceTable;
use std::fmt::Write;

/// One line per identity with a 0/1 cell per date and a total.
///
/// Widths count characters, so non-ASCII names stay aligned.
pub fn render(table: &AttendanceTable) -> String {
    let dates: Vec<_> = table.dates().collect();
    let width = table
        .names()
        .iter()
        .map(|n| n.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);

    let mut out = format!("{:<width$}", "Name");
    for d in &dates {
        let _ = write!(out, "  {d}");
    }
    out.push_str("  total\n");

    for name in table.names() {
        let _ = write!(out, "{name:<width$}");
        for d in &dates {
            let mark = if table.is_present(name, *d) { "1" } else { "0" };
            let _ = write!(out, "  {mark:^10}");
        }
        let _ = writeln!(out, "  {:>5}", table.days_present(name));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_non_ascii_names_align() {
        let mut table = AttendanceTable::new();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        table.merge_day(&set(&["Zoë Müller", "Al"]), &set(&["Zoë Müller"]), day);

        let text = render(&table);
        let widths: Vec<usize> = text.lines().map(|l| l.chars().count()).collect();
        assert_eq!(widths.len(), 3);
        assert!(widths.iter().all(|w| *w == widths[0]), "misaligned: {text}");
    }

    #[test]
    fn test_totals_count_present_days() {
        let mut table = AttendanceTable::new();
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        table.merge_day(&set(&["Alice", "Bob"]), &set(&["Alice"]), d1);
        table.merge_day(&set(&["Alice", "Bob"]), &set(&["Alice", "Bob"]), d2);

        let text = render(&table);
        let alice = text.lines().find(|l| l.starts_with("Alice")).unwrap();
        let bob = text.lines().find(|l| l.starts_with("Bob")).unwrap();
        assert!(alice.trim_end().ends_with('2'));
        assert!(bob.trim_end().ends_with('1'));
        assert!(text.starts_with("Name   2024-01-01  2024-01-02  total"));
    }
}
