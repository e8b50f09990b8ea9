//! Header-less CSV rendering for attendance reports.

use crate::types::ExportRow;

/// Render one CSV line (no trailing newline). Fields containing a comma,
/// quote or line break are quoted and inner quotes doubled.
pub fn csv_line<S: AsRef<str>>(cells: &[S]) -> String {
    cells
        .iter()
        .map(|c| escape(c.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Render ledger rows, one line per row, in the order given.
pub fn render_rows(rows: &[ExportRow]) -> String {
    rows.iter()
        .map(|r| csv_line(&r.cells()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render raw sink rows (already flattened to strings).
pub fn render_raw(rows: &[Vec<String>]) -> String {
    rows.iter()
        .map(|r| csv_line(r.as_slice()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttendanceKind;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_plain_fields() {
        assert_eq!(csv_line(&["E1", "Ada", "CHECK_IN"]), "E1,Ada,CHECK_IN");
    }

    #[test]
    fn test_quotes_special_fields() {
        assert_eq!(
            csv_line(&["E1", "Lovelace, Ada", "say \"hi\""]),
            "E1,\"Lovelace, Ada\",\"say \"\"hi\"\"\""
        );
    }

    #[test]
    fn test_render_rows_in_order() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 8, 30, 0).unwrap();
        let rows = vec![
            ExportRow {
                employee_id: "E1".into(),
                name: "Ada".into(),
                kind: AttendanceKind::CheckIn,
                timestamp: ts,
            },
            ExportRow {
                employee_id: "E2".into(),
                name: String::new(),
                kind: AttendanceKind::CheckOut,
                timestamp: ts,
            },
        ];
        assert_eq!(
            render_rows(&rows),
            "E1,Ada,CHECK_IN,2026-03-02T08:30:00.000Z\nE2,,CHECK_OUT,2026-03-02T08:30:00.000Z"
        );
    }

    #[test]
    fn test_render_raw_handles_ragged_rows() {
        let rows = vec![vec!["a".to_string()], vec!["b".to_string(), "c".to_string()]];
        assert_eq!(render_raw(&rows), "a\nb,c");
    }
}
