use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::utils::DynError;

// One data row of a per-stream timing file. Column 1 is the frame's local
// index within the companion image cube, column 5 its acquisition end time in
// seconds since the Unix epoch. Columns 2-4 are opaque but must be numeric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingRow {
    pub local_index: i64,
    pub end_time: f64,
}

// Parse a single timing-file line. Comment ('#') and blank lines, rows with
// fewer than five columns, and rows with non-numeric fields all yield None.
pub fn parse_timing_line(line: &str) -> Option<TimingRow> {
    let body = line.splitn(2, '#').next().unwrap_or("").trim();
    if body.is_empty() {
        return None;
    }
    let columns: Vec<&str> = body.split_whitespace().collect();
    if columns.len() < 5 {
        return None;
    }
    let local_index = columns[0].parse::<i64>().ok()?;
    for column in &columns[1..4] {
        column.parse::<f64>().ok()?;
    }
    let end_time = columns[4].parse::<f64>().ok()?;
    if local_index < 0 || !end_time.is_finite() {
        return None;
    }
    Some(TimingRow {
        local_index,
        end_time,
    })
}

pub fn read_timing_file(path: &Path) -> Result<Vec<TimingRow>, DynError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if let Some(row) = parse_timing_line(&line) {
            rows.push(row);
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_index_and_end_time_only() {
        let row = parse_timing_line("3 1.5 2.5 3.5 1707739800.125").unwrap();
        assert_eq!(row.local_index, 3);
        assert!((row.end_time - 1_707_739_800.125).abs() < 1e-9);
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        assert_eq!(parse_timing_line("# header"), None);
        assert_eq!(parse_timing_line("   "), None);
        assert!(parse_timing_line("0 0 0 0 10.0 # trailing note").is_some());
    }

    #[test]
    fn rejects_short_and_non_numeric_rows() {
        assert_eq!(parse_timing_line("0 1 2 3"), None);
        assert_eq!(parse_timing_line("0 1 x 3 10.0"), None);
        assert_eq!(parse_timing_line("x 1 2 3 10.0"), None);
        assert_eq!(parse_timing_line("-1 1 2 3 10.0"), None);
    }
}
