use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::utils::DynError;

// One frame of the resampling manifest. Times are seconds since the Unix
// epoch; resampled coordinates are (t - tstart) / dt, so integer values land
// on output plane boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub global_index: i64,
    pub frame_start: f64,
    pub frame_end: f64,
    pub source: String,
    pub local_index: i64,
    pub resampled_start: f64,
    pub resampled_end: f64,
}

pub fn write_manifest(
    path: &Path,
    header: &[String],
    records: &[FrameRecord],
) -> Result<(), DynError> {
    let file = File::create(path)
        .map_err(|e| format!("failed to create manifest {}: {e}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for line in header {
        writeln!(writer, "# {line}")?;
    }
    for record in records {
        writeln!(
            writer,
            "{} {:.6} {:.6} {} {} {:.6} {:.6}",
            record.global_index,
            record.frame_start,
            record.frame_end,
            record.source,
            record.local_index,
            record.resampled_start,
            record.resampled_end
        )?;
    }
    writer.flush()?;
    Ok(())
}

fn parse_manifest_line(line: &str) -> Option<FrameRecord> {
    let body = line.trim();
    if body.is_empty() || body.starts_with('#') {
        return None;
    }
    let columns: Vec<&str> = body.split_whitespace().collect();
    if columns.len() < 7 {
        return None;
    }
    let global_index = columns[0].parse::<i64>().ok()?;
    let frame_start = columns[1].parse::<f64>().ok()?;
    let frame_end = columns[2].parse::<f64>().ok()?;
    let source = columns[3].to_string();
    let local_index = columns[4].parse::<i64>().ok()?;
    let resampled_start = columns[5].parse::<f64>().ok()?;
    let resampled_end = columns[6].parse::<f64>().ok()?;
    if local_index < 0 {
        return None;
    }
    Some(FrameRecord {
        global_index,
        frame_start,
        frame_end,
        source,
        local_index,
        resampled_start,
        resampled_end,
    })
}

// Read a manifest for assembly. Malformed rows are skipped; a resampled-start
// regression is fatal because the assembler's flush gate depends on records
// arriving in non-decreasing order.
pub fn read_manifest(path: &Path) -> Result<Vec<FrameRecord>, DynError> {
    let file = File::open(path)
        .map_err(|e| format!("failed to open manifest {}: {e}", path.display()))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut prev_start = f64::NEG_INFINITY;
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        let Some(record) = parse_manifest_line(&line) else {
            continue;
        };
        if record.resampled_start < prev_start {
            return Err(format!(
                "manifest {} is not time-ordered at line {}: resampled start {:.6} after {:.6}",
                path.display(),
                line_number + 1,
                record.resampled_start,
                prev_start
            )
            .into());
        }
        prev_start = record.resampled_start;
        records.push(record);
    }
    Ok(records)
}
