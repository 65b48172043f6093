use std::fs;
use std::path::{Path, PathBuf};

use crate::manifest::{self, FrameRecord};
use crate::timing;
use crate::tparse;
use crate::utils::DynError;

#[derive(Debug, Clone)]
pub struct ScanQuery {
    pub teldir: PathBuf,
    pub stream: String,
    pub tstart: f64,
    pub tend: f64,
    pub dt: f64,
}

// A timing file found on disk, with the absolute timestamp carried in its
// name. The timestamp marks the beginning of the capture sequence.
#[derive(Debug, Clone)]
pub struct TimingFileEntry {
    pub path: PathBuf,
    pub file_time: f64,
}

// Time-of-day carried after the last '_' of a timing-file name, e.g.
// "cam1_12:09:59.900000000.txt". Returns None for names that do not follow
// the convention.
fn filename_time_of_day(name: &str) -> Option<f64> {
    let stem = name.strip_suffix(".txt")?;
    let (_, clock) = stem.rsplit_once('_')?;
    tparse::parse_time_of_day(clock).ok()
}

// List every candidate timing file for the query window. One extra day is
// scanned below tstart: a file named just before midnight can carry frames
// whose inferred start times reach into the next UTC day. Missing day or
// stream directories are not errors.
pub fn discover_timing_files(
    teldir: &Path,
    stream: &str,
    tstart: f64,
    tend: f64,
) -> Result<Vec<TimingFileEntry>, DynError> {
    let mut entries = Vec::new();
    let mut day = tparse::floor_day(tstart - tparse::SECONDS_PER_DAY);
    while day <= tend {
        let tag = tparse::day_tag(day)?;
        let dir = teldir.join(&tag).join(stream);
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(_) => {
                day += tparse::SECONDS_PER_DAY;
                continue;
            }
        };
        for entry in listing {
            let Ok(entry) = entry else { continue };
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(stream) || !name.ends_with(".txt") {
                continue;
            }
            let Some(time_of_day) = filename_time_of_day(&name) else {
                continue;
            };
            entries.push(TimingFileEntry {
                path: dir.join(&name),
                file_time: day + time_of_day,
            });
        }
        day += tparse::SECONDS_PER_DAY;
    }
    // Secondary key keeps reruns byte-identical even for equal timestamps.
    entries.sort_by(|a, b| {
        a.file_time
            .total_cmp(&b.file_time)
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(entries)
}

// Reduce the sorted candidate list to the files worth reading: everything
// from the pivot (latest file at or before tstart) through tend, plus the
// file before the pivot. The pivot file's first usable frame start is the
// end time of the previous file's last frame.
pub fn select_window(mut entries: Vec<TimingFileEntry>, tstart: f64, tend: f64) -> Vec<TimingFileEntry> {
    entries.retain(|e| e.file_time <= tend);
    let first = match entries.iter().rposition(|e| e.file_time <= tstart) {
        Some(pivot) if pivot > 0 => pivot - 1,
        Some(pivot) => pivot,
        None => 0,
    };
    entries.split_off(first)
}

// Walk the selected files in order, inferring each frame's start time from
// the end time of the frame before it. The rolling end carries across file
// boundaries; it resets only when a file cannot be opened at all, so the
// first row after an unreadable file is (like the very first row of the
// stream) never emitted.
pub fn build_manifest(
    files: &[TimingFileEntry],
    tstart: f64,
    tend: f64,
    dt: f64,
) -> Vec<FrameRecord> {
    let mut records = Vec::new();
    let mut prev_end: Option<f64> = None;
    for entry in files {
        let rows = match timing::read_timing_file(&entry.path) {
            Ok(rows) => rows,
            Err(err) => {
                eprintln!(
                    "[warn] Skipping unreadable timing file {}: {err}",
                    entry.path.display()
                );
                prev_end = None;
                continue;
            }
        };
        let source = entry
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for row in rows {
            let frame_end = row.end_time;
            if let Some(frame_start) = prev_end {
                if frame_start < frame_end && frame_start < tend && frame_end > tstart {
                    records.push(FrameRecord {
                        global_index: records.len() as i64,
                        frame_start,
                        frame_end,
                        source: source.clone(),
                        local_index: row.local_index,
                        resampled_start: (frame_start - tstart) / dt,
                        resampled_end: (frame_end - tstart) / dt,
                    });
                }
            }
            prev_end = Some(frame_end);
        }
    }
    records
}

pub fn run(query: &ScanQuery) -> Result<(), DynError> {
    println!("Time scan:");
    println!(
        "  Start: {:.4} ({})",
        query.tstart,
        tparse::format_ut(query.tstart)?
    );
    println!(
        "  End:   {:.4} ({})",
        query.tend,
        tparse::format_ut(query.tend)?
    );
    println!("  Duration: {:.4} s", query.tend - query.tstart);

    let discovered =
        discover_timing_files(&query.teldir, &query.stream, query.tstart, query.tend)?;
    let files = select_window(discovered, query.tstart, query.tend);
    for entry in &files {
        let shown = fs::canonicalize(&entry.path).unwrap_or_else(|_| entry.path.clone());
        println!("{}", shown.display());
    }
    if files.is_empty() {
        eprintln!(
            "[warn] No timing files found for stream '{}' in the requested window.",
            query.stream
        );
    }

    let records = build_manifest(&files, query.tstart, query.tend, query.dt);
    if records.is_empty() {
        eprintln!("[warn] No frames overlap the requested window.");
    }

    let manifest_path = PathBuf::from(format!("{}.resample.txt", query.stream));
    let header = vec![
        format!("resampling manifest for stream {}", query.stream),
        format!(
            "tstart={:.6} tend={:.6} dt={:.6}",
            query.tstart, query.tend, query.dt
        ),
        "columns: global_index frame_start frame_end source_file local_index resampled_start resampled_end".to_string(),
    ];
    manifest::write_manifest(&manifest_path, &header, &records)?;
    println!(
        "[info] Wrote {} manifest records -> {}",
        records.len(),
        manifest_path.display()
    );
    Ok(())
}
