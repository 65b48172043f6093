use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::cube::{self, CubeReader, CubeWriter};
use crate::manifest::{self, FrameRecord};
use crate::utils::DynError;

// Guard against a frame whose end lands exactly on a plane boundary leaking
// a zero-width contribution into the next plane.
const PLANE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct ApplyConfig {
    pub manifest_path: PathBuf,
    pub teldir: Option<PathBuf>,
}

// One output plane still accumulating contributions.
#[derive(Debug, Clone)]
pub struct ActivePlane {
    pub data: Vec<f32>,
    pub weight_sum: f64,
    pub contributions: usize,
}

// The set of output planes that may still receive contributions. Keyed by
// plane index with ordered iteration, so the flush pass walks planes in
// ascending order. Because manifest records arrive in non-decreasing
// resampled start, membership stays bounded by the span of a single frame.
pub struct ActiveSet {
    planes: BTreeMap<i64, ActivePlane>,
    pixels: usize,
}

impl ActiveSet {
    pub fn new(pixels: usize) -> Self {
        Self {
            planes: BTreeMap::new(),
            pixels,
        }
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn accumulate(&mut self, plane_index: i64, weight: f64, plane: &[f32]) {
        let pixels = self.pixels;
        let entry = self.planes.entry(plane_index).or_insert_with(|| ActivePlane {
            data: vec![0.0; pixels],
            weight_sum: 0.0,
            contributions: 0,
        });
        let w = weight as f32;
        for (acc, &value) in entry.data.iter_mut().zip(plane) {
            *acc += w * value;
        }
        entry.weight_sum += weight;
        entry.contributions += 1;
    }

    // Remove and return every plane below the threshold, ascending. Once the
    // current record starts at or past a plane's upper boundary, no later
    // record can touch it.
    pub fn drain_below(&mut self, threshold: i64) -> Vec<(i64, ActivePlane)> {
        let keep = self.planes.split_off(&threshold);
        let done = std::mem::replace(&mut self.planes, keep);
        done.into_iter().collect()
    }

    pub fn drain_all(&mut self) -> Vec<(i64, ActivePlane)> {
        std::mem::take(&mut self.planes).into_iter().collect()
    }
}

// First and last output plane indices a record overlaps.
pub fn plane_span(resampled_start: f64, resampled_end: f64) -> (i64, i64) {
    let first = resampled_start.floor() as i64;
    let last = (resampled_end - PLANE_EPSILON).floor() as i64;
    (first, last)
}

// Length of the intersection of [rs, re) with plane k, in resampled units.
pub fn overlap_weight(resampled_start: f64, resampled_end: f64, plane_index: i64) -> f64 {
    resampled_end.min((plane_index + 1) as f64) - resampled_start.max(plane_index as f64)
}

// Number of output planes: the highest plane any record touches, plus one.
pub fn output_plane_count(records: &[FrameRecord]) -> Option<usize> {
    let max_end = records
        .iter()
        .map(|r| r.resampled_end)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max_end.is_finite() {
        return None;
    }
    let last = (max_end - PLANE_EPSILON).floor() as i64;
    if last < 0 {
        return None;
    }
    Some(last as usize + 1)
}

// Distribute one input plane across the output planes it overlaps, flushing
// every plane that can no longer receive contributions first. Negative plane
// indices (a frame straddling tstart) contribute nothing below plane 0.
pub fn distribute_record(
    active: &mut ActiveSet,
    record: &FrameRecord,
    plane: &[f32],
    sink: &mut dyn FnMut(i64, ActivePlane) -> Result<(), DynError>,
) -> Result<(), DynError> {
    let (first, last) = plane_span(record.resampled_start, record.resampled_end);
    let first = first.max(0);
    for (index, done) in active.drain_below(first) {
        sink(index, done)?;
    }
    for index in first..=last {
        let weight = overlap_weight(record.resampled_start, record.resampled_end, index);
        if weight > 0.0 {
            active.accumulate(index, weight, plane);
        }
    }
    Ok(())
}

// Output cube path: <stem>.resample.txt becomes <stem>.fits.
fn derive_output_path(manifest_path: &Path) -> PathBuf {
    let name = manifest_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cube_name = match name.strip_suffix(".resample.txt") {
        Some(stem) => format!("{stem}.fits"),
        None => format!("{name}.fits"),
    };
    manifest_path.with_file_name(cube_name)
}

// Companion log path next to the output cube.
fn derive_log_path(manifest_path: &Path) -> PathBuf {
    let name = manifest_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let log_name = match name.strip_suffix(".resample.txt") {
        Some(stem) => format!("{stem}.resample.log"),
        None => format!("{name}.log"),
    };
    manifest_path.with_file_name(log_name)
}

// Pass 1 geometry probe: open input cubes in manifest order until one opens.
// Later open failures are per-record warnings; failing to open any cube at
// all leaves nothing to size the output against.
fn probe_dims(records: &[FrameRecord], teldir: &Path) -> Result<(usize, usize), DynError> {
    let mut last_source: Option<&str> = None;
    for record in records {
        if last_source == Some(record.source.as_str()) {
            continue;
        }
        last_source = Some(record.source.as_str());
        let path = cube::resolve_cube_path(teldir, &record.source, record.frame_start)?;
        match CubeReader::open(&path) {
            Ok(reader) => return Ok(reader.dims()),
            Err(err) => eprintln!("[warn] {err}"),
        }
    }
    Err("no input image cube could be opened to determine frame geometry".into())
}

pub fn run(config: &ApplyConfig) -> Result<(), DynError> {
    let records = manifest::read_manifest(&config.manifest_path)?;
    if records.is_empty() {
        return Err(format!(
            "no usable records in {}",
            config.manifest_path.display()
        )
        .into());
    }

    let teldir = match &config.teldir {
        Some(dir) => dir.clone(),
        None => config
            .manifest_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    // Pass 1: output depth and input geometry.
    let planes_out = output_plane_count(&records)
        .ok_or("manifest covers no output planes")?;
    let (width, height) = probe_dims(&records, &teldir)?;
    println!("Output dimensions: {width} x {height} x {planes_out} (frames)");

    let output_path = derive_output_path(&config.manifest_path);
    let log_path = derive_log_path(&config.manifest_path);
    let mut writer = CubeWriter::create(&output_path, width, height, planes_out)?;
    let log_file = File::create(&log_path)
        .map_err(|e| format!("failed to create log {}: {e}", log_path.display()))?;
    let mut log = BufWriter::new(log_file);
    writeln!(log, "# flushed planes for {}", output_path.display())?;
    writeln!(log, "# columns: plane contributions weight_sum")?;

    // Pass 2: stream records, keeping at most one input cube open.
    let pixels = width * height;
    let mut active = ActiveSet::new(pixels);
    let mut current_source: Option<&str> = None;
    let mut input: Option<CubeReader> = None;
    let mut skipped = 0usize;

    for record in &records {
        if current_source != Some(record.source.as_str()) {
            input = None;
            current_source = Some(record.source.as_str());
            let path = cube::resolve_cube_path(&teldir, &record.source, record.frame_start)?;
            match CubeReader::open(&path) {
                Ok(reader) => {
                    if reader.dims() != (width, height) {
                        let (w, h) = reader.dims();
                        eprintln!(
                            "[warn] {} is {w} x {h}, expected {width} x {height}; skipping its frames",
                            reader.path().display()
                        );
                    } else {
                        input = Some(reader);
                    }
                }
                Err(err) => {
                    eprintln!("[warn] {err}; skipping frames from {}", record.source);
                }
            }
        }
        let Some(reader) = input.as_mut() else {
            skipped += 1;
            continue;
        };

        let plane = match reader.read_plane(record.local_index as usize) {
            Ok(plane) => plane,
            Err(err) => {
                eprintln!("[warn] {err}; skipping record {}", record.global_index);
                skipped += 1;
                continue;
            }
        };

        distribute_record(&mut active, record, &plane, &mut |index, done| {
            flush_plane(&mut writer, &mut log, index, done)
        })?;
    }

    for (index, done) in active.drain_all() {
        flush_plane(&mut writer, &mut log, index, done)?;
    }
    log.flush()?;

    if skipped > 0 {
        eprintln!("[warn] Skipped {skipped} of {} manifest records.", records.len());
    }
    println!(
        "[info] Wrote output cube -> {} (log -> {})",
        writer.path().display(),
        log_path.display()
    );
    Ok(())
}

fn flush_plane(
    writer: &mut CubeWriter,
    log: &mut BufWriter<File>,
    index: i64,
    done: ActivePlane,
) -> Result<(), DynError> {
    writer.write_plane(index as usize, &done.data)?;
    writeln!(log, "{index} {} {:.6}", done.contributions, done.weight_sum)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(g: i64, rs: f64, re: f64) -> FrameRecord {
        FrameRecord {
            global_index: g,
            frame_start: rs,
            frame_end: re,
            source: "cam1_00:00:00.000000000.txt".to_string(),
            local_index: g,
            resampled_start: rs,
            resampled_end: re,
        }
    }

    // Run records through the distribution loop against an in-memory store,
    // returning the flushed planes in flush order.
    fn assemble(
        records: &[FrameRecord],
        frames: &[Vec<f32>],
        pixels: usize,
        max_active: &mut usize,
    ) -> Vec<(i64, ActivePlane)> {
        let mut active = ActiveSet::new(pixels);
        let mut flushed = Vec::new();
        for (record, frame) in records.iter().zip(frames) {
            distribute_record(&mut active, record, frame, &mut |index, done| {
                flushed.push((index, done));
                Ok(())
            })
            .unwrap();
            *max_active = (*max_active).max(active.len());
        }
        for done in active.drain_all() {
            flushed.push(done);
        }
        flushed
    }

    #[test]
    fn epsilon_keeps_boundary_frames_out_of_the_next_plane() {
        assert_eq!(plane_span(1.0, 2.0), (1, 1));
        assert_eq!(plane_span(1.5, 2.5), (1, 2));
        assert_eq!(plane_span(0.0, 0.1), (0, 0));
    }

    #[test]
    fn overlap_weight_is_the_interval_intersection() {
        assert!((overlap_weight(1.0, 2.0, 1) - 1.0).abs() < 1e-12);
        assert!((overlap_weight(1.5, 2.5, 1) - 0.5).abs() < 1e-12);
        assert!((overlap_weight(1.5, 2.5, 2) - 0.5).abs() < 1e-12);
        assert!(overlap_weight(1.0, 2.0, 3) <= 0.0);
    }

    #[test]
    fn aligned_frames_pass_through_verbatim() {
        // dt-aligned frames of exactly one plane each: weight 1.0, identity.
        let records: Vec<FrameRecord> =
            (0..4).map(|k| record(k, k as f64, (k + 1) as f64)).collect();
        let frames: Vec<Vec<f32>> = (0..4).map(|k| vec![k as f32 + 1.0; 2]).collect();
        let mut max_active = 0;
        let flushed = assemble(&records, &frames, 2, &mut max_active);

        assert_eq!(flushed.len(), 4);
        for (index, plane) in &flushed {
            assert_eq!(plane.contributions, 1);
            assert!((plane.weight_sum - 1.0).abs() < 1e-9);
            assert!((plane.data[0] - (*index as f32 + 1.0)).abs() < 1e-6);
        }
        // Indices flush in ascending order.
        let indices: Vec<i64> = flushed.iter().map(|(k, _)| *k).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(max_active <= 2);
    }

    #[test]
    fn half_offset_frames_split_evenly_between_neighbours() {
        // Frames offset by half a plane: 0.5 into each neighbour, so plane k
        // holds 0.5 * (frame_k + frame_{k+1}).
        let records: Vec<FrameRecord> = (0..3)
            .map(|k| record(k, k as f64 + 0.5, k as f64 + 1.5))
            .collect();
        let frames: Vec<Vec<f32>> = (0..3).map(|k| vec![(k + 1) as f32 * 10.0; 1]).collect();
        let mut max_active = 0;
        let flushed = assemble(&records, &frames, 1, &mut max_active);

        let by_index: std::collections::HashMap<i64, ActivePlane> =
            flushed.into_iter().collect();
        // Plane 1 is fully covered: half of frame 0 and half of frame 1.
        let plane1 = &by_index[&1];
        assert!((plane1.weight_sum - 1.0).abs() < 1e-9);
        assert!((plane1.data[0] - 0.5 * (10.0 + 20.0)).abs() < 1e-5);
        // Edge planes straddle the window and carry half weight.
        assert!((by_index[&0].weight_sum - 0.5).abs() < 1e-9);
        assert!((by_index[&3].weight_sum - 0.5).abs() < 1e-9);
    }

    #[test]
    fn coarse_downsample_sums_ten_frames_per_plane() {
        // Frames a tenth of a plane wide: ten per output plane, each with
        // weight 0.1; no normalization, so covered planes sum to 1.0.
        let records: Vec<FrameRecord> = (0..20)
            .map(|i| record(i, i as f64 * 0.1, (i + 1) as f64 * 0.1))
            .collect();
        let frames: Vec<Vec<f32>> = (0..20).map(|_| vec![7.0; 1]).collect();
        let mut max_active = 0;
        let flushed = assemble(&records, &frames, 1, &mut max_active);

        assert_eq!(flushed.len(), 2);
        for (_, plane) in &flushed {
            assert_eq!(plane.contributions, 10);
            assert!((plane.weight_sum - 1.0).abs() < 1e-9);
            assert!((plane.data[0] - 7.0).abs() < 1e-4);
        }
        assert!(max_active <= 2);
    }

    #[test]
    fn leading_partial_frame_contributes_only_from_plane_zero() {
        // A frame straddling tstart has a negative resampled start; only its
        // in-window part lands in plane 0.
        let records = vec![record(0, -0.5, 0.5), record(1, 0.5, 1.5)];
        let frames = vec![vec![4.0; 1], vec![8.0; 1]];
        let mut max_active = 0;
        let flushed = assemble(&records, &frames, 1, &mut max_active);

        let by_index: std::collections::HashMap<i64, ActivePlane> =
            flushed.into_iter().collect();
        assert!(!by_index.contains_key(&-1));
        assert!((by_index[&0].weight_sum - 1.0).abs() < 1e-9);
        assert!((by_index[&0].data[0] - (0.5 * 4.0 + 0.5 * 8.0)).abs() < 1e-5);
    }

    #[test]
    fn flush_gate_bounds_the_active_set() {
        // dt such that each frame spans two planes; the active set must stay
        // within the single-frame span bound.
        let records: Vec<FrameRecord> = (0..50)
            .map(|i| record(i, i as f64 * 2.0, (i + 1) as f64 * 2.0))
            .collect();
        let frames: Vec<Vec<f32>> = (0..50).map(|_| vec![1.0; 1]).collect();
        let mut max_active = 0;
        let flushed = assemble(&records, &frames, 1, &mut max_active);
        assert_eq!(flushed.len(), 100);
        assert!(max_active <= 3, "active set grew to {max_active}");
        let indices: Vec<i64> = flushed.iter().map(|(k, _)| *k).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);
    }

    #[test]
    fn output_plane_count_uses_the_epsilon_guard() {
        let records = vec![record(0, 0.0, 3.0)];
        assert_eq!(output_plane_count(&records), Some(3));
        let records = vec![record(0, 0.0, 3.0000001)];
        assert_eq!(output_plane_count(&records), Some(4));
        assert_eq!(output_plane_count(&[]), None);
    }

    #[test]
    fn output_paths_derive_from_the_manifest_name() {
        assert_eq!(
            derive_output_path(Path::new("/data/cam1.resample.txt")),
            PathBuf::from("/data/cam1.fits")
        );
        assert_eq!(
            derive_output_path(Path::new("manifest.txt")),
            PathBuf::from("manifest.txt.fits")
        );
        assert_eq!(
            derive_log_path(Path::new("/data/cam1.resample.txt")),
            PathBuf::from("/data/cam1.resample.log")
        );
    }
}
