use std::path::{Path, PathBuf};

use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;

use crate::tparse;
use crate::utils::DynError;

// Read side of the image-cube store. The primary HDU must be a 2-D or 3-D
// image; planes are read as f32 regardless of the on-disk BITPIX.
pub struct CubeReader {
    path: PathBuf,
    fptr: FitsFile,
    hdu: FitsHdu,
    width: usize,
    height: usize,
    planes: usize,
}

impl CubeReader {
    pub fn open(path: &Path) -> Result<Self, DynError> {
        let mut fptr = FitsFile::open(path)
            .map_err(|e| format!("failed to open image cube {}: {e}", path.display()))?;
        let hdu = fptr
            .primary_hdu()
            .map_err(|e| format!("no primary HDU in {}: {e}", path.display()))?;
        let shape = match &hdu.info {
            HduInfo::ImageInfo { shape, .. } => shape.clone(),
            _ => return Err(format!("{}: primary HDU is not an image", path.display()).into()),
        };
        // Shape arrives slowest-axis first: [planes, height, width] for a
        // cube, [height, width] for a single plane.
        let (width, height, planes) = match shape.len() {
            2 => (shape[1], shape[0], 1),
            3 => (shape[2], shape[1], shape[0]),
            n => {
                return Err(
                    format!("{}: unsupported image dimensionality {n}", path.display()).into(),
                )
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            fptr,
            hdu,
            width,
            height,
            planes,
        })
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Read one W x H plane, 0-based along the slow axis.
    pub fn read_plane(&mut self, plane: usize) -> Result<Vec<f32>, DynError> {
        if plane >= self.planes {
            return Err(format!(
                "plane {plane} out of range ({} planes in {})",
                self.planes,
                self.path.display()
            )
            .into());
        }
        let pixels = self.width * self.height;
        let start = plane * pixels;
        let data: Vec<f32> = self
            .hdu
            .read_section(&mut self.fptr, start, start + pixels)
            .map_err(|e| format!("failed to read plane {plane} of {}: {e}", self.path.display()))?;
        if data.len() != pixels {
            return Err(format!(
                "short read on plane {plane} of {}: got {} of {pixels} pixels",
                self.path.display(),
                data.len()
            )
            .into());
        }
        Ok(data)
    }
}

// Write side of the store: a float32 W x H x K primary HDU, written one
// plane at a time. Creation replaces any existing file.
pub struct CubeWriter {
    path: PathBuf,
    fptr: FitsFile,
    hdu: FitsHdu,
    width: usize,
    height: usize,
    planes: usize,
}

impl CubeWriter {
    pub fn create(path: &Path, width: usize, height: usize, planes: usize) -> Result<Self, DynError> {
        let dimensions = [planes, height, width];
        let description = ImageDescription {
            data_type: ImageType::Float,
            dimensions: &dimensions,
        };
        let mut fptr = FitsFile::create(path)
            .with_custom_primary(&description)
            .overwrite()
            .open()
            .map_err(|e| format!("failed to create output cube {}: {e}", path.display()))?;
        let hdu = fptr
            .primary_hdu()
            .map_err(|e| format!("no primary HDU in new cube {}: {e}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            fptr,
            hdu,
            width,
            height,
            planes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_plane(&mut self, plane: usize, data: &[f32]) -> Result<(), DynError> {
        let pixels = self.width * self.height;
        if plane >= self.planes {
            return Err(format!(
                "plane {plane} out of range ({} planes in {})",
                self.planes,
                self.path.display()
            )
            .into());
        }
        if data.len() != pixels {
            return Err(format!(
                "plane {plane} has {} pixels, expected {pixels}",
                data.len()
            )
            .into());
        }
        let start = plane * pixels;
        self.hdu
            .write_section(&mut self.fptr, start, start + pixels, data)
            .map_err(|e| {
                format!("failed to write plane {plane} of {}: {e}", self.path.display())
            })?;
        Ok(())
    }
}

// Map a manifest source file to its companion image cube. The stream name is
// everything before the last '_'; the day directory comes from the frame
// start interpreted in UTC. The uncompressed candidate is returned even when
// nothing exists, so open errors name the conventional path. `src` is taken
// as-is from the manifest and never modified.
pub fn resolve_cube_path(teldir: &Path, src: &str, frame_start: f64) -> Result<PathBuf, DynError> {
    let stream = src.rsplit_once('_').map(|(head, _)| head).unwrap_or(src);
    let day = tparse::day_tag(frame_start)?;
    let cube_name = match src.strip_suffix(".txt") {
        Some(stem) => format!("{stem}.fits"),
        None => format!("{src}.fits"),
    };
    let candidate = teldir.join(day).join(stream).join(cube_name);
    if candidate.exists() {
        return Ok(candidate);
    }
    let compressed = PathBuf::from(format!("{}.gz", candidate.display()));
    if compressed.exists() {
        return Ok(compressed);
    }
    Ok(candidate)
}
