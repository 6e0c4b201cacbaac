//! Discovery and loading of an exposure stack directory.
//!
//! A stack directory holds the frames plus an `exposure.info` file with one
//! line per frame: `<file name> <denominator> ...`, exposure = 1/denominator.
//! Without `exposure.info`, every file is a frame and its exposure time comes
//! from EXIF. An optional `reference.info` names the frame to align to.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use exif::{In, Tag, Value};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{BracketError, Result};
use crate::frame::{ExposureStack, Image};

use super::image_io::load_image;

pub const EXPOSURE_INFO: &str = "exposure.info";
pub const REFERENCE_INFO: &str = "reference.info";

/// Extensions of camera raw formats, which are not decoded.
const RAW_EXTENSIONS: &[&str] = &["dng", "cr2", "nef", "arw", "raf", "orf", "rw2"];

/// One `exposure.info` line.
#[derive(Clone, Debug, PartialEq)]
pub struct ExposureEntry {
    pub file_name: String,
    /// Seconds.
    pub exposure: f32,
}

/// A loaded stack, sorted by ascending exposure time.
#[derive(Clone, Debug)]
pub struct LoadedStack {
    pub images: Vec<Image>,
    pub exposures: Vec<f32>,
    /// Index named by `reference.info`, after sorting.
    pub reference_index: Option<usize>,
    pub paths: Vec<PathBuf>,
}

/// Parse the contents of an `exposure.info` file.
///
/// Lines without a space are skipped. The second token is the shutter
/// denominator, so `img1.jpg 250` means 1/250 s.
pub fn parse_exposure_info(text: &str) -> Result<Vec<ExposureEntry>> {
    let mut entries = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let Some((file_name, rest)) = line.split_once(' ') else {
            continue;
        };
        let token = rest.split_whitespace().next().unwrap_or("");
        let denominator: f32 = token.parse().map_err(|_| {
            BracketError::InvalidStack(format!(
                "{EXPOSURE_INFO} line {}: bad exposure denominator {token:?}",
                line_no + 1
            ))
        })?;
        if !(denominator > 0.0 && denominator.is_finite()) {
            return Err(BracketError::InvalidStack(format!(
                "{EXPOSURE_INFO} line {}: denominator must be positive, got {denominator}",
                line_no + 1
            )));
        }
        entries.push(ExposureEntry {
            file_name: file_name.to_string(),
            exposure: 1.0 / denominator,
        });
    }
    Ok(entries)
}

/// Regular, non-hidden files of a directory, sorted by name.
pub fn list_stack_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !entry.file_type()?.is_file() {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

/// The file name stored in `reference.info`, if the file exists.
pub fn read_reference_name(dir: &Path) -> Result<Option<String>> {
    let path = dir.join(REFERENCE_INFO);
    if !path.is_file() {
        return Ok(None);
    }
    let name = fs::read_to_string(path)?.trim().to_string();
    Ok((!name.is_empty()).then_some(name))
}

fn is_raw(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| RAW_EXTENSIONS.iter().any(|r| e.eq_ignore_ascii_case(r)))
}

fn reject_raw(paths: &[PathBuf]) -> Result<()> {
    match paths.iter().find(|p| is_raw(p)) {
        Some(raw) => Err(BracketError::InvalidStack(format!(
            "camera raw files are not supported: {}",
            raw.display()
        ))),
        None => Ok(()),
    }
}

/// Parse an exposure time written as `a/b` or as decimal seconds.
pub fn parse_exposure_value(text: &str) -> Option<f32> {
    let text = text.trim();
    let seconds = match text.split_once('/') {
        Some((num, den)) => {
            let num: f32 = num.trim().parse().ok()?;
            let den: f32 = den.trim().parse().ok()?;
            num / den
        }
        None => text.parse().ok()?,
    };
    (seconds > 0.0 && seconds.is_finite()).then_some(seconds)
}

/// `ExposureTime` of the primary image, in seconds.
///
/// The tag is accepted from either the EXIF sub-IFD or IFD0.
pub fn read_exif_exposure(path: &Path) -> Result<f32> {
    let missing =
        || BracketError::InvalidStack(format!("{}: no exposure time in EXIF", path.display()));

    let mut reader = BufReader::new(File::open(path)?);
    let exif = exif::Reader::new()
        .read_from_container(&mut reader)
        .map_err(|e| {
            debug!(file = %path.display(), error = %e, "No readable EXIF");
            missing()
        })?;
    let field = exif
        .fields()
        .find(|f| f.tag.number() == Tag::ExposureTime.number() && f.ifd_num == In::PRIMARY)
        .ok_or_else(missing)?;

    let seconds = match &field.value {
        Value::Rational(v) if !v.is_empty() => Some(v[0].to_f64() as f32),
        _ => parse_exposure_value(&field.display_value().to_string()),
    };
    seconds.filter(|s| *s > 0.0 && s.is_finite()).ok_or_else(missing)
}

/// One entry per file of the directory except `reference.info`, with the
/// exposure time read from EXIF.
pub fn read_exif_exposures(dir: &Path) -> Result<Vec<ExposureEntry>> {
    let reference = dir.join(REFERENCE_INFO);
    let paths: Vec<PathBuf> = list_stack_files(dir)?
        .into_iter()
        .filter(|p| *p != reference)
        .collect();
    reject_raw(&paths)?;

    paths
        .iter()
        .map(|path| {
            let exposure = read_exif_exposure(path)?;
            let file_name = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            debug!(file = %file_name, exposure, "EXIF exposure");
            Ok(ExposureEntry {
                file_name,
                exposure,
            })
        })
        .collect()
}

/// Load every frame of the stack, sorted by exposure time.
///
/// Frames and exposure times come from `exposure.info` when present,
/// otherwise from the EXIF of every file in the directory.
pub fn load_stack(dir: &Path) -> Result<LoadedStack> {
    let info_path = dir.join(EXPOSURE_INFO);
    let entries = if info_path.is_file() {
        parse_exposure_info(&fs::read_to_string(&info_path)?)?
    } else {
        info!(dir = %dir.display(), "No {EXPOSURE_INFO}, reading exposure times from EXIF");
        read_exif_exposures(dir)?
    };
    if entries.is_empty() {
        return Err(BracketError::EmptySequence);
    }

    let paths: Vec<PathBuf> = entries.iter().map(|e| dir.join(&e.file_name)).collect();
    reject_raw(&paths)?;

    let unlisted = list_stack_files(dir)?
        .into_iter()
        .filter(|p| !paths.contains(p) && *p != info_path && *p != dir.join(REFERENCE_INFO))
        .count();
    if unlisted > 0 {
        debug!(unlisted, "Ignoring files not listed in {EXPOSURE_INFO}");
    }

    info!(frames = paths.len(), dir = %dir.display(), "Reading exposure stack");
    let images = paths
        .par_iter()
        .map(|p| load_image(p))
        .collect::<Result<Vec<Image>>>()?;

    // Sort paths alongside the images by the same key.
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by(|&a, &b| entries[a].exposure.total_cmp(&entries[b].exposure));
    let sorted_paths: Vec<PathBuf> = order.iter().map(|&i| paths[i].clone()).collect();

    let exposures = entries.iter().map(|e| e.exposure).collect();
    let stack = ExposureStack::new(images, exposures)?;

    let reference_index = match read_reference_name(dir)? {
        Some(name) => {
            let found = sorted_paths
                .iter()
                .position(|p| p.file_name().is_some_and(|f| f.to_string_lossy() == name));
            if found.is_none() {
                warn!(name = %name, "{REFERENCE_INFO} names a file that is not in the stack");
            }
            found
        }
        None => None,
    };
    debug!(reference = ?reference_index, "Reference frame");

    Ok(LoadedStack {
        images: stack.images,
        exposures: stack.exposures,
        reference_index,
        paths: sorted_paths,
    })
}
