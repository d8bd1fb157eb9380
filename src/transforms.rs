//! Resolution of the nine transform slots into antsApplyTransforms
//! arguments.
//!
//! Each slot may point at a standalone transform file, at a zip archive
//! holding transform files, or at nothing. A slot's extraction target names
//! a member of the most recently seen zip, which may have been given in an
//! earlier slot. Every resolved transform becomes a `-t` flag followed by
//! the path, or by `[path, 1]` when the transform is to be inverted.

use std::fs;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::{GearError, Result};

/// Flag token preceding every resolved transform.
pub const TRANSFORM_FLAG: &str = "-t";

/// Minimum and maximum number of resolved transforms. Limits imposed by
/// the gear, not by antsApplyTransforms.
pub const MIN_TRANSFORMS: usize = 2;
pub const MAX_TRANSFORMS: usize = 9;

/// One of the nine user-configurable transform slots.
#[derive(Debug, Clone, Default)]
pub struct TransformSlot {
    /// A standalone transform file or a zip archive.
    pub file: Option<PathBuf>,
    /// Member to extract from the most recently seen zip.
    pub target: Option<String>,
    /// Apply the inverse of this slot's transform.
    pub invert: bool,
}

/// The "most recently seen zip" state carried through slot processing.
#[derive(Debug, Clone)]
enum ZipState {
    NoZip,
    HaveZip(PathBuf),
}

fn is_zip(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "zip")
}

fn push_transform(args: &mut Vec<String>, path: &Path, invert: bool) {
    args.push(TRANSFORM_FLAG.to_string());
    if invert {
        args.push(format!("[{}, 1]", path.display()));
    } else {
        args.push(path.display().to_string());
    }
}

/// Extracts `target` from the zip into the zip's own directory and returns
/// the extracted path.
fn extract_member(zip_path: &Path, target: &str) -> Result<PathBuf> {
    let dir = zip_path.parent().unwrap_or_else(|| Path::new("."));
    let file = fs::File::open(zip_path)?;
    let mut archive = ZipArchive::new(file)?;
    let mut member = match archive.by_name(target) {
        Ok(m) => m,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(GearError::config(format!(
                "transform target `{target}` not found in `{}`",
                zip_path.display()
            )))
        }
        Err(e) => return Err(e.into()),
    };
    let dest = dir.join(target);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = fs::File::create(&dest)?;
    std::io::copy(&mut member, &mut out)?;
    log::debug!("extracted `{target}` from `{}`", zip_path.display());
    Ok(dest)
}

/// Resolves the transform slots, in order, into the flat argument list.
///
/// # Errors
///
/// [`GearError::Configuration`] when an inversion is requested for an
/// empty slot, when a target is named before any zip has been seen, or
/// when the resolved transform count falls outside
/// [`MIN_TRANSFORMS`]..=[`MAX_TRANSFORMS`].
pub fn resolve_transforms(slots: &[TransformSlot]) -> Result<Vec<String>> {
    let mut args: Vec<String> = Vec::new();
    let mut zip_state = ZipState::NoZip;

    for (idx, slot) in slots.iter().enumerate() {
        let slot_no = idx + 1;
        match &slot.file {
            None => {
                if slot.target.is_none() {
                    if slot.invert {
                        return Err(GearError::config(format!(
                            "slot {slot_no}: inversion requested but no transform file or target given"
                        )));
                    }
                    continue;
                }
            }
            Some(path) if is_zip(path) => {
                // The zip itself is not a transform; a target in this or a
                // later slot extracts usable files from it.
                zip_state = ZipState::HaveZip(path.clone());
            }
            Some(path) => {
                push_transform(&mut args, path, slot.invert);
            }
        }

        if let Some(target) = &slot.target {
            let zip_path = match &zip_state {
                ZipState::HaveZip(path) => path,
                ZipState::NoZip => {
                    return Err(GearError::config(format!(
                        "slot {slot_no}: transform target `{target}` given but no zip file to extract it from"
                    )))
                }
            };
            let extracted = extract_member(zip_path, target)?;
            push_transform(&mut args, &extracted, slot.invert);
        }
    }

    if args.len() % 2 != 0 {
        return Err(GearError::config(format!(
            "odd number of transform arguments generated: {args:?}"
        )));
    }
    let count = args.len() / 2;
    if count < MIN_TRANSFORMS {
        return Err(GearError::config(format!(
            "too few transforms provided ({count}), a minimum of {MIN_TRANSFORMS} is required"
        )));
    }
    if count > MAX_TRANSFORMS {
        return Err(GearError::config(format!(
            "too many transforms provided ({count}), a maximum of {MAX_TRANSFORMS} is allowed"
        )));
    }
    Ok(args)
}
