//! Slicewise LC contrast extraction.
//!
//! Per slice:   `roiMax(z) = max(image within ROI on slice z)`
//! Per scan:    `refMean   = mean(image within reference mask)` (NaN if no
//!              reference mask is given)
//! Ratio:       `ratio(z)  = (roiMax(z) - refMean) / refMean` (NaN if
//!              refMean is NaN or zero)
//!
//! Outputs one CSV row per (hemisphere, slice) plus a flat JSON summary.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use ndarray::{Array3, Axis};
use nalgebra::Matrix4;
use serde::Serialize;

use crate::error::Result;
use crate::volume::{assert_compatible, world_x, Volume};

/// Reference means closer to zero than this are treated as zero and
/// produce NaN ratios instead of blowing up the division.
const REF_ZERO_ATOL: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    Left,
    Right,
    Bilat,
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hemisphere::Left => write!(f, "left"),
            Hemisphere::Right => write!(f, "right"),
            Hemisphere::Bilat => write!(f, "bilat"),
        }
    }
}

/// One slicewise measurement. The reference column is the scan-wide
/// reference mean, repeated on every row of the scan.
#[derive(Debug, Clone, Serialize)]
pub struct SliceRow {
    pub hemisphere: Hemisphere,
    #[serde(rename = "sliceIndex")]
    pub slice_index: usize,
    #[serde(rename = "roiMax")]
    pub roi_max: f64,
    #[serde(rename = "refMean")]
    pub ref_mean: f64,
    pub ratio: f64,
}

/// Per-hemisphere aggregate over the finite ratios.
#[derive(Debug, Clone)]
pub struct RegionSummary {
    pub label: Hemisphere,
    pub mean_ratio: f64,
    pub std_ratio: f64,
    pub n_slices: usize,
}

/// Scan-level result returned by [`run_scan`].
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub ref_mean: f64,
    pub regions: Vec<RegionSummary>,
}

impl ScanSummary {
    /// Flat key/value view, in output order. NaN becomes JSON null.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("refMean".into(), json_f64(self.ref_mean));
        for region in &self.regions {
            map.insert(format!("{}_meanRatio", region.label), json_f64(region.mean_ratio));
            map.insert(format!("{}_stdRatio", region.label), json_f64(region.std_ratio));
            map.insert(format!("{}_nSlices", region.label), region.n_slices.into());
        }
        serde_json::Value::Object(map)
    }
}

fn json_f64(v: f64) -> serde_json::Value {
    serde_json::Number::from_f64(v)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// Splits a bilateral mask into (left, right) by the sign of each positive
/// voxel's world-space X coordinate: left is X < 0, right is X > 0. Voxels
/// sitting exactly on X == 0 belong to neither side and are dropped.
///
/// If either side comes out empty (unilateral ROI, odd origin), falls back
/// to a midpoint split along the first array axis, in index space. The
/// fallback trades anatomical correctness for robustness: both halves are
/// emitted regardless of where the mask actually sits.
pub fn split_hemispheres(
    mask: &Array3<f64>,
    affine: &Matrix4<f64>,
) -> (Array3<f64>, Array3<f64>) {
    let mut left = Array3::zeros(mask.raw_dim());
    let mut right = Array3::zeros(mask.raw_dim());
    let mut n_left = 0usize;
    let mut n_right = 0usize;
    let mut n_positive = 0usize;

    for ((i, j, k), &v) in mask.indexed_iter() {
        if v <= 0.0 {
            continue;
        }
        n_positive += 1;
        let x = world_x(affine, [i, j, k]);
        if x < 0.0 {
            left[[i, j, k]] = v;
            n_left += 1;
        } else if x > 0.0 {
            right[[i, j, k]] = v;
            n_right += 1;
        }
    }

    if n_positive == 0 {
        return (left, right);
    }

    if n_left == 0 || n_right == 0 {
        log::warn!("world-X hemisphere split left one side empty, falling back to midpoint split");
        let mid = mask.shape()[0] / 2;
        left.fill(0.0);
        right.fill(0.0);
        for ((i, j, k), &v) in mask.indexed_iter() {
            if i < mid {
                left[[i, j, k]] = v;
            } else {
                right[[i, j, k]] = v;
            }
        }
    }

    (left, right)
}

/// Scan-wide mean of the volume inside the reference mask; NaN when the
/// mask has no positive voxels.
pub fn reference_mean(volume: &Array3<f64>, ref_mask: &Array3<f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (&v, &m) in volume.iter().zip(ref_mask.iter()) {
        if m > 0.0 {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// ROI maximum per slice along the third axis. Slices where the mask has
/// no positive voxel are omitted entirely, not emitted with a sentinel.
pub fn slice_roi_max(volume: &Array3<f64>, mask: &Array3<f64>) -> BTreeMap<usize, f64> {
    let mut out = BTreeMap::new();
    let nz = volume.shape()[2];
    for z in 0..nz {
        let vol_slice = volume.index_axis(Axis(2), z);
        let mask_slice = mask.index_axis(Axis(2), z);
        let mut max: Option<f64> = None;
        for (&v, &m) in vol_slice.iter().zip(mask_slice.iter()) {
            if m > 0.0 {
                max = Some(match max {
                    Some(cur) => cur.max(v),
                    None => v,
                });
            }
        }
        if let Some(m) = max {
            out.insert(z, m);
        }
    }
    out
}

/// Slicewise rows for one hemisphere plus mean/std of its finite ratios.
///
/// A NaN or zero reference mean gives every row a NaN ratio; NaN ratios are
/// still emitted as rows but never enter the mean/std aggregation, which
/// are NaN themselves when no finite ratio exists.
pub fn hemisphere_rows(
    volume: &Array3<f64>,
    hemi_mask: &Array3<f64>,
    label: Hemisphere,
    ref_mean: f64,
) -> (Vec<SliceRow>, f64, f64) {
    let mut rows = Vec::new();
    let mut ratios = Vec::new();

    for (z, roi_max) in slice_roi_max(volume, hemi_mask) {
        let ratio = if ref_mean.is_nan() || ref_mean.abs() < REF_ZERO_ATOL {
            f64::NAN
        } else {
            let r = (roi_max - ref_mean) / ref_mean;
            ratios.push(r);
            r
        };
        rows.push(SliceRow {
            hemisphere: label,
            slice_index: z,
            roi_max,
            ref_mean,
            ratio,
        });
    }

    let (mean, std) = mean_std(&ratios);
    (rows, mean, std)
}

/// Population mean and standard deviation; NaN for an empty slice.
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Runs the extraction for one scan: loads the image and masks, checks
/// they share a grid, computes rows per region, and writes the slicewise
/// CSV and the summary JSON.
///
/// A shape or affine mismatch aborts the scan before any output is
/// written. A missing reference mask is not an error; every ratio is NaN.
pub fn run_scan(
    image_path: &Path,
    roi_mask_path: &Path,
    reference_mask_path: Option<&Path>,
    split_hemi: bool,
    csv_path: &Path,
    json_path: &Path,
) -> Result<ScanSummary> {
    let image = Volume::load(image_path)?;
    let roi = Volume::load(roi_mask_path)?;
    assert_compatible("image", &image, "roi_mask", &roi)?;

    let ref_mean = match reference_mask_path {
        Some(path) => {
            let reference = Volume::load(path)?;
            assert_compatible("image", &image, "reference_mask", &reference)?;
            reference_mean(&image.data, &reference.data)
        }
        None => {
            log::warn!("no reference mask given, ratios will be NaN");
            f64::NAN
        }
    };

    let regions: Vec<(Hemisphere, Array3<f64>)> = if split_hemi {
        let (left, right) = split_hemispheres(&roi.data, &roi.affine);
        vec![(Hemisphere::Left, left), (Hemisphere::Right, right)]
    } else {
        vec![(Hemisphere::Bilat, roi.data.clone())]
    };

    let mut all_rows = Vec::new();
    let mut summary = ScanSummary {
        ref_mean,
        regions: Vec::new(),
    };
    for (label, mask) in &regions {
        let (rows, mean_ratio, std_ratio) = hemisphere_rows(&image.data, mask, *label, ref_mean);
        log::info!("{label}: {} slices, mean ratio {mean_ratio:.4}", rows.len());
        summary.regions.push(RegionSummary {
            label: *label,
            mean_ratio,
            std_ratio,
            n_slices: rows.len(),
        });
        all_rows.extend(rows);
    }

    let mut writer = csv::Writer::from_path(csv_path)?;
    for row in &all_rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    let mut json_file = fs::File::create(json_path)?;
    serde_json::to_writer_pretty(&mut json_file, &summary.to_json())?;
    json_file.write_all(b"\n")?;

    Ok(summary)
}
