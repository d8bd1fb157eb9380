//! Loading and canonical reorientation of NIfTI volumes.
//!
//! Every volume is reoriented to the closest canonical (RAS-like)
//! orientation right after loading, so that axis-based operations (the
//! first-axis hemisphere fallback, slicing along the third axis) and the
//! world-X hemisphere split all behave consistently.

use std::path::Path;

use ndarray::{Array3, Axis, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
extern crate nalgebra as na;
use na::{Matrix4, Point4};

use crate::error::{GearError, Result};

/// Absolute tolerance for comparing affines of same-grid volumes.
pub const AFFINE_ATOL: f64 = 1e-4;

/// A 3D intensity volume with its placement in world space.
///
/// Read-only once constructed; no operation in this crate mutates a loaded
/// volume.
#[derive(Debug, Clone)]
pub struct Volume {
    pub data: Array3<f64>,
    pub affine: Matrix4<f64>,
}

impl Volume {
    pub fn new(data: Array3<f64>, affine: Matrix4<f64>) -> Self {
        Self { data, affine }
    }

    /// Reads a NIfTI file (`.nii` or `.nii.gz`) and reorients it to the
    /// closest canonical orientation.
    ///
    /// # Errors
    ///
    /// Returns [`GearError::Format`] if the file cannot be parsed as a
    /// NIfTI volume or is not 3D.
    pub fn load(path: &Path) -> Result<Self> {
        let obj = ReaderOptions::new()
            .read_file(path)
            .map_err(|e| GearError::Format {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let affine = obj.header().affine::<f64>();
        let img = obj
            .into_volume()
            .into_ndarray::<f64>()
            .map_err(|e| GearError::Format {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let ndim = img.ndim();
        let data = img
            .into_dimensionality::<Ix3>()
            .map_err(|_| GearError::Format {
                path: path.to_path_buf(),
                reason: format!("expected a 3D volume, got {ndim}D"),
            })?;
        Ok(Self::new(data, affine).into_canonical())
    }

    pub fn shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }

    /// Reorients the volume so that voxel axis k runs along world axis k
    /// with positive direction, recomposing the affine so that world
    /// coordinates of every voxel are preserved.
    pub fn into_canonical(self) -> Self {
        let Volume { mut data, mut affine } = self;

        // Assign each voxel axis to the world axis it mostly runs along,
        // largest-magnitude entries first.
        let mut entries: Vec<(f64, usize, usize)> = Vec::with_capacity(9);
        for i in 0..3 {
            for j in 0..3 {
                entries.push((affine[(i, j)].abs(), i, j));
            }
        }
        entries.sort_by(|a, b| b.0.total_cmp(&a.0));
        let mut world_of = [0usize; 3];
        let mut world_taken = [false; 3];
        let mut voxel_taken = [false; 3];
        for (_, i, j) in entries {
            if !world_taken[i] && !voxel_taken[j] {
                world_of[j] = i;
                world_taken[i] = true;
                voxel_taken[j] = true;
            }
        }

        // Flip voxel axes that run against their world axis.
        for j in 0..3 {
            if affine[(world_of[j], j)] < 0.0 {
                let n = data.shape()[j];
                data.invert_axis(Axis(j));
                for i in 0..3 {
                    affine[(i, 3)] += affine[(i, j)] * (n as f64 - 1.0);
                    affine[(i, j)] = -affine[(i, j)];
                }
            }
        }

        // Permute voxel axes into world-axis order.
        let mut perm = [0usize; 3];
        for j in 0..3 {
            perm[world_of[j]] = j;
        }
        if perm != [0, 1, 2] {
            data = data.permuted_axes(perm).as_standard_layout().to_owned();
            let old = affine;
            for k in 0..3 {
                for i in 0..3 {
                    affine[(i, k)] = old[(i, perm[k])];
                }
            }
        }

        Volume { data, affine }
    }
}

/// World-space X coordinate of a voxel index under the given affine.
pub fn world_x(affine: &Matrix4<f64>, index: [usize; 3]) -> f64 {
    let p = Point4::new(index[0] as f64, index[1] as f64, index[2] as f64, 1.0);
    (affine * p)[0]
}

/// Checks that two volumes can be jointly indexed: same array shape and,
/// after canonicalization, the same affine within [`AFFINE_ATOL`].
pub fn assert_compatible(name_a: &str, a: &Volume, name_b: &str, b: &Volume) -> Result<()> {
    if a.data.shape() != b.data.shape() {
        return Err(GearError::ShapeMismatch {
            name_a: name_a.to_string(),
            shape_a: a.data.shape().to_vec(),
            name_b: name_b.to_string(),
            shape_b: b.data.shape().to_vec(),
        });
    }
    let mut max_diff = 0.0f64;
    for i in 0..4 {
        for j in 0..4 {
            max_diff = max_diff.max((a.affine[(i, j)] - b.affine[(i, j)]).abs());
        }
    }
    if max_diff > AFFINE_ATOL {
        return Err(GearError::AffineMismatch {
            name_a: name_a.to_string(),
            name_b: name_b.to_string(),
            max_diff,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn counting_volume(shape: (usize, usize, usize), affine: Matrix4<f64>) -> Volume {
        let n = shape.0 * shape.1 * shape.2;
        let data = Array3::from_shape_vec(shape, (0..n).map(|v| v as f64).collect()).unwrap();
        Volume::new(data, affine)
    }

    #[test]
    fn canonical_is_identity_for_ras_volume() {
        let vol = counting_volume((2, 3, 4), Matrix4::identity());
        let canon = vol.clone().into_canonical();
        assert_eq!(canon.data, vol.data);
        assert_eq!(canon.affine, vol.affine);
    }

    #[test]
    fn canonical_flips_negative_axis_and_preserves_world_coords() {
        let mut affine = Matrix4::identity();
        affine[(0, 0)] = -1.0;
        affine[(0, 3)] = 5.0;
        let vol = counting_volume((3, 2, 2), affine);

        // World position of voxel [2, 0, 0] before reorientation.
        let wx_before = world_x(&vol.affine, [2, 0, 0]);
        let expected = vol.data[[2, 0, 0]];

        let canon = vol.into_canonical();
        assert!(canon.affine[(0, 0)] > 0.0);
        // Voxel [2,0,0] flips to [0,0,0]; its world X must be unchanged.
        assert_eq!(canon.data[[0, 0, 0]], expected);
        let wx_after = world_x(&canon.affine, [0, 0, 0]);
        assert!((wx_before - wx_after).abs() < 1e-12);
    }

    #[test]
    fn canonical_permutes_swapped_axes() {
        // Voxel axis 0 runs along world Y and axis 1 along world X.
        let mut affine = Matrix4::identity();
        affine[(0, 0)] = 0.0;
        affine[(1, 1)] = 0.0;
        affine[(1, 0)] = 1.0;
        affine[(0, 1)] = 1.0;
        let vol = counting_volume((2, 3, 4), affine);
        let canon = vol.into_canonical();
        assert_eq!(canon.shape(), [3, 2, 4]);
        assert_eq!(canon.affine, Matrix4::identity());
    }

    #[test]
    fn compatible_volumes_pass() {
        let a = counting_volume((2, 2, 2), Matrix4::identity());
        let b = counting_volume((2, 2, 2), Matrix4::identity());
        assert!(assert_compatible("a", &a, "b", &b).is_ok());
    }

    #[test]
    fn shape_mismatch_is_detected() {
        let a = counting_volume((2, 2, 2), Matrix4::identity());
        let b = counting_volume((2, 2, 3), Matrix4::identity());
        match assert_compatible("img", &a, "mask", &b) {
            Err(GearError::ShapeMismatch { name_a, name_b, .. }) => {
                assert_eq!(name_a, "img");
                assert_eq!(name_b, "mask");
            }
            other => panic!("expected shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn affine_mismatch_beyond_tolerance_is_detected() {
        let a = counting_volume((2, 2, 2), Matrix4::identity());
        let mut affine = Matrix4::identity();
        affine[(0, 3)] = 0.5;
        let b = counting_volume((2, 2, 2), affine);
        assert!(matches!(
            assert_compatible("a", &a, "b", &b),
            Err(GearError::AffineMismatch { .. })
        ));
    }

    #[test]
    fn affine_difference_within_tolerance_passes() {
        let a = counting_volume((2, 2, 2), Matrix4::identity());
        let mut affine = Matrix4::identity();
        affine[(0, 3)] = AFFINE_ATOL / 2.0;
        let b = counting_volume((2, 2, 2), affine);
        assert!(assert_compatible("a", &a, "b", &b).is_ok());
    }

    #[test]
    fn world_x_applies_affine() {
        let mut affine = Matrix4::identity();
        affine[(0, 0)] = 2.0;
        affine[(0, 3)] = -3.0;
        assert_eq!(world_x(&affine, [4, 0, 0]), 5.0);
    }
}
