//! Building blocks for neuroimaging analysis gears.
//!
//! Two tools share this library: `lc-contrast`, which computes slicewise
//! locus coeruleus contrast ratios from a NIfTI volume and ROI/reference
//! masks, and `apply-transforms`, which turns a gear configuration into a
//! validated antsApplyTransforms invocation.

pub mod contrast;
pub mod error;
pub mod gear;
pub mod transforms;
pub mod volume;
