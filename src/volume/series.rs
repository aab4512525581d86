//! Series assembly: from decoded slices to a [`VoxelVolume`].
//!
//! DICOM discovery, header parsing and pixel decoding live outside the
//! engine. What arrives here is one record per file: either a decoded slice
//! with its geometry, or the decode error for that file. Assembly filters
//! slices whose geometry disagrees with the series, sorts the survivors by
//! slice position, stacks them, and reports exactly what was excluded and
//! why.

use serde::Serialize;

use crate::core::error::Error;
use crate::core::progress::TaskCtx;
use crate::core::types::{Result, UVec3, Vec3};
use crate::volume::{Modality, VoxelVolume};

/// Per-slice pixel geometry. Every slice in a series must report the same
/// values; anything else is filtered out.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SliceGeometry {
    pub rows: u32,
    pub cols: u32,
    /// In-plane spacing (x, y) in millimetres.
    pub pixel_spacing: [f32; 2],
    /// Distance between adjacent slices in millimetres.
    pub slice_spacing: f32,
}

/// One decoded slice as delivered by the external loader.
#[derive(Clone, Debug)]
pub struct SeriesSlice {
    pub geometry: SliceGeometry,
    /// Position along the stacking axis, used for sort order.
    pub position: f32,
    pub modality: Modality,
    /// Row-major pixels, `rows * cols` values.
    pub pixels: Vec<i16>,
}

/// Why a file was excluded from assembly.
#[derive(Clone, Debug, Serialize)]
pub enum Rejection {
    InconsistentGeometry { expected: SliceGeometry, found: SliceGeometry },
    DecodeFailure { reason: String },
}

/// Host-facing account of what assembly kept and dropped.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FilterReport {
    pub accepted: usize,
    pub excluded: Vec<(usize, Rejection)>,
}

impl FilterReport {
    pub fn inconsistent_count(&self) -> usize {
        self.excluded
            .iter()
            .filter(|(_, r)| matches!(r, Rejection::InconsistentGeometry { .. }))
            .count()
    }

    pub fn decode_failure_count(&self) -> usize {
        self.excluded
            .iter()
            .filter(|(_, r)| matches!(r, Rejection::DecodeFailure { .. }))
            .count()
    }

    /// Status line shown by the host UI after a load.
    pub fn summary(&self) -> String {
        format!("Filtered {} inconsistent file(s)", self.inconsistent_count())
    }

    /// Structured form of the report for the host's event interface.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Stack decoded slices into a volume.
///
/// `records` holds one entry per input file, in file order: `Ok(slice)` for a
/// decoded slice, `Err(reason)` for a file whose pixel data could not be
/// decoded. Decode failures and geometry mismatches are skipped, not fatal;
/// the survivors are sorted by `position` and stacked along Z. Fails with
/// `NoVolume` when nothing survives filtering.
pub fn assemble_series(
    records: Vec<std::result::Result<SeriesSlice, String>>,
    ctx: &TaskCtx,
) -> Result<(VoxelVolume, FilterReport)> {
    let total = records.len();
    let mut report = FilterReport::default();
    let mut slices: Vec<(usize, SeriesSlice)> = Vec::with_capacity(total);

    ctx.report(0, "Reading series");
    for (file_index, record) in records.into_iter().enumerate() {
        ctx.checkpoint()?;
        match record {
            Ok(slice) => slices.push((file_index, slice)),
            Err(reason) => {
                log::warn!("slice {file_index}: decode failed: {reason}");
                report
                    .excluded
                    .push((file_index, Rejection::DecodeFailure { reason }));
            }
        }
    }

    let Some(reference) = slices.first().map(|(_, s)| s.geometry) else {
        return Err(Error::NoVolume);
    };

    // Filter against the reference geometry, keeping original file indices
    // for the report.
    let mut kept: Vec<SeriesSlice> = Vec::with_capacity(slices.len());
    for (file_index, slice) in slices {
        if slice.geometry != reference {
            log::warn!(
                "slice {file_index}: geometry mismatch, excluding ({:?} != {:?})",
                slice.geometry,
                reference
            );
            report.excluded.push((
                file_index,
                Rejection::InconsistentGeometry {
                    expected: reference,
                    found: slice.geometry,
                },
            ));
            continue;
        }
        if slice.pixels.len() != (reference.rows * reference.cols) as usize {
            report.excluded.push((
                file_index,
                Rejection::DecodeFailure {
                    reason: format!(
                        "pixel buffer {} does not match {}x{}",
                        slice.pixels.len(),
                        reference.rows,
                        reference.cols
                    ),
                },
            ));
            continue;
        }
        kept.push(slice);
    }

    if kept.is_empty() {
        return Err(Error::NoVolume);
    }

    kept.sort_by(|a, b| {
        a.position
            .partial_cmp(&b.position)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let dims = UVec3::new(reference.cols, reference.rows, kept.len() as u32);
    let spacing = Vec3::new(
        reference.pixel_spacing[0],
        reference.pixel_spacing[1],
        reference.slice_spacing,
    );
    let modality = kept[0].modality;

    let mut intensity = Vec::with_capacity(dims.x as usize * dims.y as usize * dims.z as usize);
    let n_kept = kept.len();
    for (i, slice) in kept.into_iter().enumerate() {
        ctx.checkpoint()?;
        intensity.extend_from_slice(&slice.pixels);
        ctx.report(
            (100 * (i + 1) / n_kept) as u8,
            &format!("Stacking slice {}/{}", i + 1, n_kept),
        );
    }

    let n = intensity.len();
    let mut volume = VoxelVolume::from_parts(dims, spacing, Vec3::ZERO, intensity, vec![1; n])?;
    volume.set_modality(modality);
    report.accepted = n_kept;

    log::info!(
        "assembled {}x{}x{} volume, {} file(s) excluded",
        dims.x,
        dims.y,
        dims.z,
        report.excluded.len()
    );
    Ok((volume, report))
}
