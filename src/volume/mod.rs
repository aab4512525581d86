//! Dense scalar volume with a parallel per-voxel visibility mask.
//!
//! The volume is the single piece of mutable state the editing tools operate
//! on. Intensities come from the series loader and never change after
//! assembly; every tool edits only the mask. Both arrays always share the
//! same extent, laid out X fastest, then Y, then Z.

pub mod series;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::{Result, UVec3, Vec3};

/// Acquisition modality of the source series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modality {
    #[default]
    Ct,
    Mr,
}

/// Dense 3D scalar grid plus boolean visibility mask.
#[derive(Clone, Debug, Default)]
pub struct VoxelVolume {
    dims: UVec3,
    spacing: Vec3,
    origin: Vec3,
    intensity: Vec<i16>,
    mask: Vec<u8>,
    modality: Modality,
    description: String,
}

impl VoxelVolume {
    /// The only valid "no data" state: zero extent, nothing allocated.
    pub fn empty() -> Self {
        Self {
            spacing: Vec3::ONE,
            ..Self::default()
        }
    }

    /// Allocate a volume of the given extent with zeroed intensities and a
    /// fully visible mask.
    pub fn new(dims: UVec3, spacing: Vec3, origin: Vec3) -> Result<Self> {
        validate_geometry(dims, spacing)?;
        let n = voxel_count(dims);
        Ok(Self {
            dims,
            spacing,
            origin,
            intensity: vec![0; n],
            mask: vec![1; n],
            modality: Modality::default(),
            description: String::new(),
        })
    }

    /// Build a volume from pre-decoded arrays. Both arrays must match the
    /// extent exactly; mask values are normalized to 0/1.
    pub fn from_parts(
        dims: UVec3,
        spacing: Vec3,
        origin: Vec3,
        intensity: Vec<i16>,
        mask: Vec<u8>,
    ) -> Result<Self> {
        validate_geometry(dims, spacing)?;
        let n = voxel_count(dims);
        if intensity.len() != n || mask.len() != n {
            return Err(Error::InvalidGeometry(format!(
                "array length {} / {} does not match extent {}",
                intensity.len(),
                mask.len(),
                n
            )));
        }
        let mask = mask.into_iter().map(|v| (v != 0) as u8).collect();
        Ok(Self {
            dims,
            spacing,
            origin,
            intensity,
            mask,
            modality: Modality::default(),
            description: String::new(),
        })
    }

    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    pub fn spacing(&self) -> Vec3 {
        self.spacing
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn set_modality(&mut self, modality: Modality) {
        self.modality = modality;
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Total voxel count of the current extent.
    pub fn len(&self) -> usize {
        voxel_count(self.dims)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest spacing component, used to convert physical radii to voxel
    /// steps.
    pub fn min_spacing(&self) -> f32 {
        self.spacing.min_element()
    }

    /// Linear index of (x, y, z), X fastest. Callers must have checked
    /// bounds.
    #[inline]
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        (z as usize * self.dims.y as usize + y as usize) * self.dims.x as usize + x as usize
    }

    #[inline]
    pub fn contains(&self, x: u32, y: u32, z: u32) -> bool {
        x < self.dims.x && y < self.dims.y && z < self.dims.z
    }

    /// Signed-coordinate bounds check for neighbor arithmetic.
    #[inline]
    pub fn contains_signed(&self, x: i64, y: i64, z: i64) -> bool {
        x >= 0
            && y >= 0
            && z >= 0
            && (x as u32) < self.dims.x
            && (y as u32) < self.dims.y
            && (z as u32) < self.dims.z
    }

    fn check(&self, x: u32, y: u32, z: u32) -> Result<usize> {
        if !self.contains(x, y, z) {
            return Err(Error::OutOfBounds(x, y, z));
        }
        Ok(self.index(x, y, z))
    }

    pub fn get(&self, x: u32, y: u32, z: u32) -> Result<i16> {
        Ok(self.intensity[self.check(x, y, z)?])
    }

    pub fn is_visible(&self, x: u32, y: u32, z: u32) -> Result<bool> {
        Ok(self.mask[self.check(x, y, z)?] != 0)
    }

    pub fn set_visible(&mut self, x: u32, y: u32, z: u32, visible: bool) -> Result<()> {
        let i = self.check(x, y, z)?;
        self.mask[i] = visible as u8;
        Ok(())
    }

    /// Drop the current contents and reallocate both arrays for a new
    /// extent. Any label volume or mesh derived from the previous extent is
    /// invalid after this call.
    pub fn resize_and_clear(&mut self, dims: UVec3, spacing: Vec3, origin: Vec3) -> Result<()> {
        validate_geometry(dims, spacing)?;
        let n = voxel_count(dims);
        self.dims = dims;
        self.spacing = spacing;
        self.origin = origin;
        self.intensity = vec![0; n];
        self.mask = vec![1; n];
        Ok(())
    }

    pub fn intensities(&self) -> &[i16] {
        &self.intensity
    }

    pub fn mask(&self) -> &[u8] {
        &self.mask
    }

    pub fn mask_mut(&mut self) -> &mut [u8] {
        &mut self.mask
    }

    /// Replace the whole mask. The replacement must match the extent.
    pub fn set_mask(&mut self, mask: Vec<u8>) -> Result<()> {
        if mask.len() != self.len() {
            return Err(Error::InvalidGeometry(format!(
                "mask length {} does not match extent {}",
                mask.len(),
                self.len()
            )));
        }
        self.mask = mask.into_iter().map(|v| (v != 0) as u8).collect();
        Ok(())
    }

    pub fn visible_count(&self) -> usize {
        self.mask.iter().filter(|&&v| v != 0).count()
    }

    /// World-space position of a voxel center.
    pub fn world_pos(&self, x: u32, y: u32, z: u32) -> Vec3 {
        self.origin + Vec3::new(x as f32, y as f32, z as f32) * self.spacing
    }
}

fn voxel_count(dims: UVec3) -> usize {
    dims.x as usize * dims.y as usize * dims.z as usize
}

fn validate_geometry(dims: UVec3, spacing: Vec3) -> Result<()> {
    if spacing.x <= 0.0 || spacing.y <= 0.0 || spacing.z <= 0.0 {
        return Err(Error::InvalidGeometry(format!(
            "non-positive spacing {:?}",
            spacing
        )));
    }
    // A zero extent is the valid empty state, but a partially zero extent
    // with allocated axes is not.
    let zero_axes = [dims.x, dims.y, dims.z].iter().filter(|&&d| d == 0).count();
    if zero_axes != 0 && zero_axes != 3 {
        return Err(Error::InvalidGeometry(format!(
            "degenerate extent {:?}",
            dims
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> VoxelVolume {
        VoxelVolume::new(UVec3::new(4, 3, 2), Vec3::ONE, Vec3::ZERO).unwrap()
    }

    #[test]
    fn test_new_allocates_both_arrays() {
        let v = small();
        assert_eq!(v.len(), 24);
        assert_eq!(v.intensities().len(), 24);
        assert_eq!(v.mask().len(), 24);
        assert_eq!(v.visible_count(), 24);
    }

    #[test]
    fn test_out_of_bounds_access() {
        let mut v = small();
        assert!(matches!(v.get(4, 0, 0), Err(Error::OutOfBounds(4, 0, 0))));
        assert!(matches!(v.is_visible(0, 3, 0), Err(Error::OutOfBounds(..))));
        assert!(matches!(
            v.set_visible(0, 0, 2, false),
            Err(Error::OutOfBounds(..))
        ));
    }

    #[test]
    fn test_mask_toggle_roundtrip() {
        let mut v = small();
        v.set_visible(1, 2, 1, false).unwrap();
        assert!(!v.is_visible(1, 2, 1).unwrap());
        v.set_visible(1, 2, 1, true).unwrap();
        assert!(v.is_visible(1, 2, 1).unwrap());
    }

    #[test]
    fn test_scan_order_is_x_fastest() {
        let v = small();
        assert_eq!(v.index(1, 0, 0), 1);
        assert_eq!(v.index(0, 1, 0), 4);
        assert_eq!(v.index(0, 0, 1), 12);
    }

    #[test]
    fn test_invalid_spacing_rejected() {
        let err = VoxelVolume::new(UVec3::splat(2), Vec3::new(1.0, 0.0, 1.0), Vec3::ZERO);
        assert!(matches!(err, Err(Error::InvalidGeometry(_))));
    }

    #[test]
    fn test_resize_and_clear_resets_everything() {
        let mut v = small();
        v.set_visible(0, 0, 0, false).unwrap();
        v.resize_and_clear(UVec3::splat(2), Vec3::splat(0.5), Vec3::ONE)
            .unwrap();
        assert_eq!(v.len(), 8);
        assert_eq!(v.visible_count(), 8);
        assert_eq!(v.spacing(), Vec3::splat(0.5));
        assert_eq!(v.origin(), Vec3::ONE);
    }

    #[test]
    fn test_from_parts_length_mismatch() {
        let bad = VoxelVolume::from_parts(
            UVec3::splat(2),
            Vec3::ONE,
            Vec3::ZERO,
            vec![0; 7],
            vec![1; 8],
        );
        assert!(matches!(bad, Err(Error::InvalidGeometry(_))));
    }

    #[test]
    fn test_world_pos_uses_spacing_and_origin() {
        let v = VoxelVolume::new(
            UVec3::splat(4),
            Vec3::new(0.5, 1.0, 2.0),
            Vec3::new(10.0, 0.0, -5.0),
        )
        .unwrap();
        assert_eq!(v.world_pos(2, 1, 1), Vec3::new(11.0, 1.0, -3.0));
    }

    #[test]
    fn test_empty_state() {
        let v = VoxelVolume::empty();
        assert!(v.is_empty());
        assert_eq!(v.len(), 0);
    }
}
