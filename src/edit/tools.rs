//! The editing operator catalog.
//!
//! Every tool here is a pure function from the current volume (plus user
//! parameters) to a new mask; nothing is committed in place. The
//! [`EditSession`](super::session::EditSession) wraps each call in an edit
//! command so the whole catalog participates in undo/redo, and rejects
//! results that would leave the mask empty.

use std::collections::VecDeque;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::connect::{self, Neighborhood};
use crate::core::error::Error;
use crate::core::progress::TaskCtx;
use crate::core::types::{Result, UVec3, Vec2, Vec3};
use crate::morph;
use crate::volume::VoxelVolume;

/// A closed loop drawn by the operator, projected through the volume along
/// the view direction.
///
/// The host flattens its camera to an orthographic basis: `basis_u` and
/// `basis_v` span the drawing plane, and each voxel center is classified by
/// projecting it onto that plane and testing it against `points` (even-odd
/// rule). Everything along the projection axis shares the classification,
/// which is what makes the loop a cutting prism.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectedLoop {
    pub basis_u: Vec3,
    pub basis_v: Vec3,
    pub points: Vec<Vec2>,
}

impl ProjectedLoop {
    fn project(&self, p: Vec3) -> Vec2 {
        Vec2::new(p.dot(self.basis_u), p.dot(self.basis_v))
    }

    fn contains(&self, p: Vec2) -> bool {
        let pts = &self.points;
        let mut inside = false;
        let mut j = pts.len() - 1;
        for i in 0..pts.len() {
            let (a, b) = (pts[i], pts[j]);
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

/// Which side of the loop survives a scissors cut.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScissorsMode {
    /// Classic scissors: keep the voxels inside the loop.
    KeepInside,
    /// Inverse scissors: keep the voxels outside the loop.
    RemoveInside,
}

/// Inclusive axis-aligned voxel box.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BoxRegion {
    pub lo: UVec3,
    pub hi: UVec3,
}

impl BoxRegion {
    fn validate(&self, volume: &VoxelVolume) -> Result<()> {
        if self.lo.x > self.hi.x || self.lo.y > self.hi.y || self.lo.z > self.hi.z {
            return Err(Error::InvalidGeometry(format!(
                "inverted region {:?}..{:?}",
                self.lo, self.hi
            )));
        }
        if !volume.contains(self.hi.x, self.hi.y, self.hi.z) {
            return Err(Error::OutOfBounds(self.hi.x, self.hi.y, self.hi.z));
        }
        Ok(())
    }
}

/// Parameters for [`smart_delete`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SmartDeleteOptions {
    /// Geodesic reach of the region growth, in millimetres. Converted to BFS
    /// steps through the smallest spacing component.
    pub radius_mm: f32,
    /// Maximum absolute intensity difference to the seed voxel for a voxel
    /// to join the region.
    pub intensity_tolerance: i16,
}

impl Default for SmartDeleteOptions {
    fn default() -> Self {
        Self {
            radius_mm: 70.0,
            intensity_tolerance: 100,
        }
    }
}

/// Cut the volume with a projected loop. `KeepInside` clears everything
/// outside the loop, `RemoveInside` clears the interior.
pub fn scissors(
    volume: &VoxelVolume,
    cut: &ProjectedLoop,
    mode: ScissorsMode,
) -> Result<Vec<u8>> {
    if cut.points.len() < 3 {
        return Err(Error::InvalidGeometry(format!(
            "cut loop needs at least 3 points, got {}",
            cut.points.len()
        )));
    }

    let dims = volume.dims();
    let slab = dims.x as usize * dims.y as usize;
    let mask = volume.mask();
    let mut out = mask.to_vec();

    out.par_chunks_mut(slab).enumerate().for_each(|(z, chunk)| {
        let z = z as u32;
        for y in 0..dims.y {
            for x in 0..dims.x {
                let i = (y as usize) * dims.x as usize + x as usize;
                if chunk[i] == 0 {
                    continue;
                }
                let inside = cut.contains(cut.project(volume.world_pos(x, y, z)));
                let clear = match mode {
                    ScissorsMode::KeepInside => !inside,
                    ScissorsMode::RemoveInside => inside,
                };
                if clear {
                    chunk[i] = 0;
                }
            }
        }
    });
    Ok(out)
}

/// Remove a coherent blob in one action: region-grow from the seed across
/// visible voxels of similar intensity, bounded by a geodesic radius, then
/// clear the grown region.
pub fn smart_delete(
    volume: &VoxelVolume,
    seed: UVec3,
    opts: &SmartDeleteOptions,
) -> Result<Vec<u8>> {
    let Some(seed) = connect::snap_seed(volume, seed)? else {
        return Err(Error::EmptyResult);
    };
    let dims = volume.dims();
    let mask = volume.mask();
    let intensity = volume.intensities();
    let seed_value = intensity[volume.index(seed.x, seed.y, seed.z)] as i32;
    let tolerance = opts.intensity_tolerance as i32;
    let max_steps = ((opts.radius_mm / volume.min_spacing()).round() as usize).max(1);

    let mut visited = vec![false; mask.len()];
    let mut queue: VecDeque<(UVec3, usize)> = VecDeque::new();
    let seed_idx = volume.index(seed.x, seed.y, seed.z);
    visited[seed_idx] = true;
    queue.push_back((seed, 0));

    while let Some((v, d)) = queue.pop_front() {
        if d >= max_steps {
            continue;
        }
        for off in Neighborhood::Six.offsets() {
            let nx = v.x as i64 + off[0];
            let ny = v.y as i64 + off[1];
            let nz = v.z as i64 + off[2];
            if !volume.contains_signed(nx, ny, nz) {
                continue;
            }
            let n = UVec3::new(nx as u32, ny as u32, nz as u32);
            let w = volume.index(n.x, n.y, n.z);
            if visited[w] || mask[w] == 0 {
                continue;
            }
            if (intensity[w] as i32 - seed_value).abs() > tolerance {
                continue;
            }
            visited[w] = true;
            queue.push_back((n, d + 1));
        }
    }

    let mut out = mask.to_vec();
    for (o, &hit) in out.iter_mut().zip(visited.iter()) {
        if hit {
            *o = 0;
        }
    }
    Ok(out)
}

/// Clear visible voxels within a spherical brush.
pub fn erase_sphere(volume: &VoxelVolume, center: UVec3, radius_voxels: u32) -> Result<Vec<u8>> {
    sphere_op(volume, center, radius_voxels, |out, i| out[i] = 0)
}

/// Restore voxels within a spherical brush to their pre-edit state. Only
/// bits set in the snapshot come back.
pub fn recover_sphere(
    volume: &VoxelVolume,
    center: UVec3,
    radius_voxels: u32,
    snapshot: &[u8],
) -> Result<Vec<u8>> {
    if snapshot.len() != volume.len() {
        return Err(Error::InvalidGeometry(
            "snapshot does not match volume extent".to_string(),
        ));
    }
    sphere_op(volume, center, radius_voxels, |out, i| {
        if snapshot[i] != 0 {
            out[i] = 1;
        }
    })
}

fn sphere_op(
    volume: &VoxelVolume,
    center: UVec3,
    radius_voxels: u32,
    op: impl Fn(&mut [u8], usize),
) -> Result<Vec<u8>> {
    if !volume.contains(center.x, center.y, center.z) {
        return Err(Error::OutOfBounds(center.x, center.y, center.z));
    }
    let r = radius_voxels.max(1) as i64;
    let r2 = r * r;
    let dims = volume.dims();
    let mut out = volume.mask().to_vec();

    let z0 = (center.z as i64 - r).max(0);
    let z1 = (center.z as i64 + r).min(dims.z as i64 - 1);
    let y0 = (center.y as i64 - r).max(0);
    let y1 = (center.y as i64 + r).min(dims.y as i64 - 1);
    let x0 = (center.x as i64 - r).max(0);
    let x1 = (center.x as i64 + r).min(dims.x as i64 - 1);

    for z in z0..=z1 {
        for y in y0..=y1 {
            for x in x0..=x1 {
                let dx = x - center.x as i64;
                let dy = y - center.y as i64;
                let dz = z - center.z as i64;
                if dx * dx + dy * dy + dz * dz > r2 {
                    continue;
                }
                op(&mut out, volume.index(x as u32, y as u32, z as u32));
            }
        }
    }
    Ok(out)
}

/// Union a solid slab of visible voxels over the given box, giving a
/// floating structure a printable base.
pub fn add_base(volume: &VoxelVolume, slab: BoxRegion) -> Result<Vec<u8>> {
    slab.validate(volume)?;
    let mut out = volume.mask().to_vec();
    for z in slab.lo.z..=slab.hi.z {
        for y in slab.lo.y..=slab.hi.y {
            for x in slab.lo.x..=slab.hi.x {
                out[volume.index(x, y, z)] = 1;
            }
        }
    }
    Ok(out)
}

/// Hole filling (optionally restricted to a box region).
pub fn fill_void(
    volume: &VoxelVolume,
    region: Option<BoxRegion>,
    ctx: &TaskCtx,
) -> Result<Vec<u8>> {
    if let Some(r) = region {
        r.validate(volume)?;
    }
    morph::fill_holes(
        volume.dims(),
        volume.mask(),
        region.map(|r| (r.lo, r.hi)),
        ctx,
    )
}

/// One-shot global closing pass.
pub fn total_smoothing(volume: &VoxelVolume, ctx: &TaskCtx) -> Result<Vec<u8>> {
    morph::close_mask(volume.dims(), volume.mask(), ctx)
}

/// Rebuild the mask from an inclusive intensity window.
pub fn threshold_visibility(volume: &VoxelVolume, lo: i16, hi: i16) -> Result<Vec<u8>> {
    if lo > hi {
        return Err(Error::InvalidGeometry(format!(
            "inverted intensity window [{lo}, {hi}]"
        )));
    }
    Ok(volume
        .intensities()
        .par_iter()
        .map(|&v| (v >= lo && v <= hi) as u8)
        .collect())
}

/// Keep only the component containing the seed ("remove unconnected").
pub fn keep_component(
    volume: &VoxelVolume,
    seed: UVec3,
    neighborhood: Neighborhood,
) -> Result<Vec<u8>> {
    let (mark, count) = seeded_component(volume, seed, neighborhood)?;
    if count == 0 {
        return Err(Error::EmptyResult);
    }
    Ok(mark)
}

/// Clear the component containing the seed ("remove selected").
pub fn remove_component(
    volume: &VoxelVolume,
    seed: UVec3,
    neighborhood: Neighborhood,
) -> Result<Vec<u8>> {
    let (mark, count) = seeded_component(volume, seed, neighborhood)?;
    if count == 0 {
        return Err(Error::EmptyResult);
    }
    Ok(volume
        .mask()
        .iter()
        .zip(mark.iter())
        .map(|(&m, &s)| (m != 0 && s == 0) as u8)
        .collect())
}

fn seeded_component(
    volume: &VoxelVolume,
    seed: UVec3,
    neighborhood: Neighborhood,
) -> Result<(Vec<u8>, usize)> {
    match connect::snap_seed(volume, seed)? {
        Some(snapped) => connect::component_from_seed(volume, snapped, neighborhood),
        None => Ok((vec![0; volume.len()], 0)),
    }
}

/// Grow the mask back outward one shell layer per step, bounded by the
/// pre-edit snapshot. Reverses erosion-style edits.
pub fn peel_recovery(volume: &VoxelVolume, snapshot: &[u8], layers: usize) -> Result<Vec<u8>> {
    if snapshot.len() != volume.len() {
        return Err(Error::InvalidGeometry(
            "snapshot does not match volume extent".to_string(),
        ));
    }
    let mut out = volume.mask().to_vec();
    morph::dilate_within(volume.dims(), &mut out, snapshot, layers.max(1));
    Ok(out)
}

/// Iterative peel around a seed: strip one shell layer at a time, keep the
/// part still connected to the seed, stop when the survivor count drops by
/// more than `drop_frac` in one step or after `max_iters` layers.
pub fn smart_peel(
    volume: &VoxelVolume,
    seed: UVec3,
    drop_frac: f32,
    max_iters: usize,
) -> Result<Vec<u8>> {
    let Some(seed) = connect::snap_seed(volume, seed)? else {
        return Err(Error::EmptyResult);
    };
    let dims = volume.dims();

    let (mut mask, mut prev_count) =
        connect::component_from_seed(volume, seed, Neighborhood::Six)?;
    if prev_count == 0 {
        return Err(Error::EmptyResult);
    }

    for _ in 0..max_iters {
        let (peeled, after_peel) = morph::peel_once(dims, &mask);
        if after_peel == 0 {
            break;
        }
        let (survivor, count) = connect::flood_mask(dims, &peeled, seed, Neighborhood::Six);
        if count == 0 {
            break;
        }
        let ratio = count as f32 / prev_count as f32;
        mask = survivor;
        prev_count = count;
        if ratio < 1.0 - drop_frac {
            break;
        }
    }
    Ok(mask)
}

/// Shell of the current mask, for inspection or export. Never mutates.
pub fn surface_map(volume: &VoxelVolume, neighborhood: Neighborhood) -> Vec<u8> {
    morph::shell(volume.dims(), volume.mask(), neighborhood)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_volume() -> VoxelVolume {
        // 8x8x8, visible 2..=5 cube, intensity 100 inside the cube.
        let mut v = VoxelVolume::new(UVec3::splat(8), Vec3::ONE, Vec3::ZERO).unwrap();
        v.mask_mut().fill(0);
        for z in 2..=5 {
            for y in 2..=5 {
                for x in 2..=5 {
                    v.set_visible(x, y, z, true).unwrap();
                }
            }
        }
        v
    }

    #[test]
    fn test_scissors_remove_inside_cuts_prism() {
        let v = block_volume();
        let cut = ProjectedLoop {
            basis_u: Vec3::X,
            basis_v: Vec3::Y,
            // Square around x in [1.5, 3.5], y in [1.5, 3.5].
            points: vec![
                Vec2::new(1.5, 1.5),
                Vec2::new(3.5, 1.5),
                Vec2::new(3.5, 3.5),
                Vec2::new(1.5, 3.5),
            ],
        };

        let out = scissors(&v, &cut, ScissorsMode::RemoveInside).unwrap();
        // Voxels in the prism are cleared through the whole Z range.
        assert_eq!(out[v.index(2, 2, 2)], 0);
        assert_eq!(out[v.index(3, 3, 5)], 0);
        // Outside the loop untouched.
        assert_eq!(out[v.index(5, 5, 3)], 1);

        let kept = scissors(&v, &cut, ScissorsMode::KeepInside).unwrap();
        assert_eq!(kept[v.index(2, 2, 2)], 1);
        assert_eq!(kept[v.index(5, 5, 3)], 0);
    }

    #[test]
    fn test_scissors_rejects_degenerate_loop() {
        let v = block_volume();
        let cut = ProjectedLoop {
            basis_u: Vec3::X,
            basis_v: Vec3::Y,
            points: vec![Vec2::ZERO, Vec2::ONE],
        };
        assert!(matches!(
            scissors(&v, &cut, ScissorsMode::KeepInside),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_smart_delete_respects_intensity_window() {
        // Same blob as block_volume, but with intensities split down the
        // middle: x <= 3 -> 0, x >= 4 -> 500.
        let base = block_volume();
        let dims = base.dims();
        let mut intensity = vec![0i16; base.len()];
        for z in 0..8 {
            for y in 0..8 {
                for x in 4..8u32 {
                    intensity
                        [(z as usize * dims.y as usize + y as usize) * dims.x as usize + x as usize] =
                        500;
                }
            }
        }
        let v =
            VoxelVolume::from_parts(dims, Vec3::ONE, Vec3::ZERO, intensity, base.mask().to_vec())
                .unwrap();

        let out = smart_delete(
            &v,
            UVec3::new(2, 3, 3),
            &SmartDeleteOptions {
                radius_mm: 100.0,
                intensity_tolerance: 50,
            },
        )
        .unwrap();

        // The low-intensity half of the blob is gone, the high half stays.
        assert_eq!(out[v.index(2, 3, 3)], 0);
        assert_eq!(out[v.index(3, 3, 3)], 0);
        assert_eq!(out[v.index(4, 3, 3)], 1);
    }

    #[test]
    fn test_smart_delete_geodesic_bound() {
        let v = block_volume();
        let out = smart_delete(
            &v,
            UVec3::new(2, 2, 2),
            &SmartDeleteOptions {
                radius_mm: 1.0,
                intensity_tolerance: 1000,
            },
        )
        .unwrap();
        // One step of growth: the seed and its in-blob 6-neighbors.
        let removed = v.visible_count() - out.iter().filter(|&&m| m != 0).count();
        assert_eq!(removed, 4);
    }

    #[test]
    fn test_erase_and_recover_roundtrip() {
        let v = block_volume();
        let snapshot = v.mask().to_vec();

        let erased = erase_sphere(&v, UVec3::new(3, 3, 3), 2).unwrap();
        assert!(erased.iter().filter(|&&m| m != 0).count() < v.visible_count());

        let mut after = v.clone();
        after.set_mask(erased).unwrap();
        let recovered = recover_sphere(&after, UVec3::new(3, 3, 3), 2, &snapshot).unwrap();
        assert_eq!(recovered, snapshot);
    }

    #[test]
    fn test_add_base_unions_slab() {
        let v = block_volume();
        let slab = BoxRegion {
            lo: UVec3::new(1, 1, 0),
            hi: UVec3::new(6, 6, 1),
        };
        let out = add_base(&v, slab).unwrap();
        assert_eq!(out[v.index(1, 1, 0)], 1);
        assert_eq!(out[v.index(6, 6, 1)], 1);
        // Original blob unchanged.
        assert_eq!(out[v.index(3, 3, 3)], 1);
    }

    #[test]
    fn test_add_base_out_of_bounds() {
        let v = block_volume();
        let slab = BoxRegion {
            lo: UVec3::ZERO,
            hi: UVec3::new(8, 1, 1),
        };
        assert!(matches!(add_base(&v, slab), Err(Error::OutOfBounds(..))));
    }

    #[test]
    fn test_threshold_visibility_window() {
        let dims = UVec3::new(4, 1, 1);
        let v = VoxelVolume::from_parts(
            dims,
            Vec3::ONE,
            Vec3::ZERO,
            vec![-100, 0, 50, 200],
            vec![1; 4],
        )
        .unwrap();
        let out = threshold_visibility(&v, 0, 100).unwrap();
        assert_eq!(out, vec![0, 1, 1, 0]);
        assert!(threshold_visibility(&v, 10, -10).is_err());
    }

    #[test]
    fn test_keep_and_remove_component() {
        let mut v = block_volume();
        v.set_visible(7, 7, 7, true).unwrap();

        let kept = keep_component(&v, UVec3::new(3, 3, 3), Neighborhood::Six).unwrap();
        assert_eq!(kept[v.index(7, 7, 7)], 0);
        assert_eq!(kept[v.index(3, 3, 3)], 1);

        let removed = remove_component(&v, UVec3::new(3, 3, 3), Neighborhood::Six).unwrap();
        assert_eq!(removed[v.index(7, 7, 7)], 1);
        assert_eq!(removed[v.index(3, 3, 3)], 0);
    }

    #[test]
    fn test_peel_recovery_grows_back_within_snapshot() {
        let v = block_volume();
        let snapshot = v.mask().to_vec();

        // Erode the blob, then grow it back. The blob corners sit three
        // 6-steps from the peeled core, so three layers restore everything.
        let (peeled, _) = morph::peel_once(v.dims(), v.mask());
        let mut eroded = v.clone();
        eroded.set_mask(peeled).unwrap();

        let one = peel_recovery(&eroded, &snapshot, 1).unwrap();
        let grown_one = one.iter().filter(|&&m| m != 0).count();
        assert!(grown_one > eroded.visible_count());
        assert!(grown_one < v.visible_count());

        let full = peel_recovery(&eroded, &snapshot, 3).unwrap();
        assert_eq!(full, snapshot);
    }

    #[test]
    fn test_smart_peel_keeps_seed_component() {
        let v = block_volume();
        let out = smart_peel(&v, UVec3::new(3, 3, 3), 0.9, 1).unwrap();
        // One peel of the 4^3 blob leaves the 2^3 core.
        assert_eq!(out.iter().filter(|&&m| m != 0).count(), 8);
    }

    #[test]
    fn test_surface_map_does_not_mutate() {
        let v = block_volume();
        let before = v.mask().to_vec();
        let shell = surface_map(&v, Neighborhood::Six);
        assert_eq!(v.mask(), &before[..]);
        // A 4^3 blob has 4^3 - 2^3 = 56 shell voxels.
        assert_eq!(shell.iter().filter(|&&s| s != 0).count(), 56);
    }
}
