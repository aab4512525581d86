//! Morphological operators over the visibility mask.
//!
//! These are the cleanup passes that sit between interactive edits and
//! surface extraction: shell collection, one-voxel closing, padding, hole
//! filling, largest-component retention and single-layer peeling. All of
//! them are pure functions from a mask to a new mask; committing the result
//! (and recording it for undo) is the caller's job.

use rayon::prelude::*;

use crate::connect::{self, Neighborhood};
use crate::core::progress::TaskCtx;
use crate::core::types::{Result, UVec3};
use crate::volume::VoxelVolume;

/// Closed and zero-padded mask, ready for the isosurface extractor.
///
/// One layer of invisible voxels is added on every face, so grid coordinate
/// `(x, y, z)` of the padded mask corresponds to voxel
/// `(x - 1, y - 1, z - 1)` of the source volume.
#[derive(Clone, Debug)]
pub struct PaddedMask {
    dims: UVec3,
    data: Vec<u8>,
}

impl PaddedMask {
    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32, z: u32) -> u8 {
        self.data[(z as usize * self.dims.y as usize + y as usize) * self.dims.x as usize
            + x as usize]
    }
}

#[inline]
fn index(dims: UVec3, x: u32, y: u32, z: u32) -> usize {
    (z as usize * dims.y as usize + y as usize) * dims.x as usize + x as usize
}

/// Mark the shell: visible voxels with at least one invisible (or
/// out-of-volume) neighbor under the given adjacency.
pub fn shell(dims: UVec3, mask: &[u8], neighborhood: Neighborhood) -> Vec<u8> {
    let slab = dims.x as usize * dims.y as usize;
    let mut out = vec![0u8; mask.len()];
    if slab == 0 {
        return out;
    }
    let offsets = neighborhood.offsets();

    out.par_chunks_mut(slab).enumerate().for_each(|(z, chunk)| {
        let z = z as u32;
        for y in 0..dims.y {
            for x in 0..dims.x {
                let gi = index(dims, x, y, z);
                if mask[gi] == 0 {
                    continue;
                }
                let boundary = offsets.iter().any(|d| {
                    let nx = x as i64 + d[0];
                    let ny = y as i64 + d[1];
                    let nz = z as i64 + d[2];
                    if nx < 0
                        || ny < 0
                        || nz < 0
                        || nx >= dims.x as i64
                        || ny >= dims.y as i64
                        || nz >= dims.z as i64
                    {
                        return true;
                    }
                    mask[index(dims, nx as u32, ny as u32, nz as u32)] == 0
                });
                if boundary {
                    chunk[(y as usize) * dims.x as usize + x as usize] = 1;
                }
            }
        }
    });
    out
}

/// One-step dilation along the six axis directions. Out-of-volume neighbors
/// contribute nothing.
pub fn dilate6(dims: UVec3, mask: &[u8]) -> Vec<u8> {
    let slab = dims.x as usize * dims.y as usize;
    let mut out = vec![0u8; mask.len()];
    if slab == 0 {
        return out;
    }

    out.par_chunks_mut(slab).enumerate().for_each(|(z, chunk)| {
        let z = z as u32;
        for y in 0..dims.y {
            for x in 0..dims.x {
                let gi = index(dims, x, y, z);
                let mut v = mask[gi];
                if v == 0 {
                    v = Neighborhood::Six.offsets().iter().any(|d| {
                        let nx = x as i64 + d[0];
                        let ny = y as i64 + d[1];
                        let nz = z as i64 + d[2];
                        nx >= 0
                            && ny >= 0
                            && nz >= 0
                            && nx < dims.x as i64
                            && ny < dims.y as i64
                            && nz < dims.z as i64
                            && mask[index(dims, nx as u32, ny as u32, nz as u32)] != 0
                    }) as u8;
                }
                chunk[(y as usize) * dims.x as usize + x as usize] = v;
            }
        }
    });
    out
}

/// One-step erosion along the six axis directions. The neighborhood is
/// clamped at the volume boundary, so shapes touching a face are not eaten
/// from that side.
pub fn erode6(dims: UVec3, mask: &[u8]) -> Vec<u8> {
    let slab = dims.x as usize * dims.y as usize;
    let mut out = vec![0u8; mask.len()];
    if slab == 0 {
        return out;
    }

    out.par_chunks_mut(slab).enumerate().for_each(|(z, chunk)| {
        let z = z as u32;
        for y in 0..dims.y {
            for x in 0..dims.x {
                let gi = index(dims, x, y, z);
                if mask[gi] == 0 {
                    continue;
                }
                let keep = Neighborhood::Six.offsets().iter().all(|d| {
                    let nx = x as i64 + d[0];
                    let ny = y as i64 + d[1];
                    let nz = z as i64 + d[2];
                    if nx < 0
                        || ny < 0
                        || nz < 0
                        || nx >= dims.x as i64
                        || ny >= dims.y as i64
                        || nz >= dims.z as i64
                    {
                        return true;
                    }
                    mask[index(dims, nx as u32, ny as u32, nz as u32)] != 0
                });
                chunk[(y as usize) * dims.x as usize + x as usize] = keep as u8;
            }
        }
    });
    out
}

/// Morphological closing: dilation followed by erosion. Removes one-voxel
/// cracks that would leak the isosurface without growing the overall shape.
pub fn close_mask(dims: UVec3, mask: &[u8], ctx: &TaskCtx) -> Result<Vec<u8>> {
    ctx.checkpoint()?;
    let dilated = dilate6(dims, mask);
    ctx.checkpoint()?;
    Ok(erode6(dims, &dilated))
}

/// Closing plus one layer of invisible padding on every face, the mask shape
/// the extractor expects.
pub fn close_and_pad(volume: &VoxelVolume, ctx: &TaskCtx) -> Result<PaddedMask> {
    let dims = volume.dims();
    ctx.report(0, "Closing mask");
    let closed = close_mask(dims, volume.mask(), ctx)?;
    ctx.report(50, "Padding");
    ctx.checkpoint()?;

    let padded_dims = dims + UVec3::splat(2);
    let mut data = vec![0u8; padded_dims.x as usize * padded_dims.y as usize * padded_dims.z as usize];
    for z in 0..dims.z {
        for y in 0..dims.y {
            let src = index(dims, 0, y, z);
            let dst = index(padded_dims, 1, y + 1, z + 1);
            data[dst..dst + dims.x as usize]
                .copy_from_slice(&closed[src..src + dims.x as usize]);
        }
    }
    ctx.report(100, "Mask ready");
    Ok(PaddedMask {
        dims: padded_dims,
        data,
    })
}

/// Flip enclosed background cavities to visible.
///
/// Background (invisible) voxels are labeled under 6-connectivity; every
/// background component that does not touch the outer face of the volume is
/// interior and becomes visible. When `region` is given, only voxels inside
/// that inclusive box are flipped.
pub fn fill_holes(
    dims: UVec3,
    mask: &[u8],
    region: Option<(UVec3, UVec3)>,
    ctx: &TaskCtx,
) -> Result<Vec<u8>> {
    ctx.checkpoint()?;
    let background: Vec<u8> = mask.iter().map(|&v| (v == 0) as u8).collect();
    let labeling = connect::label_mask(dims, &background, Neighborhood::Six);
    ctx.checkpoint()?;

    // Collect the background labels that reach any outer face.
    let mut touches_boundary = vec![false; labeling.component_count() + 1];
    let mut note = |x: u32, y: u32, z: u32| {
        let l = labeling.label_at(index(dims, x, y, z));
        if l != 0 {
            touches_boundary[l as usize] = true;
        }
    };
    for y in 0..dims.y {
        for x in 0..dims.x {
            note(x, y, 0);
            note(x, y, dims.z - 1);
        }
    }
    for z in 0..dims.z {
        for x in 0..dims.x {
            note(x, 0, z);
            note(x, dims.y - 1, z);
        }
        for y in 0..dims.y {
            note(0, y, z);
            note(dims.x - 1, y, z);
        }
    }
    ctx.checkpoint()?;

    let in_region = |x: u32, y: u32, z: u32| match region {
        None => true,
        Some((lo, hi)) => {
            x >= lo.x && x <= hi.x && y >= lo.y && y <= hi.y && z >= lo.z && z <= hi.z
        }
    };

    let mut out = mask.to_vec();
    let mut idx = 0usize;
    for z in 0..dims.z {
        for y in 0..dims.y {
            for x in 0..dims.x {
                let l = labeling.label_at(idx);
                if l != 0 && !touches_boundary[l as usize] && in_region(x, y, z) {
                    out[idx] = 1;
                }
                idx += 1;
            }
        }
    }
    Ok(out)
}

/// Keep only the largest connected component of the mask. Ties break toward
/// the component discovered first in scan order.
pub fn keep_largest(dims: UVec3, mask: &[u8], neighborhood: Neighborhood) -> Option<Vec<u8>> {
    let labeling = connect::label_mask(dims, mask, neighborhood);
    let winner = labeling.largest()?;
    Some(
        labeling
            .labels()
            .iter()
            .map(|&l| (l == winner) as u8)
            .collect(),
    )
}

/// Remove one shell layer (6-adjacency; the volume boundary counts as
/// outside). Returns the peeled mask and its surviving voxel count.
pub fn peel_once(dims: UVec3, mask: &[u8]) -> (Vec<u8>, usize) {
    let boundary = shell(dims, mask, Neighborhood::Six);
    let mut kept = 0usize;
    let out: Vec<u8> = mask
        .iter()
        .zip(boundary.iter())
        .map(|(&m, &b)| {
            let v = (m != 0 && b == 0) as u8;
            kept += v as usize;
            v
        })
        .collect();
    (out, kept)
}

/// Grow `mask` outward one 6-neighbor layer per iteration, but only into
/// voxels set in `bound`. Stops early when an iteration adds nothing.
pub fn dilate_within(dims: UVec3, mask: &mut [u8], bound: &[u8], iterations: usize) -> usize {
    let mut grown_total = 0usize;
    for _ in 0..iterations {
        let mut grow: Vec<usize> = Vec::new();
        let mut idx = 0usize;
        for z in 0..dims.z {
            for y in 0..dims.y {
                for x in 0..dims.x {
                    if mask[idx] == 0 && bound[idx] != 0 {
                        let touches = Neighborhood::Six.offsets().iter().any(|d| {
                            let nx = x as i64 + d[0];
                            let ny = y as i64 + d[1];
                            let nz = z as i64 + d[2];
                            nx >= 0
                                && ny >= 0
                                && nz >= 0
                                && nx < dims.x as i64
                                && ny < dims.y as i64
                                && nz < dims.z as i64
                                && mask[index(dims, nx as u32, ny as u32, nz as u32)] != 0
                        });
                        if touches {
                            grow.push(idx);
                        }
                    }
                    idx += 1;
                }
            }
        }
        if grow.is_empty() {
            break;
        }
        grown_total += grow.len();
        for i in grow {
            mask[i] = 1;
        }
    }
    grown_total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;

    fn cube_volume(n: u32, lo: u32, hi: u32) -> VoxelVolume {
        let mut v = VoxelVolume::new(UVec3::splat(n), Vec3::ONE, Vec3::ZERO).unwrap();
        v.mask_mut().fill(0);
        for z in lo..=hi {
            for y in lo..=hi {
                for x in lo..=hi {
                    v.set_visible(x, y, z, true).unwrap();
                }
            }
        }
        v
    }

    #[test]
    fn test_shell_of_solid_cube() {
        let v = cube_volume(5, 1, 3);
        let s = shell(v.dims(), v.mask(), Neighborhood::Six);
        // 3x3x3 block: everything but the center voxel is boundary.
        assert_eq!(s.iter().filter(|&&b| b != 0).count(), 26);
        assert_eq!(s[v.index(2, 2, 2)], 0);
    }

    #[test]
    fn test_closing_bridges_one_voxel_crack() {
        // Two slabs separated by a one-voxel gap at x == 2.
        let mut v = VoxelVolume::new(UVec3::new(5, 3, 3), Vec3::ONE, Vec3::ZERO).unwrap();
        v.mask_mut().fill(0);
        for z in 0..3 {
            for y in 0..3 {
                for x in [0u32, 1, 3, 4] {
                    v.set_visible(x, y, z, true).unwrap();
                }
            }
        }
        let closed = close_mask(v.dims(), v.mask(), &TaskCtx::silent()).unwrap();
        assert_eq!(closed[v.index(2, 1, 1)], 1);
    }

    #[test]
    fn test_closing_is_idempotent_on_closed_mask() {
        let v = cube_volume(7, 2, 4);
        let once = close_mask(v.dims(), v.mask(), &TaskCtx::silent()).unwrap();
        let twice = close_mask(v.dims(), &once, &TaskCtx::silent()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_close_and_pad_extends_extent() {
        let v = cube_volume(4, 1, 2);
        let padded = close_and_pad(&v, &TaskCtx::silent()).unwrap();
        assert_eq!(padded.dims(), UVec3::splat(6));
        // Every face layer is invisible.
        for y in 0..6 {
            for x in 0..6 {
                assert_eq!(padded.get(x, y, 0), 0);
                assert_eq!(padded.get(x, y, 5), 0);
            }
        }
        // Source voxel (1,1,1) shows up shifted by one.
        assert_eq!(padded.get(2, 2, 2), 1);
    }

    #[test]
    fn test_fill_holes_closes_cavity_not_exterior() {
        // Hollow 5x5x5 box in a 9-cube: the inner 3x3x3 cavity must fill,
        // the exterior must stay background.
        let mut v = cube_volume(9, 2, 6);
        for z in 3..=5 {
            for y in 3..=5 {
                for x in 3..=5 {
                    v.set_visible(x, y, z, false).unwrap();
                }
            }
        }
        let filled = fill_holes(v.dims(), v.mask(), None, &TaskCtx::silent()).unwrap();
        assert_eq!(filled[v.index(4, 4, 4)], 1);
        assert_eq!(filled[v.index(0, 0, 0)], 0);

        // Idempotence.
        let again = fill_holes(v.dims(), &filled, None, &TaskCtx::silent()).unwrap();
        assert_eq!(filled, again);
    }

    #[test]
    fn test_fill_holes_respects_region() {
        let mut v = cube_volume(9, 2, 6);
        for z in 3..=5 {
            for y in 3..=5 {
                for x in 3..=5 {
                    v.set_visible(x, y, z, false).unwrap();
                }
            }
        }
        // Region that misses the cavity entirely: nothing changes.
        let region = Some((UVec3::ZERO, UVec3::splat(1)));
        let filled = fill_holes(v.dims(), v.mask(), region, &TaskCtx::silent()).unwrap();
        assert_eq!(filled, v.mask());
    }

    #[test]
    fn test_keep_largest_retains_big_blob() {
        let mut v = VoxelVolume::new(UVec3::new(20, 20, 20), Vec3::ONE, Vec3::ZERO).unwrap();
        v.mask_mut().fill(0);
        // 1000-voxel blob.
        for z in 0..10 {
            for y in 0..10 {
                for x in 0..10 {
                    v.set_visible(x, y, z, true).unwrap();
                }
            }
        }
        // 5-voxel blob.
        for x in 15..20 {
            v.set_visible(x, 15, 15, true).unwrap();
        }

        let kept = keep_largest(v.dims(), v.mask(), Neighborhood::Six).unwrap();
        assert_eq!(kept.iter().filter(|&&b| b != 0).count(), 1000);
        assert_eq!(kept[v.index(15, 15, 15)], 0);
    }

    #[test]
    fn test_peel_once_removes_shell_layer() {
        let v = cube_volume(7, 1, 5);
        let (peeled, kept) = peel_once(v.dims(), v.mask());
        // 5^3 block peels down to a 3^3 core.
        assert_eq!(kept, 27);
        assert_eq!(peeled[v.index(3, 3, 3)], 1);
        assert_eq!(peeled[v.index(1, 1, 1)], 0);
    }

    #[test]
    fn test_dilate_within_respects_bound() {
        let dims = UVec3::new(5, 1, 1);
        let bound = vec![1u8, 1, 1, 0, 0];
        let mut mask = vec![1u8, 0, 0, 0, 0];
        let grown = dilate_within(dims, &mut mask, &bound, 10);
        // Grows along x while inside the bound, then stalls.
        assert_eq!(mask, vec![1, 1, 1, 0, 0]);
        assert_eq!(grown, 2);
    }
}
