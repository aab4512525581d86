//! Connected-component analysis over the visibility mask.
//!
//! Every traversal here is an iterative queue-based flood fill; recursion
//! would overflow on clinical volumes. Seeds are taken in scan order
//! (X fastest, then Y, then Z), so label assignment is deterministic for a
//! given mask and neighborhood.

use std::collections::VecDeque;

use crate::core::error::Error;
use crate::core::types::{Result, UVec3};
use crate::volume::VoxelVolume;

/// Voxel adjacency used by a traversal. The choice changes topology results,
/// so call sites name it explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Neighborhood {
    /// Face-adjacent neighbors only.
    Six,
    /// Face, edge and corner neighbors.
    TwentySix,
}

const N6: [[i64; 3]; 6] = [
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
];

// Edge-adjacent offsets (exactly two non-zero components).
const N18_EDGES: [[i64; 3]; 12] = [
    [1, 1, 0],
    [1, -1, 0],
    [-1, 1, 0],
    [-1, -1, 0],
    [1, 0, 1],
    [1, 0, -1],
    [-1, 0, 1],
    [-1, 0, -1],
    [0, 1, 1],
    [0, 1, -1],
    [0, -1, 1],
    [0, -1, -1],
];

// Corner offsets (all three components non-zero).
const N26_CORNERS: [[i64; 3]; 8] = [
    [1, 1, 1],
    [1, 1, -1],
    [1, -1, 1],
    [1, -1, -1],
    [-1, 1, 1],
    [-1, 1, -1],
    [-1, -1, 1],
    [-1, -1, -1],
];

static N26_ALL: [[i64; 3]; 26] = {
    let mut all = [[0i64; 3]; 26];
    let mut i = 0;
    while i < 6 {
        all[i] = N6[i];
        i += 1;
    }
    while i < 18 {
        all[i] = N18_EDGES[i - 6];
        i += 1;
    }
    while i < 26 {
        all[i] = N26_CORNERS[i - 18];
        i += 1;
    }
    all
};

impl Neighborhood {
    pub fn offsets(&self) -> &'static [[i64; 3]] {
        match self {
            Neighborhood::Six => &N6,
            Neighborhood::TwentySix => &N26_ALL,
        }
    }
}

/// Result of a full labeling pass. Labels are 1-based; 0 means background or
/// invisible.
#[derive(Clone, Debug)]
pub struct Labeling {
    labels: Vec<u32>,
    sizes: Vec<usize>,
}

impl Labeling {
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Voxel counts indexed by `label - 1`.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn component_count(&self) -> usize {
        self.sizes.len()
    }

    pub fn label_at(&self, linear_index: usize) -> u32 {
        self.labels[linear_index]
    }

    /// Label of the biggest component. Ties break toward the lower label id,
    /// which is the component discovered first in scan order.
    pub fn largest(&self) -> Option<u32> {
        let mut best: Option<(u32, usize)> = None;
        for (i, &size) in self.sizes.iter().enumerate() {
            let label = i as u32 + 1;
            match best {
                Some((_, best_size)) if size <= best_size => {}
                _ => best = Some((label, size)),
            }
        }
        best.map(|(label, _)| label)
    }
}

/// Label every connected component of the visible mask.
///
/// O(N) in voxel count; allocates the label array plus a traversal queue.
pub fn label_components(volume: &VoxelVolume, neighborhood: Neighborhood) -> Labeling {
    label_mask(volume.dims(), volume.mask(), neighborhood)
}

/// Labeling over a raw mask slice; used internally for scratch masks (for
/// example the inverted mask during hole filling).
pub(crate) fn label_mask(dims: UVec3, mask: &[u8], neighborhood: Neighborhood) -> Labeling {
    let mut labels = vec![0u32; mask.len()];
    let mut sizes = Vec::new();
    let mut queue: VecDeque<UVec3> = VecDeque::new();

    let mut idx = 0usize;
    for z in 0..dims.z {
        for y in 0..dims.y {
            for x in 0..dims.x {
                if mask[idx] != 0 && labels[idx] == 0 {
                    let label = sizes.len() as u32 + 1;
                    let size = flood(
                        dims,
                        mask,
                        &mut labels,
                        label,
                        UVec3::new(x, y, z),
                        neighborhood,
                        &mut queue,
                    );
                    sizes.push(size);
                }
                idx += 1;
            }
        }
    }

    Labeling { labels, sizes }
}

fn flood(
    dims: UVec3,
    mask: &[u8],
    labels: &mut [u32],
    label: u32,
    seed: UVec3,
    neighborhood: Neighborhood,
    queue: &mut VecDeque<UVec3>,
) -> usize {
    let index =
        |x: u32, y: u32, z: u32| (z as usize * dims.y as usize + y as usize) * dims.x as usize + x as usize;

    queue.clear();
    queue.push_back(seed);
    labels[index(seed.x, seed.y, seed.z)] = label;
    let mut size = 0usize;

    while let Some(v) = queue.pop_front() {
        size += 1;
        for d in neighborhood.offsets() {
            let nx = v.x as i64 + d[0];
            let ny = v.y as i64 + d[1];
            let nz = v.z as i64 + d[2];
            if nx < 0 || ny < 0 || nz < 0 {
                continue;
            }
            let (nx, ny, nz) = (nx as u32, ny as u32, nz as u32);
            if nx >= dims.x || ny >= dims.y || nz >= dims.z {
                continue;
            }
            let w = index(nx, ny, nz);
            if mask[w] == 0 || labels[w] != 0 {
                continue;
            }
            labels[w] = label;
            queue.push_back(UVec3::new(nx, ny, nz));
        }
    }
    size
}

/// Mark the connected component containing `seed`.
///
/// Returns a 0/1 mark array and the component size; size 0 when the seed
/// voxel is not visible.
pub fn component_from_seed(
    volume: &VoxelVolume,
    seed: UVec3,
    neighborhood: Neighborhood,
) -> Result<(Vec<u8>, usize)> {
    if !volume.contains(seed.x, seed.y, seed.z) {
        return Err(Error::OutOfBounds(seed.x, seed.y, seed.z));
    }
    Ok(flood_mask(volume.dims(), volume.mask(), seed, neighborhood))
}

pub(crate) fn flood_mask(
    dims: UVec3,
    mask: &[u8],
    seed: UVec3,
    neighborhood: Neighborhood,
) -> (Vec<u8>, usize) {
    let index =
        |x: u32, y: u32, z: u32| (z as usize * dims.y as usize + y as usize) * dims.x as usize + x as usize;

    let mut mark = vec![0u8; mask.len()];
    if mask[index(seed.x, seed.y, seed.z)] == 0 {
        return (mark, 0);
    }

    let mut labels = vec![0u32; mask.len()];
    let mut queue = VecDeque::new();
    let size = flood(dims, mask, &mut labels, 1, seed, neighborhood, &mut queue);
    for (m, &l) in mark.iter_mut().zip(labels.iter()) {
        *m = (l != 0) as u8;
    }
    (mark, size)
}

/// Label id of the component containing `seed`, if the seed is visible.
pub fn find_component_containing(
    labeling: &Labeling,
    volume: &VoxelVolume,
    seed: UVec3,
) -> Result<Option<u32>> {
    if !volume.contains(seed.x, seed.y, seed.z) {
        return Err(Error::OutOfBounds(seed.x, seed.y, seed.z));
    }
    let label = labeling.label_at(volume.index(seed.x, seed.y, seed.z));
    Ok((label != 0).then_some(label))
}

/// Snap a seed to the nearest visible voxel.
///
/// Checks the seed itself, then the 6-neighbors, then the 12 edge neighbors,
/// then the 8 corner neighbors, returning the first visible hit. The ring
/// order makes the result deterministic.
pub fn snap_seed(volume: &VoxelVolume, seed: UVec3) -> Result<Option<UVec3>> {
    if !volume.contains(seed.x, seed.y, seed.z) {
        return Err(Error::OutOfBounds(seed.x, seed.y, seed.z));
    }
    if volume.mask()[volume.index(seed.x, seed.y, seed.z)] != 0 {
        return Ok(Some(seed));
    }

    for ring in [&N6[..], &N18_EDGES[..], &N26_CORNERS[..]] {
        for d in ring {
            let nx = seed.x as i64 + d[0];
            let ny = seed.y as i64 + d[1];
            let nz = seed.z as i64 + d[2];
            if !volume.contains_signed(nx, ny, nz) {
                continue;
            }
            let p = UVec3::new(nx as u32, ny as u32, nz as u32);
            if volume.mask()[volume.index(p.x, p.y, p.z)] != 0 {
                return Ok(Some(p));
            }
        }
    }
    Ok(None)
}
