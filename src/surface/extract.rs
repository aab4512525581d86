//! Binary marching cubes over a closed, padded mask.
//!
//! The field is the visibility mask itself, thresholded at 0.5 between cell
//! corners, so crossing vertices sit exactly at edge midpoints and no
//! sub-voxel interpolation is needed. Vertices are welded across adjacent
//! cells through a hash keyed on the edge's canonical (corner, axis)
//! identity. The fixed case table makes the output repeatable for identical
//! input.

use std::collections::HashMap;

use crate::core::error::Error;
use crate::core::progress::TaskCtx;
use crate::core::types::{Result, Vec3};
use crate::morph::PaddedMask;

use super::Mesh;
use super::tables::{CORNER_OFFSETS, EDGE_CANONICAL, TRI_TABLE};

/// Extract the isosurface of the padded mask.
///
/// `spacing` and `origin` describe the source volume; the one-voxel pad is
/// compensated so vertices land in the volume's world frame. Fails with
/// `InvalidGeometry` on non-positive spacing and `EmptyResult` when the mask
/// has no visible voxels.
pub fn extract_surface(
    padded: &PaddedMask,
    spacing: Vec3,
    origin: Vec3,
    ctx: &TaskCtx,
) -> Result<Mesh> {
    if spacing.x <= 0.0 || spacing.y <= 0.0 || spacing.z <= 0.0 {
        return Err(Error::InvalidGeometry(format!(
            "non-positive spacing {spacing:?}"
        )));
    }
    if !padded.data().iter().any(|&v| v != 0) {
        return Err(Error::EmptyResult);
    }

    let dims = padded.dims();
    let mut vertices: Vec<Vec3> = Vec::new();
    let mut indices: Vec<[u32; 3]> = Vec::new();
    // Welding map: canonical edge identity -> vertex index.
    let mut edge_vertices: HashMap<(u32, u32, u32, u8), u32> = HashMap::new();

    // World position of padded-grid corner (x, y, z); the pad shifts
    // everything by one voxel.
    let corner_world = |x: u32, y: u32, z: u32| -> Vec3 {
        origin
            + Vec3::new(x as f32 - 1.0, y as f32 - 1.0, z as f32 - 1.0) * spacing
    };

    let cells_z = dims.z - 1;
    for z in 0..cells_z {
        ctx.checkpoint()?;
        for y in 0..dims.y - 1 {
            for x in 0..dims.x - 1 {
                let mut case = 0usize;
                for (bit, off) in CORNER_OFFSETS.iter().enumerate() {
                    if padded.get(x + off[0], y + off[1], z + off[2]) != 0 {
                        case |= 1 << bit;
                    }
                }
                if case == 0 || case == 255 {
                    continue;
                }

                let row = &TRI_TABLE[case];
                let mut t = 0;
                while row[t] >= 0 {
                    let tri = [row[t], row[t + 1], row[t + 2]];
                    let mut ids = [0u32; 3];
                    for (slot, &edge) in ids.iter_mut().zip(tri.iter()) {
                        let (base, axis) = EDGE_CANONICAL[edge as usize];
                        let key = (x + base[0], y + base[1], z + base[2], axis);
                        *slot = *edge_vertices.entry(key).or_insert_with(|| {
                            let mut p = corner_world(key.0, key.1, key.2);
                            match axis {
                                0 => p.x += 0.5 * spacing.x,
                                1 => p.y += 0.5 * spacing.y,
                                _ => p.z += 0.5 * spacing.z,
                            }
                            vertices.push(p);
                            vertices.len() as u32 - 1
                        });
                    }
                    indices.push(ids);
                    t += 3;
                }
            }
        }
        if z % 16 == 0 {
            ctx.report(
                (20 + 70 * z / cells_z.max(1)) as u8,
                "Marching cubes",
            );
        }
    }

    if indices.is_empty() {
        return Err(Error::EmptyResult);
    }

    let mut mesh = Mesh::from_raw(vertices, indices)?;
    // The case table fixes relative orientation; the global sign is settled
    // once so normals face away from the material.
    mesh.orient_outward();
    Ok(mesh)
}
