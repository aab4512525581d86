//! Surface extraction: triangle mesh type, marching cubes, simplification.
//!
//! The pipeline mirrors the editing flow: a closed, padded mask goes through
//! [`extract::extract_surface`], the largest shell is retained, and the
//! result can be decimated by [`simplify::simplify`] before export.

pub mod extract;
pub mod simplify;
mod tables;

use serde::{Deserialize, Serialize};

use crate::core::progress::TaskCtx;
use crate::core::types::{Result, Vec3};
use crate::morph;
use crate::volume::VoxelVolume;

/// One triangle: vertex indices plus the face normal.
#[derive(Clone, Copy, Debug)]
pub struct Triangle {
    pub indices: [u32; 3],
    pub normal: Vec3,
}

/// Indexed triangle mesh with per-face normals.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    vertices: Vec<Vec3>,
    triangles: Vec<Triangle>,
}

impl Mesh {
    /// Build a mesh from raw vertex and index data. Normals are always
    /// recomputed from winding, never trusted from input.
    pub fn from_raw(vertices: Vec<Vec3>, indices: Vec<[u32; 3]>) -> Result<Self> {
        let n = vertices.len() as u32;
        for tri in &indices {
            if tri.iter().any(|&i| i >= n) {
                return Err(crate::core::error::Error::InvalidGeometry(format!(
                    "triangle index {:?} out of range ({} vertices)",
                    tri, n
                )));
            }
        }
        let mut mesh = Self {
            vertices,
            triangles: indices
                .into_iter()
                .map(|indices| Triangle {
                    indices,
                    normal: Vec3::ZERO,
                })
                .collect(),
        };
        mesh.recompute_normals();
        Ok(mesh)
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn bounding_box(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.vertices.first()?;
        let mut lo = first;
        let mut hi = first;
        for v in &self.vertices[1..] {
            lo = lo.min(*v);
            hi = hi.max(*v);
        }
        Some((lo, hi))
    }

    /// Recompute every face normal from its winding.
    pub fn recompute_normals(&mut self) {
        for tri in &mut self.triangles {
            let [a, b, c] = tri.indices.map(|i| self.vertices[i as usize]);
            tri.normal = (b - a).cross(c - a).normalize_or_zero();
        }
    }

    /// Signed volume by the divergence theorem. Positive means outward
    /// windings for a closed mesh.
    pub fn signed_volume(&self) -> f64 {
        let mut total = 0.0f64;
        for tri in &self.triangles {
            let [a, b, c] = tri.indices.map(|i| self.vertices[i as usize].as_dvec3());
            total += a.dot(b.cross(c)) / 6.0;
        }
        total
    }

    /// Reverse every winding (and normal).
    pub fn flip_windings(&mut self) {
        for tri in &mut self.triangles {
            tri.indices.swap(1, 2);
            tri.normal = -tri.normal;
        }
    }

    /// Orient a closed mesh outward: if the signed volume is negative the
    /// windings point inward and the whole mesh is flipped.
    pub fn orient_outward(&mut self) {
        if self.signed_volume() < 0.0 {
            self.flip_windings();
        }
    }

    /// Keep only the largest connected shell (by triangle count; ties break
    /// to the shell containing the lowest vertex index) and drop unused
    /// vertices.
    pub fn keep_largest_shell(&mut self) {
        if self.triangles.is_empty() {
            return;
        }

        // Union-find over vertices through triangle edges.
        let mut parent: Vec<u32> = (0..self.vertices.len() as u32).collect();
        fn find(parent: &mut [u32], mut i: u32) -> u32 {
            while parent[i as usize] != i {
                parent[i as usize] = parent[parent[i as usize] as usize];
                i = parent[i as usize];
            }
            i
        }
        for tri in &self.triangles {
            let r0 = find(&mut parent, tri.indices[0]);
            let r1 = find(&mut parent, tri.indices[1]);
            let r2 = find(&mut parent, tri.indices[2]);
            parent[r1 as usize] = r0;
            parent[r2 as usize] = r0;
        }

        let mut per_root: std::collections::HashMap<u32, usize> = std::collections::HashMap::new();
        for tri in &self.triangles {
            let r = find(&mut parent, tri.indices[0]);
            *per_root.entry(r).or_default() += 1;
        }
        let winner = per_root
            .iter()
            .map(|(&r, &count)| (count, std::cmp::Reverse(r)))
            .max()
            .map(|(_, std::cmp::Reverse(r))| r)
            .unwrap();

        self.triangles
            .retain(|tri| find(&mut parent, tri.indices[0]) == winner);
        self.compact();
    }

    /// Drop vertices not referenced by any triangle, remapping indices.
    pub fn compact(&mut self) {
        let mut remap: Vec<u32> = vec![u32::MAX; self.vertices.len()];
        let mut kept: Vec<Vec3> = Vec::new();
        for tri in &mut self.triangles {
            for i in &mut tri.indices {
                let slot = &mut remap[*i as usize];
                if *slot == u32::MAX {
                    *slot = kept.len() as u32;
                    kept.push(self.vertices[*i as usize]);
                }
                *i = *slot;
            }
        }
        self.vertices = kept;
    }

    /// True when every edge is shared by exactly two triangles, the closed
    /// two-manifold condition used in tests and export sanity checks.
    pub fn is_closed(&self) -> bool {
        let mut edges: std::collections::HashMap<(u32, u32), u32> =
            std::collections::HashMap::new();
        for tri in &self.triangles {
            let [a, b, c] = tri.indices;
            for (u, v) in [(a, b), (b, c), (c, a)] {
                let key = if u < v { (u, v) } else { (v, u) };
                *edges.entry(key).or_default() += 1;
            }
        }
        !edges.is_empty() && edges.values().all(|&count| count == 2)
    }
}

/// Options for the volume-to-mesh pipeline.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Retain only the largest connected shell after extraction.
    pub keep_largest_shell: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            keep_largest_shell: true,
        }
    }
}

/// Full mask-to-mesh pipeline: close and pad the mask, run marching cubes,
/// keep the largest shell, orient outward.
pub fn build_surface(
    volume: &VoxelVolume,
    opts: &ExtractOptions,
    ctx: &TaskCtx,
) -> Result<Mesh> {
    if volume.is_empty() {
        return Err(crate::core::error::Error::NoVolume);
    }
    ctx.report(0, "Closing mask");
    let padded = morph::close_and_pad(volume, &ctx.quiet())?;
    ctx.checkpoint()?;

    ctx.report(20, "Extracting surface");
    let mut mesh = extract::extract_surface(&padded, volume.spacing(), volume.origin(), ctx)?;

    if opts.keep_largest_shell {
        ctx.report(90, "Largest component");
        mesh.keep_largest_shell();
    }
    ctx.report(100, "Surface ready");
    log::info!(
        "built surface: {} vertices, {} triangles",
        mesh.vertex_count(),
        mesh.triangle_count()
    );
    Ok(mesh)
}

/// Unit cube with outward windings, 12 triangles. Shared test fixture.
#[cfg(test)]
pub(crate) fn unit_cube() -> Mesh {
    let vertices = vec![
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(1.0, 0.0, 1.0),
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(0.0, 1.0, 1.0),
    ];
    let indices = vec![
        [0, 2, 1],
        [0, 3, 2], // bottom (z = 0, normal -z)
        [4, 5, 6],
        [4, 6, 7], // top
        [0, 1, 5],
        [0, 5, 4], // front (y = 0)
        [2, 3, 7],
        [2, 7, 6], // back
        [0, 4, 7],
        [0, 7, 3], // left (x = 0)
        [1, 2, 6],
        [1, 6, 5], // right
    ];
    Mesh::from_raw(vertices, indices).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_validates_indices() {
        let bad = Mesh::from_raw(vec![Vec3::ZERO, Vec3::X], vec![[0, 1, 2]]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_unit_cube_properties() {
        let cube = unit_cube();
        assert_eq!(cube.triangle_count(), 12);
        assert!(cube.is_closed());
        assert!((cube.signed_volume() - 1.0).abs() < 1e-6);
        assert_eq!(
            cube.bounding_box().unwrap(),
            (Vec3::ZERO, Vec3::ONE)
        );
        // All normals unit length.
        for tri in cube.triangles() {
            assert!((tri.normal.length() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_orient_outward_fixes_inverted_cube() {
        let mut cube = unit_cube();
        cube.flip_windings();
        assert!(cube.signed_volume() < 0.0);
        cube.orient_outward();
        assert!(cube.signed_volume() > 0.0);
    }

    #[test]
    fn test_keep_largest_shell_drops_satellite() {
        let mut big = unit_cube();
        let offset = big.vertex_count() as u32;
        // Satellite: one floating triangle far away.
        big.vertices.push(Vec3::new(10.0, 10.0, 10.0));
        big.vertices.push(Vec3::new(11.0, 10.0, 10.0));
        big.vertices.push(Vec3::new(10.0, 11.0, 10.0));
        big.triangles.push(Triangle {
            indices: [offset, offset + 1, offset + 2],
            normal: Vec3::Z,
        });

        big.keep_largest_shell();
        assert_eq!(big.triangle_count(), 12);
        assert_eq!(big.vertex_count(), 8);
    }

    #[test]
    fn test_compact_drops_orphans() {
        let mut mesh = Mesh::from_raw(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(9.0, 9.0, 9.0)],
            vec![[0, 1, 2]],
        )
        .unwrap();
        mesh.compact();
        assert_eq!(mesh.vertex_count(), 3);
    }
}
