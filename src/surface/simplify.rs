//! Mesh decimation by iterative edge collapse under a quadric error metric.
//!
//! Collapses are applied cheapest-first until the triangle budget is met or
//! the next collapse would exceed the error ceiling. A collapse is skipped
//! when it would flip an incident face normal past the configured tolerance
//! or create a duplicate face, so the result is never less manifold than the
//! input. Progress is reported in batches and each batch is a cancellation
//! checkpoint.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::progress::TaskCtx;
use crate::core::types::Result;

use super::Mesh;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SimplifyOptions {
    /// Fraction of triangles to remove (0.0 .. 1.0). Ignored when
    /// `target_triangles` is set.
    pub target_reduction: f32,
    /// Absolute triangle budget; overrides `target_reduction`.
    pub target_triangles: Option<u32>,
    /// Stop once the cheapest remaining collapse exceeds this quadric error.
    pub max_error: Option<f64>,
    /// Minimum dot between a face normal before and after a collapse;
    /// collapses below it are skipped.
    pub normal_dot_min: f32,
    /// Laplacian smoothing iterations applied before decimation.
    pub smoothing_iterations: usize,
}

impl Default for SimplifyOptions {
    fn default() -> Self {
        Self {
            target_reduction: 0.6,
            target_triangles: None,
            max_error: None,
            normal_dot_min: 0.0,
            smoothing_iterations: 0,
        }
    }
}

/// Symmetric 4x4 error quadric, upper triangle only.
#[derive(Clone, Copy, Debug, Default)]
struct Quadric {
    m: [f64; 10],
}

impl Quadric {
    fn from_plane(n: DVec3, d: f64) -> Self {
        Self {
            m: [
                n.x * n.x,
                n.x * n.y,
                n.x * n.z,
                n.x * d,
                n.y * n.y,
                n.y * n.z,
                n.y * d,
                n.z * n.z,
                n.z * d,
                d * d,
            ],
        }
    }

    fn add(&mut self, o: &Quadric) {
        for (a, b) in self.m.iter_mut().zip(o.m.iter()) {
            *a += b;
        }
    }

    fn error(&self, v: DVec3) -> f64 {
        let m = &self.m;
        m[0] * v.x * v.x
            + 2.0 * m[1] * v.x * v.y
            + 2.0 * m[2] * v.x * v.z
            + 2.0 * m[3] * v.x
            + m[4] * v.y * v.y
            + 2.0 * m[5] * v.y * v.z
            + 2.0 * m[6] * v.y
            + m[7] * v.z * v.z
            + 2.0 * m[8] * v.z
            + m[9]
    }
}

/// Heap entry; ordered by cost, then endpoints for determinism. Entries go
/// stale when either endpoint moves and are skipped on pop.
#[derive(PartialEq)]
struct Candidate {
    cost: f64,
    a: u32,
    b: u32,
    stamp_a: u32,
    stamp_b: u32,
    target: DVec3,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.cost
            .partial_cmp(&other.cost)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (self.a, self.b).cmp(&(other.a, other.b)))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Decimate a mesh. Works on a copy; a cancelled run leaves the input
/// untouched.
pub fn simplify(mesh: &Mesh, opts: &SimplifyOptions, ctx: &TaskCtx) -> Result<Mesh> {
    if mesh.is_empty() {
        return Err(Error::EmptyResult);
    }
    ctx.checkpoint()?;

    let initial = mesh.triangle_count();
    let budget = opts
        .target_triangles
        .map(|t| t as usize)
        .unwrap_or_else(|| {
            (initial as f64 * (1.0 - opts.target_reduction.clamp(0.0, 0.95) as f64)) as usize
        })
        .max(4);

    if budget >= initial {
        return Ok(mesh.clone());
    }

    let mut positions: Vec<DVec3> = mesh.vertices().iter().map(|v| v.as_dvec3()).collect();
    let mut tris: Vec<[u32; 3]> = mesh.triangles().iter().map(|t| t.indices).collect();

    if opts.smoothing_iterations > 0 {
        ctx.report(0, "Smoothing");
        laplacian_smooth(&mut positions, &tris, opts.smoothing_iterations);
    }

    let mut alive: Vec<bool> = vec![true; tris.len()];
    let mut alive_count = tris.len();

    // Per-vertex incident faces; lists may hold dead faces, filtered on read.
    let mut incident: Vec<Vec<u32>> = vec![Vec::new(); positions.len()];
    for (f, tri) in tris.iter().enumerate() {
        for &v in tri {
            incident[v as usize].push(f as u32);
        }
    }

    // Vertex quadrics from face planes.
    let mut quadrics: Vec<Quadric> = vec![Quadric::default(); positions.len()];
    for tri in &tris {
        let [a, b, c] = tri.map(|i| positions[i as usize]);
        let n = (b - a).cross(c - a);
        let len = n.length();
        if len < 1e-12 {
            continue;
        }
        let n = n / len;
        let q = Quadric::from_plane(n, -n.dot(a));
        for &v in tri {
            quadrics[v as usize].add(&q);
        }
    }

    let mut stamps: Vec<u32> = vec![0; positions.len()];
    let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();

    let push_edge = |heap: &mut BinaryHeap<Reverse<Candidate>>,
                     quadrics: &[Quadric],
                     positions: &[DVec3],
                     stamps: &[u32],
                     a: u32,
                     b: u32| {
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        let mut q = quadrics[a as usize];
        q.add(&quadrics[b as usize]);
        let (pa, pb) = (positions[a as usize], positions[b as usize]);
        // Candidate placements: midpoint and both endpoints; cheapest wins.
        let mid = (pa + pb) * 0.5;
        let (target, cost) = [mid, pa, pb]
            .into_iter()
            .map(|p| (p, q.error(p)))
            .min_by(|x, y| x.1.partial_cmp(&y.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap();
        heap.push(Reverse(Candidate {
            cost,
            a,
            b,
            stamp_a: stamps[a as usize],
            stamp_b: stamps[b as usize],
            target,
        }));
    };

    let mut seen: HashSet<(u32, u32)> = HashSet::new();
    for tri in &tris {
        let [a, b, c] = *tri;
        for (u, v) in [(a, b), (b, c), (c, a)] {
            let key = if u < v { (u, v) } else { (v, u) };
            if seen.insert(key) {
                push_edge(&mut heap, &quadrics, &positions, &stamps, key.0, key.1);
            }
        }
    }
    drop(seen);

    let to_remove = initial - budget;
    let mut batch = 0usize;

    while alive_count > budget {
        let Some(Reverse(cand)) = heap.pop() else {
            break;
        };
        if cand.stamp_a != stamps[cand.a as usize] || cand.stamp_b != stamps[cand.b as usize] {
            continue;
        }
        if let Some(ceiling) = opts.max_error {
            if cand.cost > ceiling {
                log::debug!("stopping: cheapest collapse {} above ceiling", cand.cost);
                break;
            }
        }

        let (a, b) = (cand.a as usize, cand.b as usize);
        let faces_a: Vec<u32> = incident[a]
            .iter()
            .copied()
            .filter(|&f| alive[f as usize] && tris[f as usize].contains(&cand.a))
            .collect();
        let faces_b: Vec<u32> = incident[b]
            .iter()
            .copied()
            .filter(|&f| alive[f as usize] && tris[f as usize].contains(&cand.b))
            .collect();
        if faces_a.is_empty() || faces_b.is_empty() {
            continue;
        }

        if !collapse_is_safe(
            &tris,
            &positions,
            &faces_a,
            &faces_b,
            cand.a,
            cand.b,
            cand.target,
            opts.normal_dot_min as f64,
        ) {
            continue;
        }

        // Commit: move a, retire b, rewrite b's faces.
        positions[a] = cand.target;
        let qb = quadrics[b];
        quadrics[a].add(&qb);
        stamps[a] += 1;
        stamps[b] += 1;

        for &f in &faces_b {
            let tri = &mut tris[f as usize];
            for v in tri.iter_mut() {
                if *v == cand.b {
                    *v = cand.a;
                }
            }
            if tri[0] == tri[1] || tri[1] == tri[2] || tri[2] == tri[0] {
                alive[f as usize] = false;
                alive_count -= 1;
            } else {
                incident[a].push(f);
            }
        }
        // Degenerate faces shared with a also die on a's side.
        for &f in &faces_a {
            let tri = tris[f as usize];
            if alive[f as usize] && (tri[0] == tri[1] || tri[1] == tri[2] || tri[2] == tri[0]) {
                alive[f as usize] = false;
                alive_count -= 1;
            }
        }

        // Refresh candidates around the merged vertex.
        let mut neighbors: HashSet<u32> = HashSet::new();
        for &f in &incident[a] {
            if !alive[f as usize] {
                continue;
            }
            for &v in &tris[f as usize] {
                if v != cand.a {
                    neighbors.insert(v);
                }
            }
        }
        for n in neighbors {
            push_edge(&mut heap, &quadrics, &positions, &stamps, cand.a, n);
        }

        batch += 1;
        if batch % 512 == 0 {
            ctx.checkpoint()?;
            let removed = initial - alive_count;
            ctx.report(
                (100 * removed / to_remove.max(1)).min(99) as u8,
                "Decimating",
            );
        }
    }

    let vertices: Vec<crate::core::types::Vec3> =
        positions.iter().map(|p| p.as_vec3()).collect();
    let indices: Vec<[u32; 3]> = tris
        .iter()
        .zip(alive.iter())
        .filter(|&(_, &a)| a)
        .map(|(t, _)| *t)
        .collect();
    let mut out = Mesh::from_raw(vertices, indices)?;
    out.compact();
    ctx.report(100, "Decimation done");
    log::info!(
        "simplified {} -> {} triangles (budget {})",
        initial,
        out.triangle_count(),
        budget
    );
    Ok(out)
}

/// Reject collapses that flip a surviving face normal past the tolerance or
/// produce duplicate faces.
#[allow(clippy::too_many_arguments)]
fn collapse_is_safe(
    tris: &[[u32; 3]],
    positions: &[DVec3],
    faces_a: &[u32],
    faces_b: &[u32],
    a: u32,
    b: u32,
    target: DVec3,
    normal_dot_min: f64,
) -> bool {
    let moved = |v: u32| -> DVec3 {
        if v == a || v == b {
            target
        } else {
            positions[v as usize]
        }
    };

    let mut survivors: HashSet<[u32; 3]> = HashSet::new();
    for &f in faces_a.iter().chain(faces_b.iter()) {
        let tri = tris[f as usize];
        // Faces containing both endpoints degenerate and vanish.
        if tri.contains(&a) && tri.contains(&b) {
            continue;
        }

        let before = {
            let [p, q, r] = tri.map(|i| positions[i as usize]);
            (q - p).cross(r - p)
        };
        let after = {
            let [p, q, r] = tri.map(moved);
            (q - p).cross(r - p)
        };
        let after_len = after.length();
        if after_len < 1e-12 {
            return false;
        }
        if before.length() > 1e-12 {
            let dot = before.normalize().dot(after / after_len);
            if dot < normal_dot_min {
                return false;
            }
        }

        // Canonical vertex set with the merge applied, for duplicate checks.
        let mut merged = tri.map(|v| if v == b { a } else { v });
        merged.sort_unstable();
        if !survivors.insert(merged) {
            return false;
        }
    }
    true
}

/// Uniform Laplacian smoothing: each vertex moves halfway toward the average
/// of its neighbors.
fn laplacian_smooth(positions: &mut [DVec3], tris: &[[u32; 3]], iterations: usize) {
    let mut neighbors: Vec<Vec<u32>> = vec![Vec::new(); positions.len()];
    for tri in tris {
        let [a, b, c] = *tri;
        for (u, v) in [(a, b), (b, c), (c, a)] {
            neighbors[u as usize].push(v);
            neighbors[v as usize].push(u);
        }
    }
    for list in &mut neighbors {
        list.sort_unstable();
        list.dedup();
    }

    for _ in 0..iterations {
        let snapshot = positions.to_vec();
        for (i, list) in neighbors.iter().enumerate() {
            if list.is_empty() {
                continue;
            }
            let sum: DVec3 = list.iter().map(|&n| snapshot[n as usize]).sum();
            let avg = sum / list.len() as f64;
            positions[i] = (snapshot[i] + avg) * 0.5;
        }
    }
}
