use criterion::{Criterion, black_box, criterion_group, criterion_main};
use glam::{UVec3, Vec3};
use tomovox::connect::{Neighborhood, label_components};
use tomovox::morph;
use tomovox::volume::VoxelVolume;

/// Volume with a few hundred spherical blobs, a stand-in for a segmented
/// clinical series.
fn blobby_volume(n: u32) -> VoxelVolume {
    let mut v = VoxelVolume::new(UVec3::splat(n), Vec3::ONE, Vec3::ZERO).unwrap();
    v.mask_mut().fill(0);
    let step = 11u32;
    for cz in (step / 2..n).step_by(step as usize) {
        for cy in (step / 2..n).step_by(step as usize) {
            for cx in (step / 2..n).step_by(step as usize) {
                let r = 3i64;
                for dz in -r..=r {
                    for dy in -r..=r {
                        for dx in -r..=r {
                            if dx * dx + dy * dy + dz * dz > r * r {
                                continue;
                            }
                            let (x, y, z) = (
                                cx as i64 + dx,
                                cy as i64 + dy,
                                cz as i64 + dz,
                            );
                            if x >= 0 && y >= 0 && z >= 0 {
                                let (x, y, z) = (x as u32, y as u32, z as u32);
                                if v.contains(x, y, z) {
                                    v.set_visible(x, y, z, true).unwrap();
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    v
}

fn bench_labeling(c: &mut Criterion) {
    let volume = blobby_volume(96);

    c.bench_function("label_components_6", |b| {
        b.iter(|| label_components(black_box(&volume), Neighborhood::Six))
    });

    c.bench_function("label_components_26", |b| {
        b.iter(|| label_components(black_box(&volume), Neighborhood::TwentySix))
    });

    c.bench_function("shell_6", |b| {
        b.iter(|| morph::shell(volume.dims(), black_box(volume.mask()), Neighborhood::Six))
    });
}

criterion_group!(benches, bench_labeling);
criterion_main!(benches);
