//! Binary STL writer.
//!
//! Fixed external format, emitted byte-exact: an 80-byte header, a
//! little-endian `u32` triangle count, then 50 bytes per triangle (normal,
//! three vertices, `u16` attribute always zero). No negotiation, no
//! compression.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::core::error::Error;
use crate::core::progress::TaskCtx;
use crate::core::types::{Result, Vec3};
use crate::surface::Mesh;

/// Bytes per triangle record: 12 floats plus the attribute word.
pub const TRIANGLE_RECORD_SIZE: usize = 50;

/// Write a mesh as binary STL.
pub fn write_stl(mesh: &Mesh, writer: &mut impl Write, ctx: &TaskCtx) -> Result<()> {
    if mesh.is_empty() {
        return Err(Error::EmptyResult);
    }

    let mut header = [0u8; 80];
    let tag = b"tomovox binary stl";
    header[..tag.len()].copy_from_slice(tag);
    writer.write_all(&header)?;
    writer.write_all(&(mesh.triangle_count() as u32).to_le_bytes())?;

    let write_vec3 = |writer: &mut dyn Write, v: Vec3| -> std::io::Result<()> {
        writer.write_all(&v.x.to_le_bytes())?;
        writer.write_all(&v.y.to_le_bytes())?;
        writer.write_all(&v.z.to_le_bytes())
    };

    let total = mesh.triangle_count();
    for (i, tri) in mesh.triangles().iter().enumerate() {
        write_vec3(writer, tri.normal)?;
        for &index in &tri.indices {
            write_vec3(writer, mesh.vertices()[index as usize])?;
        }
        writer.write_all(&0u16.to_le_bytes())?;

        if i % 4096 == 0 {
            ctx.checkpoint()?;
            ctx.report((100 * i / total) as u8, "Writing STL");
        }
    }
    ctx.report(100, "STL written");
    Ok(())
}

/// Write a mesh to an STL file. An I/O failure surfaces with its reason and
/// never touches in-memory state.
pub fn save_stl(mesh: &Mesh, path: impl AsRef<Path>, ctx: &TaskCtx) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_stl(mesh, &mut writer, ctx)?;
    writer.flush()?;
    log::info!(
        "saved STL {:?}: {} triangles",
        path,
        mesh.triangle_count()
    );
    Ok(())
}
