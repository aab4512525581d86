//! Versioned binary container for a [`VoxelVolume`] (`.3dr` files).
//!
//! Layout: magic `T3DR`, a `u16` format version, then the geometry header
//! (dims, spacing, origin, modality, description), then an LZ4
//! size-prepended payload holding the intensity array followed by the
//! visibility mask packed 8 voxels per byte. Readers reject unknown
//! versions; bumping the version is the compatibility mechanism for future
//! additions.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::core::bits::{pack_bits, unpack_bits};
use crate::core::error::Error;
use crate::core::progress::TaskCtx;
use crate::core::types::{Result, UVec3, Vec3};
use crate::volume::{Modality, VoxelVolume};

const MAGIC: &[u8; 4] = b"T3DR";
const VERSION: u16 = 1;

/// Serialize a volume into a writer.
pub fn write_volume(volume: &VoxelVolume, writer: &mut impl Write, ctx: &TaskCtx) -> Result<()> {
    if volume.is_empty() {
        return Err(Error::NoVolume);
    }
    ctx.report(0, "Encoding volume");

    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;

    let dims = volume.dims();
    for d in [dims.x, dims.y, dims.z] {
        writer.write_all(&d.to_le_bytes())?;
    }
    let spacing = volume.spacing();
    for s in [spacing.x, spacing.y, spacing.z] {
        writer.write_all(&(s as f64).to_le_bytes())?;
    }
    let origin = volume.origin();
    for o in [origin.x, origin.y, origin.z] {
        writer.write_all(&(o as f64).to_le_bytes())?;
    }
    writer.write_all(&[match volume.modality() {
        Modality::Ct => 0u8,
        Modality::Mr => 1u8,
    }])?;
    let desc = volume.description().as_bytes();
    writer.write_all(&(desc.len() as u32).to_le_bytes())?;
    writer.write_all(desc)?;

    ctx.checkpoint()?;
    let mut payload = Vec::with_capacity(volume.len() * 2 + volume.len() / 8 + 8);
    for &v in volume.intensities() {
        payload.extend_from_slice(&v.to_le_bytes());
    }
    payload.extend_from_slice(&pack_bits(volume.mask()));

    ctx.report(50, "Compressing");
    let compressed = lz4_flex::compress_prepend_size(&payload);
    writer.write_all(&compressed)?;
    ctx.report(100, "Volume encoded");
    Ok(())
}

/// Deserialize a volume from a reader.
pub fn read_volume(reader: &mut impl Read, ctx: &TaskCtx) -> Result<VoxelVolume> {
    ctx.report(0, "Reading volume");

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::DecodeFailure(format!(
            "bad magic {magic:02x?}, not a volume container"
        )));
    }

    let version = read_u16(reader)?;
    if version != VERSION {
        return Err(Error::DecodeFailure(format!(
            "unsupported container version {version}"
        )));
    }

    let dims = UVec3::new(read_u32(reader)?, read_u32(reader)?, read_u32(reader)?);
    let spacing = Vec3::new(
        read_f64(reader)? as f32,
        read_f64(reader)? as f32,
        read_f64(reader)? as f32,
    );
    let origin = Vec3::new(
        read_f64(reader)? as f32,
        read_f64(reader)? as f32,
        read_f64(reader)? as f32,
    );

    let mut modality_byte = [0u8; 1];
    reader.read_exact(&mut modality_byte)?;
    let modality = match modality_byte[0] {
        0 => Modality::Ct,
        1 => Modality::Mr,
        other => {
            return Err(Error::DecodeFailure(format!(
                "unknown modality tag {other}"
            )));
        }
    };

    let desc_len = read_u32(reader)? as usize;
    let mut desc = vec![0u8; desc_len];
    reader.read_exact(&mut desc)?;
    let description = String::from_utf8(desc)
        .map_err(|e| Error::DecodeFailure(format!("description not UTF-8: {e}")))?;

    ctx.checkpoint()?;
    let mut compressed = Vec::new();
    reader.read_to_end(&mut compressed)?;
    ctx.report(40, "Decompressing");
    let payload = lz4_flex::decompress_size_prepended(&compressed)
        .map_err(|e| Error::DecodeFailure(format!("LZ4 decompression failed: {e}")))?;

    let n = dims.x as usize * dims.y as usize * dims.z as usize;
    let intensity_bytes = n * 2;
    let mask_bytes = n.div_ceil(8);
    if payload.len() != intensity_bytes + mask_bytes {
        return Err(Error::DecodeFailure(format!(
            "payload is {} bytes, expected {} for extent {dims:?}",
            payload.len(),
            intensity_bytes + mask_bytes
        )));
    }

    ctx.report(70, "Rebuilding arrays");
    let intensity: Vec<i16> = payload[..intensity_bytes]
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let mask = unpack_bits(&payload[intensity_bytes..], n);

    let mut volume = VoxelVolume::from_parts(dims, spacing, origin, intensity, mask)?;
    volume.set_modality(modality);
    volume.set_description(description);
    ctx.report(100, "Volume loaded");
    Ok(volume)
}

/// Write a volume container file. I/O failures surface with their reason and
/// never corrupt the in-memory volume.
pub fn save_volume(volume: &VoxelVolume, path: impl AsRef<Path>, ctx: &TaskCtx) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_volume(volume, &mut writer, ctx)?;
    writer.flush()?;
    log::info!("saved volume container {:?}", path);
    Ok(())
}

/// Load a volume container file.
pub fn load_volume(path: impl AsRef<Path>, ctx: &TaskCtx) -> Result<VoxelVolume> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);
    read_volume(&mut reader, ctx)
}

fn read_u16(reader: &mut impl Read) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f64(reader: &mut impl Read) -> Result<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_volume() -> VoxelVolume {
        let dims = UVec3::new(5, 4, 3);
        let n = 60usize;
        let intensity: Vec<i16> = (0..n).map(|i| (i as i16) * 7 - 100).collect();
        let mask: Vec<u8> = (0..n).map(|i| (i % 3 == 0) as u8).collect();
        let mut v = VoxelVolume::from_parts(
            dims,
            Vec3::new(0.7, 0.7, 2.5),
            Vec3::new(-12.0, 3.5, 0.0),
            intensity,
            mask,
        )
        .unwrap();
        v.set_modality(Modality::Mr);
        v.set_description("head series, edited");
        v
    }

    fn assert_volumes_equal(a: &VoxelVolume, b: &VoxelVolume) {
        assert_eq!(a.dims(), b.dims());
        assert_eq!(a.spacing(), b.spacing());
        assert_eq!(a.origin(), b.origin());
        assert_eq!(a.intensities(), b.intensities());
        assert_eq!(a.mask(), b.mask());
        assert_eq!(a.modality(), b.modality());
        assert_eq!(a.description(), b.description());
    }

    #[test]
    fn test_roundtrip_in_memory() {
        let volume = sample_volume();
        let mut buffer = Vec::new();
        write_volume(&volume, &mut buffer, &TaskCtx::silent()).unwrap();

        let restored = read_volume(&mut buffer.as_slice(), &TaskCtx::silent()).unwrap();
        assert_volumes_equal(&volume, &restored);
    }

    #[test]
    fn test_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("head.3dr");

        let volume = sample_volume();
        save_volume(&volume, &path, &TaskCtx::silent()).unwrap();
        let restored = load_volume(&path, &TaskCtx::silent()).unwrap();
        assert_volumes_equal(&volume, &restored);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let volume = sample_volume();
        let mut buffer = Vec::new();
        write_volume(&volume, &mut buffer, &TaskCtx::silent()).unwrap();
        buffer[0] = b'X';

        assert!(matches!(
            read_volume(&mut buffer.as_slice(), &TaskCtx::silent()),
            Err(Error::DecodeFailure(_))
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let volume = sample_volume();
        let mut buffer = Vec::new();
        write_volume(&volume, &mut buffer, &TaskCtx::silent()).unwrap();
        buffer[4] = 0xFF;
        buffer[5] = 0xFF;

        assert!(matches!(
            read_volume(&mut buffer.as_slice(), &TaskCtx::silent()),
            Err(Error::DecodeFailure(_))
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let volume = sample_volume();
        let mut buffer = Vec::new();
        write_volume(&volume, &mut buffer, &TaskCtx::silent()).unwrap();
        buffer.truncate(buffer.len() - 10);

        assert!(read_volume(&mut buffer.as_slice(), &TaskCtx::silent()).is_err());
    }

    #[test]
    fn test_empty_volume_rejected() {
        let mut buffer = Vec::new();
        assert!(matches!(
            write_volume(&VoxelVolume::empty(), &mut buffer, &TaskCtx::silent()),
            Err(Error::NoVolume)
        ));
    }
}
