//! Editing session: one volume, its history, and the pre-edit snapshot.
//!
//! The session is the only writer of the mask. Each tool call computes a
//! candidate mask through [`tools`], is validated (a destructive edit may
//! never leave the mask empty), committed atomically, and recorded as an
//! [`EditCommand`]. A failed tool leaves the volume untouched.

use crate::connect::Neighborhood;
use crate::core::error::Error;
use crate::core::progress::TaskCtx;
use crate::core::types::{Result, UVec3};
use crate::volume::VoxelVolume;

use super::command::EditCommand;
use super::history::{DEFAULT_DEPTH, EditHistory};
use super::tools::{self, BoxRegion, ProjectedLoop, ScissorsMode, SmartDeleteOptions};

pub struct EditSession {
    volume: VoxelVolume,
    history: EditHistory,
    /// Mask as it was before the first destructive edit; recovery tools
    /// restore against this.
    original: Option<Vec<u8>>,
}

impl EditSession {
    pub fn new(volume: VoxelVolume) -> Self {
        Self::with_history_depth(volume, DEFAULT_DEPTH)
    }

    pub fn with_history_depth(volume: VoxelVolume, depth: usize) -> Self {
        Self {
            volume,
            history: EditHistory::new(depth),
            original: None,
        }
    }

    pub fn volume(&self) -> &VoxelVolume {
        &self.volume
    }

    pub fn into_volume(self) -> VoxelVolume {
        self.volume
    }

    /// Replace the volume wholesale (new series loaded). Drops history and
    /// snapshot, which referred to the old extent.
    pub fn replace_volume(&mut self, volume: VoxelVolume) {
        self.volume = volume;
        self.history.clear();
        self.original = None;
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Revert the latest edit; returns the tool name that was undone.
    pub fn undo(&mut self) -> Option<&'static str> {
        self.history.undo(self.volume.mask_mut())
    }

    pub fn redo(&mut self) -> Option<&'static str> {
        self.history.redo(self.volume.mask_mut())
    }

    /// Forget the pre-edit snapshot; the next destructive edit captures a
    /// fresh one.
    pub fn clear_snapshot(&mut self) {
        self.original = None;
    }

    fn ensure_snapshot(&mut self) {
        if self.original.is_none() {
            self.original = Some(self.volume.mask().to_vec());
        }
    }

    fn guard(&self) -> Result<()> {
        if self.volume.is_empty() {
            return Err(Error::NoVolume);
        }
        Ok(())
    }

    /// Validate and commit a tool result. Returns `false` for a no-op.
    fn commit(&mut self, name: &'static str, new_mask: Vec<u8>) -> Result<bool> {
        if !new_mask.iter().any(|&v| v != 0) {
            return Err(Error::EmptyResult);
        }
        let Some(command) = EditCommand::from_masks(name, self.volume.mask(), &new_mask) else {
            log::debug!("{name}: no voxels changed, nothing recorded");
            return Ok(false);
        };
        log::info!("{name}: committed ({} bytes of history)", command.cost_bytes());
        self.volume.set_mask(new_mask)?;
        self.history.record(command);
        Ok(true)
    }

    pub fn scissors(&mut self, cut: &ProjectedLoop, mode: ScissorsMode) -> Result<bool> {
        self.guard()?;
        self.ensure_snapshot();
        let mask = tools::scissors(&self.volume, cut, mode)?;
        self.commit("scissors", mask)
    }

    pub fn smart_delete(&mut self, seed: UVec3, opts: &SmartDeleteOptions) -> Result<bool> {
        self.guard()?;
        self.ensure_snapshot();
        let mask = tools::smart_delete(&self.volume, seed, opts)?;
        self.commit("smart delete", mask)
    }

    pub fn erase(&mut self, center: UVec3, radius_voxels: u32) -> Result<bool> {
        self.guard()?;
        self.ensure_snapshot();
        let mask = tools::erase_sphere(&self.volume, center, radius_voxels)?;
        self.commit("voxel eraser", mask)
    }

    /// Brush-restore against the pre-edit snapshot. A no-op when nothing was
    /// ever erased.
    pub fn recover(&mut self, center: UVec3, radius_voxels: u32) -> Result<bool> {
        self.guard()?;
        let Some(snapshot) = self.original.clone() else {
            log::debug!("voxel recovery: no snapshot captured yet");
            return Ok(false);
        };
        let mask = tools::recover_sphere(&self.volume, center, radius_voxels, &snapshot)?;
        self.commit("voxel recovery", mask)
    }

    pub fn add_base(&mut self, slab: BoxRegion) -> Result<bool> {
        self.guard()?;
        let mask = tools::add_base(&self.volume, slab)?;
        self.commit("add base", mask)
    }

    pub fn fill_void(&mut self, region: Option<BoxRegion>, ctx: &TaskCtx) -> Result<bool> {
        self.guard()?;
        let mask = tools::fill_void(&self.volume, region, ctx)?;
        self.commit("fill the void", mask)
    }

    pub fn total_smoothing(&mut self, ctx: &TaskCtx) -> Result<bool> {
        self.guard()?;
        self.ensure_snapshot();
        let mask = tools::total_smoothing(&self.volume, ctx)?;
        self.commit("total smoothing", mask)
    }

    pub fn threshold_visibility(&mut self, lo: i16, hi: i16) -> Result<bool> {
        self.guard()?;
        self.ensure_snapshot();
        let mask = tools::threshold_visibility(&self.volume, lo, hi)?;
        self.commit("threshold", mask)
    }

    pub fn keep_component(&mut self, seed: UVec3, neighborhood: Neighborhood) -> Result<bool> {
        self.guard()?;
        self.ensure_snapshot();
        let mask = tools::keep_component(&self.volume, seed, neighborhood)?;
        self.commit("remove unconnected", mask)
    }

    pub fn remove_component(&mut self, seed: UVec3, neighborhood: Neighborhood) -> Result<bool> {
        self.guard()?;
        self.ensure_snapshot();
        let mask = tools::remove_component(&self.volume, seed, neighborhood)?;
        self.commit("remove selected", mask)
    }

    pub fn peel_recovery(&mut self, layers: usize) -> Result<bool> {
        self.guard()?;
        let Some(snapshot) = self.original.clone() else {
            log::debug!("peel recovery: no snapshot captured yet");
            return Ok(false);
        };
        let mask = tools::peel_recovery(&self.volume, &snapshot, layers)?;
        self.commit("peel recovery", mask)
    }

    pub fn smart_peel(&mut self, seed: UVec3, drop_frac: f32, max_iters: usize) -> Result<bool> {
        self.guard()?;
        self.ensure_snapshot();
        let mask = tools::smart_peel(&self.volume, seed, drop_frac, max_iters)?;
        self.commit("smart peel", mask)
    }

    /// Shell of the current mask, for inspection or export. Read-only, so it
    /// is not recorded in history.
    pub fn surface_map(&self, neighborhood: Neighborhood) -> Result<Vec<u8>> {
        self.guard()?;
        Ok(tools::surface_map(&self.volume, neighborhood))
    }
}
