//! Edit command representation.
//!
//! Every mutating tool call is recorded as one command holding enough
//! information to invert it. Small edits store the flipped voxel indices
//! (toggling them again is the exact inverse); large edits store a
//! bit-packed copy of the pre-edit mask instead, which is cheaper beyond
//! roughly one flip per 32 voxels.

use crate::core::bits::{pack_bits, unpack_bits};

/// Inverse record for one mutating operation on the mask.
#[derive(Clone, Debug)]
pub struct EditCommand {
    name: &'static str,
    delta: MaskDelta,
}

#[derive(Clone, Debug)]
enum MaskDelta {
    /// Linear indices whose bit changed. Toggling is involutive, so the same
    /// list serves undo and redo.
    Flips(Vec<u32>),
    /// Bit-packed mask state on the other side of this command. Swapped with
    /// the live mask on every apply, so it alternates between the pre- and
    /// post-edit state.
    Snapshot(Vec<u8>),
}

impl EditCommand {
    /// Build the command for a transition `before -> after`. Returns `None`
    /// when nothing changed, so no-op tool calls never enter the history.
    pub fn from_masks(name: &'static str, before: &[u8], after: &[u8]) -> Option<Self> {
        debug_assert_eq!(before.len(), after.len());
        let mut flips: Vec<u32> = Vec::new();
        let sparse_limit = before.len() / 32;
        for (i, (&b, &a)) in before.iter().zip(after.iter()).enumerate() {
            if b != a {
                flips.push(i as u32);
                if flips.len() > sparse_limit {
                    return Some(Self {
                        name,
                        delta: MaskDelta::Snapshot(pack_bits(before)),
                    });
                }
            }
        }
        if flips.is_empty() {
            return None;
        }
        Some(Self {
            name,
            delta: MaskDelta::Flips(flips),
        })
    }

    /// Tool name, for host-facing history display.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Approximate heap footprint, for history accounting.
    pub fn cost_bytes(&self) -> usize {
        match &self.delta {
            MaskDelta::Flips(f) => f.len() * size_of::<u32>(),
            MaskDelta::Snapshot(s) => s.len(),
        }
    }

    /// Move the mask across this command's transition: post -> pre on the
    /// first call, pre -> post on the next. Undo and redo both reduce to one
    /// `apply`.
    pub fn apply(&mut self, mask: &mut [u8]) {
        match &mut self.delta {
            MaskDelta::Flips(flips) => {
                for &i in flips.iter() {
                    mask[i as usize] ^= 1;
                }
            }
            MaskDelta::Snapshot(stored) => {
                let other = unpack_bits(stored, mask.len());
                *stored = pack_bits(mask);
                mask.copy_from_slice(&other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_command_toggles_both_ways() {
        let before = vec![1u8; 64];
        let mut after = before.clone();
        after[3] = 0;
        after[40] = 0;

        let mut cmd = EditCommand::from_masks("erase", &before, &after).unwrap();

        let mut mask = after.clone();
        cmd.apply(&mut mask);
        assert_eq!(mask, before);
        cmd.apply(&mut mask);
        assert_eq!(mask, after);
    }

    #[test]
    fn test_large_edit_falls_back_to_snapshot() {
        let before = vec![1u8; 64];
        let after = vec![0u8; 64];

        let mut cmd = EditCommand::from_masks("scissors", &before, &after).unwrap();
        // A full clear flips every voxel; snapshot storage is 8 bytes here.
        assert!(cmd.cost_bytes() <= 8);

        let mut mask = after.clone();
        cmd.apply(&mut mask);
        assert_eq!(mask, before);
        cmd.apply(&mut mask);
        assert_eq!(mask, after);
    }

    #[test]
    fn test_noop_is_not_a_command() {
        let mask = vec![1u8, 0, 1];
        assert!(EditCommand::from_masks("noop", &mask, &mask).is_none());
    }
}
