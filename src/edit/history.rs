//! Bounded undo/redo stacks.
//!
//! Commands are stored by value in two deques. Recording a new command
//! clears the redo side; exceeding the depth bound evicts the oldest undo
//! entry, which forecloses further-back history but never touches the live
//! mask.

use std::collections::VecDeque;

use super::command::EditCommand;

pub const DEFAULT_DEPTH: usize = 16;

#[derive(Debug, Default)]
pub struct EditHistory {
    undo: VecDeque<EditCommand>,
    redo: VecDeque<EditCommand>,
    depth: usize,
}

impl EditHistory {
    pub fn new(depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            depth: depth.max(1),
        }
    }

    /// Record a completed edit. Evicts the oldest entry beyond the depth
    /// bound and invalidates the redo branch.
    pub fn record(&mut self, command: EditCommand) {
        self.undo.push_back(command);
        while self.undo.len() > self.depth {
            let evicted = self.undo.pop_front();
            if let Some(cmd) = evicted {
                log::debug!("history depth reached, dropping oldest '{}'", cmd.name());
            }
        }
        self.redo.clear();
    }

    /// Revert the most recent edit. Returns the tool name, or `None` when
    /// there is nothing to undo.
    pub fn undo(&mut self, mask: &mut [u8]) -> Option<&'static str> {
        let mut cmd = self.undo.pop_back()?;
        cmd.apply(mask);
        let name = cmd.name();
        self.redo.push_back(cmd);
        Some(name)
    }

    /// Re-apply the most recently undone edit.
    pub fn redo(&mut self, mask: &mut [u8]) -> Option<&'static str> {
        let mut cmd = self.redo.pop_back()?;
        cmd.apply(mask);
        let name = cmd.name();
        self.undo.push_back(cmd);
        Some(name)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Total heap held by recorded commands.
    pub fn cost_bytes(&self) -> usize {
        self.undo
            .iter()
            .chain(self.redo.iter())
            .map(EditCommand::cost_bytes)
            .sum()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flip(mask: &mut [u8], i: usize) -> EditCommand {
        let before = mask.to_vec();
        mask[i] ^= 1;
        EditCommand::from_masks("flip", &before, mask).unwrap()
    }

    #[test]
    fn test_undo_redo_inverse_law() {
        let mut history = EditHistory::new(8);
        let initial = vec![0u8; 16];
        let mut mask = initial.clone();

        for i in 0..4 {
            let cmd = flip(&mut mask, i);
            history.record(cmd);
        }
        let edited = mask.clone();

        for _ in 0..4 {
            assert!(history.undo(&mut mask).is_some());
        }
        assert_eq!(mask, initial);
        assert!(!history.can_undo());

        for _ in 0..4 {
            assert!(history.redo(&mut mask).is_some());
        }
        assert_eq!(mask, edited);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_record_clears_redo() {
        let mut history = EditHistory::new(8);
        let mut mask = vec![0u8; 4];

        let cmd = flip(&mut mask, 0);
        history.record(cmd);
        history.undo(&mut mask);
        assert!(history.can_redo());

        let cmd = flip(&mut mask, 1);
        history.record(cmd);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_depth_bound_evicts_oldest() {
        let mut history = EditHistory::new(2);
        let mut mask = vec![0u8; 8];

        for i in 0..5 {
            let cmd = flip(&mut mask, i);
            history.record(cmd);
        }
        assert_eq!(history.undo_depth(), 2);

        // Only the two newest edits can be undone.
        assert!(history.undo(&mut mask).is_some());
        assert!(history.undo(&mut mask).is_some());
        assert!(history.undo(&mut mask).is_none());
        assert_eq!(mask, vec![1, 1, 1, 0, 0, 0, 0, 0]);
    }
}
