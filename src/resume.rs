/// Where a halted batch left off.
///
/// `last_completed_index` only moves forward within a run; it is cleared by
/// [`ResumeState::reset_for_new_run`] after a full success or whenever the
/// batch inputs change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResumeState {
    last_completed_index: Option<usize>,
    was_interrupted: bool,
}

impl ResumeState {
    pub fn last_completed_index(&self) -> Option<usize> {
        self.last_completed_index
    }

    pub fn was_interrupted(&self) -> bool {
        self.was_interrupted
    }

    /// A resume only makes sense after a halted run that finished at least
    /// one item and left at least one behind.
    pub fn can_resume(&self, total_items: usize) -> bool {
        self.was_interrupted
            && self
                .last_completed_index
                .is_some_and(|last| last + 1 < total_items)
    }

    pub fn resume_start_index(&self, total_items: usize) -> usize {
        match self.last_completed_index {
            Some(last) if self.can_resume(total_items) => last + 1,
            _ => 0,
        }
    }

    /// Returns whether the index was accepted.
    pub fn update_completion_index(&mut self, index: usize) -> bool {
        if self.last_completed_index.is_some_and(|last| index <= last) {
            return false;
        }
        self.last_completed_index = Some(index);
        true
    }

    /// Returns whether the flag flipped.
    pub fn mark_interrupted(&mut self) -> bool {
        !std::mem::replace(&mut self.was_interrupted, true)
    }

    /// Returns whether anything was cleared.
    pub fn reset_for_new_run(&mut self) -> bool {
        let changed = *self != Self::default();
        *self = Self::default();
        changed
    }
}
