use crate::brush::BrushId;
use std::collections::HashSet;

/// Brushes whose content is currently being expanded.
///
/// A brush is a member only while its own expansion is on the stack, so a
/// second `enter` for the same id means the content paints itself.
#[derive(Debug, Default)]
pub struct CycleGuard {
    active: HashSet<BrushId>,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `id` is already being expanded.
    pub fn enter(&mut self, id: BrushId) -> bool {
        self.active.insert(id)
    }

    pub fn exit(&mut self, id: BrushId) {
        self.active.remove(&id);
    }

    pub fn is_in_progress(&self, id: BrushId) -> bool {
        self.active.contains(&id)
    }

    pub fn depth(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentry_fails_until_exit() {
        let mut guard = CycleGuard::new();
        let a = BrushId::next();
        let b = BrushId::next();
        assert!(guard.enter(a));
        assert!(guard.is_in_progress(a));
        assert!(guard.enter(b));
        assert!(!guard.enter(a));
        assert_eq!(guard.depth(), 2);
        guard.exit(b);
        guard.exit(a);
        assert!(!guard.is_in_progress(a));
        assert!(guard.enter(a));
    }
}
