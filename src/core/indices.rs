use hashbrown::{HashMap, HashSet};

use crate::types::EntityRef;

/// Reverse reference index: referenced record -> records pointing at it.
#[derive(Debug, Default, Clone)]
pub struct RefIndex {
    by_target: HashMap<EntityRef, HashSet<EntityRef>>,
}

impl RefIndex {
    /// Records that `from` points at each of `targets`.
    pub fn link(&mut self, from: &EntityRef, targets: &[EntityRef]) {
        for target in targets {
            self.by_target
                .entry(target.clone())
                .or_default()
                .insert(from.clone());
        }
    }

    /// Forgets that `from` points at each of `targets`.
    pub fn unlink(&mut self, from: &EntityRef, targets: &[EntityRef]) {
        for target in targets {
            if let Some(set) = self.by_target.get_mut(target) {
                set.remove(from);
                if set.is_empty() {
                    self.by_target.remove(target);
                }
            }
        }
    }

    /// Records currently pointing at `target`.
    pub fn referrers<'a>(&'a self, target: &EntityRef) -> impl Iterator<Item = &'a EntityRef> + use<'a> {
        self.by_target.get(target).into_iter().flat_map(|set| set.iter())
    }
}
