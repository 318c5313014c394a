//! Term ordering for study sessions

use rand::seq::SliceRandom;
use rand::Rng;

/// Shuffled copy of `order`; the input is left untouched
pub fn shuffled(order: &[String]) -> Vec<String> {
    shuffled_with(order, &mut rand::thread_rng())
}

pub fn shuffled_with<R: Rng + ?Sized>(order: &[String], rng: &mut R) -> Vec<String> {
    let mut copy = order.to_vec();
    copy.shuffle(rng);
    copy
}

/// Restrict `order` to starred terms, keeping all terms when none of them
/// are starred
pub fn starred_only(order: &[String], starred: &[String]) -> Vec<String> {
    let filtered: Vec<String> = order
        .iter()
        .filter(|id| starred.contains(id))
        .cloned()
        .collect();
    if filtered.is_empty() {
        order.to_vec()
    } else {
        filtered
    }
}

/// Base order snapshot plus the working order a session walks through
#[derive(Debug, Clone, Default)]
pub struct TermOrder {
    base: Vec<String>,
    working: Vec<String>,
    shuffled: bool,
}

impl TermOrder {
    /// Working order is a shuffled copy of `base` when `shuffle` is set,
    /// otherwise an unshared copy of it
    pub fn new(base: Vec<String>, shuffle: bool) -> Self {
        let working = if shuffle { shuffled(&base) } else { base.clone() };
        Self {
            base,
            working,
            shuffled: shuffle,
        }
    }

    /// Turning shuffle on reshuffles the current working order rather than
    /// the base order; turning it off keeps the current order as is
    pub fn set_shuffle(&mut self, enabled: bool) {
        if enabled {
            self.working = shuffled(&self.working);
        }
        self.shuffled = enabled;
    }

    pub fn base(&self) -> &[String] {
        &self.base
    }

    pub fn working(&self) -> &[String] {
        &self.working
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled
    }

    pub fn contains(&self, term_id: &str) -> bool {
        self.working.iter().any(|id| id == term_id)
    }

    pub fn len(&self) -> usize {
        self.working.len()
    }

    pub fn is_empty(&self) -> bool {
        self.working.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_shuffle_preserves_membership() {
        let mut rng = StdRng::seed_from_u64(7);
        for size in [0usize, 1, 2, 5, 40] {
            let order: Vec<String> = (0..size).map(|i| format!("t{}", i)).collect();
            for _ in 0..20 {
                let result = shuffled_with(&order, &mut rng);
                assert_eq!(result.len(), order.len());
                let a: HashSet<&String> = result.iter().collect();
                let b: HashSet<&String> = order.iter().collect();
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_no_shuffle_keeps_base_order() {
        let order = TermOrder::new(ids(&["a", "b", "c"]), false);
        assert_eq!(order.working(), ids(&["a", "b", "c"]).as_slice());
    }

    #[test]
    fn test_shuffle_does_not_touch_base() {
        let base = ids(&["a", "b", "c", "d", "e", "f"]);
        let mut order = TermOrder::new(base.clone(), true);
        order.set_shuffle(true);
        assert_eq!(order.base(), base.as_slice());
    }

    #[test]
    fn test_toggle_reshuffles_working_order() {
        let mut order = TermOrder::new(ids(&["a", "b", "c"]), false);
        order.working = ids(&["c", "a", "b"]);
        order.base = ids(&["a", "b", "c"]);

        order.set_shuffle(true);
        let mut sorted = order.working().to_vec();
        sorted.sort();
        assert_eq!(sorted, ids(&["a", "b", "c"]));
        assert!(order.is_shuffled());

        // Turning it off keeps whatever order is current
        let current = order.working().to_vec();
        order.set_shuffle(false);
        assert_eq!(order.working(), current.as_slice());
    }

    #[test]
    fn test_starred_only_falls_back() {
        let order = ids(&["a", "b", "c"]);
        assert_eq!(starred_only(&order, &ids(&["c", "a"])), ids(&["a", "c"]));
        assert_eq!(starred_only(&order, &[]), order);
        assert_eq!(starred_only(&order, &ids(&["zzz"])), order);
    }
}
