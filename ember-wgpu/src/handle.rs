use std::collections::HashMap;

/// Resources addressed by opaque `u64` handles. Handles start at 1 and are
/// never reused.
pub struct HandleStore<T> {
    items: HashMap<u64, T>,
    next: u64,
}

impl<T> Default for HandleStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleStore<T> {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            next: 1,
        }
    }

    pub fn insert(&mut self, item: T) -> u64 {
        let handle = self.next;
        self.next += 1;
        self.items.insert(handle, item);
        handle
    }

    pub fn get(&self, handle: u64) -> Option<&T> {
        self.items.get(&handle)
    }

    pub fn get_mut(&mut self, handle: u64) -> Option<&mut T> {
        self.items.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: u64) -> Option<T> {
        self.items.remove(&handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_not_reused() {
        let mut store = HandleStore::new();
        let a = store.insert("a");
        let b = store.insert("b");
        assert_ne!(a, 0);
        assert_eq!(store.remove(a), Some("a"));
        let c = store.insert("c");
        assert!(c > b);
        assert_eq!(store.get(a), None);
        assert_eq!(store.get(c), Some(&"c"));
    }
}
