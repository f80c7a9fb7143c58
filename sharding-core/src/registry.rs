use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;

/// A read-mostly, write-once-per-key map: the general-purpose building
/// block for "at most one of these per key" bookkeeping (a process-wide
/// registry of named actors, a cache of resolved handles, and similar).
pub struct Registry<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for Registry<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Registry {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.read().get(key).cloned()
    }

    /// Insert `value` for `key` only if nothing is registered there yet.
    /// Returns `false` if a value already existed (the caller should treat
    /// that as "already started").
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        let mut guard = self.inner.write();
        if guard.contains_key(&key) {
            false
        } else {
            guard.insert(key, value);
            true
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_once_per_key() {
        let registry: Registry<String, u32> = Registry::new();
        assert!(registry.insert_if_absent("a".to_string(), 1));
        assert!(!registry.insert_if_absent("a".to_string(), 2));
        assert_eq!(registry.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn remove_then_reinsert() {
        let registry: Registry<String, u32> = Registry::new();
        registry.insert_if_absent("a".to_string(), 1);
        registry.remove(&"a".to_string());
        assert!(registry.insert_if_absent("a".to_string(), 2));
        assert_eq!(registry.get(&"a".to_string()), Some(2));
    }
}
