//! Level-lifetime string interning.
//!
//! Strings handed over by scripts only live as long as the Lua value they
//! came from, but entity fields keep them for the whole level. The pool keeps
//! one shared copy per distinct text so every entity storing that text points
//! at the same allocation.

use std::rc::Rc;

const INITIAL_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct StringPool {
    entries: Vec<Rc<str>>,
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StringPool {
    pub fn new() -> Self {
        StringPool {
            entries: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Returns the pooled copy of `text`, adding one if it is not present yet.
    pub fn intern(&mut self, text: &str) -> Rc<str> {
        match self
            .entries
            .binary_search_by(|entry| entry.as_ref().cmp(text))
        {
            Ok(found) => self.entries[found].clone(),
            Err(slot) => {
                let copy: Rc<str> = Rc::from(text);
                self.entries.insert(slot, copy.clone());
                copy
            }
        }
    }

    /// Optional texts pass through untouched when absent.
    pub fn intern_opt(&mut self, text: Option<&str>) -> Option<Rc<str>> {
        text.map(|text| self.intern(text))
    }

    /// Forgets every pooled entry. Entities that still hold a string keep it
    /// alive on their own; the pool only drops its index.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::StringPool;
    use std::rc::Rc;

    #[test]
    fn interning_same_text_returns_same_allocation() {
        let mut pool = StringPool::new();
        let first = pool.intern("door_open");
        let owned = String::from("door_open");
        let second = pool.intern(&owned);
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn distinct_texts_never_alias() {
        let mut pool = StringPool::new();
        let names = ["b", "a", "c", "ab", "A"];
        let interned: Vec<_> = names.iter().map(|name| pool.intern(name)).collect();
        for (i, left) in interned.iter().enumerate() {
            for right in interned.iter().skip(i + 1) {
                assert!(!Rc::ptr_eq(left, right));
            }
        }
        for (name, value) in names.iter().zip(&interned) {
            assert_eq!(&**value, *name);
            assert!(Rc::ptr_eq(value, &pool.intern(name)));
        }
        assert_eq!(pool.len(), names.len());
    }

    #[test]
    fn absent_text_stays_absent() {
        let mut pool = StringPool::new();
        assert!(pool.intern_opt(None).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn reset_drops_index_but_not_held_strings() {
        let mut pool = StringPool::new();
        let held = pool.intern("relay");
        pool.reset();
        assert!(pool.is_empty());
        assert_eq!(&*held, "relay");
        let fresh = pool.intern("relay");
        assert!(!Rc::ptr_eq(&held, &fresh));
    }
}
