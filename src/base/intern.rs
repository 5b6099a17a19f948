//! String interner for tag symbols and field names.
//!
//! Uses `SmolStr` for cheap cloning (short names are stored inline, longer
//! ones share one allocation). The interner deduplicates strings so identical
//! symbols compare against the same storage.

use rustc_hash::FxHashSet;
use smol_str::SmolStr;

/// An interned symbol - cheap to clone.
pub type Name = SmolStr;

/// String interner that deduplicates symbols.
///
/// Interning a string returns a `Name` that can be cheaply cloned. If the
/// same string is interned multiple times, the same storage is returned.
#[derive(Debug, Default, Clone)]
pub struct Interner {
    strings: FxHashSet<SmolStr>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning a cheap-to-clone symbol.
    pub fn intern(&mut self, s: &str) -> Name {
        if let Some(existing) = self.strings.get(s) {
            existing.clone()
        } else {
            let name = SmolStr::new(s);
            self.strings.insert(name.clone());
            name
        }
    }

    /// Get an interned symbol if it exists, without creating it.
    pub fn get(&self, s: &str) -> Option<Name> {
        self.strings.get(s).cloned()
    }

    /// Number of unique symbols interned.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut interner = Interner::new();
        let a = interner.intern("upb");
        let b = interner.intern("upb");
        assert_eq!(a, b);
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn get_does_not_create() {
        let interner = Interner::new();
        assert!(interner.get("absent").is_none());
    }
}
