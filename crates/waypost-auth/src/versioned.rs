//! Generation-tagged state for double-checked refresh.
//!
//! Shared caches here are read under a read lock and refreshed under the
//! write lock. A caller that misses on the read path notes the generation it
//! saw, then takes the write lock. If the generation moved in the meantime,
//! another caller already refreshed and the expensive work (key generation,
//! remote fetch) must not be repeated.
//!
//! ```
//! use waypost_auth::Versioned;
//!
//! let mut slot = Versioned::new(0u32);
//! let seen = slot.generation();
//! slot.replace(7);
//! assert!(slot.changed_since(seen));
//! assert_eq!(*slot.get(), 7);
//! ```

#[derive(Debug)]
pub struct Versioned<T> {
    generation: u64,
    value: T,
}

impl<T> Versioned<T> {
    pub fn new(value: T) -> Self {
        Self {
            generation: 0,
            value,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Install a refreshed value. Every replacement advances the generation.
    pub fn replace(&mut self, value: T) {
        self.value = value;
        self.generation += 1;
    }

    /// True when a refresh happened after `seen` was observed.
    pub fn changed_since(&self, seen: u64) -> bool {
        self.generation != seen
    }
}

impl<T: Default> Default for Versioned<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
