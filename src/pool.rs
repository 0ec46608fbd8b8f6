/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Fixed-capacity, allocation-free buffer pool. All packet and output-vector
//! storage is preallocated at startup and recycled through here so the hot
//! path never touches the global allocator.

use std::sync::Mutex;

struct Inner<T> {
    free: Vec<T>,
}

/// A free-list of preallocated `T`s. `alloc` is O(1); when exhausted it
/// returns `None` rather than growing, since an exhausted pool indicates a
/// configuration or backpressure bug, not a transient condition.
pub struct Pool<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Pool<T> {
    pub fn new(initial: Vec<T>) -> Self {
        Self {
            inner: Mutex::new(Inner { free: initial }),
        }
    }

    pub fn with_capacity(capacity: usize, mut make: impl FnMut() -> T) -> Self {
        let free = (0..capacity).map(|_| make()).collect();
        Self::new(free)
    }

    pub fn alloc(&self) -> Option<T> {
        self.inner.lock().expect("pool lock poisoned").free.pop()
    }

    pub fn free(&self, item: T) {
        self.inner.lock().expect("pool lock poisoned").free.push(item);
    }

    pub fn available(&self) -> usize {
        self.inner.lock().expect("pool lock poisoned").free.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn alloc_and_free_roundtrip() {
        let pool = Pool::with_capacity(2, || 0u32);
        assert_eq!(pool.available(), 2);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());
        pool.free(a);
        pool.free(b);
        assert_eq!(pool.available(), 2);
    }
}
