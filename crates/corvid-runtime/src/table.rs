//! Open-addressed hash table keyed by interned strings.
//!
//! One implementation backs the globals map, every class's method table, every
//! instance's field table, and (via `find_string`) the string interner itself.
//! Linear probing, tombstone deletes, grow at 0.75 load factor.

use crate::gc::Heap;
use crate::object::{GcRef, ObjString};
use crate::value::Value;

const INITIAL_CAPACITY: usize = 8;
const MAX_LOAD: f64 = 0.75;

#[derive(Clone, Copy)]
struct Entry {
    key: Option<GcRef<ObjString>>,
    /// Cached so probing never needs a `Heap` borrow (the key's own hash, stored
    /// alongside it to avoid a self-referential table-inside-heap dependency).
    hash: u32,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry { key: None, hash: 0, value: Value::Nil }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Bool(true))
    }
}

#[derive(Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Count of live (non-tombstone) keys.
    live: usize,
}

impl Table {
    pub fn new() -> Self {
        Table { entries: Vec::new(), live: 0 }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn find_slot(entries: &[Entry], key: GcRef<ObjString>, hash: u32) -> usize {
        let cap = entries.len();
        let mut index = (hash as usize) & (cap - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                None if entry.is_tombstone() => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                None => return tombstone.unwrap_or(index),
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) & (cap - 1);
        }
    }

    fn grow(&mut self) {
        let new_cap = (self.entries.len() * 2).max(INITIAL_CAPACITY);
        let mut new_entries = vec![Entry::empty(); new_cap];
        let mut live = 0;
        for entry in self.entries.drain(..) {
            if let Some(k) = entry.key {
                let idx = Self::find_slot(&new_entries, k, entry.hash);
                new_entries[idx] = entry;
                live += 1;
            }
        }
        self.entries = new_entries;
        self.live = live;
    }

    fn ensure_capacity(&mut self) {
        if self.entries.is_empty()
            || (self.live + 1) as f64 > self.entries.len() as f64 * MAX_LOAD
        {
            self.grow();
        }
    }

    /// Inserts or overwrites `key`. Returns `true` if `key` was not already
    /// present — `SET_GLOBAL`'s define-before-assign check relies on this.
    pub fn set(&mut self, key: GcRef<ObjString>, hash: u32, value: Value) -> bool {
        self.ensure_capacity();
        let idx = Self::find_slot(&self.entries, key, hash);
        let is_new_key = self.entries[idx].key.is_none() && !self.entries[idx].is_tombstone();
        if is_new_key {
            self.live += 1;
        }
        self.entries[idx] = Entry { key: Some(key), hash, value };
        is_new_key
    }

    pub fn get(&self, key: GcRef<ObjString>, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = Self::find_slot(&self.entries, key, hash);
        self.entries[idx].key.map(|_| self.entries[idx].value)
    }

    pub fn delete(&mut self, key: GcRef<ObjString>, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let idx = Self::find_slot(&self.entries, key, hash);
        if self.entries[idx].key.is_none() {
            return false;
        }
        self.entries[idx] = Entry { key: None, hash: 0, value: Value::Bool(true) };
        self.live -= 1;
        true
    }

    /// Raw byte/hash lookup used only by the interner, before a candidate
    /// `ObjString` exists to key the probe with.
    pub fn find_string(&self, heap: &Heap, bytes: &[u8], hash: u32) -> Option<GcRef<ObjString>> {
        if self.entries.is_empty() {
            return None;
        }
        let cap = self.entries.len();
        let mut index = (hash as usize) & (cap - 1);
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None if !entry.is_tombstone() => return None,
                None => {}
                Some(k) => {
                    let s = heap.string(k);
                    if s.hash == hash && s.bytes.as_ref() == bytes {
                        return Some(k);
                    }
                }
            }
            index = (index + 1) & (cap - 1);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (GcRef<ObjString>, Value)> + '_ {
        self.entries.iter().filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    /// Clears entries whose key is unmarked, turning them into tombstones. Called
    /// on the string interner just before sweep so dead strings don't linger as
    /// dangling references once their backing `Obj` slot is freed.
    pub fn remove_unmarked(&mut self, heap: &Heap) {
        for entry in self.entries.iter_mut() {
            if let Some(k) = entry.key {
                if !heap.is_marked(k.erase()) {
                    *entry = Entry { key: None, hash: 0, value: Value::Bool(true) };
                    self.live -= 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::Heap;

    #[test]
    fn set_get_roundtrip() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let key = heap.intern(b"answer".to_vec());
        let hash = heap.string(key).hash;
        assert!(table.set(key, hash, Value::Number(42.0)));
        assert_eq!(table.get(key, hash), Some(Value::Number(42.0)));
    }

    #[test]
    fn delete_then_set_reports_new_key() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let key = heap.intern(b"x".to_vec());
        let hash = heap.string(key).hash;
        table.set(key, hash, Value::Nil);
        assert!(table.delete(key, hash));
        assert_eq!(table.get(key, hash), None);
        assert!(table.set(key, hash, Value::Bool(true)));
    }

    #[test]
    fn grows_past_many_entries() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        for i in 0..200 {
            let key = heap.intern(format!("key{i}").into_bytes());
            let hash = heap.string(key).hash;
            table.set(key, hash, Value::Number(i as f64));
        }
        assert_eq!(table.len(), 200);
        for i in 0..200 {
            let key = heap.intern(format!("key{i}").into_bytes());
            let hash = heap.string(key).hash;
            assert_eq!(table.get(key, hash), Some(Value::Number(i as f64)));
        }
    }
}
