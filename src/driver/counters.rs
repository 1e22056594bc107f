//! Shared counter slots.
//!
//! The conductor allocates a counter per observable position (publication
//! limit, subscriber position, endpoint status) and hands the value cell to
//! data-plane agents and clients. Cells are plain atomics accessed with
//! release/acquire ordering; the conductor owns allocation and labels.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use thiserror::Error;

use crate::core::CounterId;

#[derive(Debug, Error)]
#[error("counters exhausted: all {capacity} slots allocated")]
pub struct CountersExhausted {
    pub capacity: usize,
}

/// Handle on a single counter value cell. Cloning shares the cell.
#[derive(Clone, Debug, Default)]
pub struct Counter {
    value: Arc<AtomicI64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    pub fn increment(&self) -> i64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }
}

struct Slot {
    label: String,
    counter: Counter,
}

/// Conductor-owned counter allocator.
///
/// Slot ids are reused after free, matching a fixed shared-memory buffer.
pub struct Counters {
    slots: Vec<Option<Slot>>,
    free_list: Vec<usize>,
    capacity: usize,
}

impl Counters {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            capacity,
        }
    }

    pub fn allocate(&mut self, label: impl Into<String>) -> Result<CounterId, CountersExhausted> {
        let slot = Slot {
            label: label.into(),
            counter: Counter::new(),
        };

        if let Some(index) = self.free_list.pop() {
            self.slots[index] = Some(slot);
            return Ok(CounterId::new(index as i32));
        }

        if self.slots.len() >= self.capacity {
            return Err(CountersExhausted {
                capacity: self.capacity,
            });
        }
        self.slots.push(Some(slot));
        Ok(CounterId::new((self.slots.len() - 1) as i32))
    }

    pub fn free(&mut self, id: CounterId) {
        let index = id.get() as usize;
        if let Some(slot) = self.slots.get_mut(index)
            && slot.take().is_some()
        {
            self.free_list.push(index);
        }
    }

    pub fn counter(&self, id: CounterId) -> Option<Counter> {
        self.slots
            .get(id.get() as usize)
            .and_then(|slot| slot.as_ref())
            .map(|slot| slot.counter.clone())
    }

    pub fn label(&self, id: CounterId) -> Option<&str> {
        self.slots
            .get(id.get() as usize)
            .and_then(|slot| slot.as_ref())
            .map(|slot| slot.label.as_str())
    }

    pub fn allocated(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_and_reuses_slots() {
        let mut counters = Counters::new(4);
        let a = counters.allocate("a").unwrap();
        let b = counters.allocate("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(counters.label(a), Some("a"));

        counters.free(a);
        assert_eq!(counters.counter(a).map(|_| ()), None);

        let c = counters.allocate("c").unwrap();
        assert_eq!(c, a); // freed slot reused
        assert_eq!(counters.allocated(), 2);
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut counters = Counters::new(1);
        counters.allocate("only").unwrap();
        assert!(counters.allocate("next").is_err());
    }

    #[test]
    fn handles_share_the_cell() {
        let mut counters = Counters::new(2);
        let id = counters.allocate("pos").unwrap();
        let writer = counters.counter(id).unwrap();
        let reader = counters.counter(id).unwrap();

        writer.set(524_352);
        assert_eq!(reader.get(), 524_352);
        assert_eq!(reader.increment(), 524_353);
    }

    #[test]
    fn double_free_is_harmless() {
        let mut counters = Counters::new(2);
        let id = counters.allocate("x").unwrap();
        counters.free(id);
        counters.free(id);
        counters.allocate("y").unwrap();
        counters.allocate("z").unwrap();
        assert_eq!(counters.allocated(), 2);
    }
}
