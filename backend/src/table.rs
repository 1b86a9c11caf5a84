//! Function-pointer indirection table.
//!
//! Maps trampoline values handed to sandboxed code onto callback keys.
//! Released slots are reused before the table grows, so register/unregister
//! cycles keep the table at a bounded size.

use crate::error::BackendError;
use crate::value::CallbackSignature;

#[derive(Debug, Clone)]
struct Slot {
    key: u64,
    sig: CallbackSignature,
}

/// Slot table whose trampolines start at `first`.
#[derive(Debug, Clone)]
pub struct IndirectionTable {
    first: u64,
    slots: Vec<Option<Slot>>,
}

impl IndirectionTable {
    /// `first` is the trampoline value of slot 0. It must be non-zero so no
    /// trampoline collides with the null function pointer.
    pub fn new(first: u64) -> Self {
        Self {
            first: first.max(1),
            slots: Vec::new(),
        }
    }

    /// Insert `key` and return `(trampoline, grew)`. `grew` is true when a
    /// new slot was appended rather than a released one reused.
    pub fn insert(&mut self, key: u64, sig: &CallbackSignature) -> (u64, bool) {
        let slot = Some(Slot {
            key,
            sig: sig.clone(),
        });
        if let Some(i) = self.slots.iter().position(Option::is_none) {
            self.slots[i] = slot;
            return (self.first + i as u64, false);
        }
        self.slots.push(slot);
        (self.first + (self.slots.len() - 1) as u64, true)
    }

    fn index(&self, trampoline: u64) -> Option<usize> {
        let i = usize::try_from(trampoline.checked_sub(self.first)?).ok()?;
        (i < self.slots.len()).then_some(i)
    }

    /// The key and signature behind a trampoline.
    pub fn lookup(&self, trampoline: u64) -> Option<(u64, &CallbackSignature)> {
        let slot = self.slots[self.index(trampoline)?].as_ref()?;
        Some((slot.key, &slot.sig))
    }

    /// Release a trampoline and return the key it mapped to.
    pub fn release(&mut self, trampoline: u64) -> Result<u64, BackendError> {
        let i = self
            .index(trampoline)
            .ok_or(BackendError::InvalidAddress(trampoline))?;
        self.slots[i]
            .take()
            .map(|slot| slot.key)
            .ok_or(BackendError::InvalidAddress(trampoline))
    }

    /// Slots ever handed out.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently in use.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
