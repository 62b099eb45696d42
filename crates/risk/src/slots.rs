use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Account-wide count of OPEN positions, shared by all pair tasks.
///
/// An entry reserves a slot before submission. The reservation is released
/// on drop unless committed, so a failed or rejected entry gives the slot back.
#[derive(Debug)]
pub struct PositionSlots {
    max: usize,
    open: AtomicUsize,
}

impl PositionSlots {
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            max,
            open: AtomicUsize::new(0),
        })
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Claims a slot if one is free.
    pub fn try_reserve(self: &Arc<Self>) -> Option<SlotReservation> {
        self.open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|_| SlotReservation {
                slots: Arc::clone(self),
                committed: false,
            })
    }

    /// Holds a slot for an entry restored as pending at startup. Counts
    /// even when that exceeds `max`; released on drop unless committed.
    pub fn adopt(self: &Arc<Self>) -> SlotReservation {
        self.occupy();
        SlotReservation {
            slots: Arc::clone(self),
            committed: false,
        }
    }

    /// Counts a position restored at startup. May exceed `max`.
    pub fn occupy(&self) {
        self.open.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) {
        let _ = self
            .open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

#[derive(Debug)]
pub struct SlotReservation {
    slots: Arc<PositionSlots>,
    committed: bool,
}

impl SlotReservation {
    /// The entry filled; the slot now belongs to the OPEN position.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if !self.committed {
            self.slots.release();
        }
    }
}
