//! Contact caches that turn per-slot hardware snapshots into an ordered list
//! of down contacts.
//!
//! Each update runs in two passes. The cleanup pass drops slots that lifted
//! during the previous update from the down order, keeping the survivors in
//! place. The update pass then appends newly present slots at the back and
//! refreshes cached state. Removal lags addition by one update, so a consumer
//! still paginating the previous down order never sees a slot vanish.

use core::ops::Range;

use heapless::Vec;

use crate::defs::MAX_SLOTS;

/// Per-slot status reported by the hardware.
pub trait SlotState: Copy + Default + PartialEq {
  fn is_present(&self) -> bool;
}

/// Finger and puck status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ContactState {
  #[default]
  NotPresent,
  Accurate,
  Inaccurate,
  Reserved,
}

impl ContactState {
  pub const fn from_bits(bits: u8) -> Self {
    match bits & 0b11 {
      0 => Self::NotPresent,
      1 => Self::Accurate,
      2 => Self::Inaccurate,
      _ => Self::Reserved,
    }
  }

  pub const fn into_bits(self) -> u8 {
    self as _
  }
}

impl SlotState for ContactState {
  fn is_present(&self) -> bool {
    *self != Self::NotPresent
  }
}

/// Pen status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PenState {
  #[default]
  NotPresent,
  Tip,
  Eraser,
  Reserved,
}

impl PenState {
  pub const fn from_bits(bits: u8) -> Self {
    match bits & 0b11 {
      0 => Self::NotPresent,
      1 => Self::Tip,
      2 => Self::Eraser,
      _ => Self::Reserved,
    }
  }

  pub const fn into_bits(self) -> u8 {
    self as _
  }
}

impl SlotState for PenState {
  fn is_present(&self) -> bool {
    *self != Self::NotPresent
  }
}

/// Sensor coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Position {
  pub x: u16,
  pub y: u16,
}

impl Position {
  pub const fn new(x: u16, y: u16) -> Self {
    Self { x, y }
  }
}

/// Last known information for one hardware slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Slot<S> {
  pub position: Position,
  pub state: S,
}

/// Cache of hardware slots and the order in which they went down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotCache<S> {
  slots: [Slot<S>; MAX_SLOTS],
  valid: u32,
  dirty: u32,
  down_order: Vec<u8, MAX_SLOTS>,
  capacity: usize,
  scan_time: u64,
}

impl<S: SlotState> SlotCache<S> {
  /// Create an empty cache holding at most `capacity` down contacts.
  pub fn new(capacity: usize) -> Self {
    Self {
      slots: [Slot::default(); MAX_SLOTS],
      valid: 0,
      dirty: 0,
      down_order: Vec::new(),
      capacity: capacity.min(MAX_SLOTS),
      scan_time: 0,
    }
  }

  /// Fold one snapshot into the cache. `states` and `positions` are indexed
  /// by hardware slot; entries past [`MAX_SLOTS`] are ignored.
  pub fn update(&mut self, states: &[S], positions: &[Position], now: u64) {
    self.cleanup();

    for (slot, (&state, &position)) in states.iter().zip(positions).take(MAX_SLOTS).enumerate() {
      let bit = 1u32 << slot;

      // Slots beyond capacity are dropped until a place frees up.
      if state.is_present()
        && self.valid & bit == 0
        && self.down_order.len() < self.capacity
        && self.down_order.push(slot as u8).is_ok()
      {
        self.valid |= bit;
      }

      if self.valid & bit != 0 {
        let cached = &mut self.slots[slot];
        cached.state = state;
        if state.is_present() {
          cached.position = position;
        } else {
          self.dirty |= bit;
          self.valid &= !bit;
        }
      }
    }

    self.scan_time = now;
  }

  fn cleanup(&mut self) {
    if self.dirty == 0 {
      return;
    }
    let dirty = self.dirty;
    self.down_order.retain(|&slot| dirty & (1 << slot) == 0);
    self.dirty = 0;
  }

  /// Slots in the order they went down, lifted slots included until the next
  /// update removes them.
  pub fn down_order(&self) -> &[u8] {
    &self.down_order
  }

  pub fn down_count(&self) -> usize {
    self.down_order.len()
  }

  pub fn slot(&self, slot: usize) -> Option<&Slot<S>> {
    self.slots.get(slot)
  }

  /// Whether `slot` is currently down.
  pub fn is_valid(&self, slot: usize) -> bool {
    slot < MAX_SLOTS && self.valid & (1 << slot) != 0
  }

  /// Whether `slot` lifted and waits for removal.
  pub fn is_dirty(&self, slot: usize) -> bool {
    slot < MAX_SLOTS && self.dirty & (1 << slot) != 0
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Time of the last update, in units of 100 µs.
  pub fn scan_time(&self) -> u64 {
    self.scan_time
  }

  /// Forget every contact.
  pub fn invalidate(&mut self) {
    *self = Self::new(self.capacity);
  }

  /// `(slot, cached info)` pairs for `range` of the down order.
  pub(crate) fn down_slots(&self, range: Range<usize>) -> impl Iterator<Item = (u8, &Slot<S>)> + '_ {
    self.down_order.get(range).unwrap_or(&[]).iter().map(move |&slot| (slot, &self.slots[slot as usize]))
  }
}

/// Pagination progress of one down order over fixed-capacity reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Batch {
  reported: usize,
  total: usize,
}

impl Batch {
  pub fn reported(&self) -> usize {
    self.reported
  }

  pub fn total(&self) -> usize {
    self.total
  }

  /// Every contact of the batch has been reported.
  pub fn is_drained(&self) -> bool {
    self.reported >= self.total
  }

  pub fn has_more(&self) -> bool {
    !self.is_drained()
  }

  /// The next page is the first of its batch.
  pub fn is_first(&self) -> bool {
    self.reported == 0
  }

  pub(crate) fn restart(&mut self, total: usize) {
    self.reported = 0;
    self.total = total;
  }

  /// Claim the next page of up to `per_page` entries.
  pub(crate) fn take(&mut self, per_page: usize) -> Range<usize> {
    let start = self.reported;
    let end = (start + per_page).min(self.total);
    self.reported = end;
    start..end
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Snapshot {
    states: [ContactState; MAX_SLOTS],
    positions: [Position; MAX_SLOTS],
  }

  impl Snapshot {
    fn new() -> Self {
      Self { states: [ContactState::NotPresent; MAX_SLOTS], positions: [Position::default(); MAX_SLOTS] }
    }

    fn down(mut self, slot: usize, x: u16, y: u16) -> Self {
      self.states[slot] = ContactState::Accurate;
      self.positions[slot] = Position::new(x, y);
      self
    }

    fn feed(&self, cache: &mut SlotCache<ContactState>) {
      cache.update(&self.states, &self.positions, 0);
    }
  }

  #[test]
  fn same_snapshot_twice_changes_nothing() {
    let mut cache = SlotCache::new(MAX_SLOTS);
    let snapshot = Snapshot::new().down(2, 10, 20).down(5, 30, 40);

    snapshot.feed(&mut cache);
    let before = cache.clone();
    snapshot.feed(&mut cache);

    assert_eq!(cache, before);
    assert_eq!(cache.down_order(), [2, 5]);
  }

  #[test]
  fn down_order_is_first_seen() {
    let mut cache = SlotCache::new(MAX_SLOTS);
    Snapshot::new().down(3, 0, 0).feed(&mut cache);
    Snapshot::new().down(3, 0, 0).down(1, 0, 0).feed(&mut cache);
    Snapshot::new().down(3, 0, 0).down(1, 0, 0).down(4, 0, 0).feed(&mut cache);
    assert_eq!(cache.down_order(), [3, 1, 4]);

    // Slot 1 lifts: still listed while the lift is reported.
    Snapshot::new().down(3, 0, 0).down(4, 0, 0).feed(&mut cache);
    assert_eq!(cache.down_order(), [3, 1, 4]);
    assert!(cache.is_dirty(1));
    assert!(!cache.is_valid(1));

    Snapshot::new().down(3, 0, 0).down(4, 0, 0).feed(&mut cache);
    assert_eq!(cache.down_order(), [3, 4]);
    assert!(!cache.is_dirty(1));
  }

  #[test]
  fn simultaneous_arrivals_join_in_slot_order() {
    let mut cache = SlotCache::new(MAX_SLOTS);
    Snapshot::new().down(7, 0, 0).feed(&mut cache);
    Snapshot::new().down(7, 0, 0).down(4, 0, 0).down(0, 0, 0).feed(&mut cache);
    assert_eq!(cache.down_order(), [7, 0, 4]);
  }

  #[test]
  fn position_freezes_at_lift_off() {
    let mut cache = SlotCache::new(MAX_SLOTS);
    Snapshot::new().down(0, 100, 200).feed(&mut cache);
    Snapshot::new().down(0, 110, 210).feed(&mut cache);

    let mut lifted = Snapshot::new();
    lifted.positions[0] = Position::new(999, 999);
    lifted.feed(&mut cache);

    let slot = cache.slot(0).unwrap();
    assert_eq!(slot.position, Position::new(110, 210));
    assert_eq!(slot.state, ContactState::NotPresent);
  }

  #[test]
  fn capacity_drops_extra_contacts() {
    let mut cache = SlotCache::new(2);
    Snapshot::new().down(0, 0, 0).down(1, 0, 0).down(2, 0, 0).feed(&mut cache);
    assert_eq!(cache.down_order(), [0, 1]);
    assert_eq!(cache.down_count(), 2);
    assert!(!cache.is_valid(2));

    // Slot 0 lifts; its place is only free once cleanup has run.
    Snapshot::new().down(1, 0, 0).down(2, 0, 0).feed(&mut cache);
    assert_eq!(cache.down_order(), [0, 1]);
    Snapshot::new().down(1, 0, 0).down(2, 0, 0).feed(&mut cache);
    assert_eq!(cache.down_order(), [1, 2]);
  }

  #[test]
  fn full_hardware_cap() {
    let mut cache = SlotCache::new(MAX_SLOTS);
    let mut snapshot = Snapshot::new();
    for slot in 0..MAX_SLOTS {
      snapshot = snapshot.down(slot, slot as u16, 0);
    }
    snapshot.feed(&mut cache);
    assert_eq!(cache.down_count(), MAX_SLOTS);
    assert_eq!(cache.down_order().last(), Some(&(MAX_SLOTS as u8 - 1)));
  }

  #[test]
  fn invalidate_forgets_everything() {
    let mut cache = SlotCache::new(4);
    Snapshot::new().down(1, 5, 5).feed(&mut cache);
    cache.invalidate();
    assert_eq!(cache, SlotCache::new(4));
  }

  #[test]
  fn records_scan_time() {
    let mut cache = SlotCache::<PenState>::new(1);
    cache.update(&[PenState::Tip], &[Position::new(1, 1)], 77);
    assert_eq!(cache.scan_time(), 77);
    assert_eq!(cache.down_slots(0..1).map(|(slot, _)| slot).collect::<std::vec::Vec<_>>(), [0]);
  }

  #[test]
  fn batch_pages() {
    let mut batch = Batch::default();
    assert!(batch.is_drained());

    batch.restart(3);
    assert!(batch.is_first());
    assert_eq!(batch.take(2), 0..2);
    assert!(batch.has_more());
    assert!(!batch.is_first());
    assert_eq!(batch.take(2), 2..3);
    assert!(batch.is_drained());
    assert_eq!(batch.take(2), 3..3);
  }

  #[test]
  fn five_contacts_page_in_pairs() {
    let mut batch = Batch::default();
    batch.restart(5);

    let mut steps = std::vec::Vec::new();
    while batch.has_more() {
      batch.take(2);
      steps.push((batch.reported(), batch.has_more()));
    }
    assert_eq!(steps, [(2, true), (4, true), (5, false)]);
  }
}
