//! HID-style reports and pagination of the contact caches into them.

use heapless::Vec;

use crate::cache::{Batch, ContactState, PenState, Position, SlotCache, SlotState};
use crate::defs::{PEN_CONTACTS_PER_REPORT, TOUCH_CONTACTS_PER_REPORT};
use crate::f12::DetectedObjects;
use crate::f1a::ButtonState;
use crate::{Clock, Rmi4};

/// Maps sensor coordinates to display coordinates.
pub trait DisplayTransform {
  fn to_display(&self, position: Position) -> Position;
}

/// Sensor orientation and extents relative to the display.
///
/// With zero extents no scaling takes place, so the default is the identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScreenProperties {
  /// Sensor extents, after any axis swap.
  pub sensor_width: u16,
  pub sensor_height: u16,
  pub display_width: u16,
  pub display_height: u16,
  pub swap_axes: bool,
  pub invert_x: bool,
  pub invert_y: bool,
}

impl ScreenProperties {
  pub const fn new() -> Self {
    Self {
      sensor_width: 0,
      sensor_height: 0,
      display_width: 0,
      display_height: 0,
      swap_axes: false,
      invert_x: false,
      invert_y: false,
    }
  }

  pub const fn with_sensor(mut self, width: u16, height: u16) -> Self {
    self.sensor_width = width;
    self.sensor_height = height;
    self
  }

  pub const fn with_display(mut self, width: u16, height: u16) -> Self {
    self.display_width = width;
    self.display_height = height;
    self
  }

  pub const fn with_swap_axes(mut self, swap: bool) -> Self {
    self.swap_axes = swap;
    self
  }

  pub const fn with_invert(mut self, x: bool, y: bool) -> Self {
    self.invert_x = x;
    self.invert_y = y;
    self
  }
}

impl DisplayTransform for ScreenProperties {
  fn to_display(&self, position: Position) -> Position {
    let (x, y) = if self.swap_axes { (position.y, position.x) } else { (position.x, position.y) };
    Position {
      x: map_axis(x, self.sensor_width, self.display_width, self.invert_x),
      y: map_axis(y, self.sensor_height, self.display_height, self.invert_y),
    }
  }
}

fn map_axis(value: u16, sensor: u16, display: u16, invert: bool) -> u16 {
  if sensor == 0 {
    return value;
  }
  let value = value.min(sensor - 1);
  let value = if invert { sensor - 1 - value } else { value };
  if display == 0 {
    return value;
  }
  (value as u32 * display as u32 / sensor as u32) as u16
}

/// One finger in a touch report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Contact {
  /// Hardware slot, stable while the finger stays down.
  pub id: u8,
  pub confidence: bool,
  /// Finger touching; false on the report that announces lift-off.
  pub tip: bool,
  pub x: u16,
  pub y: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchReport {
  pub contacts: Vec<Contact, TOUCH_CONTACTS_PER_REPORT>,
  /// Contacts in the whole batch on its first report, zero on the rest.
  pub contact_count: u8,
  pub scan_time: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PenReport {
  pub in_range: bool,
  pub tip: bool,
  pub eraser: bool,
  pub x: u16,
  pub y: u16,
  pub scan_time: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyReport {
  pub back: bool,
  pub start: bool,
  pub search: bool,
}

impl From<ButtonState> for KeyReport {
  fn from(state: ButtonState) -> Self {
    let [back, start, search] = state.pressed;
    Self { back, start, search }
  }
}

/// Wake gesture event. Alternates between power-down and wake on successive
/// gesture interrupts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakeReport {
  pub power_down: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Report {
  Touch(TouchReport),
  Pen(PenReport),
  Keys(KeyReport),
  Wake(WakeReport),
}

impl TouchReport {
  /// Fill the next page of `batch` from the finger cache.
  pub fn fill<T: DisplayTransform>(cache: &SlotCache<ContactState>, batch: &mut Batch, transform: &T) -> Self {
    let contact_count = if batch.is_first() { batch.total() as u8 } else { 0 };
    let contacts = cache
      .down_slots(batch.take(TOUCH_CONTACTS_PER_REPORT))
      .take(TOUCH_CONTACTS_PER_REPORT)
      .map(|(id, slot)| {
        let Position { x, y } = transform.to_display(slot.position);
        Contact { id, confidence: true, tip: slot.state.is_present(), x, y }
      })
      .collect();
    Self { contacts, contact_count, scan_time: cache.scan_time() }
  }
}

impl PenReport {
  /// Fill the next page of `batch` from the pen cache.
  pub fn fill<T: DisplayTransform>(cache: &SlotCache<PenState>, batch: &mut Batch, transform: &T) -> Self {
    let mut report = Self { scan_time: cache.scan_time(), ..Self::default() };
    for (_, slot) in cache.down_slots(batch.take(PEN_CONTACTS_PER_REPORT)) {
      let Position { x, y } = transform.to_display(slot.position);
      report.x = x;
      report.y = y;
      if slot.state.is_present() {
        report.in_range = true;
        report.tip = true;
        report.eraser = slot.state == PenState::Eraser;
      }
    }
    report
  }
}

impl<I, C> Rmi4<I, C>
where
  C: Clock,
{
  /// Next touch report, refreshing the finger cache from `objects` once the
  /// previous batch is drained. `None` when no finger is down.
  pub(crate) fn next_touch_report(&mut self, objects: Option<&DetectedObjects>) -> Option<TouchReport> {
    if self.touch_batch.is_drained() {
      let objects = objects?;
      self.fingers.update(&objects.fingers, &objects.positions, self.clock.now_100us());
      self.touch_batch.restart(self.fingers.down_count());
      if self.touch_batch.total() == 0 {
        return None;
      }
    }
    Some(TouchReport::fill(&self.fingers, &mut self.touch_batch, &self.config.screen))
  }

  /// Next pen report, refreshing the pen cache the same way.
  pub(crate) fn next_pen_report(&mut self, objects: Option<&DetectedObjects>) -> Option<PenReport> {
    if self.pen_batch.is_drained() {
      let objects = objects?;
      self.pens.update(&objects.pens, &objects.positions, self.clock.now_100us());
      self.pen_batch.restart(self.pens.down_count());
      if self.pen_batch.total() == 0 {
        return None;
      }
    }
    Some(PenReport::fill(&self.pens, &mut self.pen_batch, &self.config.screen))
  }
}
