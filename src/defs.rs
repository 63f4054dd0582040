/******************************************************************************
 * Synaptics RMI4 - Register map constants                                    *
 * ========================================================================== *
 * Logical addresses are 16 bits wide: the high byte selects the page and the *
 * low byte addresses a register within that page.                            *
*******************************************************************************/

pub(crate) const DEFAULT_ADDRESS: u8 = 0x20;

/// Page-select register, present at the same offset on every page.
pub(crate) const PAGE_SELECT: u8 = 0xFF;

/// First (highest) function descriptor of the page description table.
pub(crate) const PDT_START: u8 = 0xE9;
pub(crate) const PDT_ENTRY_SIZE: u8 = 6;

/// Upper bound of the presence register read at the head of a register descriptor.
pub(crate) const MAX_PRESENCE_BYTES: u8 = 35;

/// Largest register structure the descriptor parser will buffer.
pub(crate) const MAX_STRUCT_SIZE: usize = 512;

/// Largest payload accepted by a single register write.
pub(crate) const MAX_WRITE_SIZE: usize = 31;

/// Maximum number of functions kept in the function table.
pub const MAX_FUNCTIONS: usize = 10;

/// Number of hardware object slots tracked by the contact caches.
pub const MAX_SLOTS: usize = 32;

/// Number of capacitive buttons decoded from function $1A.
pub const MAX_BUTTONS: usize = 3;

/// Contacts carried by one touch report.
pub const TOUCH_CONTACTS_PER_REPORT: usize = 2;

/// Contacts carried by one pen report.
pub const PEN_CONTACTS_PER_REPORT: usize = 1;

/// Interrupt status bits reported by function $01.
pub(crate) mod irq {
  pub(crate) const TOUCH_2D: u8 = 0x04;
  pub(crate) const BUTTON_REVERSED: u8 = 0x10;
  pub(crate) const BUTTON: u8 = 0x20;

  pub(crate) const BUTTONS: u8 = BUTTON | BUTTON_REVERSED;
  pub(crate) const SERVICED: u8 = TOUCH_2D | BUTTONS;
}

/// Function numbers this driver knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FunctionNumber {
  /// $01, device control and interrupt status.
  DeviceControl = 0x01,
  /// $12, 2-D touch sensor.
  Touch2d = 0x12,
  /// $1A, 0-D capacitive buttons.
  Buttons = 0x1A,
  /// $34, flash memory management.
  Flash = 0x34,
  /// $54, analog data reporting.
  Analog = 0x54,
  /// $55, sensor tuning.
  SensorTuning = 0x55,
}

impl FunctionNumber {
  pub const fn into_bits(self) -> u8 {
    self as _
  }

  pub const fn from_bits(bits: u8) -> Option<Self> {
    match bits {
      0x01 => Some(Self::DeviceControl),
      0x12 => Some(Self::Touch2d),
      0x1A => Some(Self::Buttons),
      0x34 => Some(Self::Flash),
      0x54 => Some(Self::Analog),
      0x55 => Some(Self::SensorTuning),
      _ => None,
    }
  }
}
