#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Async, `no_std` protocol core for Synaptics RMI4 touch controllers.
//!
//! RMI4 devices describe themselves: a page description table lists the
//! logical functions the controller implements, and newer functions publish
//! register descriptors that spell out which query, control and data
//! registers exist and how large they are. This crate walks that map and
//! keeps per-contact state so a host driver can turn raw object snapshots
//! into an ordered stream of HID-style reports.
//!
//! - Function discovery across paged address spaces
//! - Register descriptor parsing and register indexing
//! - Read-modify-write reporting configuration for the 2-D sensor ($12)
//! - Finger and pen slot caches that keep first-seen ordering
//! - Interrupt servicing that paginates contacts over fixed-size reports
//! - Sleep, charger and wake-gesture controls
//!
//! ```no_run
//! use embedded_hal_async::i2c::{I2c, SevenBitAddress};
//! use rmi4::{Config, Rmi4};
//!
//! async fn example<I2C, E>(i2c: I2C, now: fn() -> u64) -> Result<(), rmi4::Error<E>>
//! where
//!   I2C: I2c<SevenBitAddress, Error = E>,
//! {
//!   let mut touch = Rmi4::new(i2c, now, Config::default().with_double_tap_to_wake(true));
//!   touch.discover_and_configure().await?;
//!
//!   loop {
//!     let serviced = touch.service_interrupt().await?;
//!     if let Some(report) = serviced.report {
//!       // hand the report to the host
//!       let _ = report;
//!     }
//!     if serviced.complete {
//!       break;
//!     }
//!   }
//!   Ok(())
//! }
//! ```
mod bitmap;
mod cache;
mod config;
mod defs;
mod f01;
mod f12;
mod f1a;
mod init;
#[cfg(test)]
mod mock;
mod pdt;
mod power;
mod register_desc;
mod report;
mod rw;
mod service;

use embedded_hal_async::i2c::{I2c, SevenBitAddress};

pub use bitmap::Bitmap;
pub use cache::{Batch, ContactState, PenState, Position, Slot, SlotCache, SlotState};
pub use config::*;
pub use defs::{
  FunctionNumber, MAX_BUTTONS, MAX_FUNCTIONS, MAX_SLOTS, PEN_CONTACTS_PER_REPORT, TOUCH_CONTACTS_PER_REPORT,
};
pub use f01::{DeviceControl, DeviceInfo, DeviceSettings, DeviceStatus, Health, SleepMode, StatusCode};
pub use f12::{
  DataRegion, DetectedObjects, ExtendedClasses, FingerRemap, ObjectClasses, ObjectReportConfig, ObjectType,
  ReportingControl, ReportingFlags, ReportingMode, Touch2d,
};
pub use f1a::ButtonState;
pub use pdt::{Function, FunctionDescriptor, FunctionTable, VersionIrq};
pub use power::{DisplayState, PowerSource, PowerState};
pub use register_desc::{RegisterDescItem, RegisterDescriptor, MAX_REGISTERS};
pub use report::{Contact, DisplayTransform, KeyReport, PenReport, Report, ScreenProperties, TouchReport, WakeReport};
pub use service::Serviced;

/// Errors that can occur while interacting with the controller.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
  /// I²C bus transaction failed with the underlying driver error.
  I2c(E),
  /// An operation attempted to write a buffer larger than the protocol allows.
  BufferOverflow,
  /// The device's register map does not match what the protocol requires.
  Protocol(ProtocolViolation),
}

impl<E> From<ProtocolViolation> for Error<E> {
  fn from(violation: ProtocolViolation) -> Self {
    Error::Protocol(violation)
  }
}

impl<E: embedded_hal::i2c::Error> Error<E> {
  /// Generic kind of a bus failure, `None` for protocol errors.
  pub fn bus_error_kind(&self) -> Option<embedded_hal::i2c::ErrorKind> {
    match self {
      Error::I2c(e) => Some(e.kind()),
      _ => None,
    }
  }
}

/// Ways the device's self-description can be malformed or unexpected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolViolation {
  /// Presence register size outside `0..=35`.
  InvalidLayout(u8),
  /// Register structure ended before every present register was decoded.
  CorruptDescriptor,
  /// Descriptor lists more registers or structure bytes than can be held.
  DescriptorOverflow,
  /// Page description table lists more functions than can be held.
  TooManyFunctions,
  /// Address space exhausted without finding the end of the function table.
  MissingTerminator,
  /// A required function is absent.
  MissingFunction(u8),
  /// A required register is absent from its descriptor.
  MissingRegister(u16),
  /// A register's device-reported size differs from its known layout.
  UnexpectedRegisterLayout { register: u16, expected: u32, actual: u32 },
  /// Function $12 does not publish register descriptors.
  NoRegisterDescriptors,
  /// A register offset falls outside its function's page.
  AddressOverflow,
}

/// Monotonic time source in units of 100 µs.
pub trait Clock {
  fn now_100us(&self) -> u64;
}

impl<F: Fn() -> u64> Clock for F {
  fn now_100us(&self) -> u64 {
    self()
  }
}

/// Session state for one RMI4 controller.
///
/// The session owns the I²C peripheral, remembers the selected register page
/// and holds the discovered function table together with the contact caches.
/// Every operation takes `&mut self`, so one session serializes all device
/// access; share it between tasks behind a mutex.
pub struct Rmi4<I, C> {
  i2c: I,
  clock: C,
  config: Config,
  page: Option<u8>,
  functions: FunctionTable,
  touch: Touch2d,
  has_buttons: bool,
  buttons: ButtonState,
  health: Health,
  info: Option<DeviceInfo>,
  power: PowerState,
  interrupt_status: u8,
  fingers: SlotCache<ContactState>,
  pens: SlotCache<PenState>,
  touch_batch: Batch,
  pen_batch: Batch,
  escape_stroke_once: bool,
}

impl<I, E, C> Rmi4<I, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  C: Clock,
{
  /// Create a session. Nothing is sent to the device until
  /// [`Rmi4::discover_and_configure`] runs.
  pub fn new(i2c: I, clock: C, config: Config) -> Self {
    let capacity = config.max_contacts as usize;
    Self {
      i2c,
      clock,
      config,
      page: None,
      functions: FunctionTable::default(),
      touch: Touch2d::default(),
      has_buttons: false,
      buttons: ButtonState::default(),
      health: Health::default(),
      info: None,
      power: PowerState::Standby,
      interrupt_status: 0,
      fingers: SlotCache::new(capacity),
      pens: SlotCache::new(capacity),
      touch_batch: Batch::default(),
      pen_batch: Batch::default(),
      escape_stroke_once: false,
    }
  }

  /// Release the bus and clock.
  pub fn release(self) -> (I, C) {
    (self.i2c, self.clock)
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn functions(&self) -> &FunctionTable {
    &self.functions
  }

  /// 2-D sensor layout and reporting state.
  pub fn touch(&self) -> &Touch2d {
    &self.touch
  }

  pub fn has_buttons(&self) -> bool {
    self.has_buttons
  }

  /// Sticky record of catastrophic states the device has reported.
  pub fn health(&self) -> Health {
    self.health
  }

  /// Product information read during start-up.
  pub fn device_info(&self) -> Option<&DeviceInfo> {
    self.info.as_ref()
  }

  pub fn power_state(&self) -> PowerState {
    self.power
  }

  pub fn fingers(&self) -> &SlotCache<ContactState> {
    &self.fingers
  }

  pub fn pens(&self) -> &SlotCache<PenState> {
    &self.pens
  }

  pub(crate) fn function(&self, number: FunctionNumber) -> Result<Function, Error<E>> {
    self.functions.find(number).copied().ok_or(ProtocolViolation::MissingFunction(number.into_bits()).into())
  }
}
