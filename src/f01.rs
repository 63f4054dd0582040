//! Function $01: device control, status and interrupt reporting.

use bitfield_struct::bitfield;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use log::{debug, error, info};

use crate::defs::FunctionNumber;
use crate::power::PowerState;
use crate::{Clock, Error, Rmi4};

const CONTROL_SIZE: usize = 5;
const QUERY_SIZE: usize = 21;

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct DeviceControl {
  #[bits(2)]
  pub sleep_mode: SleepMode,
  pub no_sleep: bool,
  #[bits(2)]
  __: u8,
  pub charger_connected: bool,
  pub report_rate: bool,
  pub configured: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepMode {
  /// Normal sensing.
  Operating,
  /// Sensing stopped, lowest power.
  Sleeping,
  Reserved(u8),
}

impl SleepMode {
  pub const fn into_bits(self) -> u8 {
    match self {
      Self::Operating => 0b00,
      Self::Sleeping => 0b01,
      Self::Reserved(bits) => bits,
    }
  }

  pub const fn from_bits(bits: u8) -> Self {
    match bits {
      0b00 => Self::Operating,
      0b01 => Self::Sleeping,
      other => Self::Reserved(other),
    }
  }
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct DeviceStatus {
  #[bits(4)]
  pub code: u8,
  #[bits(2)]
  __: u8,
  pub flash_prog: bool,
  pub unconfigured: bool,
}

impl DeviceStatus {
  pub fn status(&self) -> StatusCode {
    StatusCode::from_bits(self.code())
  }
}

/// Device status codes reported in the $01 status register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusCode {
  NoError,
  ResetOccurred,
  InvalidConfig,
  DeviceFailure,
  ConfigCrcFailure,
  FirmwareCrcFailure,
  CrcInProgress,
  Unknown(u8),
}

impl StatusCode {
  pub const fn from_bits(bits: u8) -> Self {
    match bits {
      0 => Self::NoError,
      1 => Self::ResetOccurred,
      2 => Self::InvalidConfig,
      3 => Self::DeviceFailure,
      4 => Self::ConfigCrcFailure,
      5 => Self::FirmwareCrcFailure,
      6 => Self::CrcInProgress,
      other => Self::Unknown(other),
    }
  }

  pub const fn into_bits(self) -> u8 {
    match self {
      Self::NoError => 0,
      Self::ResetOccurred => 1,
      Self::InvalidConfig => 2,
      Self::DeviceFailure => 3,
      Self::ConfigCrcFailure => 4,
      Self::FirmwareCrcFailure => 5,
      Self::CrcInProgress => 6,
      Self::Unknown(bits) => bits,
    }
  }
}

/// Sticky record of catastrophic device states. Flags are only ever set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Health {
  pub reset_occurred: bool,
  pub invalid_configuration: bool,
  pub device_failure: bool,
  /// Last status code the driver does not handle.
  pub unknown_status: Option<u8>,
}

impl Health {
  pub fn is_clean(&self) -> bool {
    *self == Self::default()
  }

  fn record(&mut self, status: StatusCode) {
    match status {
      StatusCode::NoError => {}
      StatusCode::ResetOccurred => self.reset_occurred = true,
      StatusCode::InvalidConfig => {
        error!("device reported an invalid configuration");
        self.invalid_configuration = true;
      }
      StatusCode::DeviceFailure => {
        error!("device reported a device failure");
        self.device_failure = true;
      }
      other => {
        error!("device reported unhandled status code {}", other.into_bits());
        self.unknown_status = Some(other.into_bits());
      }
    }
  }
}

/// Product identification from the $01 query registers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
  pub manufacturer_id: u8,
  pub product_properties: u8,
  pub product_info: [u8; 2],
  pub date: [u8; 2],
  pub wafer_lot: [u8; 5],
  pub product_id: [u8; 10],
}

impl DeviceInfo {
  pub fn from_bytes(raw: &[u8; QUERY_SIZE]) -> Self {
    let mut info = Self { manufacturer_id: raw[0], product_properties: raw[1], ..Self::default() };
    info.product_info.copy_from_slice(&raw[2..4]);
    info.date.copy_from_slice(&raw[4..6]);
    info.wafer_lot.copy_from_slice(&raw[6..11]);
    info.product_id.copy_from_slice(&raw[11..21]);
    info
  }

  /// Product id as text, up to the first NUL.
  pub fn product_id(&self) -> &str {
    let end = self.product_id.iter().position(|&b| b == 0).unwrap_or(self.product_id.len());
    core::str::from_utf8(&self.product_id[..end]).unwrap_or("")
  }
}

impl From<[u8; QUERY_SIZE]> for DeviceInfo {
  fn from(raw: [u8; QUERY_SIZE]) -> Self {
    Self::from_bytes(&raw)
  }
}

/// Logical $01 control settings applied at configuration time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceSettings {
  pub sleep_mode: SleepMode,
  pub no_sleep: bool,
  pub report_rate: bool,
  pub configured: bool,
  /// Interrupt enable mask, one bit per interrupt source.
  pub interrupt_enable: u8,
  pub doze_interval: u8,
  pub doze_threshold: u8,
  pub doze_holdoff: u8,
}

impl Default for DeviceSettings {
  fn default() -> Self {
    Self {
      sleep_mode: SleepMode::Operating,
      no_sleep: false,
      report_rate: false,
      configured: true,
      interrupt_enable: 0xFF,
      doze_interval: 0,
      doze_threshold: 0,
      doze_holdoff: 0,
    }
  }
}

impl DeviceSettings {
  pub const fn with_sleep_mode(mut self, mode: SleepMode) -> Self {
    self.sleep_mode = mode;
    self
  }

  pub const fn with_no_sleep(mut self, no_sleep: bool) -> Self {
    self.no_sleep = no_sleep;
    self
  }

  pub const fn with_interrupt_enable(mut self, mask: u8) -> Self {
    self.interrupt_enable = mask;
    self
  }

  pub const fn with_doze(mut self, interval: u8, threshold: u8, holdoff: u8) -> Self {
    self.doze_interval = interval;
    self.doze_threshold = threshold;
    self.doze_holdoff = holdoff;
    self
  }

  /// Apply the settings to a raw control block, keeping bits the settings
  /// do not own.
  fn apply(&self, raw: &mut [u8; CONTROL_SIZE]) {
    let control = DeviceControl::from_bits(raw[0])
      .with_sleep_mode(self.sleep_mode)
      .with_no_sleep(self.no_sleep)
      .with_report_rate(self.report_rate)
      .with_configured(self.configured);
    raw[0] = control.into_bits();
    raw[1] = self.interrupt_enable;
    raw[2] = self.doze_interval;
    raw[3] = self.doze_threshold;
    raw[4] = self.doze_holdoff;
  }
}

impl<I, E, C> Rmi4<I, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  C: Clock,
{
  /// Program the $01 control block from [`crate::Config::device`].
  pub(crate) async fn configure_f01(&mut self) -> Result<(), Error<E>> {
    let addr = self.function(FunctionNumber::DeviceControl)?.control(0)?;
    let settings = self.config.device;
    debug!("writing $01 control settings");
    self.modify::<CONTROL_SIZE, _>(addr, |raw| settings.apply(raw)).await?;

    // Operating here means the controller is already awake.
    self.power = match settings.sleep_mode {
      SleepMode::Operating => PowerState::Operating,
      _ => PowerState::Standby,
    };
    Ok(())
  }

  /// Read the $01 query block.
  pub async fn read_device_info(&mut self) -> Result<DeviceInfo, Error<E>> {
    let addr = self.function(FunctionNumber::DeviceControl)?.query(0)?;
    let info = DeviceInfo::from(self.read::<QUERY_SIZE>(addr).await?);
    info!("manufacturer {:#04x} product {}", info.manufacturer_id, info.product_id());
    self.info = Some(info);
    Ok(info)
  }

  pub async fn change_sleep_state(&mut self, mode: SleepMode) -> Result<(), Error<E>> {
    debug!("changing sleep state to {}", mode.into_bits());
    self.modify_device_control(|control| control.set_sleep_mode(mode)).await
  }

  pub async fn change_charger_connected(&mut self, connected: bool) -> Result<(), Error<E>> {
    debug!("changing charger connected state to {}", connected);
    self.modify_device_control(|control| control.set_charger_connected(connected)).await
  }

  async fn modify_device_control<F: FnOnce(&mut DeviceControl)>(&mut self, f: F) -> Result<(), Error<E>> {
    let addr = self.function(FunctionNumber::DeviceControl)?.control(0)?;
    let [raw] = self.read::<1>(addr).await?;
    let mut control = DeviceControl::from_bits(raw);
    f(&mut control);
    self.write_register(addr, &[control.into_bits()]).await
  }

  /// Read the device status and pending interrupt bits.
  ///
  /// Catastrophic status codes are folded into [`Health`]. A device in flash
  /// programming mode reports no interrupts, and a device that lost its
  /// configuration is reconfigured before its interrupts are returned.
  pub(crate) async fn check_interrupts(&mut self) -> Result<u8, Error<E>> {
    let addr = self.function(FunctionNumber::DeviceControl)?.data(0)?;
    let [status, irq] = self.read::<2>(addr).await?;
    let status = DeviceStatus::from_bits(status);
    self.health.record(status.status());

    if status.flash_prog() {
      error!("device is in flash programming mode");
      return Ok(0);
    }

    if status.unconfigured() {
      error!("device reports it is unconfigured, reconfiguring");
      self.configure_functions().await?;
    }

    Ok(irq)
  }
}
