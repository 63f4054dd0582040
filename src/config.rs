use crate::defs::{DEFAULT_ADDRESS, MAX_SLOTS};
use crate::f01::DeviceSettings;
use crate::f12::ObjectReportConfig;
use crate::report::ScreenProperties;

/// Session configuration applied during start-up and reconfiguration.
///
/// # Example
/// ```no_run
/// use rmi4::{Config, DeviceSettings, ObjectReportConfig, ScreenProperties};
///
/// let screen = ScreenProperties::new().with_sensor(1440, 2560).with_display(1080, 1920);
/// let config = Config::default()
///   .with_address(0x4B)
///   .with_device(DeviceSettings::default().with_no_sleep(true))
///   .with_reporting(ObjectReportConfig::report_all(5))
///   .with_max_contacts(5)
///   .with_double_tap_to_wake(true)
///   .with_screen(screen);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// 7-bit bus address of the controller.
  pub address: u8,
  /// $01 device control block.
  pub device: DeviceSettings,
  /// $12 CTRL23 object reporting policy.
  pub reporting: ObjectReportConfig,
  /// Contacts tracked per cache, at most [`MAX_SLOTS`].
  pub max_contacts: u8,
  /// Arm the wake gesture when the display turns off.
  pub double_tap_to_wake: bool,
  pub screen: ScreenProperties,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      address: DEFAULT_ADDRESS,
      device: DeviceSettings::default(),
      reporting: ObjectReportConfig::default(),
      max_contacts: MAX_SLOTS as u8,
      double_tap_to_wake: false,
      screen: ScreenProperties::new(),
    }
  }
}

impl Config {
  pub const fn with_address(mut self, address: u8) -> Self {
    self.address = address;
    self
  }

  pub const fn with_device(mut self, device: DeviceSettings) -> Self {
    self.device = device;
    self
  }

  pub const fn with_reporting(mut self, reporting: ObjectReportConfig) -> Self {
    self.reporting = reporting;
    self
  }

  /// Clamped to [`MAX_SLOTS`].
  pub const fn with_max_contacts(mut self, max_contacts: u8) -> Self {
    self.max_contacts = if max_contacts as usize > MAX_SLOTS { MAX_SLOTS as u8 } else { max_contacts };
    self
  }

  pub const fn with_double_tap_to_wake(mut self, enabled: bool) -> Self {
    self.double_tap_to_wake = enabled;
    self
  }

  pub const fn with_screen(mut self, screen: ScreenProperties) -> Self {
    self.screen = screen;
    self
  }
}
