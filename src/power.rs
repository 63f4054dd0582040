use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use log::{debug, info};

use crate::cache::Batch;
use crate::f01::SleepMode;
use crate::f12::ReportingMode;
use crate::f1a::ButtonState;
use crate::{Clock, Error, Rmi4};

/// Host view of the controller's power state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
  /// Fully powered and scanning (D0).
  Operating,
  /// Asleep (D3).
  Standby,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisplayState {
  Off,
  On,
  /// Dimmed or otherwise unknown, no reporting change.
  Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerSource {
  Ac,
  Dc,
  Hot,
}

impl<I, E, C> Rmi4<I, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  C: Clock,
{
  /// Put the controller to sleep and forget every cached contact.
  ///
  /// The caches are dropped even when the sleep request fails.
  pub async fn enter_low_power(&mut self) -> Result<(), Error<E>> {
    self.fingers.invalidate();
    self.pens.invalidate();
    self.touch_batch = Batch::default();
    self.pen_batch = Batch::default();
    self.buttons = ButtonState::default();

    self.change_sleep_state(SleepMode::Sleeping).await?;
    self.power = PowerState::Standby;
    info!("controller in standby");
    Ok(())
  }

  /// Wake the controller unless it is already operating.
  pub async fn exit_low_power(&mut self) -> Result<(), Error<E>> {
    if self.power == PowerState::Operating {
      return Ok(());
    }
    self.change_sleep_state(SleepMode::Operating).await?;
    self.power = PowerState::Operating;
    info!("controller operating");
    Ok(())
  }

  /// Switch $12 between wake-gesture and continuous reporting.
  pub async fn set_wake_gesture_mode(&mut self, enabled: bool) -> Result<(), Error<E>> {
    let mode = if enabled { ReportingMode::WakeGesture } else { ReportingMode::Continuous };
    self.set_reporting_mode(mode).await
  }

  pub async fn set_charger_connected(&mut self, connected: bool) -> Result<(), Error<E>> {
    self.change_charger_connected(connected).await
  }

  /// Follow a display state change. Turning the display off arms the wake
  /// gesture when double-tap-to-wake is configured.
  pub async fn set_display_state(&mut self, state: DisplayState) -> Result<(), Error<E>> {
    debug!("display state {:?}", state);
    match state {
      DisplayState::Off if self.config.double_tap_to_wake => self.set_wake_gesture_mode(true).await,
      DisplayState::On => self.set_wake_gesture_mode(false).await,
      DisplayState::Off | DisplayState::Other => Ok(()),
    }
  }

  pub async fn set_power_source(&mut self, source: PowerSource) -> Result<(), Error<E>> {
    debug!("power source {:?}", source);
    self.set_charger_connected(source == PowerSource::Ac).await
  }
}
