//! Function $1A: 0-D capacitive buttons.

use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use log::{debug, warn};

use crate::defs::{irq, FunctionNumber, MAX_BUTTONS};
use crate::{Clock, Error, Rmi4};

/// Pressed state of each button, in report order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonState {
  pub pressed: [bool; MAX_BUTTONS],
}

impl ButtonState {
  /// Decode the $1A data byte. Normal panels wire button 0 to the highest
  /// bit; reversed panels wire it to bit 0.
  pub const fn decode(raw: u8, reversed: bool) -> Self {
    let mut pressed = [false; MAX_BUTTONS];
    let mut i = 0;
    while i < MAX_BUTTONS {
      let shift = if reversed { i } else { MAX_BUTTONS - i - 1 };
      pressed[i] = (raw >> shift) & 1 != 0;
      i += 1;
    }
    Self { pressed }
  }
}

impl<I, E, C> Rmi4<I, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  C: Clock,
{
  /// Buttons are reported whenever the device lists $1A; the function needs
  /// no programming.
  pub(crate) fn configure_f1a(&mut self) {
    self.has_buttons = self.functions.contains(FunctionNumber::Buttons);
    debug!("$1A buttons {}", if self.has_buttons { "present" } else { "absent" });
  }

  /// Read the button states, or `None` when the device has no buttons.
  pub(crate) async fn read_buttons(&mut self, reversed: bool) -> Result<Option<ButtonState>, Error<E>> {
    if !self.has_buttons {
      warn!("button interrupt without $1A, ignoring");
      self.interrupt_status &= !irq::BUTTONS;
      return Ok(None);
    }

    let addr = self.function(FunctionNumber::Buttons)?.data(0)?;
    let [raw] = self.read::<1>(addr).await?;
    self.buttons = ButtonState::decode(raw, reversed);
    Ok(Some(self.buttons))
  }
}
