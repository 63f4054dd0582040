use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use log::info;

use crate::{Clock, Error, Rmi4};

impl<I, E, C> Rmi4<I, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  C: Clock,
{
  /// Bring the controller up and clear interrupts left pending by the boot.
  ///
  /// Fails when $12 or $01 is missing; $1A is optional.
  pub async fn discover_and_configure(&mut self) -> Result<(), Error<E>> {
    self.discover_functions().await?;
    self.configure_functions().await?;
    self.read_device_info().await?;
    self.check_interrupts().await?;

    info!("controller ready with {} functions", self.functions.len());
    Ok(())
  }

  /// Program $12, $1A and $01 from the session configuration.
  pub(crate) async fn configure_functions(&mut self) -> Result<(), Error<E>> {
    self.configure_f12().await?;
    self.configure_f1a();
    self.configure_f01().await
  }
}
