use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use crate::defs::{MAX_WRITE_SIZE, PAGE_SELECT};
use crate::{Clock, Error, Rmi4};

impl<I, E, C> Rmi4<I, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  C: Clock,
{
  /// Select `page` unless it is already the active page.
  ///
  /// The selection is forgotten if the write fails, so the next access
  /// selects again instead of trusting a page the device may not have taken.
  pub(crate) async fn select_page(&mut self, page: u8) -> Result<(), Error<E>> {
    if self.page == Some(page) {
      return Ok(());
    }
    self.page = None;
    self.i2c.write(self.config.address, &[PAGE_SELECT, page]).await.map_err(Error::I2c)?;
    self.page = Some(page);
    Ok(())
  }

  pub(crate) async fn read_register(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Error<E>> {
    let [page, offset] = addr.to_be_bytes();
    self.select_page(page).await?;
    self.i2c.write_read(self.config.address, &[offset], buf).await.map_err(Error::I2c)
  }

  pub(crate) async fn write_register(&mut self, addr: u16, data: &[u8]) -> Result<(), Error<E>> {
    let len = data.len();
    if len > MAX_WRITE_SIZE {
      return Err(Error::BufferOverflow);
    }
    let [page, offset] = addr.to_be_bytes();
    self.select_page(page).await?;

    let mut buf = [0u8; MAX_WRITE_SIZE + 1];
    buf[0] = offset;
    buf[1..=len].copy_from_slice(data);
    self.i2c.write(self.config.address, &buf[..=len]).await.map_err(Error::I2c)
  }

  // Typed helpers
  pub(crate) async fn read<const N: usize>(&mut self, addr: u16) -> Result<[u8; N], Error<E>> {
    let mut buf = [0u8; N];
    self.read_register(addr, &mut buf).await?;
    Ok(buf)
  }

  /// Read `N` bytes at `addr`, let `f` edit them and write them back.
  pub(crate) async fn modify<const N: usize, F: FnOnce(&mut [u8; N])>(&mut self, addr: u16, f: F) -> Result<(), Error<E>> {
    let mut buf = self.read::<N>(addr).await?;
    f(&mut buf);
    self.write_register(addr, &buf).await
  }
}

#[cfg(test)]
mod tests {
  use embassy_futures::block_on;

  use super::*;
  use crate::mock::{session, FakeBus};

  #[test]
  fn page_select_only_on_change() {
    let mut bus = FakeBus::new();
    bus.set(0x0010, &[1]);
    bus.set(0x0011, &[2]);
    bus.set(0x0120, &[3]);
    let mut rmi = session(bus);

    assert_eq!(block_on(rmi.read::<1>(0x0010)).unwrap(), [1]);
    assert_eq!(block_on(rmi.read::<1>(0x0011)).unwrap(), [2]);
    assert_eq!(block_on(rmi.read::<1>(0x0120)).unwrap(), [3]);
    assert_eq!(block_on(rmi.read::<1>(0x0121)).unwrap(), [0]);

    let (bus, _) = rmi.release();
    assert_eq!(bus.page_selects(), [0, 1]);
  }

  #[test]
  fn failed_page_select_is_retried() {
    let mut bus = FakeBus::new();
    bus.set(0x0010, &[7]);
    bus.fail_next();
    let mut rmi = session(bus);

    assert!(block_on(rmi.read::<1>(0x0010)).is_err());
    assert_eq!(block_on(rmi.read::<1>(0x0010)).unwrap(), [7]);

    let (bus, _) = rmi.release();
    assert_eq!(bus.page_selects(), [0]);
  }

  #[test]
  fn modify_preserves_untouched_bytes() {
    let mut bus = FakeBus::new();
    bus.set(0x0230, &[0xA5, 0x00, 0x5A]);
    let mut rmi = session(bus);

    block_on(rmi.modify::<3, _>(0x0230, |raw| raw[1] = 0x42)).unwrap();

    let (bus, _) = rmi.release();
    assert_eq!(bus.get(0x0230), [0xA5, 0x42, 0x5A]);
  }

  #[test]
  fn oversized_write_is_rejected() {
    let mut rmi = session(FakeBus::new());
    let result = block_on(rmi.write_register(0x0010, &[0; 32]));
    assert_eq!(result, Err(Error::BufferOverflow));
  }
}
