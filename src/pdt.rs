use bitfield_struct::bitfield;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use heapless::Vec;
use log::{debug, info};

use crate::defs::{FunctionNumber, MAX_FUNCTIONS, PDT_ENTRY_SIZE, PDT_START};
use crate::{Clock, Error, ProtocolViolation, Rmi4};

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct VersionIrq {
  #[bits(3)]
  pub irq_count: u8,
  #[bits(2)]
  __: u8,
  #[bits(2)]
  pub version: u8,
  #[bits(1)]
  ___: u8,
}

/// One page description table entry, as laid out on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FunctionDescriptor {
  pub query_base: u8,
  pub command_base: u8,
  pub control_base: u8,
  pub data_base: u8,
  pub version_irq: VersionIrq,
  pub number: u8,
}

impl FunctionDescriptor {
  pub const SIZE: usize = PDT_ENTRY_SIZE as usize;

  pub const fn from_bytes(raw: [u8; Self::SIZE]) -> Self {
    Self {
      query_base: raw[0],
      command_base: raw[1],
      control_base: raw[2],
      data_base: raw[3],
      version_irq: VersionIrq::from_bits(raw[4]),
      number: raw[5],
    }
  }

  pub const fn to_bytes(&self) -> [u8; Self::SIZE] {
    [
      self.query_base,
      self.command_base,
      self.control_base,
      self.data_base,
      self.version_irq.into_bits(),
      self.number,
    ]
  }
}

/// A discovered function together with the page it lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Function {
  pub descriptor: FunctionDescriptor,
  pub page: u8,
}

impl Function {
  pub fn number(&self) -> u8 {
    self.descriptor.number
  }

  /// Logical address of query register `offset`.
  pub fn query(&self, offset: usize) -> Result<u16, ProtocolViolation> {
    self.address(self.descriptor.query_base, offset)
  }

  pub fn command(&self, offset: usize) -> Result<u16, ProtocolViolation> {
    self.address(self.descriptor.command_base, offset)
  }

  pub fn control(&self, offset: usize) -> Result<u16, ProtocolViolation> {
    self.address(self.descriptor.control_base, offset)
  }

  pub fn data(&self, offset: usize) -> Result<u16, ProtocolViolation> {
    self.address(self.descriptor.data_base, offset)
  }

  fn address(&self, base: u8, offset: usize) -> Result<u16, ProtocolViolation> {
    let low = base as usize + offset;
    if low > 0xFF {
      return Err(ProtocolViolation::AddressOverflow);
    }
    Ok(u16::from_be_bytes([self.page, low as u8]))
  }
}

/// Functions in discovery order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionTable {
  functions: Vec<Function, MAX_FUNCTIONS>,
}

impl FunctionTable {
  pub fn iter(&self) -> impl Iterator<Item = &Function> {
    self.functions.iter()
  }

  pub fn len(&self) -> usize {
    self.functions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.functions.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&Function> {
    self.functions.get(index)
  }

  /// Position of function `number`, or [`len`](Self::len) when absent.
  pub fn index_of(&self, number: u8) -> usize {
    self.functions.iter().position(|f| f.number() == number).unwrap_or(self.functions.len())
  }

  pub fn find(&self, number: FunctionNumber) -> Option<&Function> {
    self.functions.get(self.index_of(number.into_bits()))
  }

  pub fn contains(&self, number: FunctionNumber) -> bool {
    self.find(number).is_some()
  }
}

impl<I, E, C> Rmi4<I, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  C: Clock,
{
  /// Walk the page description table and replace the session's function table.
  ///
  /// Entries are read downwards from the top of each page. An empty entry
  /// ends the page; an empty entry at the top of a page ends discovery.
  pub async fn discover_functions(&mut self) -> Result<&FunctionTable, Error<E>> {
    let mut table = FunctionTable::default();
    let mut page = 0u8;
    let mut address = PDT_START;

    loop {
      let raw = self.read::<{ FunctionDescriptor::SIZE }>(u16::from_be_bytes([page, address])).await?;
      let descriptor = FunctionDescriptor::from_bytes(raw);

      if descriptor.number == 0 {
        if address == PDT_START {
          break;
        }
        debug!("end of page {} function table", page);
        page = page.checked_add(1).ok_or(ProtocolViolation::MissingTerminator)?;
        address = PDT_START;
        continue;
      }

      info!(
        "found function ${:02X} on page {} (query {:#04x}, control {:#04x}, data {:#04x}, irqs {})",
        descriptor.number,
        page,
        descriptor.query_base,
        descriptor.control_base,
        descriptor.data_base,
        descriptor.version_irq.irq_count()
      );
      table.functions.push(Function { descriptor, page }).map_err(|_| ProtocolViolation::TooManyFunctions)?;
      if table.functions.is_full() {
        return Err(ProtocolViolation::TooManyFunctions.into());
      }

      address = address.checked_sub(PDT_ENTRY_SIZE).ok_or(ProtocolViolation::MissingTerminator)?;
    }

    self.functions = table;
    Ok(&self.functions)
  }
}
