use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use heapless::Vec;
use log::debug;

use crate::bitmap::Bitmap;
use crate::defs::{MAX_PRESENCE_BYTES, MAX_STRUCT_SIZE};
use crate::{Clock, Error, ProtocolViolation, Rmi4};

/// Registers of one class (query, control or data) a descriptor can describe.
pub const MAX_REGISTERS: usize = 64;

const PRESENCE_BYTES: usize = 32;
const SUBPACKET_BYTES: usize = 37;

/// One packet register listed by a register descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterDescItem {
  /// Logical register number, its position in the presence map.
  pub register: u16,
  /// Size of the packet register in bytes.
  pub size: u32,
  /// Subpackets present within the register.
  pub subpackets: Bitmap<SUBPACKET_BYTES>,
  pub subpacket_count: u8,
}

/// Self-describing layout of one register class of a function.
///
/// The device publishes three of these per function: a presence register
/// holding the structure size and a bitmap of present registers, followed
/// by a packed structure listing each present register's size and subpackets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterDescriptor {
  struct_size: u16,
  presence: Bitmap<PRESENCE_BYTES>,
  registers: Vec<RegisterDescItem, MAX_REGISTERS>,
}

impl RegisterDescriptor {
  pub const fn empty() -> Self {
    Self { struct_size: 0, presence: Bitmap::new(), registers: Vec::new() }
  }

  /// Decode a descriptor from the raw presence register and register structure.
  ///
  /// `presence` is the `size_presence_reg` bytes following the size byte and
  /// `structure` holds at least `struct_size` bytes.
  pub fn parse(presence: &[u8], structure: &[u8]) -> Result<Self, ProtocolViolation> {
    let (struct_size, map) = decode_presence(presence);
    if map.weight() > MAX_REGISTERS {
      return Err(ProtocolViolation::DescriptorOverflow);
    }

    let structure = structure.get(..struct_size as usize).ok_or(ProtocolViolation::CorruptDescriptor)?;
    let mut cursor = Cursor::new(structure);
    let mut registers = Vec::new();

    for register in map.ones() {
      let size = cursor.register_size()?;
      let subpackets = cursor.subpackets()?;
      let item = RegisterDescItem {
        register: register as u16,
        size,
        subpackets,
        subpacket_count: subpackets.weight() as u8,
      };
      debug!("reg {} size {} subpackets {}", item.register, item.size, item.subpacket_count);
      registers.push(item).map_err(|_| ProtocolViolation::DescriptorOverflow)?;
    }

    Ok(Self { struct_size, presence: map, registers })
  }

  pub fn struct_size(&self) -> u16 {
    self.struct_size
  }

  pub fn presence(&self) -> &Bitmap<PRESENCE_BYTES> {
    &self.presence
  }

  pub fn registers(&self) -> &[RegisterDescItem] {
    &self.registers
  }

  /// Number of registers present, `NumRegisters`.
  pub fn len(&self) -> usize {
    self.registers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.registers.is_empty()
  }

  /// Position of `register` within the descriptor, or [`len`](Self::len)
  /// when the register is not present.
  pub fn index_of(&self, register: u16) -> usize {
    self.registers.iter().position(|item| item.register == register).unwrap_or(self.registers.len())
  }

  pub fn item(&self, register: u16) -> Option<&RegisterDescItem> {
    self.registers.get(self.index_of(register))
  }

  pub fn contains(&self, register: u16) -> bool {
    self.index_of(register) < self.len()
  }

  /// Combined size of every present register, the function's packet size.
  pub fn packet_size(&self) -> usize {
    self.registers.iter().map(|item| item.size as usize).sum()
  }

  /// Byte offset of `register` within the packed register block, summing the
  /// sizes of every present register numbered below it.
  pub fn byte_offset(&self, register: u16) -> Option<usize> {
    let index = self.index_of(register);
    if index == self.len() {
      return None;
    }
    Some(self.registers[..index].iter().map(|item| item.size as usize).sum())
  }
}

/// Split the presence register into the structure size and the presence map.
fn decode_presence(presence: &[u8]) -> (u16, Bitmap<PRESENCE_BYTES>) {
  let byte = |i: usize| presence.get(i).copied().unwrap_or(0);
  let (struct_size, start) = match byte(0) {
    0 => (u16::from_le_bytes([byte(1), byte(2)]), 3),
    size => (size as u16, 1),
  };

  let mut map = Bitmap::new();
  let bits = presence.iter().skip(start).enumerate();
  for (i, b) in bits {
    for bit in 0..8 {
      if b & (1 << bit) != 0 {
        // Bits beyond the 256 logical registers are not addressable.
        map.set(i * 8 + bit);
      }
    }
  }
  (struct_size, map)
}

/// Bounded reader over the register structure.
struct Cursor<'a> {
  buf: &'a [u8],
  pos: usize,
}

impl<'a> Cursor<'a> {
  fn new(buf: &'a [u8]) -> Self {
    Self { buf, pos: 0 }
  }

  fn take<const N: usize>(&mut self) -> Result<[u8; N], ProtocolViolation> {
    let end = self.pos + N;
    let bytes = self.buf.get(self.pos..end).ok_or(ProtocolViolation::CorruptDescriptor)?;
    self.pos = end;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
  }

  /// One byte; zero escapes to a 16-bit size, and a zero 16-bit size escapes
  /// to a 32-bit size.
  fn register_size(&mut self) -> Result<u32, ProtocolViolation> {
    let [size] = self.take::<1>()?;
    if size != 0 {
      return Ok(size as u32);
    }
    let size = u16::from_le_bytes(self.take::<2>()?);
    if size != 0 {
      return Ok(size as u32);
    }
    Ok(u32::from_le_bytes(self.take::<4>()?))
  }

  /// Seven presence flags per byte while bit 7 flags a continuation.
  fn subpackets(&mut self) -> Result<Bitmap<SUBPACKET_BYTES>, ProtocolViolation> {
    let mut map = Bitmap::new();
    let mut offset = 0;
    loop {
      let [b] = self.take::<1>()?;
      for bit in 0..7 {
        if b & (1 << bit) != 0 && !map.set(offset + bit) {
          return Err(ProtocolViolation::CorruptDescriptor);
        }
      }
      offset += 7;
      if b & 0x80 == 0 {
        return Ok(map);
      }
      if offset >= Bitmap::<SUBPACKET_BYTES>::BITS {
        return Err(ProtocolViolation::CorruptDescriptor);
      }
    }
  }
}

impl<I, E, C> Rmi4<I, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  C: Clock,
{
  /// Read and decode the register descriptor whose presence register lives at
  /// `address`. The presence bytes follow at `address + 1` and the register
  /// structure at `address + 2`.
  pub(crate) async fn read_register_descriptor(&mut self, address: u16) -> Result<RegisterDescriptor, Error<E>> {
    let [size] = self.read::<1>(address).await?;
    if size > MAX_PRESENCE_BYTES {
      return Err(ProtocolViolation::InvalidLayout(size).into());
    }
    if size == 0 {
      return Ok(RegisterDescriptor::empty());
    }

    let mut presence = [0u8; MAX_PRESENCE_BYTES as usize];
    let presence = &mut presence[..size as usize];
    self.read_register(address + 1, presence).await?;

    let (struct_size, _) = decode_presence(presence);
    let struct_size = struct_size as usize;
    if struct_size > MAX_STRUCT_SIZE {
      return Err(ProtocolViolation::DescriptorOverflow.into());
    }

    let mut structure = [0u8; MAX_STRUCT_SIZE];
    let structure = &mut structure[..struct_size];
    if !structure.is_empty() {
      self.read_register(address + 2, structure).await?;
    }

    Ok(RegisterDescriptor::parse(presence, structure)?)
  }
}
