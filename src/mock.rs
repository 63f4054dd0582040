//! In-memory RMI4 device used by the unit tests.

use std::collections::BTreeMap;
use std::vec::Vec;

use embedded_hal_async::i2c::{ErrorKind, ErrorType, I2c, Operation, SevenBitAddress};

use crate::defs::PAGE_SELECT;
use crate::{Config, Rmi4};

pub(crate) const F01_QUERY: u16 = 0x00;
pub(crate) const F01_CONTROL: u16 = 0x30;
pub(crate) const F01_DATA: u16 = 0x34;
pub(crate) const F12_QUERY: u16 = 0x20;
pub(crate) const F12_CTRL8: u16 = 0x40;
pub(crate) const F12_CTRL20: u16 = 0x41;
pub(crate) const F12_CTRL23: u16 = 0x42;
pub(crate) const F12_OBJECTS: u16 = 0x61;
pub(crate) const F1A_DATA: u16 = 0x88;

/// Paged packet-register device. Each address holds one packet register;
/// reads that run past a register continue into the following address and
/// unknown addresses read as zero.
#[derive(Debug, Default)]
pub(crate) struct FakeBus {
  registers: BTreeMap<u16, Vec<u8>>,
  page: u8,
  pointer: u8,
  page_selects: Vec<u8>,
  writes: Vec<(u16, Vec<u8>)>,
  fail_next: bool,
}

impl FakeBus {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn set(&mut self, addr: u16, bytes: &[u8]) {
    self.registers.insert(addr, bytes.to_vec());
  }

  pub(crate) fn get(&self, addr: u16) -> Vec<u8> {
    self.registers.get(&addr).cloned().unwrap_or_default()
  }

  /// Lay out a register descriptor starting at `addr`.
  pub(crate) fn set_descriptor(&mut self, addr: u16, presence: &[u8], structure: &[u8]) {
    self.set(addr, &[presence.len() as u8]);
    self.set(addr + 1, presence);
    self.set(addr + 2, structure);
  }

  pub(crate) fn fail_next(&mut self) {
    self.fail_next = true;
  }

  pub(crate) fn page_selects(&self) -> &[u8] {
    &self.page_selects
  }

  pub(crate) fn writes(&self) -> &[(u16, Vec<u8>)] {
    &self.writes
  }

  pub(crate) fn clear_writes(&mut self) {
    self.writes.clear();
  }

  /// Raise `irq` in the $01 interrupt status with the given device status byte.
  pub(crate) fn raise(&mut self, status: u8, irq: u8) {
    self.set(F01_DATA, &[status, irq]);
  }

  /// Fill the $12 object records. Each entry is `(object type, x, y)`.
  pub(crate) fn set_objects(&mut self, objects: &[(u8, u16, u16)]) {
    let mut raw = vec![0u8; 80];
    for (record, &(kind, x, y)) in raw.chunks_exact_mut(8).zip(objects) {
      let [x_lo, x_hi] = x.to_le_bytes();
      let [y_lo, y_hi] = y.to_le_bytes();
      record.copy_from_slice(&[kind, x_lo, x_hi, y_lo, y_hi, 40, 3, 3]);
    }
    self.set(F12_OBJECTS, &raw);
  }

  fn read_at(&self, addr: u16, buf: &mut [u8]) {
    let mut filled = 0;
    let mut addr = addr;
    while filled < buf.len() {
      match self.registers.get(&addr).filter(|bytes| !bytes.is_empty()) {
        Some(bytes) => {
          let n = bytes.len().min(buf.len() - filled);
          buf[filled..filled + n].copy_from_slice(&bytes[..n]);
          filled += n;
        }
        None => {
          buf[filled] = 0;
          filled += 1;
        }
      }
      addr = addr.wrapping_add(1);
    }
  }

  fn handle_write(&mut self, bytes: &[u8]) {
    match bytes {
      [PAGE_SELECT, page] => {
        self.page = *page;
        self.page_selects.push(*page);
      }
      [offset, payload @ ..] => {
        self.pointer = *offset;
        if payload.is_empty() {
          return;
        }
        let addr = u16::from_be_bytes([self.page, *offset]);
        self.writes.push((addr, payload.to_vec()));
        let register = self.registers.entry(addr).or_default();
        if register.len() < payload.len() {
          register.resize(payload.len(), 0);
        }
        register[..payload.len()].copy_from_slice(payload);
      }
      [] => {}
    }
  }
}

impl ErrorType for FakeBus {
  type Error = ErrorKind;
}

impl I2c<SevenBitAddress> for FakeBus {
  async fn transaction(&mut self, _address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
    if core::mem::take(&mut self.fail_next) {
      return Err(ErrorKind::Other);
    }
    for operation in operations {
      match operation {
        Operation::Write(bytes) => self.handle_write(bytes),
        Operation::Read(buf) => self.read_at(u16::from_be_bytes([self.page, self.pointer]), buf),
      }
    }
    Ok(())
  }
}

fn clock() -> u64 {
  1234
}

pub(crate) fn session(bus: FakeBus) -> Rmi4<FakeBus, fn() -> u64> {
  session_with(bus, Config::default())
}

pub(crate) fn session_with(bus: FakeBus, config: Config) -> Rmi4<FakeBus, fn() -> u64> {
  Rmi4::new(bus, clock as fn() -> u64, config)
}

/// Encode a register descriptor listing `(register, size)` pairs, each with a
/// single subpacket. Returns the presence register and the register structure.
pub(crate) fn encode_descriptor(registers: &[(u16, u32)]) -> (Vec<u8>, Vec<u8>) {
  let mut structure = Vec::new();
  for &(_, size) in registers {
    match size {
      1..=0xFF => structure.push(size as u8),
      0x100..=0xFFFF => {
        structure.push(0);
        structure.extend_from_slice(&(size as u16).to_le_bytes());
      }
      _ => {
        structure.extend_from_slice(&[0, 0, 0]);
        structure.extend_from_slice(&size.to_le_bytes());
      }
    }
    structure.push(0x01);
  }

  let highest = registers.iter().map(|&(reg, _)| reg).max().unwrap_or(0);
  let mut bitmap = vec![0u8; highest as usize / 8 + 1];
  for &(reg, _) in registers {
    bitmap[reg as usize / 8] |= 1 << (reg % 8);
  }

  let mut presence = Vec::new();
  if structure.len() <= 0xFF && !structure.is_empty() {
    presence.push(structure.len() as u8);
  } else {
    presence.push(0);
    presence.extend_from_slice(&(structure.len() as u16).to_le_bytes());
  }
  presence.extend_from_slice(&bitmap);
  (presence, structure)
}

/// A device exposing $12, $01 and $1A on page 0.
///
/// $12 publishes control registers 8, 20 and 23 and data registers 0, 1, 2
/// and 15. CTRL20 starts in reduced reporting with non-zero suppression and
/// CTRL23 carries vendor bits in its padding.
pub(crate) fn reference_device() -> FakeBus {
  let mut bus = FakeBus::new();

  bus.set(0xE9, &[0x20, 0x00, 0x40, 0x60, 0x01, 0x12]);
  bus.set(0xE3, &[0x00, 0x38, 0x30, 0x34, 0x01, 0x01]);
  bus.set(0xDD, &[0x80, 0x00, 0x84, 0x88, 0x01, 0x1A]);

  let (control_presence, control_structure) = encode_descriptor(&[(8, 14), (20, 3), (23, 5)]);
  let (data_presence, data_structure) = encode_descriptor(&[(0, 1), (1, 80), (2, 2), (15, 2)]);
  let (query_presence, query_structure) = encode_descriptor(&[
    (0, 1),
    (1, 1),
    (2, 3),
    (3, 20),
    (4, 1),
    (5, control_presence.len() as u32),
    (6, control_structure.len() as u32),
    (7, 1),
    (8, data_presence.len() as u32),
    (9, data_structure.len() as u32),
  ]);
  assert_eq!((query_presence.len(), query_structure.len()), (3, 20));

  bus.set(F12_QUERY, &[0x01]);
  bus.set_descriptor(F12_QUERY + 1, &query_presence, &query_structure);
  bus.set_descriptor(F12_QUERY + 4, &control_presence, &control_structure);
  bus.set_descriptor(F12_QUERY + 7, &data_presence, &data_structure);

  bus.set(F12_CTRL8, &[0x11; 14]);
  bus.set(F12_CTRL20, &[0x05, 0x05, 0x01]);
  bus.set(F12_CTRL23, &[0x01, 0x05, 0x00, 0x00, 0xF0]);
  bus.set(0x60, &[0x00]);
  bus.set_objects(&[]);

  let mut query = [0u8; 21];
  query[0] = 0x01;
  query[11..16].copy_from_slice(b"s3320");
  bus.set(F01_QUERY, &query);
  bus.set(F01_CONTROL, &[0x08, 0x00, 0x00, 0x00, 0x00]);
  bus.raise(0x00, 0x00);

  bus.set(F1A_DATA, &[0x00]);
  bus
}
