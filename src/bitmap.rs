/// Fixed-size bit set stored LSB-first within each byte, the layout RMI4 uses
/// for presence and subpacket maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Bitmap<const N: usize> {
  bytes: [u8; N],
}

impl<const N: usize> Bitmap<N> {
  pub const BITS: usize = N * 8;

  pub const fn new() -> Self {
    Self { bytes: [0; N] }
  }

  /// Test a bit. Bits past the end read as clear.
  pub fn get(&self, bit: usize) -> bool {
    self.bytes.get(bit / 8).map_or(false, |b| b & (1 << (bit % 8)) != 0)
  }

  /// Set a bit. Returns `false` when the bit lies past the end.
  pub(crate) fn set(&mut self, bit: usize) -> bool {
    match self.bytes.get_mut(bit / 8) {
      Some(b) => {
        *b |= 1 << (bit % 8);
        true
      }
      None => false,
    }
  }

  /// Population count.
  pub fn weight(&self) -> usize {
    self.bytes.iter().map(|b| b.count_ones() as usize).sum()
  }

  /// Indices of set bits in ascending order.
  pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
    (0..Self::BITS).filter(move |&bit| self.get(bit))
  }

  pub fn as_bytes(&self) -> &[u8; N] {
    &self.bytes
  }
}

impl<const N: usize> Default for Bitmap<N> {
  fn default() -> Self {
    Self::new()
  }
}
