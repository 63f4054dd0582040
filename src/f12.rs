//! Function $12: 2-D touch sensor.
//!
//! $12 publishes register descriptors for its query, control and data
//! registers. Control and query registers are addressed by their index within
//! the descriptor; data registers are packed, so their offsets are the summed
//! sizes of the registers before them.

use bitfield_struct::bitfield;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use log::{debug, warn};

use crate::cache::{ContactState, PenState, Position};
use crate::defs::{FunctionNumber, MAX_SLOTS, MAX_WRITE_SIZE};
use crate::pdt::Function;
use crate::register_desc::RegisterDescriptor;
use crate::{Clock, Error, ProtocolViolation, Rmi4};

const QUERY_GENERAL: usize = 0;
const QUERY_DESCRIPTOR: usize = 1;
const CONTROL_DESCRIPTOR: usize = 4;
const DATA_DESCRIPTOR: usize = 7;

const QUERY_CONTROL_SIZE: u16 = 4;
const QUERY_CONTROL_PRESENCE: u16 = 5;
const QUERY_DATA_SIZE: u16 = 7;
const QUERY_DATA_PRESENCE: u16 = 8;

/// Bytes of the control presence query decoded, size byte included.
const CONTROL_PRESENCE_LEN: usize = 7;
/// Bytes of the data presence query decoded, size byte included.
const DATA_PRESENCE_LEN: usize = 3;

const CTRL20: u16 = 20;
const CTRL23: u16 = 23;

const OBJECT_RECORD_SIZE: usize = 8;

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
struct QueryGeneral {
  has_register_descriptors: bool,
  #[bits(2)]
  __: u8,
  has_dribble: bool,
  #[bits(4)]
  ___: u8,
}

/// Reporting mode held in the low three bits of CTRL20's flags byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportingMode {
  /// Report every frame while objects are present.
  Continuous,
  /// Report only when objects move beyond the suppression thresholds.
  Reduced,
  /// Sense only the wake gesture.
  WakeGesture,
  Reserved(u8),
}

impl ReportingMode {
  pub const fn into_bits(self) -> u8 {
    match self {
      Self::Continuous => 0b000,
      Self::Reduced => 0b001,
      Self::WakeGesture => 0b010,
      Self::Reserved(bits) => bits,
    }
  }

  pub const fn from_bits(bits: u8) -> Self {
    match bits {
      0b000 => Self::Continuous,
      0b001 => Self::Reduced,
      0b010 => Self::WakeGesture,
      other => Self::Reserved(other),
    }
  }

  /// Whether the mode has the wake-gesture bit set.
  pub const fn is_gesture(self) -> bool {
    self.into_bits() & 0b010 != 0
  }
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct ReportingFlags {
  #[bits(3)]
  pub mode: ReportingMode,
  #[bits(5)]
  __: u8,
}

/// CTRL20, finger reporting control.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportingControl {
  pub suppress_x: u8,
  pub suppress_y: u8,
  pub flags: ReportingFlags,
}

impl ReportingControl {
  pub const SIZE: usize = 3;
}

impl From<[u8; ReportingControl::SIZE]> for ReportingControl {
  fn from(raw: [u8; ReportingControl::SIZE]) -> Self {
    Self { suppress_x: raw[0], suppress_y: raw[1], flags: ReportingFlags::from_bits(raw[2]) }
  }
}

impl From<ReportingControl> for [u8; ReportingControl::SIZE] {
  fn from(control: ReportingControl) -> Self {
    [control.suppress_x, control.suppress_y, control.flags.into_bits()]
  }
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct ObjectClasses {
  pub finger: bool,
  pub active_stylus: bool,
  pub palm: bool,
  pub unclassified: bool,
  pub hovering_finger: bool,
  pub gloved_finger: bool,
  pub narrow_object: bool,
  pub hand_edge: bool,
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct FingerRemap {
  __: bool,
  pub active_stylus: bool,
  pub palm: bool,
  pub unclassified: bool,
  pub hovering_finger: bool,
  pub gloved_finger: bool,
  pub narrow_object_swipe: bool,
  pub hand_edge: bool,
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct ExtendedClasses {
  pub cover: bool,
  pub stylus: bool,
  pub eraser: bool,
  pub small_object: bool,
  #[bits(4)]
  __: u8,
}

/// CTRL23, which object classes are reported and which are reported as fingers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectReportConfig {
  pub enable: ObjectClasses,
  pub reported_object_count: u8,
  pub as_finger: FingerRemap,
  pub enable_extended: ExtendedClasses,
  pub as_finger_extended: ExtendedClasses,
}

impl ObjectReportConfig {
  pub const SIZE: usize = 5;

  /// Every object class reported natively, nothing folded into fingers.
  pub const fn report_all(reported_object_count: u8) -> Self {
    Self {
      enable: ObjectClasses::from_bits(0xFF),
      reported_object_count,
      as_finger: FingerRemap::new(),
      enable_extended: ExtendedClasses::new().with_cover(true).with_stylus(true).with_eraser(true).with_small_object(true),
      as_finger_extended: ExtendedClasses::new(),
    }
  }

  pub const fn with_reported_object_count(mut self, count: u8) -> Self {
    self.reported_object_count = count;
    self
  }

  pub const fn with_enable(mut self, classes: ObjectClasses) -> Self {
    self.enable = classes;
    self
  }

  pub const fn with_as_finger(mut self, remap: FingerRemap) -> Self {
    self.as_finger = remap;
    self
  }

  /// Lay these settings over `current`, keeping the padding bits the device
  /// reported.
  fn merged_onto(&self, current: Self) -> Self {
    let keep = |current: u8, new: u8, pad: u8| (current & pad) | (new & !pad);
    Self {
      enable: self.enable,
      reported_object_count: self.reported_object_count,
      as_finger: FingerRemap::from_bits(keep(current.as_finger.into_bits(), self.as_finger.into_bits(), 0x01)),
      enable_extended: ExtendedClasses::from_bits(keep(
        current.enable_extended.into_bits(),
        self.enable_extended.into_bits(),
        0xF0,
      )),
      as_finger_extended: ExtendedClasses::from_bits(keep(
        current.as_finger_extended.into_bits(),
        self.as_finger_extended.into_bits(),
        0xF0,
      )),
    }
  }
}

impl Default for ObjectReportConfig {
  fn default() -> Self {
    Self::report_all(10)
  }
}

impl From<[u8; ObjectReportConfig::SIZE]> for ObjectReportConfig {
  fn from(raw: [u8; ObjectReportConfig::SIZE]) -> Self {
    Self {
      enable: ObjectClasses::from_bits(raw[0]),
      reported_object_count: raw[1],
      as_finger: FingerRemap::from_bits(raw[2]),
      enable_extended: ExtendedClasses::from_bits(raw[3]),
      as_finger_extended: ExtendedClasses::from_bits(raw[4]),
    }
  }
}

impl From<ObjectReportConfig> for [u8; ObjectReportConfig::SIZE] {
  fn from(config: ObjectReportConfig) -> Self {
    [
      config.enable.into_bits(),
      config.reported_object_count,
      config.as_finger.into_bits(),
      config.enable_extended.into_bits(),
      config.as_finger_extended.into_bits(),
    ]
  }
}

/// Object classification of one $12 object record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ObjectType {
  None,
  Finger,
  ActiveStylus,
  Palm,
  Unclassified,
  HoveringFinger,
  GlovedFinger,
  NarrowObject,
  HandEdge,
  Cover,
  Stylus,
  Eraser,
  SmallObject,
  Unknown(u8),
}

impl ObjectType {
  pub const fn from_bits(bits: u8) -> Self {
    match bits {
      0x00 => Self::None,
      0x01 => Self::Finger,
      0x02 => Self::ActiveStylus,
      0x03 => Self::Palm,
      0x04 => Self::Unclassified,
      0x05 => Self::HoveringFinger,
      0x06 => Self::GlovedFinger,
      0x07 => Self::NarrowObject,
      0x08 => Self::HandEdge,
      0x0A => Self::Cover,
      0x0B => Self::Stylus,
      0x0C => Self::Eraser,
      0x0D => Self::SmallObject,
      other => Self::Unknown(other),
    }
  }
}

/// One poll's worth of object states, indexed by hardware slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectedObjects {
  pub fingers: [ContactState; MAX_SLOTS],
  pub pens: [PenState; MAX_SLOTS],
  pub pucks: [ContactState; MAX_SLOTS],
  pub positions: [Position; MAX_SLOTS],
}

impl DetectedObjects {
  /// Decode packed 8-byte object records `[type, x lo, x hi, y lo, y hi, z, wx, wy]`.
  pub fn decode(raw: &[u8]) -> Self {
    let mut objects = Self::default();
    for (slot, record) in raw.chunks_exact(OBJECT_RECORD_SIZE).take(MAX_SLOTS).enumerate() {
      match ObjectType::from_bits(record[0]) {
        ObjectType::Finger | ObjectType::HoveringFinger | ObjectType::GlovedFinger => {
          objects.fingers[slot] = ContactState::Accurate;
        }
        ObjectType::Palm => objects.pucks[slot] = ContactState::Accurate,
        ObjectType::ActiveStylus | ObjectType::Stylus => objects.pens[slot] = PenState::Tip,
        ObjectType::Eraser => objects.pens[slot] = PenState::Eraser,
        ObjectType::None => {}
        other => debug!("slot {} holds unreported object {:?}", slot, other),
      }
      objects.positions[slot] = Position {
        x: u16::from_le_bytes([record[1], record[2]]),
        y: u16::from_le_bytes([record[3], record[4]]),
      };
    }
    objects
  }
}

/// Location of a packed data register relative to the data base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataRegion {
  pub offset: u16,
  pub size: u16,
}

/// Register layout and reporting state of the 2-D sensor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Touch2d {
  query: RegisterDescriptor,
  control: RegisterDescriptor,
  data: RegisterDescriptor,
  has_dribble: bool,
  max_fingers: u8,
  gestures_enabled: bool,
  objects: Option<DataRegion>,
  gestures: Option<DataRegion>,
  attention: Option<DataRegion>,
  palm: Option<DataRegion>,
  object_attention: Option<DataRegion>,
}

impl Touch2d {
  fn new(query: RegisterDescriptor, control: RegisterDescriptor, data: RegisterDescriptor, max_fingers: u8) -> Self {
    let region = |register: u16| {
      let item = data.item(register)?;
      let offset = data.byte_offset(register)?;
      Some(DataRegion { offset: offset as u16, size: item.size as u16 })
    };
    Self {
      objects: region(1),
      gestures: region(2),
      attention: region(4),
      palm: region(13),
      object_attention: region(15),
      query,
      control,
      data,
      has_dribble: false,
      max_fingers,
      gestures_enabled: false,
    }
  }

  pub fn query(&self) -> &RegisterDescriptor {
    &self.query
  }

  pub fn control(&self) -> &RegisterDescriptor {
    &self.control
  }

  pub fn data(&self) -> &RegisterDescriptor {
    &self.data
  }

  pub fn has_dribble(&self) -> bool {
    self.has_dribble
  }

  /// Object records reported per frame, from CTRL23.
  pub fn max_fingers(&self) -> u8 {
    self.max_fingers
  }

  pub fn gestures_enabled(&self) -> bool {
    self.gestures_enabled
  }

  /// Combined size of every data register.
  pub fn packet_size(&self) -> usize {
    self.data.packet_size()
  }

  /// Data register 1, the object records.
  pub fn objects(&self) -> Option<DataRegion> {
    self.objects
  }

  /// Data register 2, gesture data.
  pub fn gestures(&self) -> Option<DataRegion> {
    self.gestures
  }

  /// Data register 4.
  pub fn attention(&self) -> Option<DataRegion> {
    self.attention
  }

  /// Data register 13.
  pub fn palm(&self) -> Option<DataRegion> {
    self.palm
  }

  /// Data register 15, per-object attention bits.
  pub fn object_attention(&self) -> Option<DataRegion> {
    self.object_attention
  }
}

impl<I, E, C> Rmi4<I, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  C: Clock,
{
  /// Parse the $12 register descriptors and program the control registers
  /// the device advertises.
  pub(crate) async fn configure_f12(&mut self) -> Result<(), Error<E>> {
    let f12 = self.function(FunctionNumber::Touch2d)?;

    let [general] = self.read::<1>(f12.query(QUERY_GENERAL)?).await?;
    let general = QueryGeneral::from_bits(general);
    if !general.has_register_descriptors() {
      return Err(ProtocolViolation::NoRegisterDescriptors.into());
    }

    let query = self.read_register_descriptor(f12.query(QUERY_DESCRIPTOR)?).await?;
    let control = self.read_register_descriptor(f12.query(CONTROL_DESCRIPTOR)?).await?;
    let data = self.read_register_descriptor(f12.query(DATA_DESCRIPTOR)?).await?;

    let mut touch = Touch2d::new(query, control, data, self.config.reporting.reported_object_count);
    touch.has_dribble = general.has_dribble();
    debug!("$12 packet size {}, objects at {:?}", touch.packet_size(), touch.objects);
    self.touch = touch;

    self.configure_control_registers(&f12).await?;
    self.log_data_registers(&f12).await
  }

  async fn configure_control_registers(&mut self, f12: &Function) -> Result<(), Error<E>> {
    let presence = self.read_presence(f12, QUERY_CONTROL_SIZE, QUERY_CONTROL_PRESENCE, CONTROL_PRESENCE_LEN).await?;

    for register in present_registers(&presence) {
      let index = self.touch.control.index_of(register);
      let Some(item) = self.touch.control.registers().get(index) else {
        warn!("$12 control register {} missing from its descriptor", register);
        continue;
      };
      debug!("$12 CTRL{} at index {} with a size of {}", register, index, item.size);

      match register {
        CTRL20 => self.set_reporting_mode(ReportingMode::Continuous).await?,
        CTRL23 => self.set_object_report_config(self.config.reporting).await?,
        _ => debug!("leaving $12 CTRL{} at its default", register),
      }
    }
    Ok(())
  }

  async fn log_data_registers(&mut self, f12: &Function) -> Result<(), Error<E>> {
    let presence = self.read_presence(f12, QUERY_DATA_SIZE, QUERY_DATA_PRESENCE, DATA_PRESENCE_LEN).await?;
    for register in present_registers(&presence[..DATA_PRESENCE_LEN]) {
      match self.touch.data.item(register) {
        Some(item) => debug!("$12 DATA{} with a size of {}", register, item.size),
        None => warn!("$12 data register {} missing from its descriptor", register),
      }
    }
    Ok(())
  }

  /// Read a presence query pair: a one-byte size register followed by the
  /// presence register it sizes. Returns the presence bytes, size byte first.
  async fn read_presence(
    &mut self,
    f12: &Function,
    size_register: u16,
    map_register: u16,
    max_len: usize,
  ) -> Result<[u8; CONTROL_PRESENCE_LEN], Error<E>> {
    let size_index = self.touch.query.index_of(size_register);
    let size_item = self.touch.query.registers().get(size_index).ok_or(ProtocolViolation::MissingRegister(size_register))?;
    if size_item.size != 1 {
      let actual = size_item.size;
      return Err(ProtocolViolation::UnexpectedRegisterLayout { register: size_register, expected: 1, actual }.into());
    }

    let map_index = self.touch.query.index_of(map_register);
    let map_size =
      self.touch.query.registers().get(map_index).map(|item| item.size).ok_or(ProtocolViolation::MissingRegister(map_register))?;

    let [len] = self.read::<1>(f12.query(size_index)?).await?;
    let len = (len as usize).min(max_len);
    if (map_size as usize) < len {
      let expected = len as u32;
      return Err(ProtocolViolation::UnexpectedRegisterLayout { register: map_register, expected, actual: map_size }.into());
    }
    if map_size as usize > len {
      warn!("$12 query {} is {} bytes, only {} decoded", map_register, map_size, len);
    }

    let mut presence = [0u8; CONTROL_PRESENCE_LEN];
    self.read_register(f12.query(map_index)?, &mut presence[..len]).await?;
    Ok(presence)
  }

  /// Address of $12 control register `register`, which must be exactly
  /// `expected` bytes long.
  fn fixed_control_register(&self, register: u16, expected: usize) -> Result<u16, Error<E>> {
    let f12 = self.function(FunctionNumber::Touch2d)?;
    let index = self.touch.control.index_of(register);
    let item = self.touch.control.registers().get(index).ok_or(ProtocolViolation::MissingRegister(register))?;
    if item.size as usize != expected {
      warn!("unexpected $12 CTRL{} size {}", register, item.size);
      let actual = item.size;
      return Err(ProtocolViolation::UnexpectedRegisterLayout { register, expected: expected as u32, actual }.into());
    }
    Ok(f12.control(index)?)
  }

  pub async fn reporting_control(&mut self) -> Result<ReportingControl, Error<E>> {
    let addr = self.fixed_control_register(CTRL20, ReportingControl::SIZE)?;
    Ok(ReportingControl::from(self.read::<{ ReportingControl::SIZE }>(addr).await?))
  }

  /// Switch the reporting mode, clearing the motion suppression thresholds.
  pub async fn set_reporting_mode(&mut self, mode: ReportingMode) -> Result<(), Error<E>> {
    let addr = self.fixed_control_register(CTRL20, ReportingControl::SIZE)?;
    self
      .modify::<{ ReportingControl::SIZE }, _>(addr, |raw| {
        let mut control = ReportingControl::from(*raw);
        control.suppress_x = 0;
        control.suppress_y = 0;
        control.flags.set_mode(mode);
        *raw = control.into();
      })
      .await?;

    self.touch.gestures_enabled = mode.is_gesture();
    debug!("$12 reporting mode {}, gestures {}", mode.into_bits(), self.touch.gestures_enabled);
    Ok(())
  }

  pub async fn object_report_config(&mut self) -> Result<ObjectReportConfig, Error<E>> {
    let addr = self.fixed_control_register(CTRL23, ObjectReportConfig::SIZE)?;
    Ok(ObjectReportConfig::from(self.read::<{ ObjectReportConfig::SIZE }>(addr).await?))
  }

  /// Program CTRL23 and adopt its reported object count as the number of
  /// object records read per frame.
  pub async fn set_object_report_config(&mut self, config: ObjectReportConfig) -> Result<(), Error<E>> {
    let addr = self.fixed_control_register(CTRL23, ObjectReportConfig::SIZE)?;
    self
      .modify::<{ ObjectReportConfig::SIZE }, _>(addr, |raw| {
        *raw = config.merged_onto(ObjectReportConfig::from(*raw)).into();
      })
      .await?;

    self.touch.max_fingers = config.reported_object_count;
    Ok(())
  }

  /// Read $12 control register `register` into `buf`, returning the
  /// device-reported size.
  pub async fn read_control_register(&mut self, register: u16, buf: &mut [u8]) -> Result<usize, Error<E>> {
    let (addr, size) = self.control_register(register)?;
    let len = size.min(buf.len());
    self.read_register(addr, &mut buf[..len]).await?;
    Ok(size)
  }

  /// Write `data` over $12 control register `register`.
  ///
  /// A length that differs from the device-reported size is logged and the
  /// write proceeds with the device's size: the register is read, overlaid
  /// with as much of `data` as fits, and written back.
  pub async fn write_control_register(&mut self, register: u16, data: &[u8]) -> Result<(), Error<E>> {
    let (addr, size) = self.control_register(register)?;
    if size != data.len() {
      warn!("$12 CTRL{} is {} bytes on the device, {} supplied", register, size, data.len());
    }
    if size > MAX_WRITE_SIZE {
      return Err(Error::BufferOverflow);
    }

    let mut buf = [0u8; MAX_WRITE_SIZE];
    let buf = &mut buf[..size];
    self.read_register(addr, buf).await?;
    let n = size.min(data.len());
    buf[..n].copy_from_slice(&data[..n]);
    self.write_register(addr, buf).await
  }

  fn control_register(&self, register: u16) -> Result<(u16, usize), Error<E>> {
    let f12 = self.function(FunctionNumber::Touch2d)?;
    let index = self.touch.control.index_of(register);
    let item = self.touch.control.registers().get(index).ok_or(ProtocolViolation::MissingRegister(register))?;
    Ok((f12.control(index)?, item.size as usize))
  }

  /// Read one frame of object records.
  pub(crate) async fn read_objects(&mut self) -> Result<DetectedObjects, Error<E>> {
    let f12 = self.function(FunctionNumber::Touch2d)?;
    let region = self.touch.objects.ok_or(ProtocolViolation::MissingRegister(1))?;

    let records = (self.touch.max_fingers as usize + 2).min(MAX_SLOTS);
    let mut raw = [0u8; MAX_SLOTS * OBJECT_RECORD_SIZE + 1];
    let raw = &mut raw[..records * OBJECT_RECORD_SIZE + 1];
    self.read_register(f12.data(region.offset as usize)?, raw).await?;

    Ok(DetectedObjects::decode(&raw[..records * OBJECT_RECORD_SIZE]))
  }
}

/// Register numbers flagged in a presence query, size byte first.
fn present_registers(presence: &[u8]) -> impl Iterator<Item = u16> + '_ {
  let bits = presence.len().saturating_sub(1) * 8;
  (0..bits).filter(move |&bit| presence[1 + bit / 8] & (1 << (bit % 8)) != 0).map(|bit| bit as u16)
}
