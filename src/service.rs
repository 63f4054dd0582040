use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use log::{debug, info, warn};

use crate::defs::irq;
use crate::report::{KeyReport, Report, WakeReport};
use crate::{Clock, Error, Rmi4};

/// Outcome of one [`Rmi4::service_interrupt`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Serviced {
  /// Report to hand to the host, if this round produced one.
  pub report: Option<Report>,
  /// Every pending interrupt source has been drained.
  pub complete: bool,
}

impl<I, E, C> Rmi4<I, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  C: Clock,
{
  /// Service the controller's interrupt, producing at most one report.
  ///
  /// Call again until [`Serviced::complete`] is set: a single interrupt may
  /// need several touch reports to page through every down contact. Touch
  /// data takes precedence over pens, and buttons are only read once the
  /// 2-D sensor has nothing to report.
  pub async fn service_interrupt(&mut self) -> Result<Serviced, Error<E>> {
    if self.interrupt_status == 0 {
      self.interrupt_status = self.check_interrupts().await?;
    }

    let ignored = self.interrupt_status & !irq::SERVICED;
    if ignored != 0 {
      warn!("ignoring interrupt bits {:#04x}", ignored);
      self.interrupt_status &= irq::SERVICED;
    }

    let mut report = None;
    if self.interrupt_status & irq::TOUCH_2D != 0 {
      report = self.service_touch().await?;
    }

    if report.is_none() && self.interrupt_status & irq::BUTTONS != 0 {
      let reversed = self.interrupt_status & irq::BUTTON_REVERSED != 0;
      if let Some(buttons) = self.read_buttons(reversed).await? {
        self.interrupt_status &= !irq::BUTTONS;
        report = Some(Report::Keys(KeyReport::from(buttons)));
      }
    }

    Ok(Serviced { report, complete: self.interrupt_status == 0 })
  }

  async fn service_touch(&mut self) -> Result<Option<Report>, Error<E>> {
    if self.touch.gestures_enabled() {
      let wake = self.toggle_wake();
      if !self.escape_stroke_once {
        self.interrupt_status &= !irq::TOUCH_2D;
      }
      return Ok(Some(Report::Wake(wake)));
    }

    // Pending pages go out before a fresh frame is read.
    let report = if self.touch_batch.has_more() {
      self.next_touch_report(None).map(Report::Touch)
    } else if self.pen_batch.has_more() {
      self.next_pen_report(None).map(Report::Pen)
    } else {
      let objects = self.read_objects().await?;
      match self.next_touch_report(Some(&objects)) {
        Some(touch) => Some(Report::Touch(touch)),
        None => self.next_pen_report(Some(&objects)).map(Report::Pen),
      }
    };

    if report.is_none() {
      debug!("no object data to report");
    }
    if self.touch_batch.is_drained() && self.pen_batch.is_drained() {
      self.interrupt_status &= !irq::TOUCH_2D;
    }
    Ok(report)
  }

  /// The wake gesture has no release, so successive gesture interrupts
  /// alternate between power-down and wake.
  fn toggle_wake(&mut self) -> WakeReport {
    let power_down = !self.escape_stroke_once;
    self.escape_stroke_once = power_down;
    info!("wake gesture, power down {}", power_down);
    WakeReport { power_down }
  }
}

#[cfg(test)]
mod tests {
  use embassy_futures::block_on;

  use super::*;
  use crate::mock::{reference_device, session_with, FakeBus, F1A_DATA};
  use crate::report::{PenReport, TouchReport};
  use crate::Config;

  const FINGER: u8 = 0x01;
  const STYLUS: u8 = 0x0B;

  fn started(config: Config) -> Rmi4<FakeBus, fn() -> u64> {
    let mut rmi = session_with(reference_device(), config);
    block_on(rmi.discover_and_configure()).unwrap();
    rmi
  }

  fn service(rmi: &mut Rmi4<FakeBus, fn() -> u64>) -> Serviced {
    block_on(rmi.service_interrupt()).unwrap()
  }

  fn touch(serviced: &Serviced) -> &TouchReport {
    match &serviced.report {
      Some(Report::Touch(touch)) => touch,
      other => panic!("expected a touch report, got {:?}", other),
    }
  }

  fn pen(serviced: &Serviced) -> PenReport {
    match &serviced.report {
      Some(Report::Pen(pen)) => *pen,
      other => panic!("expected a pen report, got {:?}", other),
    }
  }

  #[test]
  fn paginates_three_fingers_over_two_reports() {
    let mut rmi = started(Config::default());
    rmi.i2c.set_objects(&[(FINGER, 10, 11), (0, 0, 0), (FINGER, 20, 21), (FINGER, 30, 31)]);
    rmi.i2c.raise(0x00, irq::TOUCH_2D);

    let first = service(&mut rmi);
    assert!(!first.complete);
    let report = touch(&first);
    assert_eq!(report.contact_count, 3);
    assert_eq!(report.contacts.iter().map(|c| c.id).collect::<std::vec::Vec<_>>(), [0, 2]);

    // The device status must not be re-read mid-batch.
    rmi.i2c.raise(0x00, 0x00);
    let second = service(&mut rmi);
    assert!(second.complete);
    let report = touch(&second);
    assert_eq!(report.contact_count, 0);
    assert_eq!(report.contacts[0].id, 3);
    assert_eq!((report.contacts[0].x, report.contacts[0].y), (30, 31));
  }

  #[test]
  fn lift_off_then_no_data() {
    let mut rmi = started(Config::default());
    rmi.i2c.set_objects(&[(FINGER, 5, 6)]);
    rmi.i2c.raise(0x00, irq::TOUCH_2D);
    assert!(touch(&service(&mut rmi)).contacts[0].tip);

    rmi.i2c.set_objects(&[]);
    let up = service(&mut rmi);
    assert!(up.complete);
    assert!(!touch(&up).contacts[0].tip);

    // Nothing down: the 2-D bit still clears so servicing terminates.
    let idle = service(&mut rmi);
    assert_eq!(idle.report, None);
    assert!(idle.complete);
  }

  #[test]
  fn falls_through_to_pen() {
    let mut rmi = started(Config::default());
    rmi.i2c.set_objects(&[(0, 0, 0), (STYLUS, 70, 80)]);
    rmi.i2c.raise(0x00, irq::TOUCH_2D);

    let serviced = service(&mut rmi);
    let report = pen(&serviced);
    assert!(report.in_range && report.tip && !report.eraser);
    assert_eq!((report.x, report.y), (70, 80));
    assert!(serviced.complete);
  }

  #[test]
  fn pending_pen_page_goes_out_before_a_new_finger() {
    let mut rmi = started(Config::default());
    rmi.i2c.set_objects(&[(STYLUS, 70, 80), (STYLUS, 90, 100)]);
    rmi.i2c.raise(0x00, irq::TOUCH_2D);

    let first = service(&mut rmi);
    assert_eq!((pen(&first).x, pen(&first).y), (70, 80));
    assert!(!first.complete);

    rmi.i2c.set_objects(&[(STYLUS, 70, 80), (STYLUS, 90, 100), (FINGER, 5, 5)]);
    let second = service(&mut rmi);
    assert_eq!((pen(&second).x, pen(&second).y), (90, 100));
    assert!(second.complete);

    // A held finger completes every round.
    for _ in 0..5 {
      let serviced = service(&mut rmi);
      assert_eq!(touch(&serviced).contacts[0].id, 2);
      assert!(serviced.complete);
    }
  }

  #[test]
  fn buttons_after_touch() {
    let mut rmi = started(Config::default());
    rmi.i2c.set_objects(&[(FINGER, 1, 1)]);
    rmi.i2c.set(F1A_DATA, &[0b100]);
    rmi.i2c.raise(0x00, irq::TOUCH_2D | irq::BUTTON);

    let first = service(&mut rmi);
    touch(&first);
    assert!(!first.complete);

    let second = service(&mut rmi);
    assert_eq!(second.report, Some(Report::Keys(KeyReport { back: true, start: false, search: false })));
    assert!(second.complete);
  }

  #[test]
  fn reversed_button_bit_selects_lsb_first() {
    let mut rmi = started(Config::default());
    rmi.i2c.set(F1A_DATA, &[0b100]);
    rmi.i2c.raise(0x00, irq::BUTTON_REVERSED);

    let serviced = service(&mut rmi);
    assert_eq!(serviced.report, Some(Report::Keys(KeyReport { back: false, start: false, search: true })));
    assert!(serviced.complete);
  }

  #[test]
  fn unserviced_bits_are_dropped() {
    let mut rmi = started(Config::default());
    rmi.i2c.raise(0x00, 0x02 | 0x40);

    let serviced = service(&mut rmi);
    assert_eq!(serviced.report, None);
    assert!(serviced.complete);
  }

  #[test]
  fn wake_gesture_alternates() {
    let mut rmi = started(Config::default().with_double_tap_to_wake(true));
    block_on(rmi.set_display_state(crate::DisplayState::Off)).unwrap();
    rmi.i2c.raise(0x00, irq::TOUCH_2D);

    let down = service(&mut rmi);
    assert_eq!(down.report, Some(Report::Wake(WakeReport { power_down: true })));
    assert!(!down.complete);

    let up = service(&mut rmi);
    assert_eq!(up.report, Some(Report::Wake(WakeReport { power_down: false })));
    assert!(up.complete);

    let again = service(&mut rmi);
    assert_eq!(again.report, Some(Report::Wake(WakeReport { power_down: true })));
  }

  #[test]
  fn bus_error_surfaces() {
    let mut rmi = started(Config::default());
    rmi.i2c.fail_next();
    let err = block_on(rmi.service_interrupt()).unwrap_err();
    assert_eq!(err.bus_error_kind(), Some(embedded_hal::i2c::ErrorKind::Other));
    assert!(block_on(rmi.service_interrupt()).unwrap().complete);
  }
}
