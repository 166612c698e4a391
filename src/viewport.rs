use std::time::{Duration, Instant};

/// Debounce window after the last camera change before a data refresh fires.
pub const REFRESH_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Debounces camera-settled events into data refreshes.
///
/// egui has no timer callbacks, so this is a polled deadline: every camera
/// change re-arms the single deadline, and `poll` reports it at most once
/// after the window elapsed uninterrupted. A fresh tracker fires immediately
/// to cover the initial viewport.
#[derive(Debug)]
pub struct ViewportTracker {
  delay: Duration,
  deadline: Option<Instant>,
}

impl ViewportTracker {
  #[must_use]
  pub fn new(now: Instant) -> Self {
    Self::with_delay(REFRESH_DEBOUNCE, now)
  }

  #[must_use]
  pub fn with_delay(delay: Duration, now: Instant) -> Self {
    Self {
      delay,
      // Initial refresh fires on the first poll.
      deadline: Some(now),
    }
  }

  /// (Re)arms the deadline. A new event always supersedes the previous one,
  /// so at most one refresh is pending at any time.
  pub fn touch(&mut self, now: Instant) {
    self.deadline = Some(now + self.delay);
  }

  /// True exactly once after the debounce window elapsed.
  pub fn poll(&mut self, now: Instant) -> bool {
    match self.deadline {
      Some(deadline) if now >= deadline => {
        self.deadline = None;
        true
      }
      _ => false,
    }
  }

  /// The next instant `poll` could fire, used to schedule a repaint.
  #[must_use]
  pub fn next_deadline(&self) -> Option<Instant> {
    self.deadline
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const DELAY: Duration = Duration::from_millis(1000);

  #[test]
  fn fires_immediately_on_creation() {
    let start = Instant::now();
    let mut tracker = ViewportTracker::with_delay(DELAY, start);
    assert!(tracker.poll(start));
    assert!(!tracker.poll(start));
  }

  #[test]
  fn many_events_in_window_fire_once_after_the_last() {
    let start = Instant::now();
    let mut tracker = ViewportTracker::with_delay(DELAY, start);
    assert!(tracker.poll(start));

    // Five camera events 300 ms apart, all within each other's window.
    let mut now = start;
    for _ in 0..5 {
      tracker.touch(now);
      now += Duration::from_millis(300);
      assert!(!tracker.poll(now));
    }

    // The window counts from the last event only.
    let last_event = now - Duration::from_millis(300);
    assert!(!tracker.poll(last_event + Duration::from_millis(999)));
    assert!(tracker.poll(last_event + DELAY));
    assert!(!tracker.poll(last_event + DELAY + Duration::from_secs(5)));
  }

  #[test]
  fn touch_after_fire_rearms() {
    let start = Instant::now();
    let mut tracker = ViewportTracker::with_delay(DELAY, start);
    assert!(tracker.poll(start));
    tracker.touch(start + Duration::from_secs(2));
    assert!(!tracker.poll(start + Duration::from_secs(2)));
    assert!(tracker.poll(start + Duration::from_secs(2) + DELAY));
  }
}
