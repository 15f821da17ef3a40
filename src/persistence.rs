//! Temporal debounce for detections.

/// Counts consecutive qualifying observations. A single non-qualifying
/// observation resets the run to zero.
///
/// The counter also remembers a trigger it already handed to the alarm
/// thread, so a long run does not send one trigger per observation while the
/// first is still in flight.
#[derive(Clone, Debug)]
pub struct PersistenceCounter {
    threshold: u32,
    count: u32,
    /// Intrusion count seen when the last trigger was sent.
    in_flight: Option<u64>,
}

impl PersistenceCounter {
    /// `threshold` of 0 is treated as 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            count: 0,
            in_flight: None,
        }
    }

    /// Records one frame or batch and returns the current run length.
    pub fn observe(&mut self, qualifying: bool) -> u32 {
        if qualifying {
            self.count = self.count.saturating_add(1);
        } else {
            self.count = 0;
            self.in_flight = None;
        }
        self.count
    }

    pub fn reached(&self) -> bool {
        self.count >= self.threshold
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Whether the run should raise the alarm now, given the alarm's current
    /// `(active, intrusion_count)`. A sent trigger counts as settled once the
    /// alarm is seen active or the intrusion count has moved.
    pub fn should_trigger(&mut self, alarm: (bool, u64)) -> bool {
        let (active, intrusions) = alarm;
        if let Some(sent_at) = self.in_flight {
            if active || intrusions != sent_at {
                self.in_flight = None;
            }
        }
        self.reached() && !active && self.in_flight.is_none()
    }

    /// Records a trigger handed to the alarm while the count was `intrusions`.
    pub fn triggered(&mut self, intrusions: u64) {
        self.in_flight = Some(intrusions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resets_on_first_miss() {
        let mut counter = PersistenceCounter::new(5);
        for _ in 0..4 {
            counter.observe(true);
        }
        assert!(!counter.reached());
        assert_eq!(counter.observe(false), 0);
        assert_eq!(counter.observe(true), 1);
        assert!(!counter.reached());
    }

    #[test]
    fn reaches_threshold_and_keeps_counting() {
        let mut counter = PersistenceCounter::new(3);
        counter.observe(true);
        counter.observe(true);
        assert_eq!(counter.observe(true), 3);
        assert!(counter.reached());
        counter.observe(true);
        assert!(counter.reached());
        assert_eq!(counter.observe(false), 0);
        assert!(!counter.reached());
    }

    #[test]
    fn in_flight_trigger_is_sent_once() {
        let mut counter = PersistenceCounter::new(2);
        counter.observe(true);
        assert!(!counter.should_trigger((false, 0)));
        counter.observe(true);
        assert!(counter.should_trigger((false, 0)));
        counter.triggered(0);

        // alarm thread has not applied it yet
        counter.observe(true);
        assert!(!counter.should_trigger((false, 0)));
        // applied, then silenced while the run continues
        counter.observe(true);
        assert!(!counter.should_trigger((true, 1)));
        counter.observe(true);
        assert!(counter.should_trigger((false, 1)));
        counter.triggered(1);

        // silenced before the loop ever saw it active
        counter.observe(true);
        assert!(counter.should_trigger((false, 2)));
    }

    #[test]
    fn miss_clears_in_flight_trigger() {
        let mut counter = PersistenceCounter::new(1);
        counter.observe(true);
        assert!(counter.should_trigger((false, 0)));
        counter.triggered(0);
        counter.observe(false);
        counter.observe(true);
        assert!(counter.should_trigger((false, 0)));
    }

    #[test]
    fn zero_threshold_behaves_as_one() {
        let mut counter = PersistenceCounter::new(0);
        assert_eq!(counter.threshold(), 1);
        counter.observe(true);
        assert!(counter.reached());
    }
}
