/// Message counts for the most recent `len` epoch seconds.
///
/// A ring indexed by `second % len`. "Recent" is relative to the newest
/// second recorded, not the wall clock, so replays and tests are
/// deterministic. Seconds older than the window are ignored.
#[derive(Debug, Clone)]
pub struct SecondWindow {
    slots: Vec<Option<(i64, u64)>>,
    newest: Option<i64>,
}

impl SecondWindow {
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len.max(1)],
            newest: None,
        }
    }

    /// Counts one message in `second`. Returns `false` if it fell outside
    /// the window.
    pub fn record(&mut self, second: i64) -> bool {
        let len = self.slots.len() as i64;
        if self.newest.is_some_and(|newest| second <= newest - len) {
            return false;
        }

        match &mut self.slots[second.rem_euclid(len) as usize] {
            Some((slot_second, count)) if *slot_second == second => *count += 1,
            other => *other = Some((second, 1)),
        }
        self.newest = Some(self.newest.map_or(second, |newest| newest.max(second)));
        true
    }

    /// Mean count over the seconds currently in the window.
    pub fn mean(&self) -> Option<f64> {
        let (sum, seconds) = self
            .live()
            .fold((0u64, 0u64), |(sum, n), (_, count)| (sum + count, n + 1));
        (seconds > 0).then(|| sum as f64 / seconds as f64)
    }

    /// Number of distinct seconds currently in the window.
    pub fn seconds(&self) -> usize {
        self.live().count()
    }

    fn live(&self) -> impl Iterator<Item = (i64, u64)> + '_ {
        let floor = self
            .newest
            .map_or(i64::MIN, |newest| newest - self.slots.len() as i64);
        self.slots
            .iter()
            .flatten()
            .copied()
            .filter(move |(second, _)| *second > floor)
    }
}
