use std::collections::BTreeMap;
use std::time::Duration;

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Copy, Clone)]
pub struct EventId(u64);

/// A deadline ordered table of pending events
/// ## Description
/// Time is virtual: it starts at zero and only moves when the host calls
/// [`Timer::advance_to`]. Events with equal deadlines fire in scheduling
/// order.
#[derive(Debug)]
pub struct Timer<E> {
    now: Duration,
    next_id: u64,
    events: BTreeMap<(Duration, EventId), E>,
}

impl<E> Default for Timer<E> {
    fn default() -> Self {
        Self { now: Duration::ZERO, next_id: 0, events: BTreeMap::new() }
    }
}

impl<E> Timer<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn schedule_after(&mut self, delay: Duration, event: E) -> EventId {
        self.next_id += 1;
        let event_id = EventId(self.next_id);
        self.events.insert((self.now + delay, event_id), event);
        event_id
    }

    pub fn cancel_event(&mut self, event_id: EventId) {
        self.events.retain(|(_, id), _| *id != event_id);
    }

    /// Cancels every pending event matching `pred`.
    pub fn cancel_where<F: Fn(&E) -> bool>(&mut self, pred: F) {
        self.events.retain(|_, event| !pred(event));
    }

    pub fn cancel_all(&mut self) {
        self.events.clear();
    }

    pub fn is_scheduled<F: Fn(&E) -> bool>(&self, pred: F) -> bool {
        self.events.values().any(pred)
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.events.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Moves the clock forward. Time never goes backwards.
    pub fn advance_to(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }

    /// Removes and returns the earliest event that is due.
    pub fn pop_due(&mut self) -> Option<E> {
        let key = *self.events.keys().next()?;
        if key.0 > self.now {
            return None;
        }
        self.events.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(PartialEq, Eq, Debug, Clone, Copy)]
    struct FooEvent(u8);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn schedule_cancel_event() {
        let mut timer = Timer::<FooEvent>::new();
        let event_id = timer.schedule_after(ms(5), FooEvent(8));
        assert_eq!(Some(ms(5)), timer.next_deadline());
        assert_eq!(None, timer.pop_due());

        // Verify event does not trigger if it was canceled.
        timer.cancel_event(event_id);
        timer.advance_to(ms(10));
        assert_eq!(None, timer.pop_due());
        assert!(timer.is_empty());
    }

    #[test]
    fn events_fire_in_deadline_order() {
        let mut timer = Timer::new();
        timer.schedule_after(ms(30), FooEvent(3));
        timer.schedule_after(ms(10), FooEvent(1));
        timer.schedule_after(ms(10), FooEvent(2));
        timer.advance_to(ms(20));
        assert_eq!(Some(FooEvent(1)), timer.pop_due());
        assert_eq!(Some(FooEvent(2)), timer.pop_due());
        assert_eq!(None, timer.pop_due());
        assert_eq!(Some(ms(30)), timer.next_deadline());

        // deadlines are relative to the current time
        timer.schedule_after(ms(5), FooEvent(4));
        assert_eq!(Some(ms(25)), timer.next_deadline());
    }

    #[test]
    fn time_never_goes_backwards() {
        let mut timer = Timer::<FooEvent>::new();
        timer.advance_to(ms(100));
        timer.advance_to(ms(50));
        assert_eq!(ms(100), timer.now());
    }

    #[test]
    fn cancel_where_and_all() {
        let mut timer = Timer::new();
        timer.schedule_after(ms(1), FooEvent(1));
        timer.schedule_after(ms(2), FooEvent(2));
        timer.schedule_after(ms(3), FooEvent(1));
        timer.cancel_where(|e| *e == FooEvent(1));
        assert_eq!(1, timer.len());
        assert!(timer.is_scheduled(|e| *e == FooEvent(2)));
        assert!(!timer.is_scheduled(|e| *e == FooEvent(1)));
        timer.cancel_all();
        assert_eq!(None, timer.next_deadline());
    }
}
