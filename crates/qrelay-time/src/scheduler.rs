//! Event scheduler - single-threaded, cooperative, event-driven
//!
//! Events are delivered in timestamp order; events sharing a timestamp are
//! delivered in the order they were scheduled. Popping an event advances the
//! clock to its timestamp.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use qrelay_core::SimTime;

use crate::SimClock;

/// Event waiting in the queue
#[derive(Debug)]
struct Scheduled<E> {
    at: SimTime,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    // Reversed: BinaryHeap is a max-heap, earliest event must surface first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Scheduler statistics
#[derive(Clone, Debug, Default)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub delivered: u64,
}

/// Discrete-event scheduler
#[derive(Debug)]
pub struct EventScheduler<E> {
    clock: SimClock,
    queue: BinaryHeap<Scheduled<E>>,
    next_seq: u64,
    stats: SchedulerStats,
}

impl<E> EventScheduler<E> {
    pub fn new() -> Self {
        EventScheduler {
            clock: SimClock::new(),
            queue: BinaryHeap::new(),
            next_seq: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Current simulated time
    #[inline]
    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    /// Schedule an event at an absolute time. Past times fire at `now`.
    pub fn schedule_at(&mut self, at: SimTime, event: E) {
        let at = at.max(self.clock.now());
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.scheduled += 1;
        self.queue.push(Scheduled { at, seq, event });
    }

    /// Schedule an event `delay` after now
    pub fn schedule_after(&mut self, delay: Duration, event: E) {
        let at = self.clock.now() + delay;
        self.schedule_at(at, event);
    }

    /// Pop the next event and advance the clock to it
    pub fn pop(&mut self) -> Option<(SimTime, E)> {
        let next = self.queue.pop()?;
        self.clock.advance_to(next.at);
        self.stats.delivered += 1;
        tracing::trace!(at = %next.at, seq = next.seq, "event delivered");
        Some((next.at, next.event))
    }

    /// Timestamp of the next pending event
    pub fn peek_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|s| s.at)
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

impl<E> Default for EventScheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_time_order() {
        let mut sched = EventScheduler::new();
        sched.schedule_at(SimTime::from_nanos(30), "c");
        sched.schedule_at(SimTime::from_nanos(10), "a");
        sched.schedule_at(SimTime::from_nanos(20), "b");

        let order: Vec<_> = std::iter::from_fn(|| sched.pop()).map(|(_, e)| e).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(sched.now(), SimTime::from_nanos(30));
    }

    #[test]
    fn test_fifo_on_ties() {
        let mut sched = EventScheduler::new();
        for i in 0..5 {
            sched.schedule_at(SimTime::from_nanos(7), i);
        }
        let order: Vec<_> = std::iter::from_fn(|| sched.pop()).map(|(_, e)| e).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_past_events_fire_now() {
        let mut sched = EventScheduler::new();
        sched.schedule_at(SimTime::from_nanos(100), 1);
        sched.pop();
        sched.schedule_at(SimTime::from_nanos(5), 2);
        let (at, event) = sched.pop().unwrap();
        assert_eq!(event, 2);
        assert_eq!(at, SimTime::from_nanos(100));
    }

    #[test]
    fn test_schedule_after() {
        let mut sched = EventScheduler::new();
        sched.schedule_at(SimTime::from_nanos(40), ());
        sched.pop();
        sched.schedule_after(Duration::from_nanos(10), ());
        assert_eq!(sched.peek_time(), Some(SimTime::from_nanos(50)));
        assert_eq!(sched.stats().scheduled, 2);
    }

    proptest! {
        #[test]
        fn delivery_times_never_decrease(times in proptest::collection::vec(0u64..10_000, 1..64)) {
            let mut sched = EventScheduler::new();
            for t in &times {
                sched.schedule_at(SimTime::from_nanos(*t), *t);
            }
            let mut last = SimTime::ZERO;
            while let Some((at, _)) = sched.pop() {
                prop_assert!(at >= last);
                last = at;
            }
            prop_assert_eq!(sched.stats().delivered, times.len() as u64);
        }
    }
}
