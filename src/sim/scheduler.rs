//! Discrete-event scheduler
//!
//! A single logical clock drives the whole network. Events are
//! `(time, seq, action)` triples drained in non-decreasing time order;
//! events scheduled for the same instant fire in insertion order. The
//! scheduler is single-threaded and cooperative: an action runs to
//! completion and may schedule further events.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use crate::packet::Flit;
use crate::sim::time::Time;
use crate::topology::{DeviceId, NodeId};

/// Handle to a scheduled event, usable for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u64);

/// The closed set of things that can happen in the simulation
#[derive(Debug, Clone)]
pub enum Action {
    /// Start the application installed on `node`
    StartApp { node: NodeId },
    /// Stop the application installed on `node`, cancelling its pending events
    StopApp { node: NodeId },
    /// Let the application on `node` take its next injection decision
    SendFlit { node: NodeId, iteration: u64 },
    /// A channel finishes propagating `flit` to the input device `to`
    DeliverFlit { to: DeviceId, flit: Flit },
    /// Hand `flit` at its destination `device` up to the application
    EjectFlit { device: DeviceId, flit: Flit },
    /// Re-attempt forwarding out of `device` after backpressure
    RetryForward { device: DeviceId },
    /// Push local router loads to all neighbours (adaptive routing only)
    PublishLoads,
}

/// A scheduled event as seen by the dispatch loop
#[derive(Debug)]
pub struct Event {
    /// Firing time
    pub time: Time,
    /// Insertion sequence number (total order within an instant)
    pub seq: u64,
    /// What to do
    pub action: Action,
}

#[derive(Debug)]
struct QueuedEvent {
    time: Time,
    seq: u64,
    action: Action,
}

// Heap order is (time, seq) only; the action does not participate.
impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

/// Priority queue of time-stamped actions
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<QueuedEvent>>,
    live: HashSet<u64>,
    cancelled: HashSet<u64>,
    next_seq: u64,
    now: Time,
}

impl Scheduler {
    /// Create an empty scheduler at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulated time
    pub fn now(&self) -> Time {
        self.now
    }

    /// Schedule `action` to fire `delay_ps` picoseconds from now
    pub fn schedule(&mut self, delay_ps: u64, action: Action) -> EventId {
        self.schedule_at(self.now.after(delay_ps), action)
    }

    /// Schedule `action` at an absolute instant (not before `now`)
    pub fn schedule_at(&mut self, time: Time, action: Action) -> EventId {
        debug_assert!(time >= self.now, "event scheduled in the past");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(seq);
        self.heap.push(Reverse(QueuedEvent { time, seq, action }));
        EventId(seq)
    }

    /// Cancel a scheduled event. Cancelling an event that already fired or
    /// was cancelled before is a no-op.
    pub fn cancel(&mut self, id: EventId) {
        if self.live.remove(&id.0) {
            self.cancelled.insert(id.0);
        }
    }

    /// Number of live (not cancelled) pending events
    pub fn pending(&self) -> usize {
        self.live.len()
    }

    /// Firing time of the next live event, if any
    pub fn peek_time(&mut self) -> Option<Time> {
        self.skip_cancelled();
        self.heap.peek().map(|Reverse(ev)| ev.time)
    }

    /// Pop the next live event and advance the clock to its firing time
    pub fn pop(&mut self) -> Option<Event> {
        self.skip_cancelled();
        let Reverse(ev) = self.heap.pop()?;
        self.live.remove(&ev.seq);
        self.now = ev.time;
        Some(Event {
            time: ev.time,
            seq: ev.seq,
            action: ev.action,
        })
    }

    /// Actions of all live pending events, in no particular order
    pub fn pending_actions(&self) -> impl Iterator<Item = &Action> {
        self.heap
            .iter()
            .filter(|Reverse(ev)| self.live.contains(&ev.seq))
            .map(|Reverse(ev)| &ev.action)
    }

    fn skip_cancelled(&mut self) {
        while let Some(Reverse(ev)) = self.heap.peek() {
            if self.cancelled.remove(&ev.seq) {
                self.heap.pop();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(node: u32) -> Action {
        Action::StartApp {
            node: NodeId(node),
        }
    }

    fn node_of(action: &Action) -> u32 {
        match action {
            Action::StartApp { node } => node.0,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_events_fire_in_time_order() {
        let mut sched = Scheduler::new();
        sched.schedule(3_000, marker(3));
        sched.schedule(1_000, marker(1));
        sched.schedule(2_000, marker(2));

        let order: Vec<u32> = std::iter::from_fn(|| sched.pop())
            .map(|ev| node_of(&ev.action))
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(sched.now(), Time(3_000));
    }

    #[test]
    fn test_same_instant_fires_in_insertion_order() {
        let mut sched = Scheduler::new();
        for node in 0..8 {
            sched.schedule(5_000, marker(node));
        }
        let order: Vec<u32> = std::iter::from_fn(|| sched.pop())
            .map(|ev| node_of(&ev.action))
            .collect();
        assert_eq!(order, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancel_removes_event() {
        let mut sched = Scheduler::new();
        let keep = sched.schedule(1_000, marker(1));
        let drop = sched.schedule(1_000, marker(2));
        sched.cancel(drop);
        assert_eq!(sched.pending(), 1);

        let fired = sched.pop().map(|ev| node_of(&ev.action));
        assert_eq!(fired, Some(1));
        assert!(sched.pop().is_none());
        let _ = keep;
    }

    #[test]
    fn test_cancel_of_fired_event_is_noop() {
        let mut sched = Scheduler::new();
        let id = sched.schedule(1_000, marker(1));
        assert!(sched.pop().is_some());

        // the handle expired with the pop; cancelling must change nothing
        sched.cancel(id);
        sched.cancel(id);
        assert_eq!(sched.pending(), 0);
        assert_eq!(sched.now(), Time(1_000));
    }

    #[test]
    fn test_pop_advances_now_monotonically() {
        let mut sched = Scheduler::new();
        sched.schedule(2_000, marker(1));
        sched.schedule(2_000, marker(2));
        sched.schedule(7_000, marker(3));

        let mut last = Time::ZERO;
        while let Some(ev) = sched.pop() {
            assert!(ev.time >= last);
            last = ev.time;
        }
        assert_eq!(last, Time(7_000));
    }
}
