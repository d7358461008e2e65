// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-subscription notification sequencing.
//!
//! Notification messages can arrive out of order when several publish
//! requests are outstanding, and some never arrive until republished. The
//! [`SequenceTracker`] releases messages strictly in sequence number order:
//!
//! - the next expected message is released at once, together with any
//!   buffered successors
//! - later messages are held until the missing ones arrive, are reported
//!   unavailable, or the hold timeout expires
//! - anything at or before the last released number is a duplicate
//!
//! Skipped numbers are released as [`Delivery::Gap`] so the caller always
//! sees either a continuous sequence or an explicit gap.
//!
//! Sequence numbers run from 1 to `u32::MAX` and wrap to 1; 0 is never used.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

use crate::services::NotificationMessage;

/// Numbers further ahead than this are treated as old.
const HALF_RANGE: u32 = u32::MAX / 2;

/// Number following `sequence_number`.
#[inline]
pub fn next_sequence(sequence_number: u32) -> u32 {
    if sequence_number == u32::MAX {
        1
    } else {
        sequence_number + 1
    }
}

/// Returns `true` if `candidate` comes after `reference`, allowing for wrap.
#[inline]
pub fn is_after(candidate: u32, reference: u32) -> bool {
    let ahead = distance(reference, candidate);
    ahead != 0 && ahead <= HALF_RANGE
}

/// Steps from `from` to `to` following [`next_sequence`].
#[inline]
fn distance(from: u32, to: u32) -> u32 {
    if to >= from {
        to - from
    } else {
        (u32::MAX - from) + to
    }
}

/// Something released to the subscriber, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A notification message.
    Message(NotificationMessage),
    /// Numbers `from..=to` will never be delivered.
    Gap {
        /// First skipped number.
        from: u32,
        /// Last skipped number.
        to: u32,
    },
}

/// Result of [`SequenceTracker::accept`].
#[derive(Debug, Clone, PartialEq)]
pub enum Accepted {
    /// Messages released in order.
    Deliver(Vec<Delivery>),
    /// Already released or already held; dropped.
    Duplicate,
    /// Held until the listed numbers are resolved.
    Buffered {
        /// Numbers between the last released and this one that are missing.
        missing: Vec<u32>,
    },
}

#[derive(Debug)]
struct Held {
    message: NotificationMessage,
    received_at: Instant,
}

/// Orders notification messages of one subscription.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last_delivered: Option<u32>,
    held: Vec<Held>,
    unavailable: BTreeSet<u32>,
}

impl SequenceTracker {
    /// Creates an empty tracker; the first message is accepted as is.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last released sequence number.
    pub fn last_delivered(&self) -> Option<u32> {
        self.last_delivered
    }

    /// Number of held messages.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Forgets all state, as after the subscription was recreated.
    pub fn reset(&mut self) {
        self.last_delivered = None;
        self.held.clear();
        self.unavailable.clear();
    }

    /// Accepts a data-carrying message.
    pub fn accept(&mut self, message: NotificationMessage, now: Instant) -> Accepted {
        let sequence_number = message.sequence_number;
        let Some(last) = self.last_delivered else {
            self.last_delivered = Some(sequence_number);
            self.held.retain(|h| {
                let d = distance(sequence_number, h.message.sequence_number);
                d != 0 && d <= HALF_RANGE
            });
            let mut released = vec![Delivery::Message(message)];
            released.extend(self.drain());
            return Accepted::Deliver(released);
        };

        let ahead = distance(last, sequence_number);
        if ahead == 0 || ahead > HALF_RANGE || self.is_held(sequence_number) {
            return Accepted::Duplicate;
        }
        self.unavailable.remove(&sequence_number);

        let position = self
            .held
            .iter()
            .position(|h| distance(last, h.message.sequence_number) > ahead)
            .unwrap_or(self.held.len());
        self.held.insert(
            position,
            Held {
                message,
                received_at: now,
            },
        );

        let released = self.drain();
        if released.is_empty() {
            Accepted::Buffered {
                missing: self.missing_before(sequence_number),
            }
        } else {
            Accepted::Deliver(released)
        }
    }

    /// Handles a keep-alive announcing `next_sequence_number`.
    ///
    /// Returns the numbers that should have arrived before it.
    pub fn observe_keep_alive(&mut self, next_sequence_number: u32) -> Vec<u32> {
        match self.last_delivered {
            Some(last) => {
                let ahead = distance(last, next_sequence_number);
                if ahead <= 1 || ahead > HALF_RANGE {
                    return Vec::new();
                }
                let mut missing = Vec::new();
                let mut seq = next_sequence(last);
                while seq != next_sequence_number {
                    if !self.is_held(seq) && !self.unavailable.contains(&seq) {
                        missing.push(seq);
                    }
                    seq = next_sequence(seq);
                }
                missing
            }
            None => Vec::new(),
        }
    }

    /// Numbers between the last released one and the newest held one that
    /// are neither held nor known to be unavailable.
    pub fn missing(&self) -> Vec<u32> {
        match self.held.last() {
            Some(newest) => self.missing_before(newest.message.sequence_number),
            None => Vec::new(),
        }
    }

    /// Marks `sequence_number` as never to be delivered.
    pub fn mark_unavailable(&mut self, sequence_number: u32) -> Vec<Delivery> {
        let Some(last) = self.last_delivered else {
            return Vec::new();
        };
        let ahead = distance(last, sequence_number);
        if ahead == 0 || ahead > HALF_RANGE || self.is_held(sequence_number) {
            return Vec::new();
        }
        self.unavailable.insert(sequence_number);
        self.drain()
    }

    /// Skips past held messages older than `hold_timeout`.
    ///
    /// Every missing number before an expired message is reported as a gap.
    pub fn expire(&mut self, now: Instant, hold_timeout: Duration) -> Vec<Delivery> {
        let mut released = Vec::new();
        while let Some(oldest) = self.held.first() {
            if now.saturating_duration_since(oldest.received_at) < hold_timeout {
                break;
            }
            let target = oldest.message.sequence_number;
            if let Some(last) = self.last_delivered {
                let mut seq = next_sequence(last);
                while seq != target {
                    self.unavailable.insert(seq);
                    seq = next_sequence(seq);
                }
            }
            let before = released.len();
            released.extend(self.drain());
            if released.len() == before {
                break;
            }
        }
        released
    }

    fn is_held(&self, sequence_number: u32) -> bool {
        self.held
            .iter()
            .any(|h| h.message.sequence_number == sequence_number)
    }

    fn missing_before(&self, sequence_number: u32) -> Vec<u32> {
        let Some(last) = self.last_delivered else {
            return Vec::new();
        };
        let mut missing = Vec::new();
        let mut seq = next_sequence(last);
        while seq != sequence_number {
            if !self.is_held(seq) && !self.unavailable.contains(&seq) {
                missing.push(seq);
            }
            seq = next_sequence(seq);
        }
        missing
    }

    /// Releases held messages and unavailable numbers that are next in line.
    fn drain(&mut self) -> Vec<Delivery> {
        let mut released = Vec::new();
        let Some(mut last) = self.last_delivered else {
            return released;
        };
        loop {
            let expected = next_sequence(last);
            if self
                .held
                .first()
                .is_some_and(|h| h.message.sequence_number == expected)
            {
                let held = self.held.remove(0);
                released.push(Delivery::Message(held.message));
                last = expected;
            } else if self.unavailable.remove(&expected) {
                let mut to = expected;
                while self.unavailable.remove(&next_sequence(to)) {
                    to = next_sequence(to);
                }
                released.push(Delivery::Gap { from: expected, to });
                last = to;
            } else {
                break;
            }
        }
        self.last_delivered = Some(last);
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DateTime;

    fn message(sequence_number: u32) -> NotificationMessage {
        NotificationMessage {
            sequence_number,
            publish_time: DateTime::now(),
            notification_data: Vec::new(),
        }
    }

    fn numbers(deliveries: &[Delivery]) -> Vec<String> {
        deliveries
            .iter()
            .map(|d| match d {
                Delivery::Message(m) => m.sequence_number.to_string(),
                Delivery::Gap { from, to } => format!("gap {}-{}", from, to),
            })
            .collect()
    }

    fn delivered(accepted: Accepted) -> Vec<String> {
        match accepted {
            Accepted::Deliver(deliveries) => numbers(&deliveries),
            other => panic!("expected delivery, got {:?}", other),
        }
    }

    #[test]
    fn test_in_order_delivery() {
        let now = Instant::now();
        let mut tracker = SequenceTracker::new();
        assert_eq!(delivered(tracker.accept(message(1), now)), ["1"]);
        assert_eq!(delivered(tracker.accept(message(2), now)), ["2"]);
        assert_eq!(tracker.last_delivered(), Some(2));
    }

    #[test]
    fn test_out_of_order_is_buffered_then_released() {
        let now = Instant::now();
        let mut tracker = SequenceTracker::new();
        tracker.accept(message(1), now);

        assert_eq!(
            tracker.accept(message(4), now),
            Accepted::Buffered {
                missing: vec![2, 3]
            }
        );
        assert_eq!(
            tracker.accept(message(3), now),
            Accepted::Buffered { missing: vec![2] }
        );
        assert_eq!(tracker.missing(), vec![2]);
        assert_eq!(delivered(tracker.accept(message(2), now)), ["2", "3", "4"]);
        assert_eq!(tracker.held_count(), 0);
    }

    #[test]
    fn test_duplicates_dropped() {
        let now = Instant::now();
        let mut tracker = SequenceTracker::new();
        tracker.accept(message(5), now);
        assert_eq!(tracker.accept(message(5), now), Accepted::Duplicate);
        assert_eq!(tracker.accept(message(3), now), Accepted::Duplicate);

        tracker.accept(message(7), now);
        assert_eq!(tracker.accept(message(7), now), Accepted::Duplicate);
    }

    #[test]
    fn test_hold_timeout_reports_gap() {
        let start = Instant::now();
        let mut tracker = SequenceTracker::new();
        tracker.accept(message(1), start);
        tracker.accept(message(3), start);

        assert!(tracker
            .expire(start + Duration::from_secs(1), Duration::from_secs(5))
            .is_empty());
        let released = tracker.expire(start + Duration::from_secs(5), Duration::from_secs(5));
        assert_eq!(numbers(&released), ["gap 2-2", "3"]);

        // A late arrival of the skipped number is a duplicate.
        assert_eq!(tracker.accept(message(2), start), Accepted::Duplicate);
    }

    #[test]
    fn test_unavailable_number_becomes_gap() {
        let now = Instant::now();
        let mut tracker = SequenceTracker::new();
        tracker.accept(message(10), now);
        tracker.accept(message(13), now);

        assert!(tracker.mark_unavailable(12).is_empty());
        assert_eq!(tracker.missing(), vec![11]);
        assert_eq!(numbers(&tracker.mark_unavailable(11)), ["gap 11-12", "13"]);
    }

    #[test]
    fn test_keep_alive_reveals_missing() {
        let now = Instant::now();
        let mut tracker = SequenceTracker::new();
        tracker.accept(message(1), now);
        assert!(tracker.observe_keep_alive(2).is_empty());
        assert_eq!(tracker.observe_keep_alive(4), vec![2, 3]);
    }

    #[test]
    fn test_wraparound() {
        let now = Instant::now();
        let mut tracker = SequenceTracker::new();
        tracker.accept(message(u32::MAX - 1), now);
        assert_eq!(
            tracker.accept(message(1), now),
            Accepted::Buffered {
                missing: vec![u32::MAX]
            }
        );
        assert_eq!(
            delivered(tracker.accept(message(u32::MAX), now)),
            [u32::MAX.to_string(), "1".to_string()]
        );
        assert_eq!(next_sequence(u32::MAX), 1);
        assert!(is_after(1, u32::MAX));
        assert!(is_after(5, 4));
        assert!(!is_after(4, 4));
        assert!(!is_after(3, 4));
    }

    #[test]
    fn test_reset() {
        let now = Instant::now();
        let mut tracker = SequenceTracker::new();
        tracker.accept(message(8), now);
        tracker.accept(message(10), now);
        tracker.reset();
        assert_eq!(tracker.held_count(), 0);
        assert_eq!(delivered(tracker.accept(message(1), now)), ["1"]);
    }
}
