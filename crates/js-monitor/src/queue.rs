// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, ordered event buffer.
//!
//! Events are kept in arrival order. When the queue is full, the oldest event
//! is evicted to make room (FIFO eviction), so memory stays bounded no matter
//! how long a flush takes.

use std::collections::VecDeque;

use tracing::warn;

use crate::event::{Batch, Event};

#[derive(Debug, Clone)]
pub struct EventQueue {
    events: VecDeque<Event>,
    max_size: usize,
    next_sequence: u64,
}

impl EventQueue {
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            events: VecDeque::with_capacity(max_size),
            max_size,
            next_sequence: 0,
        }
    }

    /// Appends `event`. Returns the evicted oldest event if the queue was full.
    pub fn push(&mut self, event: Event) -> Option<Event> {
        let evicted = if self.events.len() >= self.max_size {
            self.events.pop_front()
        } else {
            None
        };
        if evicted.is_some() {
            warn!(
                "QUEUE | queue full ({} events), dropping oldest event",
                self.max_size
            );
        }
        self.events.push_back(event);
        evicted
    }

    /// Moves every queued event into a [`Batch`], leaving the queue empty.
    pub fn take_batch(&mut self, project_id: &str) -> Batch {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Batch {
            sequence,
            project_id: project_id.to_string(),
            events: self.events.drain(..).collect(),
        }
    }

    /// Puts back a batch that was taken but never handed off.
    ///
    /// The batch keeps its sequence number. Events pushed since the batch was
    /// taken stay behind it, and the oldest events are evicted if the total
    /// exceeds the bound. Returns how many were evicted.
    pub fn restore(&mut self, batch: Batch) -> usize {
        self.next_sequence = batch.sequence;
        for event in batch.events.into_iter().rev() {
            self.events.push_front(event);
        }
        let excess = self.events.len().saturating_sub(self.max_size);
        self.events.drain(..excess);
        excess
    }

    /// Changes the bound. A smaller bound evicts the oldest events immediately.
    ///
    /// Returns how many events were evicted.
    pub fn resize(&mut self, max_size: usize) -> usize {
        self.max_size = max_size.max(1);
        let excess = self.events.len().saturating_sub(self.max_size);
        self.events.drain(..excess);
        excess
    }

    /// Drops every queued event. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let len = self.events.len();
        self.events.clear();
        len
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.events.len() >= self.max_size
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;
    use tracing_test::traced_test;

    fn events(n: u32) -> Vec<Event> {
        (0..n)
            .map(|i| {
                Event::at(
                    Payload::Custom(crate::event::CustomPayload {
                        name: "tick".to_string(),
                        data: serde_json::json!({ "n": i }),
                    }),
                    1_000 + u64::from(i),
                )
            })
            .collect()
    }

    #[test]
    fn test_push_preserves_order() {
        let input = events(3);
        let mut queue = EventQueue::new(10);
        for event in &input {
            assert!(queue.push(event.clone()).is_none());
        }
        let batch = queue.take_batch("app");
        assert_eq!(batch.events, input);
        assert!(queue.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_overflow_drops_oldest() {
        let input = events(4);
        let mut queue = EventQueue::new(3);
        let dropped: Vec<Event> = input
            .iter()
            .filter_map(|event| queue.push(event.clone()))
            .collect();
        assert_eq!(dropped, vec![input[0].clone()]);
        assert!(queue.is_full());

        let batch = queue.take_batch("app");
        assert_eq!(batch.events, input[1..].to_vec());
        assert!(logs_contain("QUEUE | queue full (3 events)"));
    }

    #[test]
    fn test_take_batch_resets_and_numbers_batches() {
        let mut queue = EventQueue::new(3);
        queue.push(events(1).remove(0));
        let first = queue.take_batch("app");
        assert_eq!(first.sequence, 0);
        assert_eq!(first.project_id, "app");
        assert_eq!(first.len(), 1);

        let second = queue.take_batch("app");
        assert_eq!(second.sequence, 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_restore_puts_batch_back_in_front() {
        let input = events(4);
        let mut queue = EventQueue::new(3);
        queue.push(input[0].clone());
        queue.push(input[1].clone());
        let batch = queue.take_batch("app");
        queue.push(input[2].clone());
        queue.push(input[3].clone());

        assert_eq!(queue.restore(batch), 1);
        let retried = queue.take_batch("app");
        assert_eq!(retried.sequence, 0);
        assert_eq!(retried.events, input[1..].to_vec());
    }

    #[test]
    fn test_resize_evicts_oldest() {
        let input = events(5);
        let mut queue = EventQueue::new(5);
        for event in &input {
            queue.push(event.clone());
        }
        assert_eq!(queue.resize(2), 3);
        assert_eq!(queue.take_batch("app").events, input[3..].to_vec());
        assert_eq!(queue.max_size(), 2);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let mut input = events(2);
        let mut queue = EventQueue::new(0);
        assert_eq!(queue.max_size(), 1);
        queue.push(input.remove(0));
        assert!(queue.push(input.remove(0)).is_some());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut queue = EventQueue::new(5);
        for event in events(2) {
            queue.push(event);
        }
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
