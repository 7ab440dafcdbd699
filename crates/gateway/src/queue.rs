/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

// src/queue.rs
// Two-band priority queue between the listeners and the worker pool.
//
// Band 0 carries control events (subscription changes) and is unbounded:
// control events are never dropped. Band 1 carries data events and is
// bounded; on overflow the oldest data event is dropped and counted. A
// dequeue always drains band 0 before looking at band 1, FIFO within each
// band.

use std::collections::VecDeque;

use bytes::Bytes;
use metrics::counter;
use tokio::sync::{Mutex, Notify};
use tracing::warn;

// The desired subscription-set change for a topic. Carried in the
// coalescing map rather than the queue itself, so bursts against one
// topic collapse to the latest writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
}

// One unit of work for the pool. Workers match on the variant; there is
// no string dispatch anywhere on this path.
#[derive(Debug, Clone)]
pub enum Event {
    // A subscription-set change is pending for this topic. The action
    // itself lives in the ControlCoalescer.
    Control { topic: String },
    // An inbound MQTT publish. The payload is forwarded unparsed; JSON
    // validation happens in the worker.
    Data { topic: String, payload: Bytes },
}

#[derive(Default)]
struct Bands {
    control: VecDeque<Event>,
    data: VecDeque<Event>,
}

pub struct WorkQueue {
    bands: Mutex<Bands>,
    notify: Notify,
    data_capacity: usize,
}

impl WorkQueue {
    pub fn new(data_capacity: usize) -> Self {
        Self {
            bands: Mutex::new(Bands::default()),
            notify: Notify::new(),
            data_capacity,
        }
    }

    // push_control enqueues a band-0 marker for a topic. Never drops.
    pub async fn push_control(&self, topic: String) {
        let mut bands = self.bands.lock().await;
        bands.control.push_back(Event::Control { topic });
        drop(bands);
        self.notify.notify_one();
    }

    // push_data enqueues a band-1 data event, dropping the oldest data
    // event when the band is full. Control events are unaffected.
    pub async fn push_data(&self, topic: String, payload: Bytes) {
        let mut bands = self.bands.lock().await;
        if bands.data.len() >= self.data_capacity {
            bands.data.pop_front();
            counter!("gateway_data_events_dropped_total").increment(1);
            warn!("data queue full, dropping oldest event");
        }
        bands.data.push_back(Event::Data { topic, payload });
        drop(bands);
        self.notify.notify_one();
    }

    // recv returns the next event, control band first. Multiple workers
    // may wait concurrently; each event is delivered to exactly one.
    pub async fn recv(&self) -> Event {
        loop {
            if let Some(event) = self.pop().await {
                return event;
            }
            self.notify.notified().await;
        }
    }

    async fn pop(&self) -> Option<Event> {
        let mut bands = self.bands.lock().await;
        bands.control.pop_front().or_else(|| bands.data.pop_front())
    }

    pub async fn len(&self) -> usize {
        let bands = self.bands.lock().await;
        bands.control.len() + bands.data.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(topic: &str) -> (String, Bytes) {
        (topic.to_string(), Bytes::from_static(b"{}"))
    }

    #[tokio::test]
    async fn control_dequeues_before_pending_data() {
        let queue = WorkQueue::new(16);
        let (topic, payload) = data("room/1");
        queue.push_data(topic, payload).await;
        let (topic, payload) = data("room/2");
        queue.push_data(topic, payload).await;
        queue.push_control("room/3".to_string()).await;

        match queue.recv().await {
            Event::Control { topic } => assert_eq!(topic, "room/3"),
            other => panic!("expected control event, got {other:?}"),
        }
        match queue.recv().await {
            Event::Data { topic, .. } => assert_eq!(topic, "room/1"),
            other => panic!("expected data event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fifo_within_band() {
        let queue = WorkQueue::new(16);
        for name in ["a", "b", "c"] {
            queue.push_control(name.to_string()).await;
        }
        for expected in ["a", "b", "c"] {
            match queue.recv().await {
                Event::Control { topic } => assert_eq!(topic, expected),
                other => panic!("expected control event, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn overflow_drops_oldest_data_event_only() {
        let queue = WorkQueue::new(2);
        for name in ["first", "second", "third"] {
            let (topic, payload) = data(name);
            queue.push_data(topic, payload).await;
        }
        queue.push_control("control".to_string()).await;

        // "first" was dropped on overflow, the control event survived.
        match queue.recv().await {
            Event::Control { topic } => assert_eq!(topic, "control"),
            other => panic!("expected control event, got {other:?}"),
        }
        match queue.recv().await {
            Event::Data { topic, .. } => assert_eq!(topic, "second"),
            other => panic!("expected data event, got {other:?}"),
        }
        match queue.recv().await {
            Event::Data { topic, .. } => assert_eq!(topic, "third"),
            other => panic!("expected data event, got {other:?}"),
        }
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn recv_wakes_on_late_enqueue() {
        let queue = std::sync::Arc::new(WorkQueue::new(4));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.recv().await })
        };
        // Give the waiter a chance to park before enqueueing.
        tokio::task::yield_now().await;
        let (topic, payload) = data("late/topic");
        queue.push_data(topic, payload).await;

        match waiter.await.expect("recv task") {
            Event::Data { topic, .. } => assert_eq!(topic, "late/topic"),
            other => panic!("expected data event, got {other:?}"),
        }
    }
}
