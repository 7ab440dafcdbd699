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

// src/notify.rs
// Control-channel listener on the redis notification bus.
//
// The administrative API publishes the bare topic string on the `subscribe`
// channel when the first rule for a topic is created, and on `unsubscribe`
// when the last one is deleted. Each message becomes a band-0 control event
// for the worker pool.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::GatewayError;
use crate::queue::{ControlAction, WorkQueue};

pub const SUBSCRIBE_CHANNEL: &str = "subscribe";
pub const UNSUBSCRIBE_CHANNEL: &str = "unsubscribe";

// ControlCoalescer collapses bursts of control messages for one topic to
// the latest desired action. The listener records the action and enqueues a
// marker event only when none was pending for the topic; the worker that
// consumes the marker takes whatever action is current at that point.
// Subscribe/unsubscribe for one topic are thereby serialized without any
// external lock.
#[derive(Default)]
pub struct ControlCoalescer {
    pending: Mutex<HashMap<String, ControlAction>>,
}

impl ControlCoalescer {
    // record stores the latest desired action for a topic. Returns true if
    // no action was pending, i.e. the caller must enqueue a marker event.
    pub async fn record(&self, topic: &str, action: ControlAction) -> bool {
        let mut pending = self.pending.lock().await;
        pending.insert(topic.to_string(), action).is_none()
    }

    // take removes and returns the pending action for a topic. None means
    // another worker already applied a newer action for this marker.
    pub async fn take(&self, topic: &str) -> Option<ControlAction> {
        let mut pending = self.pending.lock().await;
        pending.remove(topic)
    }
}

// run_control_listener consumes the two catalog channels until cancelled.
// Connection loss surfaces as a retriable error; the supervisor rebuilds
// the session.
pub async fn run_control_listener(
    redis: redis::Client,
    queue: Arc<WorkQueue>,
    coalescer: Arc<ControlCoalescer>,
    cancel: CancellationToken,
) -> Result<(), GatewayError> {
    let mut pubsub = redis.get_async_pubsub().await?;
    pubsub.subscribe(SUBSCRIBE_CHANNEL).await?;
    pubsub.subscribe(UNSUBSCRIBE_CHANNEL).await?;
    info!("control listener subscribed to catalog channels");

    let mut messages = pubsub.on_message();
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                info!("control listener stopping");
                return Ok(());
            }
            message = messages.next() => message,
        };
        let Some(message) = message else {
            return Err(GatewayError::ControlChannelClosed);
        };

        let channel = message.get_channel_name().to_string();
        let topic: String = match message.get_payload() {
            Ok(topic) => topic,
            Err(e) => {
                warn!(%channel, error = %e, "discarding undecodable control payload");
                continue;
            }
        };
        let action = match channel.as_str() {
            SUBSCRIBE_CHANNEL => ControlAction::Subscribe,
            UNSUBSCRIBE_CHANNEL => ControlAction::Unsubscribe,
            other => {
                warn!(channel = other, "message on unexpected channel");
                continue;
            }
        };

        if coalescer.record(&topic, action).await {
            queue.push_control(topic).await;
        }
    }
}
