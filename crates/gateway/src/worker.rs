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

// src/worker.rs
// Worker pool draining the event queue.
//
// Each worker owns a private HTTP session (inside its dispatcher) and a
// private clone of the MQTT handle used only for subscribe/unsubscribe.
// Workers never read from MQTT and hold no cross-topic lock between steps;
// two data events for the same topic may execute in parallel, which is fine
// because every resulting PATCH is idempotent at the broker.

use std::sync::Arc;

use metrics::counter;
use rumqttc::v5::AsyncClient;
use rumqttc::v5::mqttbytes::QoS;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::RuleCache;
use crate::errors::GatewayError;
use crate::evaluate;
use crate::notify::ControlCoalescer;
use crate::orion::{OrionDispatcher, number_attribute};
use crate::queue::{ControlAction, Event, WorkQueue};

// Rows whose entity_type was never filled in by the administrative API are
// still dispatched, with this default type.
pub const DEFAULT_ENTITY_TYPE: &str = "Thing";

pub struct Worker {
    id: usize,
    queue: Arc<WorkQueue>,
    cache: Arc<RuleCache>,
    coalescer: Arc<ControlCoalescer>,
    // Control operations only; ingestion uses the listener's event loop.
    mqtt: AsyncClient,
    dispatcher: OrionDispatcher,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: Arc<WorkQueue>,
        cache: Arc<RuleCache>,
        coalescer: Arc<ControlCoalescer>,
        mqtt: AsyncClient,
        dispatcher: OrionDispatcher,
    ) -> Self {
        Self {
            id,
            queue,
            cache,
            coalescer,
            mqtt,
            dispatcher,
        }
    }

    // run drains the queue until cancelled. Event failures are logged and
    // never abort the worker.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), GatewayError> {
        debug!(worker = self.id, "worker started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(worker = self.id, "worker stopping");
                    return Ok(());
                }
                event = self.queue.recv() => event,
            };
            match event {
                Event::Control { topic } => self.handle_control(&topic).await,
                Event::Data { topic, payload } => self.handle_data(&topic, &payload).await,
            }
        }
    }

    // handle_control applies the latest pending subscription change for the
    // topic. Replaying the same change is harmless: subscribe and
    // unsubscribe are idempotent on the broker.
    pub async fn handle_control(&self, topic: &str) {
        let Some(action) = self.coalescer.take(topic).await else {
            // A newer action for this topic was already applied by another
            // worker; this marker is stale.
            debug!(%topic, "control marker already consumed");
            return;
        };
        match action {
            ControlAction::Subscribe => match self.mqtt.subscribe(topic, QoS::AtLeastOnce).await {
                Ok(()) => info!(%topic, "subscribed"),
                Err(e) => warn!(%topic, error = %e, "subscribe failed"),
            },
            ControlAction::Unsubscribe => {
                match self.mqtt.unsubscribe(topic).await {
                    Ok(()) => info!(%topic, "unsubscribed"),
                    Err(e) => warn!(%topic, error = %e, "unsubscribe failed"),
                }
                // The next message for this topic (if any rule reappears)
                // must reload from the catalog.
                self.cache.invalidate(topic).await;
            }
        }
    }

    // handle_data resolves the topic's rules and dispatches one attribute
    // update per matching rule. Malformed payloads and per-rule failures
    // are logged and dropped; remaining rules still run.
    pub async fn handle_data(&self, topic: &str, payload: &[u8]) {
        let rules = match self.cache.get(topic).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(%topic, error = %e, "rule lookup failed, dropping event");
                return;
            }
        };
        if rules.is_empty() {
            debug!(%topic, "no rules for topic, dropping event");
            return;
        }

        let document: Value = match serde_json::from_slice(payload) {
            Ok(document) => document,
            Err(e) => {
                warn!(%topic, error = %e, "discarding payload that is not valid JSON");
                return;
            }
        };

        for rule in rules.iter() {
            counter!("gateway_rules_evaluated_total").increment(1);
            let value = match evaluate::first_match(&document, &rule.jsonpath) {
                Ok(Some(value)) => value,
                Ok(None) => {
                    debug!(%topic, object_id = %rule.object_id, "no match in payload");
                    continue;
                }
                Err(e) => {
                    warn!(object_id = %rule.object_id, error = %e, "skipping rule");
                    continue;
                }
            };

            let entity_type = rule.entity_type.as_deref().unwrap_or(DEFAULT_ENTITY_TYPE);
            let update = number_attribute(&rule.attribute_name, value);
            match self
                .dispatcher
                .update_attribute(&rule.entity_id, entity_type, &update)
                .await
            {
                Ok(()) => info!(
                    entity_id = %rule.entity_id,
                    attribute = %rule.attribute_name,
                    "forwarded attribute update"
                ),
                Err(e) => warn!(object_id = %rule.object_id, error = %e, "dispatch failed"),
            }
        }
    }
}
