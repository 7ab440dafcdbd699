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

// src/mqtt.rs
// MQTT v5 listener: subscribes to the catalog's topic set and forwards
// every inbound publish to the work queue as a band-1 data event.
//
// The handle returned next to the event loop is shared with the workers,
// which use their clones only for subscribe/unsubscribe control
// operations. Ingestion happens exclusively here.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::GatewayError;
use crate::queue::WorkQueue;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
// Number of in-flight requests/messages buffered by the client before the
// event loop stops reading from the wire.
const CLIENT_CHANNEL_CAPACITY: usize = 1000;

// build_client creates the v5 client used by one gateway session. The
// instance id keeps client ids unique across a replicated fleet.
pub fn build_client(
    host: &str,
    port: u16,
    instance_id: &str,
) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(format!("iot-gateway-{instance_id}"), host, port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_start(true);
    AsyncClient::new(options, CLIENT_CHANNEL_CAPACITY)
}

// run_mqtt_listener subscribes to every topic currently in the catalog and
// then forwards inbound publishes until cancelled. A broker connection
// error is returned to the supervisor, which rebuilds the whole session
// after the reconnect delay and re-subscribes to the then-current set.
pub async fn run_mqtt_listener(
    mut event_loop: EventLoop,
    client: AsyncClient,
    pool: PgPool,
    queue: Arc<WorkQueue>,
    cancel: CancellationToken,
) -> Result<(), GatewayError> {
    let topics = gateway_db::datapoint::distinct_topics(&pool).await?;
    info!(count = topics.len(), "subscribing to catalog topics");
    for topic in &topics {
        client.subscribe(topic.as_str(), QoS::AtLeastOnce).await?;
        debug!(%topic, "subscribed");
    }

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                info!("mqtt listener stopping");
                return Ok(());
            }
            event = event_loop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic = match std::str::from_utf8(&publish.topic) {
                    Ok(topic) => topic.to_string(),
                    Err(e) => {
                        warn!(error = %e, "discarding publish with non-UTF-8 topic");
                        continue;
                    }
                };
                counter!("gateway_messages_received_total").increment(1);
                queue.push_data(topic, publish.payload).await;
            }
            Ok(_) => {
                // Acks, pings and other protocol traffic.
            }
            Err(e) => {
                // Connection loss is retriable: hand it to the supervisor.
                return Err(GatewayError::MqttConnection(e));
            }
        }
    }
}
