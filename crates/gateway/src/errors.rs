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

// src/errors.rs
// Error types for error handling throughout the gateway.

use thiserror::Error;

// GatewayError covers the failure conditions of the dispatch engine.
// Supervisor-level code decides per variant whether to rebuild the
// session, back off, or give up.
#[derive(Error, Debug)]
pub enum GatewayError {
    // Config occurs when the environment cannot be deserialized into
    // a GatewayConfig.
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),
    // InvalidConfig occurs when the environment deserialized but fails
    // validation (bad URL, zero workers, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    // Database occurs when a catalog query fails.
    #[error(transparent)]
    Database(#[from] gateway_db::DatabaseError),
    // Mqtt occurs when a request to the MQTT client fails
    // (subscribe/unsubscribe/disconnect).
    #[error("MQTT request error: {0}")]
    Mqtt(#[from] rumqttc::v5::ClientError),
    // MqttConnection occurs when the broker connection drops; the
    // supervisor rebuilds the session after the reconnect delay.
    #[error("MQTT connection lost: {0}")]
    MqttConnection(#[from] rumqttc::v5::ConnectionError),
    // Redis occurs for lease and notification-bus failures.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    // Http occurs when the dispatcher's HTTP client cannot be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    // ControlChannelClosed occurs when the notification-bus stream ends;
    // treated as a retriable connection loss.
    #[error("control channel stream closed")]
    ControlChannelClosed,
    // Join occurs when a gateway task panicked.
    #[error("gateway task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    // TaskStopped occurs when a long-lived task returned without being
    // cancelled, which should not happen during normal operation.
    #[error("gateway task stopped unexpectedly")]
    TaskStopped,
}

impl GatewayError {
    // Create an InvalidConfig error with a descriptive message.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    // Check if this error is an MQTT connectivity problem. The supervisor
    // uses the fixed reconnect delay for these instead of the doubling
    // backoff.
    pub fn is_mqtt_error(&self) -> bool {
        matches!(self, Self::Mqtt(_) | Self::MqttConnection(_))
    }
}
