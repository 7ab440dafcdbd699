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

// src/orion.rs
// Attribute-update dispatch to the Orion Context Broker.
//
// Updates are idempotent PATCHes; the broker applies them last-writer-wins
// per attribute. Nothing here retries: a failed update is logged, counted,
// and dropped, and the next payload on the topic produces a fresh one.

use metrics::counter;
use reqwest::StatusCode;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::errors::GatewayError;

// DispatchError classifies one failed attribute update.
#[derive(Debug, Error)]
pub enum DispatchError {
    // Transport occurs on connect/request timeouts and connection errors.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    // EntityNotFound is terminal for the event: the target entity does
    // not exist in the broker.
    #[error("entity {entity_id} not found in context broker")]
    EntityNotFound { entity_id: String },
    // Rejected covers the remaining 4xx answers; the response body is
    // captured for the log line.
    #[error("context broker rejected update for {entity_id} ({status}): {body}")]
    Rejected {
        entity_id: String,
        status: StatusCode,
        body: String,
    },
    // Upstream covers 5xx, 408 and 429: the broker is unhealthy or
    // shedding load.
    #[error("context broker unavailable ({status}) for {entity_id}")]
    Upstream {
        entity_id: String,
        status: StatusCode,
    },
}

// number_attribute builds the NGSIv2 update body for one extracted scalar.
pub fn number_attribute(attribute_name: &str, value: Value) -> Value {
    json!({
        attribute_name: {
            "type": "Number",
            "value": value,
        }
    })
}

pub struct OrionDispatcher {
    http: reqwest::Client,
    base_url: String,
    service: String,
    servicepath: String,
}

impl OrionDispatcher {
    // Each worker constructs its own dispatcher, so every worker owns a
    // private HTTP client session.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.orion_connect_timeout)
            .timeout(config.orion_request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.orion_url.trim_end_matches('/').to_string(),
            service: config.fiware_service.clone(),
            servicepath: config.fiware_servicepath.clone(),
        })
    }

    // update_attribute PATCHes one attribute update onto an entity. The
    // response body is only read on rejection; no other content
    // inspection happens.
    pub async fn update_attribute(
        &self,
        entity_id: &str,
        entity_type: &str,
        update: &Value,
    ) -> Result<(), DispatchError> {
        let url = format!("{}/v2/entities/{}/attrs", self.base_url, entity_id);
        let response = self
            .http
            .patch(&url)
            .query(&[("type", entity_type)])
            .header("fiware-service", &self.service)
            .header("fiware-servicepath", &self.servicepath)
            .json(update)
            .send()
            .await
            .inspect_err(|_| {
                counter!("gateway_patch_failures_total", "class" => "transport").increment(1);
            })?;

        let status = response.status();
        if status.is_success() {
            counter!("gateway_patches_total").increment(1);
            debug!(%entity_id, %status, "attribute update accepted");
            return Ok(());
        }

        if status == StatusCode::NOT_FOUND {
            counter!("gateway_patch_failures_total", "class" => "not_found").increment(1);
            return Err(DispatchError::EntityNotFound {
                entity_id: entity_id.to_string(),
            });
        }
        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            counter!("gateway_patch_failures_total", "class" => "upstream").increment(1);
            return Err(DispatchError::Upstream {
                entity_id: entity_id.to_string(),
                status,
            });
        }

        counter!("gateway_patch_failures_total", "class" => "rejected").increment(1);
        let body = response.text().await.unwrap_or_default();
        Err(DispatchError::Rejected {
            entity_id: entity_id.to_string(),
            status,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn dispatcher_for(server: &mockito::ServerGuard) -> OrionDispatcher {
        let config = GatewayConfig {
            orion_url: server.url(),
            fiware_service: "smartcity".to_string(),
            fiware_servicepath: "/rooms".to_string(),
            ..GatewayConfig::default()
        };
        OrionDispatcher::new(&config).expect("dispatcher")
    }

    #[test]
    fn number_attribute_body_shape() {
        let update = number_attribute("temperature", json!(22.5));
        assert_eq!(
            update,
            json!({"temperature": {"type": "Number", "value": 22.5}})
        );
    }

    #[tokio::test]
    async fn successful_patch_carries_tenant_headers_and_type() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/v2/entities/Room:1/attrs")
            .match_query(mockito::Matcher::UrlEncoded("type".into(), "Room".into()))
            .match_header("fiware-service", "smartcity")
            .match_header("fiware-servicepath", "/rooms")
            .match_body(mockito::Matcher::Json(json!({
                "temperature": {"type": "Number", "value": 22.5}
            })))
            .with_status(204)
            .create_async()
            .await;

        let dispatcher = dispatcher_for(&server);
        let update = number_attribute("temperature", json!(22.5));
        dispatcher
            .update_attribute("Room:1", "Room", &update)
            .await
            .expect("2xx is success");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_entity_is_terminal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/v2/entities/Room:9/attrs")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let dispatcher = dispatcher_for(&server);
        let update = number_attribute("temperature", json!(1));
        let err = dispatcher
            .update_attribute("Room:9", "Room", &update)
            .await
            .expect_err("404 is a failure");
        assert!(matches!(err, DispatchError::EntityNotFound { .. }));
    }

    #[tokio::test]
    async fn client_rejection_captures_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/v2/entities/Room:1/attrs")
            .match_query(mockito::Matcher::Any)
            .with_status(422)
            .with_body("{\"error\":\"Unprocessable\"}")
            .create_async()
            .await;

        let dispatcher = dispatcher_for(&server);
        let update = number_attribute("temperature", json!(1));
        let err = dispatcher
            .update_attribute("Room:1", "Room", &update)
            .await
            .expect_err("422 is a failure");
        match err {
            DispatchError::Rejected { status, body, .. } => {
                assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
                assert!(body.contains("Unprocessable"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_errors_and_throttling_are_upstream() {
        let mut server = mockito::Server::new_async().await;
        for status in [500, 429] {
            server
                .mock("PATCH", "/v2/entities/Room:1/attrs")
                .match_query(mockito::Matcher::Any)
                .with_status(status)
                .create_async()
                .await;

            let dispatcher = dispatcher_for(&server);
            let update = number_attribute("temperature", json!(1));
            let err = dispatcher
                .update_attribute("Room:1", "Room", &update)
                .await
                .expect_err("failure status");
            assert!(matches!(err, DispatchError::Upstream { .. }));
        }
    }
}
