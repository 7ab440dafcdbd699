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

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::DatabaseError;

/// One rule of the datapoint catalog: which scalar to pull out of payloads
/// on a topic, and which entity attribute it updates.
///
/// `entity_type` is nullable in the administrative schema; rows without one
/// are dispatched with a default type by the caller.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Datapoint {
    /// Stable unique identifier of the rule
    pub object_id: String,

    /// Path expression selecting a single scalar from the payload
    pub jsonpath: String,

    /// Target entity in the Context Broker
    pub entity_id: String,

    /// Target entity type, if the administrative API recorded one
    pub entity_type: Option<String>,

    /// Destination attribute on the target entity
    pub attribute_name: String,
}

/// Retrieve the distinct set of topics that have at least one rule.
///
/// The live MQTT subscription set is derived from this at session start.
pub async fn distinct_topics(pool: &PgPool) -> Result<Vec<String>, DatabaseError> {
    let query = "SELECT DISTINCT topic FROM devices";
    sqlx::query_scalar::<_, String>(query)
        .fetch_all(pool)
        .await
        .map_err(|e| DatabaseError::query(query, e))
}

/// Retrieve every rule registered for one topic, ordered by `object_id`.
pub async fn find_by_topic(pool: &PgPool, topic: &str) -> Result<Vec<Datapoint>, DatabaseError> {
    let query = "SELECT object_id, jsonpath, entity_id, entity_type, attribute_name
        FROM devices
        WHERE topic = $1
        ORDER BY object_id ASC";
    sqlx::query_as::<_, Datapoint>(query)
        .bind(topic)
        .fetch_all(pool)
        .await
        .map_err(|e| DatabaseError::query(query, e))
}
