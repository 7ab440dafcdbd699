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

// src/lease.rs
// Time-bounded exclusive lease on a well-known redis key, used for leader
// election across a replicated gateway fleet.
//
// Acquisition is a single SET NX PX, so at most one holder exists at any
// time. Renewal and release are compare-and-set scripts keyed on the holder
// token, so a stale instance can never extend or delete another instance's
// lease.

use std::time::Duration;

use redis::aio::ConnectionManager;

pub const LEADER_KEY: &str = "iot-gateway:leader";

// Renew only if we still hold the key.
const RENEW_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end"#;

// Release only if we still hold the key.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end"#;

pub struct Lease {
    conn: ConnectionManager,
    key: String,
    holder: String,
    duration: Duration,
}

impl Lease {
    pub fn new(conn: ConnectionManager, key: &str, holder: &str, duration: Duration) -> Self {
        Self {
            conn,
            key: key.to_string(),
            holder: holder.to_string(),
            duration,
        }
    }

    // try_acquire attempts to take the lease. Returns false when another
    // instance currently holds it.
    pub async fn try_acquire(&mut self) -> Result<bool, redis::RedisError> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&self.holder)
            .arg("NX")
            .arg("PX")
            .arg(self.duration_millis())
            .query_async(&mut self.conn)
            .await?;
        Ok(reply.is_some())
    }

    // renew extends the lease by a full duration. Returns false when the
    // lease expired or was taken over; the caller must stand down.
    pub async fn renew(&mut self) -> Result<bool, redis::RedisError> {
        let renewed: i64 = redis::Script::new(RENEW_SCRIPT)
            .key(&self.key)
            .arg(&self.holder)
            .arg(self.duration_millis())
            .invoke_async(&mut self.conn)
            .await?;
        Ok(renewed == 1)
    }

    // release gives the lease up voluntarily on clean shutdown, letting a
    // follower take over without waiting out the remaining duration.
    pub async fn release(&mut self) -> Result<bool, redis::RedisError> {
        let released: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.holder)
            .invoke_async(&mut self.conn)
            .await?;
        Ok(released == 1)
    }

    // Renewal must complete within half the lease duration so that a
    // healthy leader never comes close to expiry.
    pub fn renewal_interval(&self) -> Duration {
        self.duration / 2
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn duration_millis(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}
