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

// src/supervisor.rs
// Leader election and the supervision tree of the dispatch engine.
//
// Exactly one instance across the fleet runs the listeners and the worker
// pool. Followers retry the lease at the renewal interval. A leader whose
// renewal fails cancels its children, waits for them to finish, drops its
// MQTT state and goes back to following; the failover gap is bounded by one
// lease duration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use sqlx::PgPool;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::cache::{PgRuleSource, RuleCache, RuleSource};
use crate::config::GatewayConfig;
use crate::errors::GatewayError;
use crate::lease::{LEADER_KEY, Lease};
use crate::mqtt;
use crate::notify::{self, ControlCoalescer};
use crate::orion::OrionDispatcher;
use crate::queue::WorkQueue;
use crate::worker::Worker;

// Reconnect backoff for lease-store and catalog connectivity. MQTT session
// rebuilds use the fixed reconnect delay from the configuration instead.
const BACKOFF_START: Duration = Duration::from_millis(100);
const BACKOFF_CEILING: Duration = Duration::from_secs(5);

// Doubling backoff for reconnect loops. Starts small so a blip recovers
// fast, and caps out so a dead dependency is probed regularly.
pub(crate) struct ReconnectBackoff {
    start: Duration,
    current: Duration,
    max: Duration,
}

impl ReconnectBackoff {
    pub(crate) fn new(start: Duration, max: Duration) -> Self {
        Self {
            start,
            current: start,
            max,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.start;
    }
}

pub struct LeaderElector {
    config: GatewayConfig,
    pool: PgPool,
    redis: redis::Client,
    instance_id: String,
}

impl LeaderElector {
    pub fn new(config: GatewayConfig, pool: PgPool, redis: redis::Client) -> Self {
        Self {
            config,
            pool,
            redis,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    // run is the whole lifecycle of one gateway instance: follow, lead,
    // fall back, until the root token is cancelled. Returns only on
    // shutdown.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), GatewayError> {
        let Some(conn) = self.connect_lease_store(&cancel).await else {
            return Ok(());
        };
        let mut lease = Lease::new(
            conn,
            LEADER_KEY,
            &self.instance_id,
            self.config.lease_duration,
        );
        info!(instance = %self.instance_id, "joining leader election");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match lease.try_acquire().await {
                Ok(true) => {
                    info!("acquired leadership lease");
                    counter!("gateway_leadership_acquired_total").increment(1);
                    self.lead(&mut lease, &cancel).await;
                }
                Ok(false) => debug!("leadership held by another instance"),
                Err(e) => warn!(error = %e, "lease acquisition failed"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(lease.renewal_interval()) => {}
            }
        }

        // Clean shutdown: hand leadership over immediately instead of
        // letting the lease run out.
        match lease.release().await {
            Ok(true) => info!("released leadership lease"),
            Ok(false) => debug!("lease already held elsewhere at shutdown"),
            Err(e) => debug!(error = %e, "lease release failed at shutdown"),
        }
        Ok(())
    }

    // Establish the lease-store connection, retrying with backoff. None
    // means shutdown was requested while still connecting.
    async fn connect_lease_store(
        &self,
        cancel: &CancellationToken,
    ) -> Option<redis::aio::ConnectionManager> {
        let mut backoff = ReconnectBackoff::new(BACKOFF_START, BACKOFF_CEILING);
        loop {
            match self.redis.get_connection_manager().await {
                Ok(conn) => return Some(conn),
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, "lease store unreachable, retrying in {delay:?}");
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    // lead runs the supervision tree while renewing the lease at half its
    // duration. Returns when leadership is lost or shutdown is requested;
    // children are always cancelled and awaited before returning.
    async fn lead(&self, lease: &mut Lease, cancel: &CancellationToken) {
        let session_cancel = cancel.child_token();
        let session = tokio::spawn(run_leader_session(
            self.config.clone(),
            self.pool.clone(),
            self.redis.clone(),
            self.instance_id.clone(),
            session_cancel.clone(),
        ));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(lease.renewal_interval()) => {
                    match lease.renew().await {
                        Ok(true) => trace!("leadership lease renewed"),
                        Ok(false) => {
                            warn!("leadership lease lost, standing down");
                            counter!("gateway_leadership_lost_total").increment(1);
                            break;
                        }
                        Err(e) => {
                            // A renewal that cannot reach the store may
                            // already have let the lease expire; stand
                            // down rather than risk two leaders.
                            warn!(error = %e, "lease renewal failed, standing down");
                            counter!("gateway_leadership_lost_total").increment(1);
                            break;
                        }
                    }
                }
            }
        }

        session_cancel.cancel();
        if let Err(e) = session.await {
            error!(error = %e, "leader session task panicked");
        }
        info!("leader session torn down");
    }
}

// run_leader_session keeps one supervision tree alive while this instance
// leads. The rule cache outlives MQTT session rebuilds; everything bound to
// the broker connection is rebuilt on failure, mirroring the reconnect loop
// of the listener contract (fixed delay for MQTT loss, doubling backoff for
// store/bus loss).
pub async fn run_leader_session(
    config: GatewayConfig,
    pool: PgPool,
    redis: redis::Client,
    instance_id: String,
    cancel: CancellationToken,
) {
    let source: Arc<dyn RuleSource> = Arc::new(PgRuleSource::new(pool.clone()));
    let cache = Arc::new(RuleCache::new(source, config.cache_capacity));
    let mut backoff = ReconnectBackoff::new(BACKOFF_START, BACKOFF_CEILING);

    while !cancel.is_cancelled() {
        let started = Instant::now();
        match run_session(&config, &pool, &redis, &cache, &instance_id, &cancel).await {
            Ok(()) => break,
            Err(e) => {
                if started.elapsed() > BACKOFF_CEILING {
                    backoff.reset();
                }
                let delay = if e.is_mqtt_error() {
                    config.mqtt_reconnect_delay
                } else {
                    backoff.next_delay()
                };
                warn!(error = %e, "gateway session failed, rebuilding in {delay:?}");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

// run_session wires one MQTT connection to the listeners and the worker
// pool and runs them until cancellation or the first child failure. All
// children share one token; teardown cancels it and awaits every task, so
// resources release deterministically.
async fn run_session(
    config: &GatewayConfig,
    pool: &PgPool,
    redis: &redis::Client,
    cache: &Arc<RuleCache>,
    instance_id: &str,
    cancel: &CancellationToken,
) -> Result<(), GatewayError> {
    let queue = Arc::new(WorkQueue::new(config.data_queue_capacity));
    let coalescer = Arc::new(ControlCoalescer::default());
    let (client, event_loop) = mqtt::build_client(&config.mqtt_host, config.mqtt_port, instance_id);

    let child = cancel.child_token();
    let mut tasks: JoinSet<Result<(), GatewayError>> = JoinSet::new();
    tasks.spawn(notify::run_control_listener(
        redis.clone(),
        queue.clone(),
        coalescer.clone(),
        child.clone(),
    ));
    tasks.spawn(mqtt::run_mqtt_listener(
        event_loop,
        client.clone(),
        pool.clone(),
        queue.clone(),
        child.clone(),
    ));
    for id in 0..config.workers {
        let dispatcher = OrionDispatcher::new(config)?;
        let worker = Worker::new(
            id,
            queue.clone(),
            cache.clone(),
            coalescer.clone(),
            client.clone(),
            dispatcher,
        );
        tasks.spawn(worker.run(child.clone()));
    }
    info!(workers = config.workers, "gateway session started");

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        joined = tasks.join_next() => match joined {
            Some(Ok(Err(e))) => Err(e),
            Some(Ok(Ok(()))) if !cancel.is_cancelled() => Err(GatewayError::TaskStopped),
            Some(Err(e)) => Err(GatewayError::from(e)),
            _ => Ok(()),
        },
    };

    child.cancel();
    while tasks.join_next().await.is_some() {}
    // Dropping the connection also drops the broker-side subscription
    // state (clean start); disconnect just makes it prompt.
    if let Err(e) = client.disconnect().await {
        debug!(error = %e, "mqtt disconnect failed");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_the_ceiling() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(100), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn backoff_reset_starts_over() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(100), Duration::from_secs(5));
        for _ in 0..6 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
