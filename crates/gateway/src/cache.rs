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

// src/cache.rs
// Per-topic rule cache in front of the catalog database.
//
// Entries are created lazily on the first data event for a topic and only
// mutated by worker tasks. Concurrent misses for one topic coalesce onto a
// single catalog load; every caller observes the same result. An empty rule
// list is cached too ("no rules for this topic"), so repeated traffic on an
// unconfigured topic costs no database reads.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_db::{Datapoint, DatabaseError, DatabaseResult};
use metrics::counter;
use moka::future::Cache;
use sqlx::PgPool;
use tracing::debug;

// A catalog change notification can arrive before the committing
// transaction is visible on this connection. An empty load is retried a
// few times to absorb that window before the empty set is cached.
const EMPTY_LOAD_ATTEMPTS: usize = 3;
const EMPTY_LOAD_RETRY_DELAY: Duration = Duration::from_millis(150);

// RuleSource is the seam between the cache and the catalog. The production
// implementation queries Postgres; tests substitute an in-memory catalog.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn rules_for(&self, topic: &str) -> DatabaseResult<Vec<Datapoint>>;
}

pub struct PgRuleSource {
    pool: PgPool,
}

impl PgRuleSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleSource for PgRuleSource {
    async fn rules_for(&self, topic: &str) -> DatabaseResult<Vec<Datapoint>> {
        gateway_db::datapoint::find_by_topic(&self.pool, topic).await
    }
}

pub struct RuleCache {
    entries: Cache<String, Arc<Vec<Datapoint>>>,
    source: Arc<dyn RuleSource>,
}

impl RuleCache {
    pub fn new(source: Arc<dyn RuleSource>, capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
            source,
        }
    }

    // get returns the rules for a topic, loading and populating on a miss.
    // moka's try_get_with guarantees at most one concurrent load per key.
    pub async fn get(&self, topic: &str) -> Result<Arc<Vec<Datapoint>>, Arc<DatabaseError>> {
        self.entries
            .try_get_with(topic.to_string(), self.load(topic))
            .await
    }

    // invalidate drops the entry for a topic; the next get reloads it.
    pub async fn invalidate(&self, topic: &str) {
        self.entries.invalidate(topic).await;
        debug!(%topic, "invalidated cached rules");
    }

    async fn load(&self, topic: &str) -> Result<Arc<Vec<Datapoint>>, DatabaseError> {
        counter!("gateway_cache_misses_total").increment(1);
        let mut attempt = 1;
        loop {
            let rules = self.source.rules_for(topic).await?;
            if !rules.is_empty() {
                debug!(%topic, count = rules.len(), "loaded rules from catalog");
                return Ok(Arc::new(rules));
            }
            if attempt >= EMPTY_LOAD_ATTEMPTS {
                debug!(%topic, "no rules in catalog, caching empty set");
                return Ok(Arc::new(rules));
            }
            attempt += 1;
            tokio::time::sleep(EMPTY_LOAD_RETRY_DELAY).await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn peek(&self, topic: &str) -> Option<Arc<Vec<Datapoint>>> {
        self.entries.get(topic).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct MapSource {
        rules: HashMap<String, Vec<Datapoint>>,
        loads: AtomicUsize,
    }

    impl MapSource {
        fn new(rules: HashMap<String, Vec<Datapoint>>) -> Self {
            Self {
                rules,
                loads: AtomicUsize::new(0),
            }
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RuleSource for MapSource {
        async fn rules_for(&self, topic: &str) -> DatabaseResult<Vec<Datapoint>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.rules.get(topic).cloned().unwrap_or_default())
        }
    }

    fn rule(object_id: &str) -> Datapoint {
        Datapoint {
            object_id: object_id.to_string(),
            jsonpath: "$..temp".to_string(),
            entity_id: "Room:1".to_string(),
            entity_type: Some("Room".to_string()),
            attribute_name: "temperature".to_string(),
        }
    }

    fn source_with(topic: &str, rules: Vec<Datapoint>) -> Arc<MapSource> {
        let mut map = HashMap::new();
        map.insert(topic.to_string(), rules);
        Arc::new(MapSource::new(map))
    }

    #[tokio::test]
    async fn populates_on_first_hit_and_serves_from_memory_after() {
        let source = source_with("room/1", vec![rule("d1")]);
        let cache = RuleCache::new(source.clone(), 64);

        let first = cache.get("room/1").await.expect("load");
        assert_eq!(first.len(), 1);
        assert_eq!(source.loads(), 1);

        for _ in 0..5 {
            let again = cache.get("room/1").await.expect("cached");
            assert_eq!(*again, *first);
        }
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_onto_one_load() {
        let source = source_with("room/1", vec![rule("d1")]);
        let cache = Arc::new(RuleCache::new(source.clone(), 64));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(
                async move { cache.get("room/1").await.is_ok() },
            ));
        }
        for handle in handles {
            assert!(handle.await.expect("join"));
        }
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let source = source_with("room/1", vec![rule("d1")]);
        let cache = RuleCache::new(source.clone(), 64);

        cache.get("room/1").await.expect("load");
        cache.invalidate("room/1").await;
        assert!(cache.peek("room/1").await.is_none());

        cache.get("room/1").await.expect("reload");
        assert_eq!(source.loads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_result_is_retried_then_cached() {
        // The source never has rules, so the loader exhausts its retry
        // window once and the empty set is served from memory after.
        let source = source_with("other/topic", vec![]);
        let cache = RuleCache::new(source.clone(), 64);

        let rules = cache.get("room/1").await.expect("load");
        assert!(rules.is_empty());
        assert_eq!(source.loads(), EMPTY_LOAD_ATTEMPTS);

        let rules = cache.get("room/1").await.expect("cached empty");
        assert!(rules.is_empty());
        assert_eq!(source.loads(), EMPTY_LOAD_ATTEMPTS);
    }
}
