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

// src/main.rs
// Entrypoint: configuration, logging, and the election loop. The process
// is headless; everything of interest happens in structured log lines.

use eyre::WrapErr;
use gateway::config::GatewayConfig;
use gateway::logging;
use gateway::supervisor::LeaderElector;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

// Enough pool headroom for the listener's topic query plus cache misses
// from every worker at once.
const MAX_DB_CONNECTIONS: u32 = 16;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    logging::setup_logging()?;

    // Configuration problems are unrecoverable: report and exit non-zero
    // before any component starts.
    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "refusing to start with invalid configuration");
            std::process::exit(2);
        }
    };
    info!(
        mqtt = %config.mqtt_host,
        orion = %config.orion_url,
        workers = config.workers,
        "starting iot-gateway"
    );

    // The pool connects lazily; an unreachable database surfaces as
    // retriable query errors handled by the supervisor, not a crash here.
    let pool = gateway_db::connect_lazy(&config.database_url(), MAX_DB_CONNECTIONS)
        .wrap_err("database configuration")?;
    let redis =
        redis::Client::open(config.redis_url.as_str()).wrap_err("redis configuration")?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let elector = LeaderElector::new(config, pool, redis);
    info!(instance = %elector.instance_id(), "gateway instance ready");
    elector.run(cancel).await?;

    info!("iot-gateway stopped");
    Ok(())
}
