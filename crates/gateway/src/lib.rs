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

// src/lib.rs
// Main exports for the iot-gateway message-dispatch engine.

pub mod cache;
pub mod config;
pub mod errors;
pub mod evaluate;
pub mod lease;
pub mod logging;
pub mod mqtt;
pub mod notify;
pub mod orion;
pub mod queue;
pub mod supervisor;
pub mod worker;

// Export some things for convenience.
pub use cache::{PgRuleSource, RuleCache, RuleSource};
pub use config::GatewayConfig;
pub use errors::GatewayError;
pub use lease::Lease;
pub use notify::ControlCoalescer;
pub use orion::OrionDispatcher;
pub use queue::{ControlAction, Event, WorkQueue};
pub use supervisor::LeaderElector;
pub use worker::Worker;
