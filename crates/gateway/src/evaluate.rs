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

// src/evaluate.rs
// Pure JSONPath evaluation of datapoint rules against parsed payloads.

use jsonpath_rust::JsonPath;
use serde_json::Value;
use thiserror::Error;

// PathError occurs when a rule carries an expression the parser rejects.
// The worker logs it and skips the rule.
#[derive(Debug, Error)]
#[error("invalid path expression {expr:?}: {message}")]
pub struct PathError {
    pub expr: String,
    pub message: String,
}

// first_match applies a path expression to a payload and returns the first
// matched value, or None when nothing matches. The output depends only on
// the payload and the expression; the payload is never mutated.
//
// Both recursive descent ($..temp) and dotted navigation ($.sensor.temp)
// are supported by the expression language.
pub fn first_match(payload: &Value, expr: &str) -> Result<Option<Value>, PathError> {
    let path = JsonPath::try_from(expr).map_err(|e| PathError {
        expr: expr.to_string(),
        message: e.to_string(),
    })?;

    // find returns an array of every match; a miss is an empty array (or
    // null, depending on the shape of the query).
    let found = path.find(payload);
    let first = match found {
        Value::Array(items) => items.into_iter().next(),
        Value::Null => None,
        other => Some(other),
    };
    Ok(first.filter(|value| !value.is_null()))
}
