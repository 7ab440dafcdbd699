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

pub mod datapoint;

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::Location;

pub use datapoint::Datapoint;
use sqlx::postgres::PgPoolOptions;

/// Wraps a sqlx::Error and records location and query
#[derive(Debug)]
pub struct AnnotatedSqlxError {
    file: &'static str,
    line: u32,
    query: String,
    pub source: sqlx::Error,
}

#[derive(thiserror::Error, Debug)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlx(#[from] AnnotatedSqlxError),
    #[error("Invalid database configuration: {0}")]
    InvalidConfiguration(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

impl DatabaseError {
    #[track_caller]
    pub fn query(query: &str, source: sqlx::Error) -> DatabaseError {
        let loc = Location::caller();
        DatabaseError::Sqlx(AnnotatedSqlxError {
            file: loc.file(),
            line: loc.line(),
            query: query.to_string(),
            source,
        })
    }

    /// Returns true if the error wraps a sqlx::Error::RowNotFound
    pub fn is_not_found(&self) -> bool {
        match self {
            DatabaseError::Sqlx(e) => matches!(e.source, sqlx::Error::RowNotFound),
            _ => false,
        }
    }
}

impl Display for AnnotatedSqlxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Database Error: {} file={} line={} query={}.",
            self.source, self.file, self.line, self.query,
        )
    }
}

impl Error for AnnotatedSqlxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Build a lazily connecting pool for the catalog database.
///
/// The pool establishes connections on first use, so an unreachable server
/// surfaces as a retriable query error rather than a startup failure. A
/// malformed URL is a configuration error and is reported immediately.
pub fn connect_lazy(database_url: &str, max_connections: u32) -> DatabaseResult<sqlx::PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect_lazy(database_url)
        .map_err(|e| DatabaseError::InvalidConfiguration(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_query() {
        const DB_QUERY: &str = "SELECT * FROM devices;";
        let DatabaseError::Sqlx(err) =
            DatabaseError::query(DB_QUERY, sqlx::Error::protocol("some error"))
        else {
            unreachable!()
        };
        assert_eq!(err.line, line!() - 4);
        assert_eq!(err.file, file!());
        assert!(format!("{err}").contains(DB_QUERY));
    }

    #[test]
    fn test_is_not_found() {
        let err = DatabaseError::query("SELECT 1", sqlx::Error::RowNotFound);
        assert!(err.is_not_found());

        let err = DatabaseError::query("SELECT 1", sqlx::Error::protocol("boom"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_connect_lazy_rejects_bad_url() {
        assert!(connect_lazy("not-a-database-url", 4).is_err());
    }
}
