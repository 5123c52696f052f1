// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Ballista AQE error types

use std::{
    error::Error,
    fmt::{Display, Formatter},
    result,
};

use datafusion::error::DataFusionError;

/// Result type alias for adaptive planning operations.
pub type Result<T> = result::Result<T, AqeError>;

/// Errors raised while configuring adaptive rules.
///
/// Errors of plan rewriting and execution are reported as
/// [DataFusionError], as required by DataFusion traits.
#[derive(Debug)]
pub enum AqeError {
    /// Configuration error with invalid settings.
    Configuration(String),
}

impl From<AqeError> for DataFusionError {
    fn from(e: AqeError) -> Self {
        match e {
            AqeError::Configuration(desc) => DataFusionError::Configuration(desc),
        }
    }
}

impl Display for AqeError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            AqeError::Configuration(desc) => {
                write!(f, "Configuration error: {desc}")
            }
        }
    }
}

impl Error for AqeError {}
