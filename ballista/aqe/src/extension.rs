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

use crate::config::{
    AQE_COALESCE_PARTITIONS_ENABLED, AQE_COALESCE_PARTITIONS_MIN_PARTITIONS,
    AQE_COALESCE_PARTITIONS_TARGET_SIZE, AqeConfig,
};
use datafusion::prelude::SessionConfig;

/// Provides methods which adapt [SessionConfig]
/// to adaptive query execution settings
pub trait SessionConfigExt {
    /// Creates session config which has
    /// adaptive query execution configuration initialized
    fn new_with_aqe() -> SessionConfig;

    /// return adaptive configuration or
    /// creates default one if does not exist
    fn aqe_config(&self) -> AqeConfig;

    /// enables or disables coalescing of shuffle partitions
    fn with_coalesce_partitions_enabled(self, enabled: bool) -> Self;

    /// Sets minimum number of partitions after coalescing.
    ///
    /// # Panics
    ///
    /// if `min_partitions` is zero
    fn with_coalesce_min_partitions(self, min_partitions: usize) -> Self;

    /// Sets advisory size of a coalesced partition in bytes
    fn with_coalesce_target_partition_size(self, target_size: u64) -> Self;
}

impl SessionConfigExt for SessionConfig {
    fn new_with_aqe() -> SessionConfig {
        SessionConfig::new().with_option_extension(AqeConfig::default())
    }

    fn aqe_config(&self) -> AqeConfig {
        self.options()
            .extensions
            .get::<AqeConfig>()
            .cloned()
            .unwrap_or_default()
    }

    fn with_coalesce_partitions_enabled(self, enabled: bool) -> Self {
        if self.options().extensions.get::<AqeConfig>().is_some() {
            self.set_bool(AQE_COALESCE_PARTITIONS_ENABLED, enabled)
        } else {
            self.with_option_extension(AqeConfig::default())
                .set_bool(AQE_COALESCE_PARTITIONS_ENABLED, enabled)
        }
    }

    fn with_coalesce_min_partitions(self, min_partitions: usize) -> Self {
        if self.options().extensions.get::<AqeConfig>().is_some() {
            self.set_usize(AQE_COALESCE_PARTITIONS_MIN_PARTITIONS, min_partitions)
        } else {
            self.with_option_extension(AqeConfig::default())
                .set_usize(AQE_COALESCE_PARTITIONS_MIN_PARTITIONS, min_partitions)
        }
    }

    fn with_coalesce_target_partition_size(self, target_size: u64) -> Self {
        if self.options().extensions.get::<AqeConfig>().is_some() {
            self.set_u64(AQE_COALESCE_PARTITIONS_TARGET_SIZE, target_size)
        } else {
            self.with_option_extension(AqeConfig::default())
                .set_u64(AQE_COALESCE_PARTITIONS_TARGET_SIZE, target_size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoalesceOptions;

    #[test]
    fn should_use_defaults_without_extension() {
        let config = SessionConfig::new();
        assert_eq!(
            CoalesceOptions::default(),
            config.aqe_config().coalesce_options()
        );
    }

    #[test]
    fn should_update_settings() {
        let config = SessionConfig::new()
            .with_coalesce_partitions_enabled(false)
            .with_coalesce_min_partitions(4)
            .with_coalesce_target_partition_size(1024);

        let options = config.aqe_config().coalesce_options();
        assert!(!options.enabled);
        assert_eq!(4, options.min_num_partitions);
        assert_eq!(1024, options.target_partition_size);

        let config = SessionConfig::new_with_aqe().with_coalesce_min_partitions(2);
        assert_eq!(2, config.aqe_config().coalesce_min_partitions());
        assert!(config.aqe_config().coalesce_partitions_enabled());
    }

    #[test]
    #[should_panic]
    fn should_reject_zero_min_partitions() {
        let _ = SessionConfig::new_with_aqe().with_coalesce_min_partitions(0);
    }
}
