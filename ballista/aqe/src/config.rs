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

//! Ballista AQE configuration

use std::collections::HashMap;
use std::result;
use std::sync::LazyLock;

use crate::error::{AqeError, Result};

use datafusion::arrow::datatypes::DataType;

/// enables or disables coalescing of post shuffle partitions
pub const AQE_COALESCE_PARTITIONS_ENABLED: &str = "aqe.coalesce_partitions.enabled";
/// lower bound of partitions produced when coalescing a shuffle.
/// the target partition size is tightened to honour it
pub const AQE_COALESCE_PARTITIONS_MIN_PARTITIONS: &str =
    "aqe.coalesce_partitions.min_partitions";
/// advisory size, in bytes, of a single coalesced partition
pub const AQE_COALESCE_PARTITIONS_TARGET_SIZE: &str =
    "aqe.coalesce_partitions.target_partition_size";

pub type ParseResult<T> = result::Result<T, String>;

static CONFIG_ENTRIES: LazyLock<HashMap<String, ConfigEntry>> = LazyLock::new(|| {
    let entries = vec![
        ConfigEntry::new(AQE_COALESCE_PARTITIONS_ENABLED.to_string(),
                         "Coalesce contiguous post shuffle partitions based on map output statistics".to_string(),
                         DataType::Boolean,
                         Some(true.to_string())),
        ConfigEntry::new(AQE_COALESCE_PARTITIONS_MIN_PARTITIONS.to_string(),
                         "Minimum number of partitions after coalescing, has to be at least 1".to_string(),
                         DataType::UInt64,
                         Some(1.to_string())),
        ConfigEntry::new(AQE_COALESCE_PARTITIONS_TARGET_SIZE.to_string(),
                         "Advisory size in bytes of a coalesced shuffle partition".to_string(),
                         DataType::UInt64,
                         Some((64 * 1024 * 1024).to_string())),
    ];
    entries
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect::<HashMap<_, _>>()
});

/// Configuration option meta-data
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    name: String,
    description: String,
    data_type: DataType,
    default_value: Option<String>,
}

impl ConfigEntry {
    fn new(
        name: String,
        description: String,
        data_type: DataType,
        default_value: Option<String>,
    ) -> Self {
        Self {
            name,
            description,
            data_type,
            default_value,
        }
    }
}

/// Settings consumed by [crate::optimizer_rule::CoalesceShufflePartitionsRule]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalesceOptions {
    pub enabled: bool,
    pub min_num_partitions: usize,
    pub target_partition_size: u64,
}

impl Default for CoalesceOptions {
    fn default() -> Self {
        AqeConfig::default().coalesce_options()
    }
}

/// Adaptive query execution configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AqeConfig {
    /// Settings stored in map for easy serde
    settings: HashMap<String, String>,
}

impl Default for AqeConfig {
    fn default() -> Self {
        // defaults are validated by `default_config` test
        Self {
            settings: HashMap::new(),
        }
    }
}

impl AqeConfig {
    /// Create a new configuration based on key-value pairs
    pub fn with_settings(settings: HashMap<String, String>) -> Result<Self> {
        let supported_entries = AqeConfig::valid_entries();
        for (name, entry) in supported_entries {
            if let Some(v) = settings.get(name) {
                // validate that we can parse the user-supplied value
                Self::validate(name, v).map_err(|e| AqeError::Configuration(format!("Failed to parse user-supplied value '{v}' for configuration setting '{name}': {e}")))?;
            } else if let Some(v) = entry.default_value.clone() {
                Self::validate(name, &v).map_err(|e| AqeError::Configuration(format!("Failed to parse default value '{v}' for configuration setting '{name}': {e}")))?;
            } else {
                return Err(AqeError::Configuration(format!(
                    "No value specified for mandatory configuration setting '{name}'"
                )));
            }
        }

        if let Some(name) = settings.keys().find(|k| !supported_entries.contains_key(*k))
        {
            return Err(AqeError::Configuration(format!(
                "configuration key `{name}` does not exist"
            )));
        }

        Ok(Self { settings })
    }

    pub fn parse_value(val: &str, data_type: DataType) -> ParseResult<()> {
        match data_type {
            DataType::UInt64 => {
                val.parse::<u64>().map_err(|e| format!("{e:?}"))?;
            }
            DataType::Boolean => {
                val.parse::<bool>().map_err(|e| format!("{e:?}"))?;
            }
            _ => {
                return Err(format!("not support data type: {data_type}"));
            }
        }

        Ok(())
    }

    fn validate(name: &str, val: &str) -> ParseResult<()> {
        let entry = Self::valid_entries()
            .get(name)
            .ok_or_else(|| format!("unknown configuration setting '{name}'"))?;
        Self::parse_value(val, entry.data_type.clone())?;

        if name == AQE_COALESCE_PARTITIONS_MIN_PARTITIONS && val.parse::<u64>() == Ok(0) {
            return Err("minimum number of partitions has to be positive".to_string());
        }

        Ok(())
    }

    // All available configuration options
    pub fn valid_entries() -> &'static HashMap<String, ConfigEntry> {
        &CONFIG_ENTRIES
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn coalesce_partitions_enabled(&self) -> bool {
        self.get_bool_setting(AQE_COALESCE_PARTITIONS_ENABLED)
    }

    pub fn coalesce_min_partitions(&self) -> usize {
        self.get_u64_setting(AQE_COALESCE_PARTITIONS_MIN_PARTITIONS) as usize
    }

    pub fn coalesce_target_partition_size(&self) -> u64 {
        self.get_u64_setting(AQE_COALESCE_PARTITIONS_TARGET_SIZE)
    }

    pub fn coalesce_options(&self) -> CoalesceOptions {
        CoalesceOptions {
            enabled: self.coalesce_partitions_enabled(),
            min_num_partitions: self.coalesce_min_partitions(),
            target_partition_size: self.coalesce_target_partition_size(),
        }
    }

    fn setting_or_default(&self, key: &str) -> &str {
        match self.settings.get(key) {
            Some(v) => v,
            // every entry carries a default value
            None => Self::valid_entries()
                .get(key)
                .and_then(|e| e.default_value.as_deref())
                .unwrap_or_default(),
        }
    }

    fn get_u64_setting(&self, key: &str) -> u64 {
        // values are validated before they are stored
        self.setting_or_default(key).parse().unwrap_or_default()
    }

    fn get_bool_setting(&self, key: &str) -> bool {
        self.setting_or_default(key).parse().unwrap_or_default()
    }
}

impl datafusion::config::ExtensionOptions for AqeConfig {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn cloned(&self) -> Box<dyn datafusion::config::ExtensionOptions> {
        Box::new(self.clone())
    }

    fn set(&mut self, key: &str, value: &str) -> datafusion::error::Result<()> {
        let k = format!("{}.{key}", <AqeConfig as datafusion::config::ConfigExtension>::PREFIX);

        if Self::valid_entries().contains_key(&k) {
            Self::validate(&k, value).map_err(|e| {
                AqeError::Configuration(format!("invalid value '{value}' for `{k}`: {e}"))
            })?;
            self.settings.insert(k, value.to_string());
            Ok(())
        } else {
            Err(AqeError::Configuration(format!(
                "configuration key `{key}` does not exist"
            ))
            .into())
        }
    }

    fn entries(&self) -> Vec<datafusion::config::ConfigEntry> {
        Self::valid_entries()
            .iter()
            .map(|(key, value)| datafusion::config::ConfigEntry {
                key: key.clone(),
                value: self
                    .settings
                    .get(key)
                    .cloned()
                    .or(value.default_value.clone()),
                description: &value.description,
            })
            .collect()
    }
}

impl datafusion::config::ConfigExtension for AqeConfig {
    const PREFIX: &'static str = "aqe";
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::config::{ConfigOptions, ExtensionOptions};

    #[test]
    fn default_config() -> Result<()> {
        let config = AqeConfig::with_settings(HashMap::new())?;
        assert!(config.coalesce_partitions_enabled());
        assert_eq!(1, config.coalesce_min_partitions());
        assert_eq!(67108864, config.coalesce_target_partition_size());
        assert_eq!(config.coalesce_options(), CoalesceOptions::default());
        Ok(())
    }

    #[test]
    fn custom_config() -> Result<()> {
        let settings = HashMap::from([
            (AQE_COALESCE_PARTITIONS_ENABLED.to_string(), "false".to_string()),
            (AQE_COALESCE_PARTITIONS_MIN_PARTITIONS.to_string(), "8".to_string()),
            (AQE_COALESCE_PARTITIONS_TARGET_SIZE.to_string(), "1024".to_string()),
        ]);
        let config = AqeConfig::with_settings(settings)?;
        assert_eq!(
            CoalesceOptions {
                enabled: false,
                min_num_partitions: 8,
                target_partition_size: 1024,
            },
            config.coalesce_options()
        );
        Ok(())
    }

    #[test]
    fn reject_invalid_settings() {
        let zero_partitions = HashMap::from([(
            AQE_COALESCE_PARTITIONS_MIN_PARTITIONS.to_string(),
            "0".to_string(),
        )]);
        assert!(matches!(
            AqeConfig::with_settings(zero_partitions),
            Err(AqeError::Configuration(_))
        ));

        let not_a_number = HashMap::from([(
            AQE_COALESCE_PARTITIONS_TARGET_SIZE.to_string(),
            "64MB".to_string(),
        )]);
        assert!(AqeConfig::with_settings(not_a_number).is_err());

        let unknown = HashMap::from([("aqe.unknown".to_string(), "1".to_string())]);
        assert!(AqeConfig::with_settings(unknown).is_err());
    }

    #[test]
    fn set_through_config_options() -> datafusion::error::Result<()> {
        let mut options = ConfigOptions::new();
        options.extensions.insert(AqeConfig::default());
        options.set(AQE_COALESCE_PARTITIONS_TARGET_SIZE, "4096")?;
        options.set(AQE_COALESCE_PARTITIONS_ENABLED, "false")?;

        let config = options.extensions.get::<AqeConfig>().unwrap();
        assert_eq!(4096, config.coalesce_target_partition_size());
        assert!(!config.coalesce_partitions_enabled());

        assert!(matches!(
            options.set(AQE_COALESCE_PARTITIONS_MIN_PARTITIONS, "0"),
            Err(datafusion::error::DataFusionError::Configuration(_))
        ));
        assert!(options.set("aqe.does_not_exist", "1").is_err());

        let entries = options.extensions.get::<AqeConfig>().unwrap().entries();
        assert_eq!(3, entries.len());
        Ok(())
    }
}
