/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! TOML configuration for `reindexctl`.
//!
//! ```toml
//! [engine]
//! polling_frequency_ms = 200
//! consecutive_failures_threshold = 3
//!
//! [job]
//! max_concurrency = 2
//! query_delay_ms = 0
//!
//! [[search_parameters]]
//! url = "http://example.org/SearchParameter/Patient-birthdate"
//! code = "birthDate"
//! base = ["Patient"]
//! status = "Supported"
//!
//! [[resources]]
//! resource_type = "Patient"
//! count = 250
//! ```
//!
//! Values may reference the environment as `${VAR}` or `${VAR:-default}`.

use regex::Regex;
use reindex::models::JobParameters;
use reindex::{ReindexConfig, SearchParameterStatus};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV_VAR: &str = "REINDEX_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found in any search location")]
    ConfigNotFound,

    #[error("Failed to read configuration file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Environment variable substitution failed: {0}")]
    EnvSubstitutionError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine knobs. Unset values keep the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    pub max_running_jobs: Option<usize>,
    pub polling_frequency_ms: Option<u64>,
    pub job_heartbeat_timeout_secs: Option<u64>,
    pub consecutive_failures_threshold: Option<u32>,
    pub max_resources_per_query: Option<u32>,
    pub max_resources_per_write: Option<usize>,
    pub processing_timeout_retries: Option<u32>,
    pub orchestrator_poll_floor_ms: Option<u64>,
    pub orchestrator_poll_ceiling_ms: Option<u64>,
    pub throttle_sample_window: Option<usize>,
    pub host_max_concurrent_jobs: Option<usize>,
    pub host_poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSection {
    #[serde(default)]
    pub target_resource_types: Vec<String>,
    pub max_concurrency: Option<u16>,
    pub query_delay_ms: Option<u64>,
    pub target_data_store_usage_percentage: Option<u8>,
    pub maximum_number_of_resources_per_query: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterSection {
    pub url: String,
    pub code: String,
    pub base: Vec<String>,
    pub status: SearchParameterStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSection {
    pub resource_type: String,
    pub count: usize,
}

/// Simulated datastore utilization fed to the throttle controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsageSection {
    pub provisioned_capacity: Option<f64>,
    pub usage: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CtlConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub job: JobSection,
    #[serde(default)]
    pub usage: UsageSection,
    #[serde(default)]
    pub search_parameters: Vec<ParameterSection>,
    #[serde(default)]
    pub resources: Vec<ResourceSection>,
}

impl CtlConfig {
    pub fn reindex_config(&self) -> ReindexConfig {
        let e = &self.engine;
        let mut builder = ReindexConfig::builder();
        if let Some(v) = e.max_running_jobs {
            builder = builder.max_running_jobs(v);
        }
        if let Some(v) = e.polling_frequency_ms {
            builder = builder.polling_frequency(Duration::from_millis(v));
        }
        if let Some(v) = e.job_heartbeat_timeout_secs {
            builder = builder.job_heartbeat_timeout(Duration::from_secs(v));
        }
        if let Some(v) = e.consecutive_failures_threshold {
            builder = builder.consecutive_failures_threshold(v);
        }
        if let Some(v) = e.max_resources_per_query {
            builder = builder.max_resources_per_query(v);
        }
        if let Some(v) = e.max_resources_per_write {
            builder = builder.max_resources_per_write(v);
        }
        if let Some(v) = e.processing_timeout_retries {
            builder = builder.processing_timeout_retries(v);
        }
        if let Some(v) = e.orchestrator_poll_floor_ms {
            builder = builder.orchestrator_poll_floor(Duration::from_millis(v));
        }
        if let Some(v) = e.orchestrator_poll_ceiling_ms {
            builder = builder.orchestrator_poll_ceiling(Duration::from_millis(v));
        }
        if let Some(v) = e.throttle_sample_window {
            builder = builder.throttle_sample_window(v);
        }
        if let Some(v) = e.host_max_concurrent_jobs {
            builder = builder.host_max_concurrent_jobs(v);
        }
        if let Some(v) = e.host_poll_interval_ms {
            builder = builder.host_poll_interval(Duration::from_millis(v));
        }
        builder.build()
    }

    pub fn job_parameters(&self) -> JobParameters {
        JobParameters {
            target_resource_types: self.job.target_resource_types.clone(),
            max_concurrency: self.job.max_concurrency,
            query_delay_interval_ms: self.job.query_delay_ms,
            target_data_store_usage_percentage: self.job.target_data_store_usage_percentage,
            maximum_number_of_resources_per_query: self.job.maximum_number_of_resources_per_query,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dup) = self
            .search_parameters
            .iter()
            .enumerate()
            .find(|(i, p)| self.search_parameters[..*i].iter().any(|q| q.url == p.url))
        {
            return Err(ConfigError::Invalid(format!(
                "search parameter {} is declared twice",
                dup.1.url
            )));
        }
        if let Some(p) = self.search_parameters.iter().find(|p| p.base.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "search parameter {} has no base resource types",
                p.url
            )));
        }
        Ok(())
    }
}

pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Searches `./reindex.toml`, then the user config directory.
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("./reindex.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("reindex").join("config.toml"));
        }
        Self { search_paths }
    }

    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Loads the explicit file, else `$REINDEX_CONFIG`, else the first file
    /// found on the search path. With nothing found the defaults are used.
    pub fn load(&self, config_file: Option<&Path>) -> Result<CtlConfig, ConfigError> {
        let path = match config_file {
            Some(path) => Some(path.to_path_buf()),
            None => env::var(CONFIG_ENV_VAR)
                .ok()
                .map(PathBuf::from)
                .or_else(|| self.find_config_file()),
        };
        match path {
            Some(path) => self.load_from_file(&path),
            None => Ok(CtlConfig::default()),
        }
    }

    pub fn load_from_file(&self, path: &Path) -> Result<CtlConfig, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::ConfigNotFound);
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let substituted = substitute_env_vars(&content)?;
        let config: CtlConfig = toml::from_str(&substituted)?;
        config.validate()?;
        Ok(config)
    }

    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.is_file()).cloned()
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Replaces `${VAR}` and `${VAR:-default}` references.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::EnvSubstitutionError(e.to_string()))?;
    let mut failure = None;
    let result = re.replace_all(content, |caps: &regex::Captures| {
        let expr = &caps[1];
        match expr.split_once(":-") {
            Some((name, default)) => env::var(name).unwrap_or_else(|_| default.to_string()),
            None => env::var(expr).unwrap_or_else(|_| {
                failure.get_or_insert_with(|| expr.to_string());
                String::new()
            }),
        }
    });
    match failure {
        Some(name) => Err(ConfigError::EnvSubstitutionError(format!(
            "Required environment variable '{name}' is not set"
        ))),
        None => Ok(result.into_owned()),
    }
}
