/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use log::info;
use serde::Deserialize;
use thiserror::Error;

use crate::exporter::{self, template::DATA_SET_ID_MIN, FieldId};

pub const DEFAULT_COLLECTOR_PORT: u16 = 4739; // IANA ipfix
pub const DEFAULT_LOG_FILE: &str = "/var/log/ipfix-exporter/ipfix-exporter.log";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("yaml config invalid: {0}")]
    YamlConfigInvalid(String),
    #[error("template invalid: {0}")]
    TemplateInvalid(#[from] exporter::Error),
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct FieldSpecConfig {
    pub identifier: String,
    pub size: u16,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct TemplateSetConfig {
    pub id: u16,
    pub fields: Vec<FieldSpecConfig>,
}

impl Default for TemplateSetConfig {
    fn default() -> Self {
        Self {
            id: DATA_SET_ID_MIN,
            fields: vec![],
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub exporter_ip: Ipv4Addr,
    pub exporter_port: u16,
    pub collector_ip: Ipv4Addr,
    pub collector_port: u16,

    pub idle_timeout_ms: u64,
    pub active_timeout_ms: u64,
    pub poll_period_secs: u64,

    pub observation_domain_id: u32,
    pub template: Vec<TemplateSetConfig>,

    pub flow_capacity: usize,
    pub queue_size: usize,

    pub log_file: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exporter_ip: Ipv4Addr::UNSPECIFIED,
            exporter_port: DEFAULT_COLLECTOR_PORT,
            collector_ip: Ipv4Addr::LOCALHOST,
            collector_port: DEFAULT_COLLECTOR_PORT,
            idle_timeout_ms: 10_000,
            active_timeout_ms: 30_000,
            poll_period_secs: 10,
            observation_domain_id: 1,
            template: vec![],
            flow_capacity: 1 << 16,
            queue_size: 1 << 16,
            log_file: DEFAULT_LOG_FILE.to_owned(),
            log_level: "info".to_owned(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("no config file in {}, using defaults", path.display());
            return Config::default().validated();
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::YamlConfigInvalid(format!("read failed: {}", e)))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|e| ConfigError::YamlConfigInvalid(e.to_string()))?;
        config.validated()
    }

    /// Builds the configured template, or the built-in nine-field one when
    /// the option is absent. Unknown identifiers and wrong sizes are
    /// rejected here, before any component starts.
    pub fn build_template(&self) -> Result<exporter::Template, ConfigError> {
        if self.template.is_empty() {
            return Ok(exporter::Template::default());
        }
        let mut sets = Vec::with_capacity(self.template.len());
        for set in self.template.iter() {
            let mut fields = Vec::with_capacity(set.fields.len());
            for field in set.fields.iter() {
                let id: FieldId = field.identifier.parse()?;
                fields.push(exporter::FieldSpec {
                    id,
                    size: field.size,
                    enterprise_number: 0,
                });
            }
            sets.push(exporter::TemplateSet { id: set.id, fields });
        }
        Ok(exporter::Template::new(sets)?)
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::InvalidOption(
                "idle-timeout-ms must not be zero".to_owned(),
            ));
        }
        if self.active_timeout_ms == 0 {
            return Err(ConfigError::InvalidOption(
                "active-timeout-ms must not be zero".to_owned(),
            ));
        }
        if self.poll_period_secs == 0 {
            return Err(ConfigError::InvalidOption(
                "poll-period-secs must not be zero".to_owned(),
            ));
        }
        if self.flow_capacity == 0 || self.queue_size == 0 {
            return Err(ConfigError::InvalidOption(
                "flow-capacity and queue-size must not be zero".to_owned(),
            ));
        }
        self.build_template()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default().validated().unwrap();
        assert_eq!(config.idle_timeout_ms, 10_000);
        assert_eq!(config.active_timeout_ms, 30_000);
        assert_eq!(config.poll_period_secs, 10);
        let template = config.build_template().unwrap();
        assert_eq!(template.sets().len(), 1);
        assert_eq!(template.sets()[0].fields.len(), 9);
    }

    #[test]
    fn parse_yaml_overrides() {
        let config = Config::parse(
            r#"
collector-ip: 10.30.0.1
collector-port: 2055
idle-timeout-ms: 5000
template:
  - id: 300
    fields:
      - identifier: sourceIPv4Address
        size: 4
      - identifier: packetDeltaCount
        size: 8
"#,
        )
        .unwrap();
        assert_eq!(config.collector_ip, Ipv4Addr::new(10, 30, 0, 1));
        assert_eq!(config.collector_port, 2055);
        assert_eq!(config.idle_timeout_ms, 5000);
        // untouched options keep defaults
        assert_eq!(config.active_timeout_ms, 30_000);
        let template = config.build_template().unwrap();
        assert_eq!(template.sets()[0].id, 300);
        assert_eq!(template.sets()[0].fields.len(), 2);
    }

    #[test]
    fn bad_template_rejected() {
        let result = Config::parse(
            r#"
template:
  - id: 300
    fields:
      - identifier: flowDurationMicroseconds
        size: 4
"#,
        );
        assert!(matches!(result, Err(ConfigError::TemplateInvalid(_))));

        let result = Config::parse(
            r#"
template:
  - id: 300
    fields:
      - identifier: protocolIdentifier
        size: 2
"#,
        );
        assert!(matches!(result, Err(ConfigError::TemplateInvalid(_))));
    }

    #[test]
    fn zero_timeout_rejected() {
        assert!(Config::parse("idle-timeout-ms: 0").is_err());
    }
}
