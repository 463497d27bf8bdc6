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

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::{access::Map, ArcSwap};

use super::config::{Config, ConfigError};
use crate::exporter::Template;

type Access<C> = Map<Arc<ArcSwap<ModuleConfig>>, ModuleConfig, fn(&ModuleConfig) -> &C>;

pub type FlowAccess = Access<FlowConfig>;

pub type SenderAccess = Access<SenderConfig>;

pub type ExporterAccess = Access<ExporterConfig>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowConfig {
    pub capacity: usize,
    pub idle_timeout: Duration,
    pub active_timeout: Duration,
    pub poll_period: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SenderConfig {
    pub exporter_ip: Ipv4Addr,
    pub exporter_port: u16,
    pub collector_ip: Ipv4Addr,
    pub collector_port: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExporterConfig {
    pub template: Template,
    pub observation_domain_id: u32,
    pub queue_size: usize,
}

/// Component-facing snapshot of the validated configuration. Components
/// hold `Access` maps into the shared `ArcSwap` instead of the raw file
/// model, so a future reload only has to store a new snapshot here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleConfig {
    pub flow: FlowConfig,
    pub sender: SenderConfig,
    pub exporter: ExporterConfig,
}

impl TryFrom<&Config> for ModuleConfig {
    type Error = ConfigError;

    fn try_from(config: &Config) -> Result<Self, Self::Error> {
        Ok(ModuleConfig {
            flow: FlowConfig {
                capacity: config.flow_capacity,
                idle_timeout: Duration::from_millis(config.idle_timeout_ms),
                active_timeout: Duration::from_millis(config.active_timeout_ms),
                poll_period: Duration::from_secs(config.poll_period_secs),
            },
            sender: SenderConfig {
                exporter_ip: config.exporter_ip,
                exporter_port: config.exporter_port,
                collector_ip: config.collector_ip,
                collector_port: config.collector_port,
            },
            exporter: ExporterConfig {
                template: config.build_template()?,
                observation_domain_id: config.observation_domain_id,
                queue_size: config.queue_size,
            },
        })
    }
}

pub struct ConfigHandler {
    pub config: Config,
    pub current_config: Arc<ArcSwap<ModuleConfig>>,
}

impl ConfigHandler {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let module_config = ModuleConfig::try_from(&config)?;
        Ok(Self {
            config,
            current_config: Arc::new(ArcSwap::from_pointee(module_config)),
        })
    }

    pub fn flow(&self) -> FlowAccess {
        Map::new(
            self.current_config.clone(),
            |config: &ModuleConfig| -> &FlowConfig { &config.flow },
        )
    }

    pub fn sender(&self) -> SenderAccess {
        Map::new(
            self.current_config.clone(),
            |config: &ModuleConfig| -> &SenderConfig { &config.sender },
        )
    }

    pub fn exporter(&self) -> ExporterAccess {
        Map::new(
            self.current_config.clone(),
            |config: &ModuleConfig| -> &ExporterConfig { &config.exporter },
        )
    }
}

#[cfg(test)]
mod tests {
    use arc_swap::access::Access;

    use super::*;

    #[test]
    fn module_config_from_defaults() {
        let handler = ConfigHandler::new(Config::default()).unwrap();
        let flow = handler.flow();
        let config = flow.load();
        assert_eq!(config.idle_timeout, Duration::from_secs(10));
        assert_eq!(config.active_timeout, Duration::from_secs(30));
        assert_eq!(config.poll_period, Duration::from_secs(10));
    }

    #[test]
    fn access_sees_stored_updates() {
        let handler = ConfigHandler::new(Config::default()).unwrap();
        let sender = handler.sender();

        let mut updated = ModuleConfig::try_from(&handler.config).unwrap();
        updated.sender.collector_port = 9999;
        handler.current_config.store(Arc::new(updated));

        assert_eq!(sender.load().collector_port, 9999);
    }
}
