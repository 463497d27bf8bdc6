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

use std::sync::Arc;

use log::info;

use crate::config::handler::ConfigHandler;
use crate::config::{Config, ConfigError};
use crate::exporter::UniformSenderThread;
use crate::flow_generator::{ExpiryScheduler, FlowMap};
use crate::handler::PacketHandler;
use crate::utils::{queue, stats};

/// Owns and wires the components: one shared flow table, the expiry
/// scheduler driving it, and the sender draining the expired queue. The
/// forwarding graph delivers packets through the `PacketHandler` returned
/// by `handler()`.
pub struct Agent {
    config_handler: ConfigHandler,
    stats_collector: Arc<stats::Collector>,

    flow_map: Arc<FlowMap>,
    packet_handler: Arc<PacketHandler>,
    scheduler: ExpiryScheduler,
    sender: UniformSenderThread,

    started: bool,
}

impl Agent {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let config_handler = ConfigHandler::new(config)?;
        let stats_collector = Arc::new(stats::Collector::new());

        let queue_size = config_handler.current_config.load().exporter.queue_size;
        let (output_queue_sender, output_queue_receiver, counter) = queue::bounded(queue_size);
        stats_collector.register_countable(
            "queue",
            stats::Countable::Owned(Box::new(counter)),
            vec![stats::StatsOption::Tag("module", "flow-output".to_owned())],
        );

        let flow_map = Arc::new(FlowMap::new(
            output_queue_sender,
            config_handler.flow(),
            &stats_collector,
        ));
        let packet_handler = Arc::new(PacketHandler::new(flow_map.clone(), &stats_collector));
        let scheduler = ExpiryScheduler::new(flow_map.clone(), config_handler.flow());
        let sender = UniformSenderThread::new(
            output_queue_receiver,
            config_handler.sender(),
            config_handler.exporter(),
            stats_collector.clone(),
        );

        Ok(Self {
            config_handler,
            stats_collector,
            flow_map,
            packet_handler,
            scheduler,
            sender,
            started: false,
        })
    }

    pub fn handler(&self) -> Arc<PacketHandler> {
        self.packet_handler.clone()
    }

    pub fn flow_map(&self) -> Arc<FlowMap> {
        self.flow_map.clone()
    }

    pub fn config_handler(&self) -> &ConfigHandler {
        &self.config_handler
    }

    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        info!("agent starting");
        self.stats_collector.start();
        self.sender.start();
        self.scheduler.start();
        info!("agent started");
    }

    /// Ordered teardown: the scheduler runs its final evict-all scan and
    /// pushes the snapshots before the sender drains the queue and exits.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        info!("agent stopping");
        self.scheduler.stop();
        self.sender.stop();
        self.stats_collector.stop();
        info!("agent stopped");
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::common::get_timestamp;
    use crate::common::meta_packet::_build_ipv4_packet;

    #[test]
    fn start_observe_stop() {
        let config = Config {
            // ephemeral source port so concurrent tests don't collide
            exporter_port: 0,
            poll_period_secs: 1,
            ..Default::default()
        };
        let mut agent = Agent::new(config).unwrap();
        assert_eq!(agent.config_handler().config.observation_domain_id, 1);
        agent.start();

        let handler = agent.handler();
        let raw = _build_ipv4_packet(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            17,
            1000,
            2000,
            100,
        );
        for _ in 0..10 {
            handler.handle(1, &raw, get_timestamp());
        }
        assert_eq!(agent.flow_map().len(), 1);

        // shutdown runs the final evict-all scan and flushes the queue
        agent.stop();
        assert!(agent.flow_map().is_empty());

        // stopping twice is a no-op
        agent.stop();
    }
}
