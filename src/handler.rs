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

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use std::time::Duration;

use log::debug;

use crate::common::MetaPacket;
use crate::flow_generator::{FlowMap, FlowMapTrace};
use crate::utils::stats::{self, Counter, CounterType, CounterValue, RefCountable};

#[derive(Debug, Default)]
pub struct HandlerCounter {
    pub rx: AtomicU64,
    pub parse_errors: AtomicU64,
}

impl RefCountable for HandlerCounter {
    fn get_counters(&self) -> Vec<Counter> {
        vec![
            (
                "rx",
                CounterType::Counted,
                CounterValue::Unsigned(self.rx.swap(0, Ordering::Relaxed)),
            ),
            (
                "parse-errors",
                CounterType::Counted,
                CounterValue::Unsigned(self.parse_errors.swap(0, Ordering::Relaxed)),
            ),
        ]
    }
}

/// Capture taken for one flagged packet. The table contents are deep
/// copies owned by the trace; the live table keeps changing underneath
/// without affecting it.
#[derive(Debug)]
pub struct PacketTrace {
    pub ifindex: u32,
    pub next_index: u32,
    pub flow_table: FlowMapTrace,
}

/// Entry point for packet workers: parses the delivered IPv4 header and
/// feeds the flow table. Malformed packets are counted and ignored;
/// nothing is ever reported back to the forwarding graph.
pub struct PacketHandler {
    flow_map: Arc<FlowMap>,
    counter: Arc<HandlerCounter>,
}

impl PacketHandler {
    pub fn new(flow_map: Arc<FlowMap>, stats_collector: &stats::Collector) -> Self {
        let counter = Arc::new(HandlerCounter::default());
        stats_collector.register_countable(
            "packet-handler",
            stats::Countable::Ref(Arc::downgrade(&counter) as Weak<dyn RefCountable>),
            vec![],
        );
        Self { flow_map, counter }
    }

    pub fn handle(&self, ifindex: u32, packet: &[u8], timestamp: Duration) {
        let mut meta_packet = MetaPacket::empty();
        if let Err(e) = meta_packet.update(packet, ifindex, timestamp) {
            debug!("ignoring packet on ifindex {}: {}", ifindex, e);
            self.counter.parse_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.counter.rx.fetch_add(1, Ordering::Relaxed);
        // a full table is already accounted by the flow map
        let _ = self.flow_map.observe(&meta_packet);
    }

    /// Same as `handle` for a packet flagged for tracing, additionally
    /// capturing the table state right after the observation.
    pub fn handle_traced(
        &self,
        ifindex: u32,
        next_index: u32,
        packet: &[u8],
        timestamp: Duration,
    ) -> PacketTrace {
        self.handle(ifindex, packet, timestamp);
        PacketTrace {
            ifindex,
            next_index,
            flow_table: self.flow_map.trace(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use arc_swap::{access::Map, ArcSwap};

    use super::*;
    use crate::common::meta_packet::_build_ipv4_packet;
    use crate::config::handler::{FlowConfig, ModuleConfig};
    use crate::config::Config;
    use crate::utils::queue;

    fn new_handler() -> PacketHandler {
        let module_config = ModuleConfig::try_from(&Config::default()).unwrap();
        let current_config = Arc::new(ArcSwap::from_pointee(module_config));
        let (sender, _receiver, _) = queue::bounded(16);
        let collector = stats::Collector::new();
        let flow_map = Arc::new(FlowMap::new(
            sender,
            Map::new(current_config, |config: &ModuleConfig| -> &FlowConfig {
                &config.flow
            }),
            &collector,
        ));
        PacketHandler::new(flow_map, &collector)
    }

    #[test]
    fn malformed_packets_are_counted_and_ignored() {
        let handler = new_handler();
        handler.handle(1, &[0u8; 4], Duration::ZERO);
        assert_eq!(handler.counter.parse_errors.load(Ordering::Relaxed), 1);
        assert_eq!(handler.counter.rx.load(Ordering::Relaxed), 0);
        assert!(handler.flow_map.is_empty());
    }

    #[test]
    fn traced_packet_captures_deep_copy() {
        let handler = new_handler();
        let raw = _build_ipv4_packet(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            17,
            1000,
            2000,
            100,
        );
        let trace = handler.handle_traced(5, 0, &raw, Duration::ZERO);
        assert_eq!(trace.ifindex, 5);
        assert_eq!(trace.flow_table.records.len(), 1);
        assert_eq!(trace.flow_table.keys.len(), 1);
        assert_eq!(trace.flow_table.records[0].packet_count, 1);

        // keep observing; the capture must not move
        for ms in 1..=1000 {
            handler.handle(5, &raw, Duration::from_millis(ms));
        }
        assert_eq!(trace.flow_table.records[0].packet_count, 1);
        assert_eq!(handler.flow_map.trace().records[0].packet_count, 1001);
    }
}
