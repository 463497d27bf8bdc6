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

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Weak,
};

use arc_swap::access::Access;
use log::{debug, warn};
use parking_lot::Mutex;

use super::{Error, Result, HASH_SHARDS};
use crate::common::{FlowKey, FlowRecord, MetaPacket};
use crate::config::handler::FlowAccess;
use crate::utils::{
    queue,
    stats::{self, Counter, CounterType, CounterValue, RefCountable},
};

#[derive(Debug, Default)]
pub struct FlowMapCounter {
    pub new_flows: AtomicU64,
    pub hits: AtomicU64,
    pub closed: AtomicU64,
    pub forced_reports: AtomicU64,
    pub drop_untracked: AtomicU64,
    pub concurrent: AtomicU64,
}

impl RefCountable for FlowMapCounter {
    fn get_counters(&self) -> Vec<Counter> {
        vec![
            (
                "new-flows",
                CounterType::Counted,
                CounterValue::Unsigned(self.new_flows.swap(0, Ordering::Relaxed)),
            ),
            (
                "hits",
                CounterType::Counted,
                CounterValue::Unsigned(self.hits.swap(0, Ordering::Relaxed)),
            ),
            (
                "closed",
                CounterType::Counted,
                CounterValue::Unsigned(self.closed.swap(0, Ordering::Relaxed)),
            ),
            (
                "forced-reports",
                CounterType::Counted,
                CounterValue::Unsigned(self.forced_reports.swap(0, Ordering::Relaxed)),
            ),
            (
                "drop-untracked",
                CounterType::Counted,
                CounterValue::Unsigned(self.drop_untracked.swap(0, Ordering::Relaxed)),
            ),
            (
                "concurrent",
                CounterType::Gauged,
                CounterValue::Unsigned(self.concurrent.load(Ordering::Relaxed)),
            ),
        ]
    }
}

/// A deep snapshot of the table taken for packet tracing. Owns independent
/// copies; live records keep updating without affecting it.
#[derive(Debug, Default)]
pub struct FlowMapTrace {
    pub keys: Vec<FlowKey>,
    pub records: Vec<FlowRecord>,
}

/// The live flow table. Records are stored inside the map's value slot, so
/// the key installed in a shard always identifies the record it maps to;
/// eviction removes both together and nothing can dangle.
///
/// Shared between packet workers (observe) and the expiry scheduler
/// (scan_expired); both go through the per-shard locks.
pub struct FlowMap {
    shards: Vec<Mutex<HashMap<FlowKey, FlowRecord>>>,
    total_flow: AtomicUsize,

    output_queue: queue::Sender<Box<FlowRecord>>,
    config: FlowAccess,
    stats_counter: Arc<FlowMapCounter>,
}

impl FlowMap {
    pub fn new(
        output_queue: queue::Sender<Box<FlowRecord>>,
        config: FlowAccess,
        stats_collector: &stats::Collector,
    ) -> Self {
        let stats_counter = Arc::new(FlowMapCounter::default());
        stats_collector.register_countable(
            "flow-map",
            stats::Countable::Ref(Arc::downgrade(&stats_counter) as Weak<dyn RefCountable>),
            vec![],
        );
        let capacity = config.load().capacity;
        let shards = (0..HASH_SHARDS)
            .map(|_| Mutex::new(HashMap::with_capacity(capacity / HASH_SHARDS)))
            .collect();
        Self {
            shards,
            total_flow: AtomicUsize::new(0),
            output_queue,
            config,
            stats_counter,
        }
    }

    fn shard(&self, key: &FlowKey) -> &Mutex<HashMap<FlowKey, FlowRecord>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize & (HASH_SHARDS - 1)]
    }

    /// Hot path, one call per delivered IPv4 packet. Looks up or installs
    /// the flow for the packet's key and folds the packet into its
    /// counters. Does not allocate when the flow already exists.
    pub fn observe(&self, meta_packet: &MetaPacket) -> Result<()> {
        let key = FlowKey::new(&meta_packet.lookup_key);
        let now_ms = meta_packet.lookup_key.timestamp.as_millis() as u64;
        let octets = meta_packet.packet_len as u64;

        let mut shard = self.shard(&key).lock();
        match shard.get_mut(&key) {
            Some(record) => {
                record.end_ms = record.end_ms.max(now_ms);
                record.packet_count += 1;
                record.octet_count += octets;
                self.stats_counter.hits.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => {
                if self.total_flow.load(Ordering::Relaxed) >= self.config.load().capacity {
                    self.stats_counter
                        .drop_untracked
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(Error::TableFull);
                }
                shard.insert(key, FlowRecord::new(key, now_ms, octets));
                self.total_flow.fetch_add(1, Ordering::Relaxed);
                self.stats_counter.new_flows.fetch_add(1, Ordering::Relaxed);
                self.stats_counter.concurrent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Cold path, driven by the expiry scheduler. Applies the timeout state
    /// machine to every live record:
    ///
    ///   end + idle_timeout   < now  =>  evict and export
    ///   start + active_timeout < now  =>  export and restart counters
    ///   otherwise                     =>  keep
    ///
    /// The idle rule wins when both fire on the same pass. Snapshots are
    /// queued to the sender after every shard lock has been dropped.
    pub fn scan_expired(&self, now_ms: u64) {
        let (idle_ms, active_ms) = {
            let config = self.config.load();
            (
                config.idle_timeout.as_millis() as u64,
                config.active_timeout.as_millis() as u64,
            )
        };

        let mut expired = Vec::new();
        let mut evicted = 0usize;
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.retain(|_, record| {
                if now_ms.saturating_sub(idle_ms) > record.end_ms {
                    debug!("expired idle flow {}", record);
                    expired.push(Box::new(record.clone()));
                    evicted += 1;
                    false
                } else if now_ms.saturating_sub(active_ms) > record.start_ms {
                    debug!("expired active flow {}", record);
                    expired.push(Box::new(record.clone()));
                    record.reset(now_ms);
                    self.stats_counter
                        .forced_reports
                        .fetch_add(1, Ordering::Relaxed);
                    true
                } else {
                    true
                }
            });
        }
        if evicted > 0 {
            self.total_flow.fetch_sub(evicted, Ordering::Relaxed);
            self.stats_counter
                .closed
                .fetch_add(evicted as u64, Ordering::Relaxed);
            self.stats_counter
                .concurrent
                .fetch_sub(evicted as u64, Ordering::Relaxed);
        }
        if !expired.is_empty() {
            if self.output_queue.send_all(&mut expired).is_err() {
                warn!("flow output queue terminated, expired flows dropped");
            }
        }
    }

    /// Shutdown path: every live flow is expired and exported.
    pub fn flush(&self) {
        self.scan_expired(u64::MAX);
    }

    /// Deep-copies the table for a packet trace. The copies are fully
    /// independent of the live records.
    pub fn trace(&self) -> FlowMapTrace {
        let mut trace = FlowMapTrace::default();
        for shard in self.shards.iter() {
            let shard = shard.lock();
            for (key, record) in shard.iter() {
                trace.keys.push(*key);
                trace.records.push(record.clone());
            }
        }
        trace
    }

    pub fn len(&self) -> usize {
        self.total_flow.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;

    use arc_swap::{access::Map, ArcSwap};

    use super::*;
    use crate::common::meta_packet::_build_ipv4_packet;
    use crate::config::handler::{FlowConfig, ModuleConfig};
    use crate::config::Config;

    fn _new_flow_map_and_receiver(
        idle_timeout: Duration,
        active_timeout: Duration,
    ) -> (FlowMap, queue::Receiver<Box<FlowRecord>>) {
        let mut module_config = ModuleConfig::try_from(&Config::default()).unwrap();
        module_config.flow.idle_timeout = idle_timeout;
        module_config.flow.active_timeout = active_timeout;
        let current_config = Arc::new(ArcSwap::from_pointee(module_config));
        let (output_queue_sender, output_queue_receiver, _) = queue::bounded(256);
        let flow_map = FlowMap::new(
            output_queue_sender,
            Map::new(current_config, |config: &ModuleConfig| -> &FlowConfig {
                &config.flow
            }),
            &stats::Collector::new(),
        );
        (flow_map, output_queue_receiver)
    }

    fn _observe_udp(flow_map: &FlowMap, ms: u64, total_length: u16) {
        let raw = _build_ipv4_packet(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            17,
            1000,
            2000,
            total_length,
        );
        let mut packet = MetaPacket::empty();
        packet
            .update(&raw, 0, Duration::from_millis(ms))
            .unwrap();
        flow_map.observe(&packet).unwrap();
    }

    #[test]
    fn idle_evict() {
        let (flow_map, receiver) =
            _new_flow_map_and_receiver(Duration::from_millis(1000), Duration::from_millis(10000));
        _observe_udp(&flow_map, 0, 40);

        flow_map.scan_expired(1500);

        let snapshot = receiver.recv(None).unwrap();
        assert_eq!(snapshot.packet_count, 1);
        assert_eq!(snapshot.octet_count, 40);
        assert_eq!(snapshot.start_ms, 0);
        assert_eq!(snapshot.end_ms, 0);
        assert!(flow_map.is_empty());
    }

    #[test]
    fn active_reset() {
        let (flow_map, receiver) =
            _new_flow_map_and_receiver(Duration::from_millis(10000), Duration::from_millis(1000));
        for ms in (0..=1000).step_by(200) {
            _observe_udp(&flow_map, ms, 100);
        }

        flow_map.scan_expired(1200);

        let snapshot = receiver.recv(None).unwrap();
        assert_eq!(snapshot.packet_count, 6);
        assert_eq!(snapshot.octet_count, 600);
        assert_eq!(snapshot.start_ms, 0);
        assert_eq!(snapshot.end_ms, 1000);

        // the flow stays installed with a fresh accounting segment
        let trace = flow_map.trace();
        assert_eq!(trace.records.len(), 1);
        let record = &trace.records[0];
        assert_eq!(record.packet_count, 0);
        assert_eq!(record.octet_count, 0);
        assert_eq!(record.start_ms, 1200);
        assert_eq!(record.end_ms, 1200);
    }

    #[test]
    fn idle_wins_over_active() {
        let (flow_map, receiver) =
            _new_flow_map_and_receiver(Duration::from_millis(500), Duration::from_millis(1000));
        _observe_udp(&flow_map, 0, 40);

        flow_map.scan_expired(2000);

        let snapshot = receiver.recv(None).unwrap();
        assert_eq!(snapshot.packet_count, 1);
        assert_eq!(snapshot.end_ms, 0);
        assert!(flow_map.is_empty());
        assert!(receiver.recv(Some(Duration::from_millis(10))).is_err());
    }

    #[test]
    fn icmp_flows_share_one_key() {
        let (flow_map, _receiver) =
            _new_flow_map_and_receiver(Duration::from_millis(10000), Duration::from_millis(30000));
        let mut raw = _build_ipv4_packet(
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(2, 2, 2, 2),
            1,
            0,
            0,
            84,
        );
        let mut packet = MetaPacket::empty();
        packet.update(&raw, 0, Duration::ZERO).unwrap();
        flow_map.observe(&packet).unwrap();

        // different icmp identifier bytes must land in the same flow
        raw[24] = 0x99;
        raw[25] = 0x01;
        let mut packet = MetaPacket::empty();
        packet
            .update(&raw, 0, Duration::from_millis(10))
            .unwrap();
        flow_map.observe(&packet).unwrap();

        assert_eq!(flow_map.len(), 1);
        let trace = flow_map.trace();
        let record = &trace.records[0];
        assert_eq!(record.key.src_port, [0, 0]);
        assert_eq!(record.key.dst_port, [0, 0]);
        assert_eq!(record.packet_count, 2);
        assert_eq!(record.octet_count, 168);
    }

    #[test]
    fn trace_is_isolated_from_live_records() {
        let (flow_map, _receiver) =
            _new_flow_map_and_receiver(Duration::from_millis(10000), Duration::from_millis(30000));
        for ms in 0..100 {
            _observe_udp(&flow_map, ms, 100);
        }

        let trace = flow_map.trace();
        assert_eq!(trace.records[0].packet_count, 100);

        for ms in 100..1100 {
            _observe_udp(&flow_map, ms, 100);
        }

        // the snapshot must not see updates made after it was taken
        assert_eq!(trace.records[0].packet_count, 100);
        assert_eq!(trace.records[0].octet_count, 100 * 100);
        assert_eq!(flow_map.trace().records[0].packet_count, 1100);
    }

    #[test]
    fn table_full_drops_new_flows() {
        let capacity = 100;
        let mut module_config = ModuleConfig::try_from(&Config::default()).unwrap();
        module_config.flow.capacity = capacity;
        let current_config = Arc::new(ArcSwap::from_pointee(module_config));
        let (output_queue_sender, _receiver, _) = queue::bounded(256);
        let flow_map = FlowMap::new(
            output_queue_sender,
            Map::new(current_config, |config: &ModuleConfig| -> &FlowConfig {
                &config.flow
            }),
            &stats::Collector::new(),
        );
        let mut packet = MetaPacket::empty();
        let mut raws = Vec::new();
        for i in 0..=capacity {
            raws.push(_build_ipv4_packet(
                Ipv4Addr::new(10, 1, (i >> 8) as u8, i as u8),
                Ipv4Addr::new(10, 0, 0, 2),
                6,
                1000,
                80,
                40,
            ));
        }
        for (i, raw) in raws.iter().enumerate() {
            packet.update(raw, 0, Duration::ZERO).unwrap();
            let result = flow_map.observe(&packet);
            if i < capacity {
                assert_eq!(result, Ok(()));
            } else {
                assert_eq!(result, Err(Error::TableFull));
            }
        }
        assert_eq!(flow_map.len(), capacity);
        assert_eq!(
            flow_map
                .stats_counter
                .drop_untracked
                .load(Ordering::Relaxed),
            1
        );

        // updates to existing flows still land
        let result = packet.update(&raws[0], 0, Duration::from_millis(1));
        assert!(result.is_ok());
        flow_map.observe(&packet).unwrap();
    }

    #[test]
    fn conservation_across_resets_and_evictions() {
        let (flow_map, receiver) =
            _new_flow_map_and_receiver(Duration::from_millis(400), Duration::from_millis(700));
        const TOTAL_PACKETS: u64 = 500;
        let mut scanned_at = 100;
        for i in 0..TOTAL_PACKETS {
            // two interleaved flows, advancing 10ms per packet
            let sport = 1000 + (i % 2) as u16;
            let raw = _build_ipv4_packet(
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                17,
                sport,
                2000,
                100,
            );
            let mut packet = MetaPacket::empty();
            packet
                .update(&raw, 0, Duration::from_millis(i * 10))
                .unwrap();
            flow_map.observe(&packet).unwrap();
            if i * 10 >= scanned_at {
                flow_map.scan_expired(i * 10);
                scanned_at += 100;
            }
        }
        flow_map.flush();

        let mut batch = Vec::new();
        let mut exported = 0u64;
        while receiver.recv_all(&mut batch, Some(Duration::from_millis(10))).is_ok() {
            exported += batch.iter().map(|r| r.packet_count).sum::<u64>();
        }
        assert_eq!(exported, TOTAL_PACKETS);
        assert!(flow_map.is_empty());
    }

    #[test]
    fn end_time_is_monotone() {
        let (flow_map, _receiver) =
            _new_flow_map_and_receiver(Duration::from_millis(10000), Duration::from_millis(30000));
        _observe_udp(&flow_map, 100, 40);
        // an out-of-order packet must not move end_ms backwards
        _observe_udp(&flow_map, 50, 40);
        let trace = flow_map.trace();
        assert_eq!(trace.records[0].end_ms, 100);
        assert_eq!(trace.records[0].packet_count, 2);
    }
}
