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

use std::fmt;
use std::net::Ipv4Addr;

use super::lookup_key::LookupKey;

pub const FLOW_KEY_SIZE: usize = 48;
const FLOW_KEY_PAD_SIZE: usize = FLOW_KEY_SIZE - 13;

/// The 48-byte flow lookup key. Address and port bytes are kept exactly as
/// they appear on the wire (network order); the zero padding participates
/// in equality and hashing so the key can double as a fixed-size hash key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct FlowKey {
    pub src_addr: [u8; 4],
    pub dst_addr: [u8; 4],
    pub protocol: u8,
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    padding: [u8; FLOW_KEY_PAD_SIZE],
}

impl Default for FlowKey {
    fn default() -> Self {
        FlowKey {
            src_addr: [0; 4],
            dst_addr: [0; 4],
            protocol: 0,
            src_port: [0; 2],
            dst_port: [0; 2],
            padding: [0; FLOW_KEY_PAD_SIZE],
        }
    }
}

impl FlowKey {
    pub fn new(lookup_key: &LookupKey) -> Self {
        FlowKey {
            src_addr: lookup_key.src_ip.octets(),
            dst_addr: lookup_key.dst_ip.octets(),
            protocol: lookup_key.proto.into(),
            src_port: lookup_key.src_port.to_be_bytes(),
            dst_port: lookup_key.dst_port.to_be_bytes(),
            padding: [0; FLOW_KEY_PAD_SIZE],
        }
    }

    pub fn src_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src_addr)
    }

    pub fn dst_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst_addr)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "src: {}:{} dst: {}:{} proto: {}",
            self.src_ip(),
            u16::from_be_bytes(self.src_port),
            self.dst_ip(),
            u16::from_be_bytes(self.dst_port),
            self.protocol,
        )
    }
}

/// One tracked flow. Timestamps are wall-clock milliseconds since the Unix
/// epoch; counters are host order and converted to network order only when
/// a record is encoded for export.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowRecord {
    pub key: FlowKey,
    pub start_ms: u64,
    pub end_ms: u64,
    pub packet_count: u64,
    pub octet_count: u64,
}

impl FlowRecord {
    pub fn new(key: FlowKey, now_ms: u64, octets: u64) -> Self {
        FlowRecord {
            key,
            start_ms: now_ms,
            end_ms: now_ms,
            packet_count: 1,
            octet_count: octets,
        }
    }

    /// Active timeout hand-off: the flow stays installed but starts a new
    /// accounting segment.
    pub fn reset(&mut self, now_ms: u64) {
        self.start_ms = now_ms;
        self.end_ms = now_ms;
        self.packet_count = 0;
        self.octet_count = 0;
    }
}

impl fmt::Display for FlowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] start: {} end: {} packets: {} octets: {}",
            self.key, self.start_ms, self.end_ms, self.packet_count, self.octet_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::mem;

    use super::*;
    use crate::common::enums::IpProtocol;

    fn hash(key: &FlowKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn key_layout() {
        assert_eq!(mem::size_of::<FlowKey>(), FLOW_KEY_SIZE);
    }

    #[test]
    fn key_is_deterministic() {
        let lookup_key = LookupKey {
            src_ip: Ipv4Addr::new(10, 0, 0, 1),
            dst_ip: Ipv4Addr::new(10, 0, 0, 2),
            src_port: 1000,
            dst_port: 2000,
            proto: IpProtocol::Udp,
            ..Default::default()
        };
        let key = FlowKey::new(&lookup_key);
        assert_eq!(key, FlowKey::new(&lookup_key));
        assert_eq!(hash(&key), hash(&FlowKey::new(&lookup_key)));

        // timestamp is not part of the key
        let mut shifted = lookup_key.clone();
        shifted.timestamp += std::time::Duration::from_secs(1);
        assert_eq!(key, FlowKey::new(&shifted));

        let mut other = lookup_key;
        other.src_port = 1001;
        assert_ne!(key, FlowKey::new(&other));
    }

    #[test]
    fn key_bytes_are_wire_order() {
        let key = FlowKey::new(&LookupKey {
            src_ip: Ipv4Addr::new(192, 0, 2, 1),
            src_port: 0x1234,
            proto: IpProtocol::Tcp,
            ..Default::default()
        });
        assert_eq!(key.src_addr, [192, 0, 2, 1]);
        assert_eq!(key.src_port, [0x12, 0x34]);
        assert_eq!(key.protocol, 6);
    }
}
