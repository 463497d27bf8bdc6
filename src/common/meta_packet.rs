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
use std::time::Duration;

use super::error::{Error, Result};
use super::enums::IpProtocol;
use super::lookup_key::LookupKey;

pub const IPV4_HEADER_SIZE: usize = 20;

const FIELD_OFFSET_VERSION_IHL: usize = 0;
const FIELD_OFFSET_TOTAL_LENGTH: usize = 2;
const FIELD_OFFSET_PROTOCOL: usize = 9;
const FIELD_OFFSET_SIP: usize = 12;
const FIELD_OFFSET_DIP: usize = 16;
// relative to the end of the IPv4 header; same position for TCP and UDP
const FIELD_OFFSET_SPORT: usize = 0;
const FIELD_OFFSET_DPORT: usize = 2;

/// A parsed view of one captured IPv4 packet: the lookup fields the flow
/// table needs plus the ingress interface and the IPv4 total length used
/// for octet accounting.
#[derive(Debug, Default)]
pub struct MetaPacket<'a> {
    pub lookup_key: LookupKey,
    pub ifindex: u32,
    pub packet_len: u16,

    pub raw: Option<&'a [u8]>,
}

impl<'a> MetaPacket<'a> {
    pub fn empty() -> MetaPacket<'a> {
        Default::default()
    }

    /// Parses `packet` starting at the IPv4 header. Layer-2 has already
    /// been stripped by the capture side; non-IPv4 frames are never
    /// delivered here, so a version mismatch is a malformed packet.
    pub fn update(&mut self, packet: &'a [u8], ifindex: u32, timestamp: Duration) -> Result<()> {
        if packet.len() < IPV4_HEADER_SIZE {
            return Err(Error::TruncatedPacket(packet.len()));
        }
        let version_ihl = packet[FIELD_OFFSET_VERSION_IHL];
        if version_ihl >> 4 != 4 {
            return Err(Error::InvalidIpv4Header("version"));
        }
        let header_size = ((version_ihl & 0xf) as usize) << 2;
        if header_size < IPV4_HEADER_SIZE || packet.len() < header_size {
            return Err(Error::InvalidIpv4Header("header length"));
        }
        let total_length = u16::from_be_bytes(
            packet[FIELD_OFFSET_TOTAL_LENGTH..FIELD_OFFSET_TOTAL_LENGTH + 2]
                .try_into()
                .unwrap(),
        );
        if (total_length as usize) < header_size {
            return Err(Error::InvalidIpv4Header("total length"));
        }

        let proto = IpProtocol::from(packet[FIELD_OFFSET_PROTOCOL]);
        let (src_port, dst_port) = if proto.has_ports() {
            let l4 = &packet[header_size..];
            if l4.len() < FIELD_OFFSET_DPORT + 2 {
                return Err(Error::InvalidIpv4Header("transport header"));
            }
            (
                u16::from_be_bytes(l4[FIELD_OFFSET_SPORT..FIELD_OFFSET_SPORT + 2].try_into().unwrap()),
                u16::from_be_bytes(l4[FIELD_OFFSET_DPORT..FIELD_OFFSET_DPORT + 2].try_into().unwrap()),
            )
        } else {
            (0, 0)
        };

        self.lookup_key = LookupKey {
            timestamp,
            src_ip: Ipv4Addr::from(
                <[u8; 4]>::try_from(&packet[FIELD_OFFSET_SIP..FIELD_OFFSET_SIP + 4]).unwrap(),
            ),
            dst_ip: Ipv4Addr::from(
                <[u8; 4]>::try_from(&packet[FIELD_OFFSET_DIP..FIELD_OFFSET_DIP + 4]).unwrap(),
            ),
            src_port,
            dst_port,
            proto,
        };
        self.ifindex = ifindex;
        self.packet_len = total_length;
        self.raw = Some(packet);
        Ok(())
    }
}

pub fn _build_ipv4_packet(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: u8,
    src_port: u16,
    dst_port: u16,
    total_length: u16,
) -> Vec<u8> {
    let mut packet = vec![0u8; 28];
    packet[0] = 0x45;
    packet[2..4].copy_from_slice(&total_length.to_be_bytes());
    packet[8] = 64; // ttl
    packet[9] = proto;
    packet[12..16].copy_from_slice(&src.octets());
    packet[16..20].copy_from_slice(&dst.octets());
    packet[20..22].copy_from_slice(&src_port.to_be_bytes());
    packet[22..24].copy_from_slice(&dst_port.to_be_bytes());
    packet
}
