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
use std::time::Duration;

use super::enums::IpProtocol;

/// Per-packet lookup fields extracted from the IPv4 header. Ports are zero
/// for protocols without a transport header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupKey {
    pub timestamp: Duration,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub proto: IpProtocol,
}

impl Default for LookupKey {
    fn default() -> Self {
        LookupKey {
            timestamp: Duration::ZERO,
            src_ip: Ipv4Addr::UNSPECIFIED,
            dst_ip: Ipv4Addr::UNSPECIFIED,
            src_port: 0,
            dst_port: 0,
            proto: Default::default(),
        }
    }
}

impl LookupKey {
    pub fn is_tcp(&self) -> bool {
        self.proto == IpProtocol::Tcp
    }

    pub fn is_udp(&self) -> bool {
        self.proto == IpProtocol::Udp
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {}:{} > {}:{}, proto: {:?}",
            self.timestamp, self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.proto,
        )
    }
}
