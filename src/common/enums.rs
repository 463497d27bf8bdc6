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

use num_enum::{FromPrimitive, IntoPrimitive};

/// Transport protocol numbers as they appear in the IPv4 header. Only TCP
/// and UDP carry ports in the flow key; everything else is tracked by
/// address pair and protocol alone.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum IpProtocol {
    Icmpv4 = 1,
    Ipv4 = 4,
    Tcp = 6,
    Udp = 17,
    Gre = 47,
    Esp = 50,
    Ah = 51,
    #[num_enum(default)]
    Unknown = 0xff,
}

impl Default for IpProtocol {
    fn default() -> Self {
        IpProtocol::Unknown
    }
}

impl IpProtocol {
    pub fn has_ports(self) -> bool {
        self == IpProtocol::Tcp || self == IpProtocol::Udp
    }
}
