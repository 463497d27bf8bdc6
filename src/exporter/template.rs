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
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::error::{Error, Result};

// data set ids start here, lower values are reserved by RFC 7011
pub const DATA_SET_ID_MIN: u16 = 256;

/// The supported IPFIX information elements, with their IANA element ids.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum FieldId {
    OctetDeltaCount = 1,
    PacketDeltaCount = 2,
    ProtocolIdentifier = 4,
    SourceTransportPort = 7,
    SourceIPv4Address = 8,
    DestinationTransportPort = 11,
    DestinationIPv4Address = 12,
    FlowStartMilliseconds = 152,
    FlowEndMilliseconds = 153,
}

impl FieldId {
    pub fn canonical_size(self) -> u16 {
        match self {
            FieldId::OctetDeltaCount => 8,
            FieldId::PacketDeltaCount => 8,
            FieldId::ProtocolIdentifier => 1,
            FieldId::SourceTransportPort => 2,
            FieldId::SourceIPv4Address => 4,
            FieldId::DestinationTransportPort => 2,
            FieldId::DestinationIPv4Address => 4,
            FieldId::FlowStartMilliseconds => 8,
            FieldId::FlowEndMilliseconds => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldId::OctetDeltaCount => "octetDeltaCount",
            FieldId::PacketDeltaCount => "packetDeltaCount",
            FieldId::ProtocolIdentifier => "protocolIdentifier",
            FieldId::SourceTransportPort => "sourceTransportPort",
            FieldId::SourceIPv4Address => "sourceIPv4Address",
            FieldId::DestinationTransportPort => "destinationTransportPort",
            FieldId::DestinationIPv4Address => "destinationIPv4Address",
            FieldId::FlowStartMilliseconds => "flowStartMilliseconds",
            FieldId::FlowEndMilliseconds => "flowEndMilliseconds",
        }
    }
}

impl FromStr for FieldId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "octetDeltaCount" => Ok(FieldId::OctetDeltaCount),
            "packetDeltaCount" => Ok(FieldId::PacketDeltaCount),
            "protocolIdentifier" => Ok(FieldId::ProtocolIdentifier),
            "sourceTransportPort" => Ok(FieldId::SourceTransportPort),
            "sourceIPv4Address" => Ok(FieldId::SourceIPv4Address),
            "destinationTransportPort" => Ok(FieldId::DestinationTransportPort),
            "destinationIPv4Address" => Ok(FieldId::DestinationIPv4Address),
            "flowStartMilliseconds" => Ok(FieldId::FlowStartMilliseconds),
            "flowEndMilliseconds" => Ok(FieldId::FlowEndMilliseconds),
            other => Err(Error::UnknownFieldIdentifier(other.to_owned())),
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), u16::from(*self))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub id: FieldId,
    pub size: u16,
    pub enterprise_number: u32,
}

impl FieldSpec {
    pub fn new(id: FieldId) -> Self {
        FieldSpec {
            id,
            size: id.canonical_size(),
            enterprise_number: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateSet {
    pub id: u16,
    pub fields: Vec<FieldSpec>,
}

impl TemplateSet {
    pub fn data_len(&self) -> usize {
        self.fields.iter().map(|f| f.size as usize).sum()
    }
}

/// The in-memory schema driving data record serialization. Built once from
/// configuration; sizes and set ids are checked here so the encoder can
/// trust every field it walks. Template sets are not put on the wire in
/// this version, the collector is assumed to know the layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    sets: Vec<TemplateSet>,
}

impl Template {
    pub fn new(sets: Vec<TemplateSet>) -> Result<Self> {
        if sets.is_empty() {
            return Err(Error::EmptyTemplate);
        }
        for set in sets.iter() {
            if set.id < DATA_SET_ID_MIN {
                return Err(Error::ReservedSetId(set.id));
            }
            for field in set.fields.iter() {
                if field.size != field.id.canonical_size() {
                    return Err(Error::FieldSizeMismatch {
                        field: field.id.name(),
                        size: field.size,
                        expected: field.id.canonical_size(),
                    });
                }
            }
        }
        Ok(Template { sets })
    }

    pub fn sets(&self) -> &[TemplateSet] {
        &self.sets
    }

    pub fn _new_unchecked(sets: Vec<TemplateSet>) -> Self {
        Template { sets }
    }
}

impl Default for Template {
    /// The built-in nine-field template: key, timestamps and counters.
    fn default() -> Self {
        let fields = [
            FieldId::SourceIPv4Address,
            FieldId::DestinationIPv4Address,
            FieldId::ProtocolIdentifier,
            FieldId::SourceTransportPort,
            FieldId::DestinationTransportPort,
            FieldId::FlowStartMilliseconds,
            FieldId::FlowEndMilliseconds,
            FieldId::OctetDeltaCount,
            FieldId::PacketDeltaCount,
        ]
        .iter()
        .map(|&id| FieldSpec::new(id))
        .collect();
        Template {
            sets: vec![TemplateSet {
                id: DATA_SET_ID_MIN,
                fields,
            }],
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "v10 template:")?;
        for set in self.sets.iter() {
            writeln!(f, "  set {} ({} bytes):", set.id, set.data_len())?;
            for field in set.fields.iter() {
                writeln!(f, "    {}, {} octets", field.id, field.size)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_is_valid() {
        let template = Template::default();
        assert_eq!(Template::new(template.sets.clone()), Ok(template.clone()));
        assert_eq!(template.sets()[0].data_len(), 4 + 4 + 1 + 2 + 2 + 8 + 8 + 8 + 8);
    }

    #[test]
    fn unknown_identifier_rejected() {
        assert_eq!(
            "flowEndSeconds".parse::<FieldId>(),
            Err(Error::UnknownFieldIdentifier("flowEndSeconds".to_owned()))
        );
        assert_eq!("packetDeltaCount".parse(), Ok(FieldId::PacketDeltaCount));
    }

    #[test]
    fn non_canonical_size_rejected() {
        let set = TemplateSet {
            id: 256,
            fields: vec![FieldSpec {
                id: FieldId::ProtocolIdentifier,
                size: 2,
                enterprise_number: 0,
            }],
        };
        assert_eq!(
            Template::new(vec![set]),
            Err(Error::FieldSizeMismatch {
                field: "protocolIdentifier",
                size: 2,
                expected: 1,
            })
        );
    }

    #[test]
    fn reserved_set_id_rejected() {
        let set = TemplateSet {
            id: 1,
            fields: vec![FieldSpec::new(FieldId::ProtocolIdentifier)],
        };
        assert_eq!(Template::new(vec![set]), Err(Error::ReservedSetId(1)));
    }
}
