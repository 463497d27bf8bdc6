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

use super::error::{Error, Result};
use super::template::{FieldId, Template};
use crate::common::FlowRecord;

pub const MESSAGE_HEADER_SIZE: usize = 16;
pub const SET_HEADER_SIZE: usize = 4;

pub const V10_VERSION: u16 = 10;

/// NetFlow v10 message header, RFC 7011 layout:
///
/// ```text
/// offset  size  field
/// 0       2     version = 10
/// 2       2     length (total message bytes)
/// 4       4     export time, seconds since epoch
/// 8       4     sequence number
/// 12      4     observation domain id
/// ```
#[derive(Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub length: u16,
    pub export_time_s: u32,
    pub sequence: u32,
    pub domain_id: u32,
}

impl MessageHeader {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&V10_VERSION.to_be_bytes());
        buffer.extend_from_slice(&self.length.to_be_bytes());
        buffer.extend_from_slice(&self.export_time_s.to_be_bytes());
        buffer.extend_from_slice(&self.sequence.to_be_bytes());
        buffer.extend_from_slice(&self.domain_id.to_be_bytes());
    }
}

/// Serializes flow records into v10 messages following the template. This
/// is the single place where multi-byte integers go to network order;
/// records hold host-order values, key bytes are already wire order.
pub struct Encoder {
    template: Template,
    domain_id: u32,
    // count of data records in all previously emitted messages, mod 2^32
    sequence: u32,
}

impl Encoder {
    pub fn new(template: Template, domain_id: u32) -> Self {
        Self {
            template,
            domain_id,
            sequence: 0,
        }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Appends one complete message carrying `record` to `buffer` and
    /// returns the exact number of bytes written. One data set is emitted
    /// per template set, each holding this record's fields in template
    /// order.
    pub fn encode(
        &mut self,
        record: &FlowRecord,
        export_time_s: u32,
        buffer: &mut Vec<u8>,
    ) -> Result<usize> {
        let offset = buffer.len();
        MessageHeader {
            length: 0, // patched below
            export_time_s,
            sequence: self.sequence,
            domain_id: self.domain_id,
        }
        .encode(buffer);

        let mut data_records = 0u32;
        for set in self.template.sets() {
            let set_length = SET_HEADER_SIZE + set.data_len();
            buffer.extend_from_slice(&set.id.to_be_bytes());
            buffer.extend_from_slice(&(set_length as u16).to_be_bytes());
            for field in set.fields.iter() {
                let expected = field.id.canonical_size();
                if field.size != expected {
                    buffer.truncate(offset);
                    return Err(Error::FieldSizeMismatch {
                        field: field.id.name(),
                        size: field.size,
                        expected,
                    });
                }
                match field.id {
                    FieldId::SourceIPv4Address => buffer.extend_from_slice(&record.key.src_addr),
                    FieldId::DestinationIPv4Address => {
                        buffer.extend_from_slice(&record.key.dst_addr)
                    }
                    FieldId::ProtocolIdentifier => buffer.push(record.key.protocol),
                    FieldId::SourceTransportPort => buffer.extend_from_slice(&record.key.src_port),
                    FieldId::DestinationTransportPort => {
                        buffer.extend_from_slice(&record.key.dst_port)
                    }
                    FieldId::FlowStartMilliseconds => {
                        buffer.extend_from_slice(&record.start_ms.to_be_bytes())
                    }
                    FieldId::FlowEndMilliseconds => {
                        buffer.extend_from_slice(&record.end_ms.to_be_bytes())
                    }
                    FieldId::OctetDeltaCount => {
                        buffer.extend_from_slice(&record.octet_count.to_be_bytes())
                    }
                    FieldId::PacketDeltaCount => {
                        buffer.extend_from_slice(&record.packet_count.to_be_bytes())
                    }
                }
            }
            data_records += 1;
        }

        let written = buffer.len() - offset;
        buffer[offset + 2..offset + 4].copy_from_slice(&(written as u16).to_be_bytes());
        self.sequence = self.sequence.wrapping_add(data_records);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::common::FlowKey;
    use crate::common::lookup_key::LookupKey;
    use crate::common::enums::IpProtocol;
    use crate::exporter::template::{FieldSpec, TemplateSet};

    fn test_record() -> FlowRecord {
        let key = FlowKey::new(&LookupKey {
            src_ip: Ipv4Addr::new(192, 0, 2, 1),
            dst_ip: Ipv4Addr::new(198, 51, 100, 1),
            src_port: 1000,
            dst_port: 2000,
            proto: IpProtocol::Udp,
            ..Default::default()
        });
        FlowRecord {
            key,
            start_ms: 1000,
            end_ms: 2000,
            packet_count: 5,
            octet_count: 500,
        }
    }

    struct Reader<'a>(&'a [u8]);

    impl<'a> Reader<'a> {
        fn u16(&mut self) -> u16 {
            let v = u16::from_be_bytes(self.0[..2].try_into().unwrap());
            self.0 = &self.0[2..];
            v
        }

        fn u32(&mut self) -> u32 {
            let v = u32::from_be_bytes(self.0[..4].try_into().unwrap());
            self.0 = &self.0[4..];
            v
        }

        fn u64(&mut self) -> u64 {
            let v = u64::from_be_bytes(self.0[..8].try_into().unwrap());
            self.0 = &self.0[8..];
            v
        }

        fn bytes(&mut self, n: usize) -> &'a [u8] {
            let v = &self.0[..n];
            self.0 = &self.0[n..];
            v
        }
    }

    #[test]
    fn encode_round_trip() {
        let mut encoder = Encoder::new(Template::default(), 7);
        let record = test_record();
        let mut buffer = Vec::new();
        let written = encoder.encode(&record, 1234, &mut buffer).unwrap();
        assert_eq!(written, buffer.len());
        assert_eq!(written, MESSAGE_HEADER_SIZE + SET_HEADER_SIZE + 45);

        // version at offset 0 must read 0x00 0x0a
        assert_eq!(&buffer[..2], &[0x00, 0x0a]);

        let mut r = Reader(&buffer);
        assert_eq!(r.u16(), 10);
        assert_eq!(r.u16() as usize, written);
        assert_eq!(r.u32(), 1234); // export time
        assert_eq!(r.u32(), 0); // sequence before any records
        assert_eq!(r.u32(), 7); // observation domain

        assert_eq!(r.u16(), 256); // set id
        assert_eq!(r.u16() as usize, SET_HEADER_SIZE + 45);
        assert_eq!(r.bytes(4), &[192, 0, 2, 1]);
        assert_eq!(r.bytes(4), &[198, 51, 100, 1]);
        assert_eq!(r.bytes(1), &[17]);
        assert_eq!(r.u16(), 1000);
        assert_eq!(r.u16(), 2000);
        assert_eq!(r.u64(), 1000);
        assert_eq!(r.u64(), 2000);
        assert_eq!(r.u64(), 500);
        assert_eq!(r.u64(), 5);
        assert!(r.0.is_empty());
    }

    #[test]
    fn sequence_counts_exported_records() {
        let mut encoder = Encoder::new(Template::default(), 1);
        let record = test_record();
        let mut buffer = Vec::new();
        encoder.encode(&record, 0, &mut buffer).unwrap();
        buffer.clear();
        encoder.encode(&record, 0, &mut buffer).unwrap();
        // second message reports one record sent before it
        assert_eq!(u32::from_be_bytes(buffer[8..12].try_into().unwrap()), 1);
    }

    #[test]
    fn oversized_buffer_appends() {
        let mut encoder = Encoder::new(Template::default(), 1);
        let record = test_record();
        let mut buffer = vec![0xee; 8];
        let written = encoder.encode(&record, 0, &mut buffer).unwrap();
        assert_eq!(buffer.len(), 8 + written);
        assert_eq!(&buffer[..8], &[0xee; 8]);
        assert_eq!(&buffer[8..10], &[0x00, 0x0a]);
    }

    #[test]
    fn bad_field_size_discards_message() {
        // a template bypassing validation is rejected at encode time and
        // leaves the buffer untouched
        let mut sets: Vec<TemplateSet> = Template::default().sets().to_vec();
        sets[0].fields[2] = FieldSpec {
            id: FieldId::ProtocolIdentifier,
            size: 4,
            enterprise_number: 0,
        };
        assert!(Template::new(sets.clone()).is_err());

        let mut encoder = Encoder::new(Template::_new_unchecked(sets), 1);
        let mut buffer = Vec::new();
        let result = encoder.encode(&test_record(), 0, &mut buffer);
        assert!(matches!(result, Err(Error::FieldSizeMismatch { .. })));
        assert!(buffer.is_empty());
    }
}
