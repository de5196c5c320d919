//! The map control capsule wire format.
//!
//! Little-endian throughout.  A capsule is the 6-byte generic header, a
//! 2-byte opcode and the key and value payloads:
//!
//! | bytes | field |
//! |---|---|
//! | 0..2 | request_id |
//! | 2..4 | resource_id |
//! | 4..6 | response_code |
//! | 6..8 | opcode |
//! | 8..8+K | key |
//! | 8+K..8+K+V | value |

use byteorder::{ByteOrder, LittleEndian};

/// The port number that marks a capsule as a control message.
pub const CONTROL_PORT: u8 = 0xfe;

pub const GENERIC_HEADER_BYTES: usize = 6;
pub const OPCODE_BYTES: usize = 2;

/// Total capsule size for a map with the given key and value sizes.
pub fn capsule_size(key_size: usize, value_size: usize) -> usize {
    GENERIC_HEADER_BYTES + OPCODE_BYTES + key_size + value_size
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ResponseCode {
    Success,
    Unhandled,
    UnknownResource,
    UnknownOpcode,
    NoEntry,
}

impl ResponseCode {
    pub fn from_raw(raw: u16) -> Option<ResponseCode> {
        match raw {
            0 => Some(ResponseCode::Success),
            1 => Some(ResponseCode::Unhandled),
            2 => Some(ResponseCode::UnknownResource),
            3 => Some(ResponseCode::UnknownOpcode),
            4 => Some(ResponseCode::NoEntry),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u16 {
        match self {
            ResponseCode::Success => 0,
            ResponseCode::Unhandled => 1,
            ResponseCode::UnknownResource => 2,
            ResponseCode::UnknownOpcode => 3,
            ResponseCode::NoEntry => 4,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MapOpcode {
    Read,
    Insert,
    Update,
    Write,
    Remove,
    NextKey,
}

impl MapOpcode {
    pub fn from_raw(raw: u16) -> Option<MapOpcode> {
        match raw {
            0 => Some(MapOpcode::Read),
            1 => Some(MapOpcode::Insert),
            2 => Some(MapOpcode::Update),
            3 => Some(MapOpcode::Write),
            4 => Some(MapOpcode::Remove),
            5 => Some(MapOpcode::NextKey),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u16 {
        match self {
            MapOpcode::Read => 0,
            MapOpcode::Insert => 1,
            MapOpcode::Update => 2,
            MapOpcode::Write => 3,
            MapOpcode::Remove => 4,
            MapOpcode::NextKey => 5,
        }
    }
}

/// How a capsule should be treated by a packet kernel.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CapsuleClass {
    PassThrough,
    Network,
    Control,
}

/// Classify a capsule from its network-packet flag and destination port.
pub fn classify(is_net_pkt: bool, port: u8) -> CapsuleClass {
    if !is_net_pkt {
        CapsuleClass::PassThrough
    } else if port == CONTROL_PORT {
        CapsuleClass::Control
    } else {
        CapsuleClass::Network
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MapCapsule {
    pub request_id: u16,
    pub resource_id: u16,
    pub response_code: ResponseCode,
    pub opcode: MapOpcode,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CapsuleError {
    Truncated,
    BadResponseCode(u16),
    BadOpcode(u16),
}

impl MapCapsule {
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut fixed = [0u8; GENERIC_HEADER_BYTES + OPCODE_BYTES];
        LittleEndian::write_u16(&mut fixed[0..2], self.request_id);
        LittleEndian::write_u16(&mut fixed[2..4], self.resource_id);
        LittleEndian::write_u16(&mut fixed[4..6], self.response_code.as_raw());
        LittleEndian::write_u16(&mut fixed[6..8], self.opcode.as_raw());
        out.extend_from_slice(&fixed);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.value);
    }

    pub fn decode(bytes: &[u8], key_size: usize, value_size: usize) -> Result<MapCapsule, CapsuleError> {
        if bytes.len() < capsule_size(key_size, value_size) {
            return Err(CapsuleError::Truncated);
        }
        let raw_code = LittleEndian::read_u16(&bytes[4..6]);
        let raw_opcode = LittleEndian::read_u16(&bytes[6..8]);
        let key_start = GENERIC_HEADER_BYTES + OPCODE_BYTES;
        Ok(MapCapsule {
            request_id: LittleEndian::read_u16(&bytes[0..2]),
            resource_id: LittleEndian::read_u16(&bytes[2..4]),
            response_code: ResponseCode::from_raw(raw_code)
                .ok_or(CapsuleError::BadResponseCode(raw_code))?,
            opcode: MapOpcode::from_raw(raw_opcode).ok_or(CapsuleError::BadOpcode(raw_opcode))?,
            key: bytes[key_start..key_start + key_size].to_vec(),
            value: bytes[key_start + key_size..key_start + key_size + value_size].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_layout_is_little_endian() {
        let capsule = MapCapsule {
            request_id: 0x0102,
            resource_id: 0x0304,
            response_code: ResponseCode::Success,
            opcode: MapOpcode::Update,
            key: vec![0xaa, 0xbb],
            value: vec![0x11, 0x22, 0x33, 0x44],
        };
        let mut bytes = Vec::new();
        capsule.encode(&mut bytes);
        assert_eq!(bytes.len(), capsule_size(2, 4));
        assert_eq!(&bytes[0..8], &[0x02, 0x01, 0x04, 0x03, 0x00, 0x00, 0x02, 0x00]);
        let back = MapCapsule::decode(&bytes, 2, 4).unwrap();
        assert_eq!(back, capsule);
    }

    #[test]
    fn truncated_capsules_are_rejected() {
        let bytes = [0u8; 7];
        assert_eq!(MapCapsule::decode(&bytes, 2, 4), Err(CapsuleError::Truncated));
    }

    #[test]
    fn classification() {
        assert_eq!(classify(false, 0), CapsuleClass::PassThrough);
        assert_eq!(classify(true, CONTROL_PORT), CapsuleClass::Control);
        assert_eq!(classify(true, 3), CapsuleClass::Network);
    }
}
