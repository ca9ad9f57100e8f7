//! Channel Descriptor Decoder: parses `CMD_GET_CINFO` responses into a
//! typed catalogue of named channels.

use std::collections::BTreeMap;

use crate::bytes_cursor::Cursor;
use crate::error::{Error, Result};

pub const PRIMARY_ANALOG: u8 = 1;
pub const PRIMARY_DIGITAL: u8 = 2;
pub const PRIMARY_COUNTER: u8 = 4;
pub const PRIMARY_STATUS: u8 = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelKind {
    Analog { unit: String, gain: f32, offset: f32 },
    Digital { text_low: String, text_high: String },
    Counter { unit: String, gain: f32 },
    Status { status: Vec<u8> },
}

impl ChannelKind {
    pub fn primary_type(&self) -> u8 {
        match self {
            ChannelKind::Analog { .. } => PRIMARY_ANALOG,
            ChannelKind::Digital { .. } => PRIMARY_DIGITAL,
            ChannelKind::Counter { .. } => PRIMARY_COUNTER,
            ChannelKind::Status { .. } => PRIMARY_STATUS,
        }
    }
}

/// One measurement variable advertised by a device.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDescriptor {
    pub index: u8,
    pub secondary_type: u8,
    pub format: u16,
    pub access: u16,
    pub name: String,
    pub kind: ChannelKind,
}

/// Name-keyed catalogue of a device's channels, canonicalized (trimmed) once
/// at decode time rather than per-lookup.
pub type Catalogue = BTreeMap<String, ChannelDescriptor>;

/// Decodes the user payload of a `CMD_GET_CINFO` response into a catalogue.
pub fn decode_cinfo(payload: &[u8]) -> Result<Catalogue> {
    decode_records(payload).map_err(|e| match e {
        Error::Truncated { wanted, available } => Error::ChannelMalformed(format!(
            "truncated channel record: wanted {} bytes, {} remaining",
            wanted, available
        )),
        other => other,
    })
}

fn decode_records(payload: &[u8]) -> Result<Catalogue> {
    let mut cursor = Cursor::new(payload);
    let mut catalogue = Catalogue::new();

    while cursor.remaining() > 0 {
        let index = cursor.take_u8()?;
        let type1 = cursor.take_u8()?;
        let type2 = cursor.take_u8()?;
        let format = cursor.take_u16_le()?;
        let access = cursor.take_u16_le()?;
        let name = cursor.take_fixed_str(16)?;

        let kind = match type1 {
            PRIMARY_ANALOG => {
                let unit = cursor.take_fixed_str(8)?;
                let gain = cursor.take_f32_le()?;
                let offset = cursor.take_f32_le()?;
                ChannelKind::Analog { unit, gain, offset }
            }
            PRIMARY_DIGITAL => {
                let text_low = cursor.take_fixed_str(16)?;
                let text_high = cursor.take_fixed_str(16)?;
                ChannelKind::Digital { text_low, text_high }
            }
            PRIMARY_COUNTER => {
                let unit = cursor.take_fixed_str(8)?;
                let gain = cursor.take_f32_le()?;
                ChannelKind::Counter { unit, gain }
            }
            PRIMARY_STATUS => {
                let size = cursor.take_u16_le()? as usize;
                let status = cursor.take(size)?.to_vec();
                ChannelKind::Status { status }
            }
            other => return Err(Error::ChannelUnknownType(other)),
        };

        catalogue.insert(
            name.clone(),
            ChannelDescriptor {
                index,
                secondary_type: type2,
                format,
                access,
                name,
                kind,
            },
        );
    }

    Ok(catalogue)
}
