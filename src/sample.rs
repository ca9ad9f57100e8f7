//! Sample Decoder: parses `CMD_GET_DATA` responses into a raw value, then
//! applies the channel's gain/offset from its catalogue entry.

use crate::bytes_cursor::Cursor;
use crate::channel::{ChannelDescriptor, ChannelKind};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Analog(u16),
    Counter(u32),
    Digital { text_low: String, text_high: String },
    Status(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScaledValue {
    Numeric(f64),
    Text { text_low: String, text_high: String },
    Bits(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample {
    pub since: u32,
    pub time_basis: u32,
    pub raw: RawValue,
    pub scaled: ScaledValue,
}

/// Decodes the user payload of a `CMD_GET_DATA` response. Extra bytes beyond
/// the first record are permitted and ignored.
pub fn decode_data(payload: &[u8], descriptor: &ChannelDescriptor) -> Result<DecodedSample> {
    decode_record(payload, descriptor).map_err(|e| match e {
        Error::Truncated { wanted, available } => Error::SampleMalformed(format!(
            "truncated sample payload: wanted {} bytes, {} remaining",
            wanted, available
        )),
        other => other,
    })
}

fn decode_record(payload: &[u8], descriptor: &ChannelDescriptor) -> Result<DecodedSample> {
    let mut cursor = Cursor::new(payload);
    let _type1 = cursor.take_u8()?;
    let _type2 = cursor.take_u8()?;
    let _channel_idx = cursor.take_u8()?;
    let _data_sets = cursor.take_u16_le()?;
    let since = cursor.take_u32_le()?;
    let time_basis = cursor.take_u32_le()?;

    let (raw, scaled) = match &descriptor.kind {
        ChannelKind::Analog { gain, offset, .. } => {
            let raw = cursor.take_u16_le()?;
            let scaled = raw as f64 * *gain as f64 + *offset as f64;
            (RawValue::Analog(raw), ScaledValue::Numeric(scaled))
        }
        ChannelKind::Counter { gain, .. } => {
            let raw = cursor.take_u32_le()?;
            let scaled = raw as f64 * *gain as f64;
            (RawValue::Counter(raw), ScaledValue::Numeric(scaled))
        }
        ChannelKind::Digital { .. } => {
            let text_low = cursor.take_fixed_str(16)?;
            let text_high = cursor.take_fixed_str(16)?;
            (
                RawValue::Digital { text_low: text_low.clone(), text_high: text_high.clone() },
                ScaledValue::Text { text_low, text_high },
            )
        }
        ChannelKind::Status { .. } => {
            let bytes = cursor
                .take(4)
                .map_err(|_| Error::SampleMalformed("status sample missing 4-byte value".into()))?
                .to_vec();
            (RawValue::Status(bytes.clone()), ScaledValue::Bits(bytes))
        }
    };

    Ok(DecodedSample { since, time_basis, raw, scaled })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analog_descriptor(gain: f32, offset: f32) -> ChannelDescriptor {
        ChannelDescriptor {
            index: 1,
            secondary_type: 0,
            format: 0,
            access: 0,
            name: "Pac".into(),
            kind: ChannelKind::Analog { unit: "W".into(), gain, offset },
        }
    }

    /// S4: analog sample scaling.
    #[test]
    fn s4_analog_sample_scaling() {
        let descriptor = analog_descriptor(0.10000000149011612, 0.0);
        let mut payload = vec![1u8, 0, 1];
        payload.extend_from_slice(&0u16.to_le_bytes()); // data_sets
        payload.extend_from_slice(&0u32.to_le_bytes()); // since
        payload.extend_from_slice(&0u32.to_le_bytes()); // time_basis
        payload.extend_from_slice(&235u16.to_le_bytes()); // raw value = 0xEB 0x00

        let sample = decode_data(&payload, &descriptor).unwrap();
        assert_eq!(sample.raw, RawValue::Analog(235));
        match sample.scaled {
            ScaledValue::Numeric(v) => assert!((v - 23.5).abs() < 1e-6),
            other => panic!("expected Numeric, got {:?}", other),
        }
    }

    #[test]
    fn counter_scaling_has_no_offset() {
        let descriptor = ChannelDescriptor {
            index: 2,
            secondary_type: 0,
            format: 0,
            access: 0,
            name: "E-Total".into(),
            kind: ChannelKind::Counter { unit: "kWh".into(), gain: 0.5 },
        };
        let mut payload = vec![4u8, 0, 2];
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&100u32.to_le_bytes());
        payload.extend_from_slice(&100u32.to_le_bytes());
        payload.extend_from_slice(&200u32.to_le_bytes());

        let sample = decode_data(&payload, &descriptor).unwrap();
        assert_eq!(sample.since, 100);
        match sample.scaled {
            ScaledValue::Numeric(v) => assert_eq!(v, 100.0),
            other => panic!("expected Numeric, got {:?}", other),
        }
    }

    #[test]
    fn extra_trailing_bytes_are_ignored() {
        let descriptor = analog_descriptor(1.0, 0.0);
        let mut payload = vec![1u8, 0, 1];
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&10u16.to_le_bytes());
        payload.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let sample = decode_data(&payload, &descriptor).unwrap();
        assert_eq!(sample.raw, RawValue::Analog(10));
    }

    #[test]
    fn truncated_payload_surfaces_as_sample_malformed() {
        let descriptor = analog_descriptor(1.0, 0.0);
        // Header only, no room for the u16 analog value.
        let mut payload = vec![1u8, 0, 1];
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());

        match decode_data(&payload, &descriptor) {
            Err(Error::SampleMalformed(_)) => {}
            other => panic!("expected SampleMalformed, got {:?}", other),
        }
    }
}
