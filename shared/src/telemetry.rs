//! Device-reported structures and their fixed payload layouts
//!
//! All numeric fields are little-endian, matching the packed structs the
//! firmware sends.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::CodecError;

/// Length of the unique hardware identifier in a device info response
pub const DEVICE_ID_LEN: usize = 12;

/// Minimum payload of a device info response
pub const DEVICE_INFO_LEN: usize = 2 + DEVICE_ID_LEN;

/// Exact payload of a device stats response: `u8,u8,u32,f32,f32,f32,f32`
pub const DEVICE_STATS_LEN: usize = 1 + 1 + 4 + 4 * 4;

/// Firmware version and hardware identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    pub firmware_major: u8,
    pub firmware_minor: u8,
    pub device_id: [u8; DEVICE_ID_LEN],
}

impl DeviceInfo {
    /// Decode a `DEVICE_INFO_READ` response payload
    ///
    /// Trailing bytes after the identifier are ignored.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() < DEVICE_INFO_LEN {
            return Err(CodecError::TruncatedPayload {
                needed: DEVICE_INFO_LEN,
                available: payload.len(),
            });
        }

        let mut device_id = [0u8; DEVICE_ID_LEN];
        device_id.copy_from_slice(&payload[2..DEVICE_INFO_LEN]);

        Ok(Self {
            firmware_major: payload[0],
            firmware_minor: payload[1],
            device_id,
        })
    }

    /// Encode as the device would send it
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DEVICE_INFO_LEN);
        buf.put_u8(self.firmware_major);
        buf.put_u8(self.firmware_minor);
        buf.put_slice(&self.device_id);
        buf.freeze()
    }

    /// Lowercase hex rendering of the identifier
    pub fn device_id_hex(&self) -> String {
        self.device_id.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "firmware v{}.{} id {}",
            self.firmware_major,
            self.firmware_minor,
            self.device_id_hex()
        )
    }
}

/// One telemetry snapshot from the controller
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceStats {
    /// Controller fault code, 0 when healthy
    pub fault: u8,
    /// Active control mode
    pub control_status: u8,
    /// Seconds since boot
    pub uptime: u32,
    pub voltage_bus: f32,
    pub driver_temp: f32,
    pub fet_temp: f32,
    pub motor_temp: f32,
}

impl DeviceStats {
    /// Decode a `DEVICE_STATS_READ` response payload
    ///
    /// The layout is fixed-width, so anything other than exactly
    /// [`DEVICE_STATS_LEN`] bytes is rejected.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() < DEVICE_STATS_LEN {
            return Err(CodecError::TruncatedPayload {
                needed: DEVICE_STATS_LEN,
                available: payload.len(),
            });
        }
        if payload.len() != DEVICE_STATS_LEN {
            return Err(CodecError::LengthMismatch {
                expected: DEVICE_STATS_LEN,
                actual: payload.len(),
            });
        }

        let mut buf = payload;
        Ok(Self {
            fault: buf.get_u8(),
            control_status: buf.get_u8(),
            uptime: buf.get_u32_le(),
            voltage_bus: buf.get_f32_le(),
            driver_temp: buf.get_f32_le(),
            fet_temp: buf.get_f32_le(),
            motor_temp: buf.get_f32_le(),
        })
    }

    /// Encode as the device would send it
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DEVICE_STATS_LEN);
        buf.put_u8(self.fault);
        buf.put_u8(self.control_status);
        buf.put_u32_le(self.uptime);
        buf.put_f32_le(self.voltage_bus);
        buf.put_f32_le(self.driver_temp);
        buf.put_f32_le(self.fet_temp);
        buf.put_f32_le(self.motor_temp);
        buf.freeze()
    }
}

/// Text line emitted asynchronously by the firmware
pub struct LogEvent;

impl LogEvent {
    /// Decode a `LOGGING_OUTPUT` payload: `[length][utf8 bytes]`
    pub fn decode(payload: &[u8]) -> Result<String, CodecError> {
        let (&declared, rest) = payload.split_first().ok_or(CodecError::TruncatedPayload {
            needed: 1,
            available: 0,
        })?;

        let len = declared as usize;
        if rest.len() < len {
            return Err(CodecError::TruncatedPayload {
                needed: 1 + len,
                available: payload.len(),
            });
        }

        let text = std::str::from_utf8(&rest[..len])?;
        Ok(text.to_owned())
    }

    /// Encode a line as the device would send it
    pub fn to_payload(text: &str) -> Result<Bytes, CodecError> {
        // The payload also holds the inner length byte
        if text.len() >= crate::MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLarge(text.len() + 1));
        }
        let mut buf = BytesMut::with_capacity(text.len() + 1);
        buf.put_u8(text.len() as u8);
        buf.put_slice(text.as_bytes());
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_payload(values: (u8, u8, u32, f32, f32, f32, f32)) -> Vec<u8> {
        let mut raw = vec![values.0, values.1];
        raw.extend_from_slice(&values.2.to_le_bytes());
        raw.extend_from_slice(&values.3.to_le_bytes());
        raw.extend_from_slice(&values.4.to_le_bytes());
        raw.extend_from_slice(&values.5.to_le_bytes());
        raw.extend_from_slice(&values.6.to_le_bytes());
        raw
    }

    #[test]
    fn test_device_info_decode() {
        let raw = [
            1, 4, 0x2b, 0x00, 0x1f, 0x00, 0x0e, 0x51, 0x37, 0x35, 0x33, 0x38, 0x30, 0x39,
        ];
        let info = DeviceInfo::decode(&raw).expect("decode failed");

        assert_eq!(info.firmware_major, 1);
        assert_eq!(info.firmware_minor, 4);
        assert_eq!(info.device_id_hex(), "2b001f000e51373533383039");
        assert_eq!(info.to_string(), "firmware v1.4 id 2b001f000e51373533383039");
    }

    #[test]
    fn test_device_info_accepts_trailing_bytes() {
        let mut raw = vec![2, 0];
        raw.extend_from_slice(&[0xab; DEVICE_ID_LEN]);
        raw.push(0xff);

        let info = DeviceInfo::decode(&raw).expect("decode failed");
        assert_eq!(info.device_id, [0xab; DEVICE_ID_LEN]);
    }

    #[test]
    fn test_device_info_truncated() {
        assert_eq!(
            DeviceInfo::decode(&[1, 0, 1, 2, 3]),
            Err(CodecError::TruncatedPayload {
                needed: 14,
                available: 5
            })
        );
    }

    #[test]
    fn test_device_stats_decode() {
        let raw = stats_payload((0, 3, 1000, 24.0, 30.5, 28.0, 32.2));
        let stats = DeviceStats::decode(&raw).expect("decode failed");

        assert_eq!(stats.fault, 0);
        assert_eq!(stats.control_status, 3);
        assert_eq!(stats.uptime, 1000);
        assert_eq!(stats.voltage_bus, 24.0);
        assert_eq!(stats.driver_temp, 30.5);
        assert_eq!(stats.fet_temp, 28.0);
        assert_eq!(stats.motor_temp, 32.2);
    }

    #[test]
    fn test_device_stats_float_fidelity() {
        let raw = stats_payload((7, 1, u32::MAX, -12.75, f32::NAN, -0.0, f32::NEG_INFINITY));
        let stats = DeviceStats::decode(&raw).expect("decode failed");

        assert_eq!(stats.fault, 7);
        assert_eq!(stats.uptime, u32::MAX);
        assert_eq!(stats.voltage_bus, -12.75);
        assert!(stats.driver_temp.is_nan());
        assert_eq!(stats.fet_temp.to_bits(), (-0.0f32).to_bits());
        assert_eq!(stats.motor_temp, f32::NEG_INFINITY);
    }

    #[test]
    fn test_device_stats_wrong_length() {
        let raw = stats_payload((0, 0, 0, 0.0, 0.0, 0.0, 0.0));

        assert_eq!(raw.len(), DEVICE_STATS_LEN);
        assert_eq!(
            DeviceStats::decode(&raw[..21]),
            Err(CodecError::TruncatedPayload {
                needed: 22,
                available: 21
            })
        );

        let mut long = raw.clone();
        long.push(0);
        assert_eq!(
            DeviceStats::decode(&long),
            Err(CodecError::LengthMismatch {
                expected: 22,
                actual: 23
            })
        );
    }

    #[test]
    fn test_device_stats_short_payloads_are_errors() {
        for len in 0..DEVICE_STATS_LEN {
            let raw = vec![0u8; len];
            assert!(
                matches!(DeviceStats::decode(&raw), Err(CodecError::TruncatedPayload { .. })),
                "length {} should be rejected",
                len
            );
        }
    }

    #[test]
    fn test_device_stats_payload_roundtrip_length() {
        let stats = DeviceStats {
            uptime: 9,
            motor_temp: 40.0,
            ..Default::default()
        };
        let payload = stats.to_payload();
        assert_eq!(payload.len(), 22);
        assert_eq!(DeviceStats::decode(&payload), Ok(stats));
    }

    #[test]
    fn test_device_stats_payload_matches_layout() {
        let stats = DeviceStats {
            fault: 1,
            control_status: 2,
            uptime: 3,
            voltage_bus: 4.0,
            driver_temp: 5.0,
            fet_temp: 6.0,
            motor_temp: 7.0,
        };
        assert_eq!(
            &stats.to_payload()[..],
            &stats_payload((1, 2, 3, 4.0, 5.0, 6.0, 7.0))[..]
        );
    }

    #[test]
    fn test_log_event_decode() {
        let raw = [0x05, b'h', b'e', b'l', b'l', b'o'];
        assert_eq!(LogEvent::decode(&raw).expect("decode failed"), "hello");
    }

    #[test]
    fn test_log_event_ignores_bytes_past_declared_length() {
        let raw = [0x02, b'o', b'k', 0x00, 0x00];
        assert_eq!(LogEvent::decode(&raw).expect("decode failed"), "ok");
    }

    #[test]
    fn test_log_event_truncated() {
        assert_eq!(
            LogEvent::decode(&[0x05, b'h', b'i']),
            Err(CodecError::TruncatedPayload {
                needed: 6,
                available: 3
            })
        );
        assert!(matches!(
            LogEvent::decode(&[]),
            Err(CodecError::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn test_log_event_invalid_utf8() {
        assert!(matches!(
            LogEvent::decode(&[0x02, 0xc3, 0x28]),
            Err(CodecError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_log_event_payload() {
        let payload = LogEvent::to_payload("hello").expect("fits");
        assert_eq!(&payload[..], &[0x05, b'h', b'e', b'l', b'l', b'o']);
        assert!(LogEvent::to_payload(&"x".repeat(255)).is_err());
    }
}
