//! Protocol Driver: sequences device discovery, channel enumeration, and
//! per-cycle polling against one or more devices sharing a link.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use chrono::{Local, TimeZone};
use tracing::{debug, error, info, warn};

use crate::bytes_cursor::Cursor;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::frame::{self, Control};
use crate::persistence::{Persistence, StatsRow, MONITORED_CHANNELS};
use crate::reassembler::{self, Response};
use crate::sample::{self, ScaledValue};
use crate::transport::Transport;

pub const CMD_GET_NET_START: u8 = 6;
pub const CMD_GET_CINFO: u8 = 9;
pub const CMD_SYN_ONLINE: u8 = 10;
pub const CMD_GET_DATA: u8 = 11;
pub const CMD_SET_DATA: u8 = 12;
pub const CMD_PDELIMIT: u8 = 40;

/// The four-step sanity gate a device's cycle row must clear before it is
/// written: these channels must be present and `Fac` must read above 50,
/// suppressing startup/transient partial reads.
const SANITY_REQUIRED: [&str; 4] = ["Fac", "Temperature", "E-Total", "h-Total"];

pub struct ProtocolDriver {
    pub devices: BTreeMap<u16, Device>,
}

impl ProtocolDriver {
    pub fn new() -> ProtocolDriver {
        ProtocolDriver { devices: BTreeMap::new() }
    }

    /// Phase A: broadcasts `CMD_GET_NET_START` and gathers responses until
    /// the transport goes quiet. Returns an error (and the caller should
    /// record a comment) if no device is discovered.
    pub fn discover(&mut self, transport: &mut dyn Transport, persistence: &mut dyn Persistence) -> Result<()> {
        let outbound = frame::build(0, 0, CMD_GET_NET_START, Control::BroadcastRequest, &[]);
        transport.write_all(&outbound)?;

        let mut found = 0;
        loop {
            match reassembler::read_response(transport) {
                Ok(response) => {
                    if response.command != CMD_GET_NET_START {
                        continue;
                    }
                    if response.src_addr == 0 {
                        continue;
                    }
                    match parse_net_start(&response) {
                        Ok((serial, device_type)) => {
                            info!(addr = response.src_addr, serial, "discovered device");
                            self.devices.insert(response.src_addr, Device::new(response.src_addr, serial, device_type));
                            found += 1;
                        }
                        Err(e) => {
                            warn!(error = %e, "malformed net-start response");
                        }
                    }
                }
                Err(Error::NoResponse) => break,
                Err(e) => {
                    warn!(error = %e, "error while gathering discovery responses");
                    break;
                }
            }
        }

        if found == 0 {
            persistence.append_comment(None, "discovery found no devices")?;
            return Err(Error::NoResponse);
        }
        Ok(())
    }

    /// Phase B: enumerates channels for every discovered device. Failures
    /// are per-device: enumeration continues for the rest.
    pub fn enumerate(&mut self, transport: &mut dyn Transport, persistence: &mut dyn Persistence) -> Result<()> {
        let addrs: Vec<u16> = self.devices.keys().copied().collect();
        for addr in addrs {
            let outbound = frame::build(addr, 0, CMD_GET_CINFO, Control::UnicastRequest, &[]);
            if let Err(e) = transport.write_all(&outbound) {
                warn!(addr, error = %e, "failed to send CMD_GET_CINFO");
                comment_best_effort(persistence, Some(addr), &format!("enumeration send failed: {}", e));
                continue;
            }
            match reassembler::read_response(transport) {
                Ok(response) => match crate::channel::decode_cinfo(&response.payload) {
                    Ok(catalogue) => {
                        for name in catalogue.keys() {
                            debug!(addr, channel = %name, "enumerated channel");
                            comment_best_effort(persistence, Some(addr), &format!("channel {} enumerated", name));
                        }
                        if let Some(device) = self.devices.get_mut(&addr) {
                            device.attach_catalogue(catalogue);
                        }
                    }
                    Err(e) => {
                        warn!(addr, error = %e, "failed to decode channel catalogue");
                        comment_best_effort(persistence, Some(addr), &format!("enumeration failed: {}", e));
                    }
                },
                Err(e) => {
                    warn!(addr, error = %e, "no response to CMD_GET_CINFO");
                    comment_best_effort(persistence, Some(addr), &format!("enumeration failed: {}", e));
                }
            }
        }
        Ok(())
    }

    /// Phase C: one polling cycle at nominal time `poll_time` (epoch
    /// seconds, always a multiple of the configured interval).
    pub fn poll_cycle(
        &mut self,
        transport: &mut dyn Transport,
        persistence: &mut dyn Persistence,
        poll_time: u32,
    ) -> Result<()> {
        let syn = frame::build(0, 0, CMD_SYN_ONLINE, Control::BroadcastRequest, &poll_time.to_le_bytes());
        transport.write_all(&syn)?;
        thread::sleep(Duration::from_secs(5));

        let addrs: Vec<u16> = self.devices.keys().copied().collect();
        for addr in addrs {
            self.poll_device(transport, persistence, addr, poll_time)?;
        }
        Ok(())
    }

    fn poll_device(
        &mut self,
        transport: &mut dyn Transport,
        persistence: &mut dyn Persistence,
        addr: u16,
        poll_time: u32,
    ) -> Result<()> {
        let catalogue = match self.devices.get(&addr).and_then(|d| d.catalogue.clone()) {
            Some(c) => c,
            None => return Ok(()),
        };

        let mut values: BTreeMap<&'static str, f64> = BTreeMap::new();

        for &channel_name in MONITORED_CHANNELS.iter() {
            let descriptor = match catalogue.get(channel_name) {
                Some(d) => d,
                None => continue,
            };

            let payload = [descriptor.kind.primary_type(), descriptor.secondary_type, descriptor.index];
            let outbound = frame::build(addr, 0, CMD_GET_DATA, Control::UnicastRequest, &payload);
            if let Err(e) = transport.write_all(&outbound) {
                warn!(addr, channel = channel_name, error = %e, "failed to send CMD_GET_DATA");
                comment_best_effort(persistence, Some(addr), &format!("{}: send failed: {}", channel_name, e));
                continue;
            }

            match reassembler::read_response(transport) {
                Ok(response) => match sample::decode_data(&response.payload, descriptor) {
                    Ok(decoded) => {
                        if decoded.since != poll_time {
                            warn!(addr, channel = channel_name, since = decoded.since, poll_time, "since mismatch");
                            comment_best_effort(
                                persistence,
                                Some(addr),
                                &format!("{}: since {} != poll_time {}", channel_name, decoded.since, poll_time),
                            );
                        }
                        if let ScaledValue::Numeric(v) = decoded.scaled {
                            values.insert(channel_name, v);
                        }
                    }
                    Err(e) => {
                        warn!(addr, channel = channel_name, error = %e, "sample decode failed");
                        comment_best_effort(persistence, Some(addr), &format!("{}: decode failed: {}", channel_name, e));
                    }
                },
                Err(e) => {
                    warn!(addr, channel = channel_name, error = %e, "no response to CMD_GET_DATA");
                    comment_best_effort(persistence, Some(addr), &format!("{}: no response: {}", channel_name, e));
                }
            }
        }

        if !passes_sanity_gate(&values) {
            debug!(addr, "cycle row dropped by sanity gate");
            return Ok(());
        }

        let stamp = Local.timestamp_opt(poll_time as i64, 0).single().unwrap_or_else(Local::now);
        if let Err(e) = persistence.append_stats(StatsRow { stamp, addr, values }) {
            error!(addr, error = %e, "failed to persist stats row, continuing");
        }
        Ok(())
    }
}

impl Default for ProtocolDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Records a comment, logging (rather than propagating) a `PersistenceError`
/// so one failed write doesn't abort the rest of the caller's loop.
fn comment_best_effort(persistence: &mut dyn Persistence, addr: Option<u16>, text: &str) {
    if let Err(e) = persistence.append_comment(addr, text) {
        error!(error = %e, "failed to persist comment, continuing");
    }
}

fn passes_sanity_gate(values: &BTreeMap<&'static str, f64>) -> bool {
    match values.get("Fac") {
        Some(fac) if *fac > 50.0 => {}
        _ => return false,
    }
    SANITY_REQUIRED
        .iter()
        .skip(1)
        .all(|channel| values.contains_key(channel))
}

fn parse_net_start(response: &Response) -> Result<(u32, [u8; 8])> {
    let mut cursor = Cursor::new(&response.payload);
    let serial = cursor.take_u32_le()?;
    let type_bytes = cursor.take(8)?;
    let mut device_type = [0u8; 8];
    device_type.copy_from_slice(type_bytes);
    Ok((serial, device_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelDescriptor, ChannelKind};
    use crate::persistence::MemoryPersistence;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct ScriptedTransport {
        chunks: RefCell<VecDeque<Vec<u8>>>,
        written: RefCell<Vec<Vec<u8>>>,
    }

    impl ScriptedTransport {
        fn new(chunks: Vec<Vec<u8>>) -> ScriptedTransport {
            ScriptedTransport { chunks: RefCell::new(chunks.into_iter().collect()), written: RefCell::new(Vec::new()) }
        }
    }

    impl Transport for ScriptedTransport {
        fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
            self.written.borrow_mut().push(bytes.to_vec());
            Ok(())
        }

        fn read_until_quiet(&mut self, _deadline_long: Duration, _quiet_short: Duration) -> Result<Vec<u8>> {
            Ok(self.chunks.borrow_mut().pop_front().unwrap_or_default())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// `frame::build` always encodes src_addr 0 (it's only ever used to build
    /// outbound controller frames). Tests simulating an inbound device
    /// response need an arbitrary src_addr, so encode the wire layout by
    /// hand here rather than misuse `frame::build` for that.
    fn build_inbound_frame(src_addr: u16, packet_cnt: u8, command: u8, control: Control, payload: &[u8]) -> Vec<u8> {
        let len = payload.len() as u8;
        let mut header = Vec::with_capacity(7 + payload.len());
        header.extend_from_slice(&src_addr.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes()); // dst_addr = 0 (the controller)
        header.push(match control {
            Control::UnicastRequest => 0,
            Control::Response => 64,
            Control::BroadcastRequest => 128,
        });
        header.push(packet_cnt);
        header.push(command);
        header.extend_from_slice(payload);

        let crc: u16 = header.iter().fold(0u32, |acc, &b| acc + b as u32) as u16;

        let mut out = Vec::with_capacity(9 + header.len() + 3);
        out.push(0xAA);
        out.push(0xAA);
        out.push(0x68);
        out.push(len);
        out.push(len);
        out.push(0x68);
        out.extend_from_slice(&header);
        out.extend_from_slice(&crc.to_le_bytes());
        out.push(0x16);
        out
    }

    /// A persistence backend that always fails, to prove callers treat
    /// `PersistenceError` as non-fatal rather than aborting their loop.
    struct FailingPersistence {
        comment_calls: usize,
    }

    impl Persistence for FailingPersistence {
        fn append_stats(&mut self, _row: StatsRow) -> Result<()> {
            Err(Error::PersistenceError("stats write refused".into()))
        }

        fn append_comment(&mut self, _addr: Option<u16>, _text: &str) -> Result<()> {
            self.comment_calls += 1;
            Err(Error::PersistenceError("comment write refused".into()))
        }
    }

    fn analog_cinfo_record(name: &str) -> Vec<u8> {
        let mut rec = vec![1u8, crate::channel::PRIMARY_ANALOG, 0];
        rec.extend_from_slice(&1u16.to_le_bytes());
        rec.extend_from_slice(&7u16.to_le_bytes());
        let mut name_field = [0u8; 16];
        name_field[..name.len()].copy_from_slice(name.as_bytes());
        rec.extend_from_slice(&name_field);
        rec.extend_from_slice(b"W\0\0\0\0\0\0\0");
        rec.extend_from_slice(&1.0f32.to_le_bytes());
        rec.extend_from_slice(&0.0f32.to_le_bytes());
        rec
    }

    /// A persistence failure while enumerating one device's channels must
    /// not stop enumeration of the next device.
    #[test]
    fn enumerate_continues_past_persistence_failure() {
        let payload = analog_cinfo_record("Pac");
        let response_a = build_inbound_frame(1, 0, CMD_GET_CINFO, Control::Response, &payload);
        let response_b = build_inbound_frame(2, 0, CMD_GET_CINFO, Control::Response, &payload);

        let mut transport = ScriptedTransport::new(vec![response_a, response_b]);
        let mut persistence = FailingPersistence { comment_calls: 0 };
        let mut driver = ProtocolDriver::new();
        driver.devices.insert(1, Device::new(1, 10, [0; 8]));
        driver.devices.insert(2, Device::new(2, 20, [0; 8]));

        let result = driver.enumerate(&mut transport, &mut persistence);

        assert!(result.is_ok());
        assert!(persistence.comment_calls >= 2);
        assert!(driver.devices.get(&1).unwrap().catalogue.is_some());
        assert!(driver.devices.get(&2).unwrap().catalogue.is_some());
    }

    fn analog_get_data_response(addr: u16, since: u32, raw: u16) -> Vec<u8> {
        let mut payload = vec![1u8, 0, 1];
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&since.to_le_bytes());
        payload.extend_from_slice(&since.to_le_bytes());
        payload.extend_from_slice(&raw.to_le_bytes());
        build_inbound_frame(addr, 0, CMD_GET_DATA, Control::Response, &payload)
    }

    /// A failure persisting the final stats row must not be propagated out
    /// of the poll cycle: the cycle should be logged and treated as done.
    #[test]
    fn poll_device_continues_past_stats_persistence_failure() {
        let mut driver = ProtocolDriver::new();
        let mut device = Device::new(7, 1, [0; 8]);
        let mut catalogue = crate::channel::Catalogue::new();
        for channel in ["E-Total", "h-Total", "Temperature", "Fac"] {
            catalogue.insert(
                channel.to_string(),
                ChannelDescriptor {
                    index: 1,
                    secondary_type: 0,
                    format: 0,
                    access: 0,
                    name: channel.into(),
                    kind: ChannelKind::Analog { unit: "".into(), gain: 1.0, offset: 0.0 },
                },
            );
        }
        device.attach_catalogue(catalogue);
        driver.devices.insert(7, device);

        let poll_time = 1000u32;
        let responses = vec![
            analog_get_data_response(7, poll_time, 100),
            analog_get_data_response(7, poll_time, 100),
            analog_get_data_response(7, poll_time, 100),
            analog_get_data_response(7, poll_time, 60),
        ];
        let mut transport = ScriptedTransport::new(responses);
        let mut persistence = FailingPersistence { comment_calls: 0 };

        let result = driver.poll_device(&mut transport, &mut persistence, 7, poll_time);
        assert!(result.is_ok());
    }

    #[test]
    fn discover_inserts_device_and_stops_on_quiet() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&99u32.to_le_bytes());
        payload.extend_from_slice(b"SB3000XX");
        let frame_bytes = build_inbound_frame(3, 0, CMD_GET_NET_START, Control::Response, &payload);

        let mut transport = ScriptedTransport::new(vec![frame_bytes, vec![]]);
        let mut persistence = MemoryPersistence::new();
        let mut driver = ProtocolDriver::new();
        driver.discover(&mut transport, &mut persistence).unwrap();

        assert_eq!(driver.devices.len(), 1);
        let device = driver.devices.get(&3).unwrap();
        assert_eq!(device.serial, 99);
    }

    #[test]
    fn discover_with_no_devices_fails_and_comments() {
        let mut transport = ScriptedTransport::new(vec![vec![]]);
        let mut persistence = MemoryPersistence::new();
        let mut driver = ProtocolDriver::new();
        let result = driver.discover(&mut transport, &mut persistence);
        assert!(result.is_err());
        assert_eq!(persistence.comments.len(), 1);
    }

    /// S7: a cycle with Fac == 0 for a device yields no stats row for it,
    /// while other devices' rows still land.
    #[test]
    fn s7_sanity_gate_drops_only_failing_device() {
        let mut passing = BTreeMap::new();
        passing.insert("Fac", 60.0);
        passing.insert("Temperature", 30.0);
        passing.insert("E-Total", 100.0);
        passing.insert("h-Total", 500.0);
        assert!(passes_sanity_gate(&passing));

        let mut failing = passing.clone();
        failing.insert("Fac", 0.0);
        assert!(!passes_sanity_gate(&failing));
    }

    #[test]
    fn sanity_gate_requires_all_four_channels() {
        let mut partial = BTreeMap::new();
        partial.insert("Fac", 60.0);
        partial.insert("Temperature", 30.0);
        assert!(!passes_sanity_gate(&partial));
    }

    #[test]
    fn channel_descriptor_exposes_primary_type() {
        let descriptor = ChannelDescriptor {
            index: 1,
            secondary_type: 0,
            format: 0,
            access: 0,
            name: "Pac".into(),
            kind: ChannelKind::Analog { unit: "W".into(), gain: 1.0, offset: 0.0 },
        };
        assert_eq!(descriptor.kind.primary_type(), crate::channel::PRIMARY_ANALOG);
    }
}
