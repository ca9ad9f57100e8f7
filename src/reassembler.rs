//! Fragment Reassembler: a single logical Response may span several Frames.
//! Concatenates user payload across frames of a pending request until the
//! packet-counter field reaches zero.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::frame::{self, Control, Frame};
use crate::transport::{Transport, TIMEOUT_LONG, TIMEOUT_SHORT};

/// The logical result of one command: reassembled across all the frames
/// that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub src_addr: u16,
    pub dst_addr: u16,
    pub control: Control,
    pub command: u8,
    pub payload: Vec<u8>,
}

struct Accumulator {
    src_addr: u16,
    dst_addr: u16,
    control: Control,
    command: u8,
    payload: Vec<u8>,
}

impl Accumulator {
    fn from_frame(frame: &Frame) -> Accumulator {
        Accumulator {
            src_addr: frame.src_addr,
            dst_addr: frame.dst_addr,
            control: frame.control,
            command: frame.command,
            payload: frame.payload.clone(),
        }
    }

    fn matches(&self, frame: &Frame) -> bool {
        self.src_addr == frame.src_addr
            && self.dst_addr == frame.dst_addr
            && self.control == frame.control
            && self.command == frame.command
    }

    fn append(&mut self, frame: &Frame) {
        self.payload.extend_from_slice(&frame.payload);
    }

    fn into_response(self) -> Response {
        Response {
            src_addr: self.src_addr,
            dst_addr: self.dst_addr,
            control: self.control,
            command: self.command,
            payload: self.payload,
        }
    }
}

/// Reads frames from the transport, reassembling them into a single
/// Response. Decode errors on an individual frame cause that frame to be
/// treated as missing; the loop keeps waiting (bounded by the transport's
/// own timeouts). Returns `NoResponse` if the transport goes quiet before a
/// final fragment (packet counter zero) arrives.
pub fn read_response(transport: &mut dyn Transport) -> Result<Response> {
    let mut accumulator: Option<Accumulator> = None;
    let mut undecoded: Vec<u8> = Vec::new();

    loop {
        let chunk = transport.read_until_quiet(TIMEOUT_LONG, TIMEOUT_SHORT)?;
        if chunk.is_empty() && undecoded.is_empty() {
            return Err(Error::NoResponse);
        }
        undecoded.extend_from_slice(&chunk);

        loop {
            let total_len = match frame::framed_len(&undecoded) {
                Some(n) => n,
                None => break, // not enough header bytes yet to know the frame length
            };
            if undecoded.len() < total_len {
                break; // frame not fully arrived yet
            }

            match frame::decode(&undecoded[..total_len]) {
                Ok((frame, consumed)) => {
                    debug_assert_eq!(consumed, total_len);
                    undecoded.drain(..total_len);
                    debug!(cmd = frame.command, pkt = frame.packet_cnt, "decoded frame");

                    let done = match &mut accumulator {
                        None => {
                            let is_final = frame.packet_cnt == 0;
                            accumulator = Some(Accumulator::from_frame(&frame));
                            is_final
                        }
                        Some(acc) => {
                            if !acc.matches(&frame) {
                                return Err(Error::FragmentInconsistent);
                            }
                            acc.append(&frame);
                            frame.packet_cnt == 0
                        }
                    };

                    if done {
                        return Ok(accumulator.take().unwrap().into_response());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "discarding malformed frame bytes");
                    undecoded.drain(..total_len);
                }
            }
        }

        if chunk.is_empty() {
            return Err(Error::NoResponse);
        }
    }
}
