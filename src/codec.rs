// Frame decoder for the push stream wire format:
// <decimal payload length>\n<payload bytes>

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::settings::SETTINGS;

pub struct FrameCodec {
    state: DecodeState,
    max_frame_size: usize,
}

enum DecodeState {
    // Waiting for the length line
    ReadingLength,
    // Length known, waiting for the payload
    ReadingPayload { expected: usize },
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(SETTINGS.max_frame_size)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            state: DecodeState::ReadingLength,
            max_frame_size,
        }
    }
}

fn invalid(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::ReadingLength => {
                    let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
                        // No delimiter yet; also bound how much garbage we
                        // will buffer while looking for one.
                        if buf.len() > 32 {
                            return Err(invalid("length header too long".to_string()));
                        }
                        return Ok(None);
                    };

                    let line = buf.split_to(newline + 1);
                    let header = std::str::from_utf8(&line[..line.len() - 1])
                        .map_err(|_| invalid("length header is not UTF-8".to_string()))?
                        .trim();

                    let expected = header
                        .parse::<usize>()
                        .map_err(|_| invalid(format!("bad frame length: {header:?}")))?;

                    if expected > self.max_frame_size {
                        return Err(invalid(format!(
                            "frame of {expected} bytes exceeds cap of {}",
                            self.max_frame_size
                        )));
                    }

                    self.state = DecodeState::ReadingPayload { expected };
                    // Payload may already be buffered
                }
                DecodeState::ReadingPayload { expected } => {
                    if buf.len() < expected {
                        return Ok(None);
                    }

                    let payload = buf.split_to(expected);
                    self.state = DecodeState::ReadingLength;

                    let frame = String::from_utf8(payload.to_vec())
                        .map_err(|_| invalid("frame payload is not UTF-8".to_string()))?;
                    return Ok(Some(frame));
                }
            }
        }
    }
}
