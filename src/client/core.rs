use crate::error::Result;
use crate::protocol::{Inbound, decode_response, frame_request};
use crate::sequence::SequenceCounter;

/// Wire-level half of the session engine: sequence allocation and framing.
#[derive(Debug, Default)]
pub(crate) struct ClientCore {
    sequence: SequenceCounter,
}

impl ClientCore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate a sequence number and build the escaped, framed request.
    pub(crate) fn build_request(&self, netfn: u8, cmd: u8, data: &[u8]) -> Result<(u8, Vec<u8>)> {
        let seq = self.sequence.next();
        let frame = frame_request(netfn, cmd, seq, data)?;
        crate::debug::dump_hex("serial request frame", &frame);
        Ok((seq, frame))
    }

    pub(crate) fn decode_response(&self, raw: &[u8]) -> Inbound {
        crate::debug::dump_hex("serial response", raw);
        decode_response(raw)
    }

    pub(crate) fn reset_sequence(&self) {
        self.sequence.reset();
    }
}
