use std::collections::VecDeque;

use crate::errors::{Result, TelloError};

/// A command that has gone out and is waiting for its reply, together with
/// whatever will be told about the reply.
#[derive(Debug)]
pub(crate) struct PendingResponse<P> {
    pub(crate) command: String,
    pub(crate) promise: P,
}

#[derive(Debug)]
pub(crate) enum Dispatch<P> {
    /// The oldest pending command took the datagram as its reply.
    Resolved { slot: PendingResponse<P>, reply: Result<String> },
    /// Nothing was waiting, so the two ends are out of step.
    Unmatched { text: String },
}

/// Outstanding replies in send order.
///
/// The drone's replies carry no sequence numbers, so the only correlation
/// available is position: reply N answers command N.
#[derive(Debug)]
pub(crate) struct ResponseQueue<P> {
    pending: VecDeque<PendingResponse<P>>,
    echo_check: bool,
}

impl<P> ResponseQueue<P> {
    pub(crate) fn new(echo_check: bool) -> Self {
        Self { pending: VecDeque::new(), echo_check }
    }

    pub(crate) fn push(&mut self, command: String, promise: P) {
        self.pending.push_back(PendingResponse { command, promise });
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Matches a datagram against the oldest pending command, removing it
    /// from the queue whether or not the reply decodes.
    pub(crate) fn dispatch(&mut self, datagram: &[u8]) -> Dispatch<P> {
        match self.pending.pop_front() {
            Some(slot) => {
                let reply = decode_reply(&slot.command, datagram, self.echo_check);
                Dispatch::Resolved { slot, reply }
            }
            None => Dispatch::Unmatched { text: String::from_utf8_lossy(datagram).trim().to_string() },
        }
    }

    /// Keeps the slots whose promise passes `keep`; returns how many went.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&P) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|slot| keep(&slot.promise));
        before - self.pending.len()
    }

    /// Empties the queue, oldest first.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = PendingResponse<P>> + '_ {
        self.pending.drain(..)
    }
}

/// Turns a raw reply into text. Replies must be ASCII; with `echo_check`
/// they must also start with the command they answer, which is stripped.
pub(crate) fn decode_reply(command: &str, datagram: &[u8], echo_check: bool) -> Result<String> {
    let text = std::str::from_utf8(datagram)
        .ok()
        .filter(|s| s.is_ascii())
        .ok_or_else(|| TelloError::ProtocolError {
            msg: format!("undecodable reply to \"{command}\": {datagram:?}"),
        })?
        .trim();

    if !echo_check {
        return Ok(text.to_string());
    }

    match text.strip_prefix(command) {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => Ok(rest.trim_start().to_string()),
        _ => Err(TelloError::ProtocolError {
            msg: format!("reply \"{text}\" does not echo \"{command}\""),
        }),
    }
}
