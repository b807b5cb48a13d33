//! The mechanism-agnostic security context contract.

use std::fmt;

use bitflags::bitflags;

use crate::config::MechanismKind;
use crate::secret::Secret;
use crate::{Error, ErrorKind, Result, SecurityStatus};

bitflags! {
    /// Protection services requested by the caller and confirmed by the handshake.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        const INTEGRITY = 0x0000_0001;
        const CONFIDENTIALITY = 0x0000_0002;
        const REPLAY_DETECTION = 0x0000_0004;
        const SEQUENCING = 0x0000_0008;
        const MUTUAL_AUTHN = 0x0000_0010;
        const ANONYMITY = 0x0000_0020;
        const IDENTIFY = 0x0000_0040;
        const DATAGRAM = 0x0000_0080;
        const DCE_STYLE = 0x0000_0100;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BufferFlags: u32 {
        /// The fragment is covered by the signature but left in clear text.
        const SIGN_ONLY = 0x1000_0000;
    }
}

/// One payload fragment of an extended wrap or signature call.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SecurityBuffer {
    pub data: Vec<u8>,
    pub flags: BufferFlags,
}

impl SecurityBuffer {
    /// A fragment that is sealed and signed.
    pub fn data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            flags: BufferFlags::empty(),
        }
    }

    pub fn sign_only(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            flags: BufferFlags::SIGN_ONLY,
        }
    }

    pub fn is_sealed(&self) -> bool {
        !self.flags.contains(BufferFlags::SIGN_ONLY)
    }
}

impl fmt::Debug for SecurityBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityBuffer")
            .field("len", &self.data.len())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Concatenation of every fragment in call order.
pub(crate) fn concat_buffers(buffers: &[SecurityBuffer]) -> Vec<u8> {
    buffers.iter().flat_map(|buffer| buffer.data.iter().copied()).collect()
}

/// Concatenation of the fragments that are sealed.
pub(crate) fn concat_sealed(buffers: &[SecurityBuffer]) -> Vec<u8> {
    buffers
        .iter()
        .filter(|buffer| buffer.is_sealed())
        .flat_map(|buffer| buffer.data.iter().copied())
        .collect()
}

/// Writes `data` back into the sealed fragments, preserving each fragment's length.
pub(crate) fn scatter_sealed(buffers: &mut [SecurityBuffer], data: &[u8]) -> Result<()> {
    let mut offset = 0;
    for buffer in buffers.iter_mut().filter(|buffer| buffer.is_sealed()) {
        let len = buffer.data.len();
        let chunk = data
            .get(offset..offset + len)
            .ok_or_else(|| Error::new(ErrorKind::Failure, "sealed data is shorter than the fragments"))?;
        buffer.data.copy_from_slice(chunk);
        offset += len;
    }

    Ok(())
}

/// Which end of the security context the local cipher state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Acceptor,
}

impl Role {
    pub fn peer(self) -> Self {
        match self {
            Role::Initiator => Role::Acceptor,
            Role::Acceptor => Role::Initiator,
        }
    }
}

/// Monotonic per-direction counter. A value is consumed when the call starts, so a failed
/// call never makes the same value available again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumber {
    next: u64,
    step: u64,
}

impl SequenceNumber {
    pub fn new(initial: u64, step: u64) -> Self {
        Self { next: initial, step }
    }

    pub fn advance(&mut self) -> u64 {
        let current = self.next;
        self.next = self.next.wrapping_add(self.step);

        current
    }

    /// The value the next call will use.
    pub fn peek(&self) -> u64 {
        self.next
    }
}

/// Cipher state that only produces tokens for the peer.
#[derive(Debug)]
pub struct Outbound<C> {
    cipher: C,
    sequence: SequenceNumber,
}

impl<C> Outbound<C> {
    pub(crate) fn new(cipher: C, sequence: SequenceNumber) -> Self {
        Self { cipher, sequence }
    }

    pub(crate) fn next_sequence_number(&mut self) -> u64 {
        self.sequence.advance()
    }

    pub(crate) fn cipher(&self) -> &C {
        &self.cipher
    }

    pub(crate) fn cipher_mut(&mut self) -> &mut C {
        &mut self.cipher
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence.peek()
    }
}

/// Cipher state that only consumes tokens produced by the peer.
#[derive(Debug)]
pub struct Inbound<C> {
    cipher: C,
    sequence: SequenceNumber,
}

impl<C> Inbound<C> {
    pub(crate) fn new(cipher: C, sequence: SequenceNumber) -> Self {
        Self { cipher, sequence }
    }

    pub(crate) fn next_sequence_number(&mut self) -> u64 {
        self.sequence.advance()
    }

    pub(crate) fn cipher(&self) -> &C {
        &self.cipher
    }

    pub(crate) fn cipher_mut(&mut self) -> &mut C {
        &mut self.cipher
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence.peek()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceState {
    pub outbound: u64,
    pub inbound: u64,
}

/// Returned by the `initialize` call that completes the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub mechanism: MechanismKind,
    pub session_key: Secret<Vec<u8>>,
    pub target_name: Option<String>,
    /// Capabilities actually provided by the established context.
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeResult {
    pub status: SecurityStatus,
    /// Token for the peer. May be empty on the final step.
    pub output: Vec<u8>,
    pub handshake: Option<HandshakeResult>,
}

impl InitializeResult {
    pub fn continue_needed(output: Vec<u8>) -> Self {
        Self {
            status: SecurityStatus::ContinueNeeded,
            output,
            handshake: None,
        }
    }

    pub fn complete(output: Vec<u8>, handshake: HandshakeResult) -> Self {
        Self {
            status: SecurityStatus::Complete,
            output,
            handshake: Some(handshake),
        }
    }
}

/// Contract shared by every mechanism.
///
/// A context is not safe for concurrent use: per-message calls mutate the cipher state
/// and sequence counters in place, so callers serialize access (one context per
/// connection).
pub trait Mechanism {
    fn kind(&self) -> MechanismKind;

    /// Advances the handshake with the peer's token, `None` on the first call.
    fn initialize(&mut self, input: Option<&[u8]>) -> Result<InitializeResult>;

    fn is_complete(&self) -> bool;

    /// Seals the non sign-only fragments in place and returns the detached signature
    /// covering all fragments in call order.
    fn wrap_ex(&mut self, buffers: &mut [SecurityBuffer]) -> Result<Vec<u8>>;

    /// Verifies `signature` over all fragments and unseals the sealed ones in place.
    fn unwrap_ex(&mut self, buffers: &mut [SecurityBuffer], signature: &[u8]) -> Result<()>;

    fn make_signature_ex(&mut self, buffers: &[SecurityBuffer]) -> Result<Vec<u8>>;

    fn verify_signature_ex(&mut self, buffers: &[SecurityBuffer], signature: &[u8]) -> Result<()>;

    /// Next outbound and inbound sequence numbers once the session exists.
    fn sequence_state(&self) -> Option<SequenceState>;

    /// Seals `payload` and returns the cipher text and its signature.
    fn wrap(&mut self, payload: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut buffers = [SecurityBuffer::data(payload)];
        let signature = self.wrap_ex(&mut buffers)?;
        let [buffer] = buffers;

        Ok((buffer.data, signature))
    }

    fn unwrap(&mut self, payload: &[u8], signature: &[u8]) -> Result<Vec<u8>> {
        let mut buffers = [SecurityBuffer::data(payload)];
        self.unwrap_ex(&mut buffers, signature)?;
        let [buffer] = buffers;

        Ok(buffer.data)
    }

    fn make_signature(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.make_signature_ex(&[SecurityBuffer::sign_only(payload)])
    }

    fn verify_signature(&mut self, payload: &[u8], signature: &[u8]) -> Result<()> {
        self.verify_signature_ex(&[SecurityBuffer::sign_only(payload)], signature)
    }
}

/// Fails unless the established context provides confidentiality.
pub(crate) fn ensure_confidentiality(capabilities: Capabilities) -> Result<()> {
    if capabilities.contains(Capabilities::CONFIDENTIALITY) {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::Unavailable,
            "confidentiality was not negotiated for this context",
        ))
    }
}

pub(crate) fn no_session() -> Error {
    Error::new(ErrorKind::NoContext, "the security context is not established yet")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_number_advances_by_step() {
        let mut sequence = SequenceNumber::new(1, 2);

        assert_eq!(sequence.advance(), 1);
        assert_eq!(sequence.advance(), 3);
        assert_eq!(sequence.peek(), 5);
    }

    #[test]
    fn sealed_fragments_are_scattered_back_in_order() {
        let mut buffers = vec![
            SecurityBuffer::data(vec![1, 2]),
            SecurityBuffer::sign_only(vec![9]),
            SecurityBuffer::data(vec![3, 4, 5]),
        ];

        assert_eq!(concat_sealed(&buffers), vec![1, 2, 3, 4, 5]);
        assert_eq!(concat_buffers(&buffers), vec![1, 2, 9, 3, 4, 5]);

        scatter_sealed(&mut buffers, &[6, 7, 8, 9, 10]).unwrap();

        assert_eq!(buffers[0].data, vec![6, 7]);
        assert_eq!(buffers[1].data, vec![9]);
        assert_eq!(buffers[2].data, vec![8, 9, 10]);
    }

    #[test]
    fn wrap_requires_confidentiality() {
        let err = ensure_confidentiality(Capabilities::INTEGRITY).unwrap_err();

        assert_eq!(err.error_type, ErrorKind::Unavailable);
        assert!(ensure_confidentiality(Capabilities::CONFIDENTIALITY).is_ok());
    }
}
