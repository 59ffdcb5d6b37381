//! Connection states and the transition discipline.

use std::sync::Mutex;

use crate::protocol::ErrorKind;

/// The stage a connection is in.
///
/// A connection walks the non-terminal states in order and stops at the
/// first terminal one. The only backwards transitions are the two resets:
/// redirect chaining and the one-shot restart after a stale keep-alive
/// socket, both of which re-enter [`ConnState::Resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Init,
    Resolve,
    Connect,
    Handshake,
    Write,
    ReadStatus,
    ReadHeaders,
    ReadContentLength,
    ReadChunkHeader,
    ReadChunkData,
    ReadUntilEof,
    Success,
    ResolveError,
    ConnectError,
    HandshakeError,
    WriteError,
    ReadStatusError,
    ReadStatusDataError,
    ReadHeadersError,
    ReadContentLengthError,
    ReadChunkHeaderError,
    ReadChunkDataError,
    ReadUntilEofError,
    RedirectError,
    RedirectExhausted,
    Timeout,
    /// The dispose window has elapsed; the connection is collectible.
    Expired,
}

impl ConnState {
    /// Returns true for states that admit no further progress. The dispose
    /// timer may still move a terminal connection to [`ConnState::Expired`].
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnState::Success
                | ConnState::ResolveError
                | ConnState::ConnectError
                | ConnState::HandshakeError
                | ConnState::WriteError
                | ConnState::ReadStatusError
                | ConnState::ReadStatusDataError
                | ConnState::ReadHeadersError
                | ConnState::ReadContentLengthError
                | ConnState::ReadChunkHeaderError
                | ConnState::ReadChunkDataError
                | ConnState::ReadUntilEofError
                | ConnState::RedirectError
                | ConnState::RedirectExhausted
                | ConnState::Timeout
                | ConnState::Expired
        )
    }

    /// The error kind reported for a terminal state, `None` for
    /// non-terminal states and for [`ConnState::Expired`].
    pub(crate) fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ConnState::Success => Some(ErrorKind::Success),
            ConnState::ResolveError => Some(ErrorKind::Resolve),
            ConnState::ConnectError => Some(ErrorKind::Connect),
            ConnState::HandshakeError => Some(ErrorKind::Handshake),
            ConnState::WriteError => Some(ErrorKind::Write),
            ConnState::ReadStatusError => Some(ErrorKind::ReadStatus),
            ConnState::ReadStatusDataError => Some(ErrorKind::ReadStatusData),
            ConnState::ReadHeadersError => Some(ErrorKind::ReadHeaders),
            ConnState::ReadContentLengthError => Some(ErrorKind::ReadContentLength),
            ConnState::ReadChunkHeaderError => Some(ErrorKind::ReadChunkHeader),
            ConnState::ReadChunkDataError => Some(ErrorKind::ReadChunkData),
            ConnState::ReadUntilEofError => Some(ErrorKind::ReadUntilEof),
            ConnState::RedirectError => Some(ErrorKind::Redirect),
            ConnState::RedirectExhausted => Some(ErrorKind::RedirectExhausted),
            ConnState::Timeout => Some(ErrorKind::Timeout),
            _ => None,
        }
    }
}

/// Shared, guarded state slot.
///
/// Transitions are accepted while the current state is non-terminal.
/// A terminal state is absorbing with a single exception: anything may
/// move to [`ConnState::Expired`], which the dispose timer uses to mark a
/// finished connection collectible. Expired itself only re-accepts
/// Expired, so the set is idempotent there.
pub(crate) struct StateCell {
    inner: Mutex<ConnState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self { inner: Mutex::new(ConnState::Init) }
    }

    pub(crate) fn get(&self) -> ConnState {
        *self.inner.lock().unwrap()
    }

    pub(crate) fn set(&self, next: ConnState) {
        let mut current = self.inner.lock().unwrap();
        if !current.is_terminal() || next == ConnState::Expired {
            *current = next;
        }
    }
}
