//! # Secure Session
//!
//! Per-connection handshake and AEAD framing.
//!
//! ```text
//!   initiator (payer)                      responder (merchant)
//!   ---------------------------------------------------------------
//!   hello(): raw X25519 pub  ───────────▶  on_inbound(): ECDH + HKDF
//!   on_inbound(): ECDH + HKDF ◀──────────  reply: raw X25519 pub
//!   ════════════ every later frame is nonce || ct || tag ════════════
//! ```
//!
//! The responder's key pair is the one shown in the QR code. An initiator
//! seeded from a verified QR pins that key: if the bytes arriving over the
//! radio differ, the handshake fails. Without that check a relay could
//! answer with its own key and read the whole exchange.
//!
//! Any handshake or decryption failure terminates the session. There is no
//! retry and no way back: build a new session for a new connection.

use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::config::EPHEMERAL_KEY_LENGTH;
use crate::crypto::encryption::{aead_decrypt, aead_encrypt};
use crate::crypto::pfs::{agree_session_key, EphemeralKeyPair, SessionKey};

/// Errors raised by [`SecureSession`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("key agreement failed: {0}")]
    KeyAgreement(String),

    #[error("message authentication failed")]
    Authentication,

    #[error("session key not yet established")]
    NotEstablished,

    #[error("session terminated")]
    Terminated,

    #[error("encryption failed")]
    Encryption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingPeerKey,
    KeyEstablished,
    Terminated,
}

/// What an inbound frame turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// The peer's handshake key. The responder must send `reply` back.
    Handshake { reply: Option<Vec<u8>> },
    /// Decrypted application data.
    Application(Vec<u8>),
}

/// One end of an encrypted link.
pub struct SecureSession {
    role: Role,
    state: SessionState,
    local: Option<EphemeralKeyPair>,
    peer_key: Option<[u8; EPHEMERAL_KEY_LENGTH]>,
    expected_peer: Option<[u8; EPHEMERAL_KEY_LENGTH]>,
    key: Option<SessionKey>,
}

impl SecureSession {
    /// Initiator with a fresh key pair and no pinned peer.
    pub fn initiator() -> Self {
        Self::new(Role::Initiator, EphemeralKeyPair::generate(), None)
    }

    /// Initiator that only accepts `expected_peer` as the responder's key.
    pub fn initiator_pinned(expected_peer: [u8; EPHEMERAL_KEY_LENGTH]) -> Self {
        Self::new(
            Role::Initiator,
            EphemeralKeyPair::generate(),
            Some(expected_peer),
        )
    }

    /// Responder using the key pair advertised in the QR code.
    pub fn responder(local: EphemeralKeyPair) -> Self {
        Self::new(Role::Responder, local, None)
    }

    fn new(
        role: Role,
        local: EphemeralKeyPair,
        expected_peer: Option<[u8; EPHEMERAL_KEY_LENGTH]>,
    ) -> Self {
        Self {
            role,
            state: SessionState::AwaitingPeerKey,
            local: Some(local),
            peer_key: None,
            expected_peer,
            key: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::KeyEstablished
    }

    /// The first handshake frame: our raw ephemeral public key.
    pub fn hello(&self) -> Result<Vec<u8>, SessionError> {
        match (&self.state, &self.local) {
            (SessionState::Terminated, _) | (_, None) => Err(SessionError::Terminated),
            (_, Some(local)) => Ok(local.public_key_bytes().to_vec()),
        }
    }

    /// Feed one inbound frame through the session.
    ///
    /// # Errors
    ///
    /// [`SessionError::KeyAgreement`] for a malformed, low-order or
    /// unexpected peer key; [`SessionError::Authentication`] for a frame
    /// that does not decrypt. Both terminate the session.
    pub fn on_inbound(&mut self, frame: &[u8]) -> Result<Inbound, SessionError> {
        match self.state {
            SessionState::Terminated => Err(SessionError::Terminated),
            SessionState::AwaitingPeerKey => self.complete_handshake(frame),
            SessionState::KeyEstablished => {
                let key = self.key.as_ref().ok_or(SessionError::NotEstablished)?;
                match aead_decrypt(key.as_bytes(), frame, None) {
                    Ok(plaintext) => Ok(Inbound::Application(plaintext)),
                    Err(e) => {
                        warn!(role = ?self.role, error = %e, "dropping session after bad frame");
                        self.terminate();
                        Err(SessionError::Authentication)
                    }
                }
            }
        }
    }

    fn complete_handshake(&mut self, frame: &[u8]) -> Result<Inbound, SessionError> {
        if let Some(expected) = self.expected_peer {
            if frame != expected.as_slice() {
                self.terminate();
                return Err(SessionError::KeyAgreement(
                    "peer key does not match the scanned QR code".into(),
                ));
            }
        }

        let (agreed, local_public) = {
            let local = self.local.as_ref().ok_or(SessionError::Terminated)?;
            (agree_session_key(local, frame), local.public_key_bytes())
        };
        let key = match agreed {
            Ok(key) => key,
            Err(e) => {
                self.terminate();
                return Err(SessionError::KeyAgreement(e.to_string()));
            }
        };

        let mut peer = [0u8; EPHEMERAL_KEY_LENGTH];
        peer.copy_from_slice(frame);
        let reply = match self.role {
            Role::Responder => Some(local_public.to_vec()),
            Role::Initiator => None,
        };

        self.peer_key = Some(peer);
        self.key = Some(key);
        self.state = SessionState::KeyEstablished;
        debug!(role = ?self.role, peer = %hex::encode(&peer[..4]), "session key established");

        Ok(Inbound::Handshake { reply })
    }

    /// Encrypt an application frame.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        match self.state {
            SessionState::Terminated => Err(SessionError::Terminated),
            SessionState::AwaitingPeerKey => Err(SessionError::NotEstablished),
            SessionState::KeyEstablished => {
                let key = self.key.as_ref().ok_or(SessionError::NotEstablished)?;
                aead_encrypt(key.as_bytes(), plaintext, None).map_err(|_| SessionError::Encryption)
            }
        }
    }

    /// Wipe all key material. Idempotent.
    pub fn terminate(&mut self) {
        self.key = None;
        self.local = None;
        if let Some(mut peer) = self.peer_key.take() {
            peer.zeroize();
        }
        self.state = SessionState::Terminated;
    }
}

impl Drop for SecureSession {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("role", &self.role)
            .field("state", &self.state)
            .finish()
    }
}
