//! # Merchant State Machine
//!
//! ```text
//! Idle ─▶ Advertising ─▶ ClientConnected ─▶ Handshaking ─▶ AwaitingTransfer ─▶ Verifying
//!              ▲                                                  ▲              │
//!              │                                                  └─ Accepted ◀──┤
//!              │                                                  └─ Rejected ◀──┘
//!              └───────────────────────── Disconnected ◀── (client leaves)
//! ```
//!
//! A [`MerchantSession`] owns one ephemeral key pair for as long as its QR
//! code is displayed and serves one payer at a time. A second payer that
//! connects while the first is still attached is disconnected on the spot.
//!
//! ## What gets checked before a token is accepted
//!
//! 1. The transfer signature, under the payer key it names.
//! 2. The transfer names this token and this point of sale.
//! 3. The token's mint signature: a token edited after minting is refused.
//! 4. The amount is a real denomination.
//! 5. The serial is not already in this ledger.
//!
//! Only then is the receipt signed, the token filed with its chain proof,
//! and the `ACCEPT` sent. A rejected transfer changes nothing and gets no
//! reply; the payer's accept timeout covers that case.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::PaymentError;
use super::messages::{ProtocolMessage, TokenTransferMessage};
use crate::bootstrap::{generate_pos_id, BootstrapPayload};
use crate::config::{is_valid_denomination, ProtocolConfig, MERCHANT_ENDPOINT_PREFIX};
use crate::crypto::custody::KeyCustody;
use crate::crypto::keys::IdentityPublicKey;
use crate::crypto::pfs::EphemeralKeyPair;
use crate::session::{Inbound, SecureSession};
use crate::transport::{EndpointId, Transport, TransportEvent};
use crate::wallet::{AcceptReceipt, ChainProof, LedgerError, MessageKind, WalletLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MerchantState {
    Idle,
    Advertising,
    ClientConnected,
    Handshaking,
    AwaitingTransfer,
    Verifying,
    Accepted,
    Rejected,
    Disconnected,
}

/// Something the point-of-sale UI should know about.
#[derive(Debug)]
pub enum MerchantEvent {
    ClientConnected {
        endpoint: EndpointId,
    },
    /// The token is in the ledger and the `ACCEPT` is on its way.
    PaymentReceived {
        serial: String,
        amount: u64,
        payer: IdentityPublicKey,
    },
    PaymentRejected {
        error: PaymentError,
    },
    ClientDisconnected {
        endpoint: EndpointId,
    },
}

/// The receiving side: a point of sale.
pub struct MerchantSession<T: Transport> {
    transport: T,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    custody: Arc<dyn KeyCustody>,
    ledger: Arc<WalletLedger>,
    config: ProtocolConfig,
    pos_id: String,
    ephemeral: EphemeralKeyPair,
    state: MerchantState,
    advertising: bool,
    client: Option<EndpointId>,
    session: Option<SecureSession>,
}

impl<T: Transport> MerchantSession<T> {
    /// A merchant with a freshly generated pos id.
    pub fn new(
        transport: T,
        custody: Arc<dyn KeyCustody>,
        ledger: Arc<WalletLedger>,
        config: ProtocolConfig,
    ) -> Result<Self, PaymentError> {
        Self::with_pos_id(transport, custody, ledger, config, generate_pos_id())
    }

    pub fn with_pos_id(
        transport: T,
        custody: Arc<dyn KeyCustody>,
        ledger: Arc<WalletLedger>,
        config: ProtocolConfig,
        pos_id: impl Into<String>,
    ) -> Result<Self, PaymentError> {
        let pos_id = pos_id.into();
        if pos_id.is_empty() {
            return Err(PaymentError::InvalidState("empty pos id".into()));
        }
        let events = transport
            .take_events()
            .ok_or_else(|| PaymentError::InvalidState("transport events already taken".into()))?;

        Ok(Self {
            transport,
            events,
            custody,
            ledger,
            config,
            pos_id,
            ephemeral: EphemeralKeyPair::generate(),
            state: MerchantState::Idle,
            advertising: false,
            client: None,
            session: None,
        })
    }

    pub fn pos_id(&self) -> &str {
        &self.pos_id
    }

    pub fn state(&self) -> MerchantState {
        self.state
    }

    pub fn client(&self) -> Option<&EndpointId> {
        self.client.as_ref()
    }

    /// The name this merchant advertises under.
    pub fn endpoint_name(&self) -> String {
        format!("{MERCHANT_ENDPOINT_PREFIX}{}", self.pos_id)
    }

    /// Signed QR text for this merchant's current ephemeral key.
    pub fn bootstrap_payload(&self) -> Result<String, PaymentError> {
        Ok(BootstrapPayload::encode(
            &*self.custody,
            &self.pos_id,
            &self.ephemeral.public_key_bytes(),
            &self.config.service_id,
        )?)
    }

    pub async fn start_advertising(&mut self) -> Result<(), PaymentError> {
        self.transport
            .advertise(&self.endpoint_name(), &self.config.service_id)
            .await?;
        self.advertising = true;
        if self.client.is_none() {
            self.state = MerchantState::Advertising;
        }
        info!(pos_id = %self.pos_id, "advertising");
        Ok(())
    }

    pub async fn stop_advertising(&mut self) -> Result<(), PaymentError> {
        self.transport.stop_advertising().await?;
        self.advertising = false;
        if self.client.is_none() {
            self.state = MerchantState::Idle;
        }
        Ok(())
    }

    /// Drive the session until something worth reporting happens.
    ///
    /// Returns `Err(Disconnected)` only when the transport itself has gone
    /// away. Per-payment failures come back as
    /// [`MerchantEvent::PaymentRejected`].
    pub async fn next_event(&mut self) -> Result<MerchantEvent, PaymentError> {
        if matches!(self.state, MerchantState::Accepted | MerchantState::Rejected) {
            self.state = MerchantState::AwaitingTransfer;
        }

        loop {
            let event = self.events.recv().await.ok_or(PaymentError::Disconnected)?;
            match event {
                TransportEvent::Connected { id } => {
                    if self.client.is_some() {
                        warn!(endpoint = %id, "refusing second payer");
                        if let Err(e) = self.transport.disconnect(&id).await {
                            debug!(error = %e, "disconnect of refused payer failed");
                        }
                        continue;
                    }
                    info!(endpoint = %id, "payer connected");
                    self.client = Some(id.clone());
                    self.session = Some(SecureSession::responder(self.ephemeral.clone()));
                    self.state = MerchantState::ClientConnected;
                    return Ok(MerchantEvent::ClientConnected { endpoint: id });
                }
                TransportEvent::Received { from, bytes } => {
                    if self.client.as_ref() != Some(&from) {
                        debug!(endpoint = %from, "frame from unknown endpoint ignored");
                        continue;
                    }
                    if let Some(event) = self.on_frame(&from, &bytes).await? {
                        return Ok(event);
                    }
                }
                TransportEvent::Disconnected { id } => {
                    if self.client.as_ref() == Some(&id) {
                        self.drop_client();
                        info!(endpoint = %id, "payer disconnected");
                        return Ok(MerchantEvent::ClientDisconnected { endpoint: id });
                    }
                }
                _ => {}
            }
        }
    }

    async fn on_frame(
        &mut self,
        from: &EndpointId,
        frame: &[u8],
    ) -> Result<Option<MerchantEvent>, PaymentError> {
        let inbound = match self.session.as_mut() {
            Some(session) => session.on_inbound(frame),
            None => return Ok(None),
        };

        match inbound {
            Ok(Inbound::Handshake { reply }) => {
                self.state = MerchantState::Handshaking;
                if let Some(reply) = reply {
                    if let Err(e) = self.transport.send(from, reply).await {
                        let error = PaymentError::from(e);
                        warn!(%error, endpoint = %from, "handshake reply lost, dropping payer");
                        self.disconnect_client().await;
                        return Ok(Some(MerchantEvent::PaymentRejected { error }));
                    }
                }
                self.state = MerchantState::AwaitingTransfer;
                debug!(endpoint = %from, "handshake complete");
                Ok(None)
            }
            Ok(Inbound::Application(plaintext)) => {
                self.state = MerchantState::Verifying;
                match self.accept_transfer(from, &plaintext).await {
                    Ok(event) => {
                        self.state = MerchantState::Accepted;
                        Ok(Some(event))
                    }
                    Err(error) => {
                        warn!(%error, "transfer rejected");
                        self.state = MerchantState::Rejected;
                        Ok(Some(MerchantEvent::PaymentRejected { error }))
                    }
                }
            }
            Err(e) => {
                // The session is already terminated; the link is useless.
                let error = PaymentError::from(e);
                warn!(%error, endpoint = %from, "dropping payer");
                self.disconnect_client().await;
                Ok(Some(MerchantEvent::PaymentRejected { error }))
            }
        }
    }

    async fn accept_transfer(
        &mut self,
        from: &EndpointId,
        plaintext: &[u8],
    ) -> Result<MerchantEvent, PaymentError> {
        let message = match ProtocolMessage::decode(plaintext)? {
            ProtocolMessage::TokenTransfer(m) => m,
            other => {
                return Err(PaymentError::Parse(format!(
                    "expected TOKEN_TRANSFER, got {:?}",
                    other.kind()
                )));
            }
        };
        self.verify_transfer(&message)?;

        let TokenTransferMessage {
            token, transfer, ..
        } = message;
        let receipt = AcceptReceipt::sign(&*self.custody, &token.serial, &self.pos_id)?;
        let serial = token.serial.clone();
        let amount = token.amount;
        let payer = transfer.payer_public_key;

        self.ledger
            .add_received(token, ChainProof::single_hop(transfer, receipt.clone()))?;

        let frame = ProtocolMessage::Accept(receipt).encode()?;
        let sealed = self
            .session
            .as_ref()
            .ok_or(PaymentError::Disconnected)?
            .seal(&frame)?;
        if let Err(e) = self.transport.send(from, sealed).await {
            // The token is ours now, but the payer will not learn that and
            // keeps its copy. Surface it loudly.
            warn!(serial = %serial, error = %e, "token filed but ACCEPT not delivered");
            return Err(e.into());
        }

        info!(serial = %serial, amount, payer = %payer.short_hex(), "payment accepted");
        Ok(MerchantEvent::PaymentReceived {
            serial,
            amount,
            payer,
        })
    }

    fn verify_transfer(&self, message: &TokenTransferMessage) -> Result<(), PaymentError> {
        let TokenTransferMessage {
            kind,
            token,
            transfer,
        } = message;

        if *kind != MessageKind::TokenTransfer || transfer.kind != MessageKind::TokenTransfer {
            return Err(PaymentError::Parse("not a TOKEN_TRANSFER".into()));
        }
        if !transfer.verify_signature() {
            return Err(PaymentError::SignatureVerification(
                "transfer signature".into(),
            ));
        }
        if transfer.token_serial != token.serial {
            return Err(PaymentError::Parse(
                "transfer names a different token".into(),
            ));
        }
        if transfer.pos_id != self.pos_id {
            return Err(PaymentError::Parse(
                "transfer addressed to another point of sale".into(),
            ));
        }
        if !token.verify_signature() {
            return Err(PaymentError::SignatureVerification(
                "token mint signature".into(),
            ));
        }
        if !is_valid_denomination(token.amount) {
            return Err(PaymentError::Parse(format!(
                "{} is not a denomination",
                token.amount
            )));
        }
        if self.ledger.contains(&token.serial) {
            return Err(LedgerError::DuplicateSerial(token.serial.clone()).into());
        }
        Ok(())
    }

    fn drop_client(&mut self) {
        self.client = None;
        if let Some(session) = self.session.as_mut() {
            session.terminate();
        }
        self.session = None;
        self.state = if self.advertising {
            MerchantState::Advertising
        } else {
            MerchantState::Disconnected
        };
    }

    /// Disconnect the current payer, if any. Advertising continues.
    pub async fn disconnect_client(&mut self) {
        if let Some(id) = self.client.clone() {
            if let Err(e) = self.transport.disconnect(&id).await {
                debug!(error = %e, "disconnect failed");
            }
        }
        self.drop_client();
    }

    /// Stop advertising and drop the payer.
    pub async fn shutdown(&mut self) {
        self.disconnect_client().await;
        if self.advertising {
            if let Err(e) = self.stop_advertising().await {
                debug!(error = %e, "stop_advertising failed");
            }
        }
        self.state = MerchantState::Disconnected;
    }
}

impl<T: Transport> std::fmt::Debug for MerchantSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantSession")
            .field("pos_id", &self.pos_id)
            .field("state", &self.state)
            .field("client", &self.client)
            .finish()
    }
}
