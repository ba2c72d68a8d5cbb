//! # Payer State Machine
//!
//! ```text
//! Idle ─▶ Discovering ─▶ Connecting ─▶ Handshaking ─▶ Sending ─▶ AwaitingAccept ─▶ Complete
//!              │              │              │            │              │
//!              └──────────────┴──────────────┴────────────┴──────────────┴──▶ Failed
//! ```
//!
//! A [`PayerSession`] is built from a scanned QR code. It refuses QR codes
//! that do not verify or are too old, pins the merchant's ephemeral key for
//! the handshake, and on receipt of an `ACCEPT` checks that the receipt is
//! signed by the very merchant identity that signed the QR.
//!
//! ## Pending payment
//!
//! A payment requested before the link is up is parked in a single slot and
//! sent the moment the session key exists. Asking for a second payment while
//! one is parked or in flight fails with [`PaymentError::PaymentPending`].
//!
//! ## Link loss
//!
//! Any failure once the link is up ends the session: the key is wiped and
//! the link closed, so nothing sent on the old link can reach a later
//! payment. The token stays in the wallet and the next payment
//! starts with a fresh connect.
//!
//! ## Double spending
//!
//! The spent token is deleted from the local ledger only after a valid
//! receipt arrives. That delete is the whole double-spend defence: a copy of
//! the token taken before acceptance could still be shown to a different
//! merchant. Offline bearer cash cannot do better without an issuer online.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::error::PaymentError;
use super::messages::{ProtocolMessage, TokenTransferMessage};
use crate::bootstrap::BootstrapPayload;
use crate::config::{now_millis, ProtocolConfig, EPHEMERAL_KEY_LENGTH};
use crate::crypto::custody::KeyCustody;
use crate::session::{Inbound, SecureSession};
use crate::transport::{EndpointCache, EndpointId, Transport, TransportError, TransportEvent};
use crate::wallet::{AcceptReceipt, MessageKind, Token, Transfer, WalletLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayerState {
    Idle,
    Discovering,
    Connecting,
    Handshaking,
    Sending,
    AwaitingAccept,
    Complete,
    Failed,
}

/// The paying side of one merchant interaction.
pub struct PayerSession<T: Transport> {
    transport: T,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    custody: Arc<dyn KeyCustody>,
    ledger: Arc<WalletLedger>,
    config: ProtocolConfig,
    bootstrap: BootstrapPayload,
    merchant_ephemeral: [u8; EPHEMERAL_KEY_LENGTH],
    cache: Arc<EndpointCache>,
    state: PayerState,
    endpoint: Option<EndpointId>,
    session: Option<SecureSession>,
    pending: Option<Token>,
    in_flight: Option<Token>,
}

impl<T: Transport> PayerSession<T> {
    /// Start a payer session for an already-decoded QR payload.
    ///
    /// # Errors
    ///
    /// `SignatureVerification` if the QR does not verify, `Expired` if it is
    /// older than `config.bootstrap_max_age`, `InvalidState` if the
    /// transport's event stream was already taken.
    pub fn new(
        transport: T,
        custody: Arc<dyn KeyCustody>,
        ledger: Arc<WalletLedger>,
        bootstrap: BootstrapPayload,
        config: ProtocolConfig,
    ) -> Result<Self, PaymentError> {
        bootstrap.validate(now_millis(), config.bootstrap_max_age())?;
        let merchant_ephemeral = bootstrap.ephemeral_key_bytes()?;
        let events = transport
            .take_events()
            .ok_or_else(|| PaymentError::InvalidState("transport events already taken".into()))?;

        debug!(
            pos_id = %bootstrap.pos_id,
            merchant = %bootstrap.merchant_public_key.short_hex(),
            "payer session created"
        );

        Ok(Self {
            transport,
            events,
            custody,
            ledger,
            config,
            bootstrap,
            merchant_ephemeral,
            cache: Arc::new(EndpointCache::default()),
            state: PayerState::Idle,
            endpoint: None,
            session: None,
            pending: None,
            in_flight: None,
        })
    }

    /// Decode scanned QR text and start a session from it.
    pub fn from_qr(
        transport: T,
        custody: Arc<dyn KeyCustody>,
        ledger: Arc<WalletLedger>,
        qr_text: &str,
        config: ProtocolConfig,
    ) -> Result<Self, PaymentError> {
        let bootstrap = BootstrapPayload::decode(qr_text)?;
        Self::new(transport, custody, ledger, bootstrap, config)
    }

    /// Share an endpoint cache across payer sessions.
    pub fn with_cache(mut self, cache: Arc<EndpointCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn state(&self) -> PayerState {
        self.state
    }

    pub fn bootstrap(&self) -> &BootstrapPayload {
        &self.bootstrap
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_established())
    }

    /// Whether a payment is parked waiting for the handshake.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn fail(&mut self, error: PaymentError) -> PaymentError {
        warn!(state = ?self.state, %error, "payment failed");
        self.state = PayerState::Failed;
        error
    }

    /// Fail and drop the link. The session key goes with it; the next
    /// payment needs a fresh connect.
    async fn abort(&mut self, error: PaymentError) -> PaymentError {
        self.in_flight = None;
        self.teardown().await;
        self.fail(error)
    }

    // -- Discovery ----------------------------------------------------------

    /// Find the merchant named in the QR code.
    ///
    /// A cached sighting younger than the cache TTL short-circuits the scan.
    /// Discovery is stopped when this returns, whatever the outcome; an
    /// endpoint that shows up later is ignored.
    pub async fn discover(&mut self) -> Result<EndpointId, PaymentError> {
        if let Some(id) = self.cache.lookup(&self.bootstrap.pos_id) {
            debug!(endpoint = %id, "using cached merchant endpoint");
            return Ok(id);
        }

        self.state = PayerState::Discovering;
        if let Err(e) = self.transport.discover(self.bootstrap.route()).await {
            return Err(self.fail(e.into()));
        }

        let wanted = self.bootstrap.endpoint_name();
        let events = &mut self.events;
        let cache = &self.cache;
        let found = timeout(self.config.discovery_timeout(), async {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::EndpointFound { id, name, .. } => {
                        cache.record(&id, &name);
                        if name == wanted {
                            return Some(id);
                        }
                    }
                    TransportEvent::EndpointLost { id } => cache.forget(&id),
                    other => trace!(?other, "ignored during discovery"),
                }
            }
            None
        })
        .await;

        if let Err(e) = self.transport.stop_discovery().await {
            debug!(error = %e, "stop_discovery failed");
        }

        match found {
            Ok(Some(id)) => {
                info!(endpoint = %id, pos_id = %self.bootstrap.pos_id, "merchant found");
                Ok(id)
            }
            Ok(None) => Err(self.fail(PaymentError::Disconnected)),
            Err(_) => Err(self.fail(PaymentError::Timeout("discovery"))),
        }
    }

    // -- Connection + handshake ---------------------------------------------

    /// Open the link and run the handshake, then flush any parked payment.
    pub async fn connect(&mut self, endpoint: EndpointId) -> Result<(), PaymentError> {
        if self.session.is_some() {
            return Err(PaymentError::InvalidState("already connected".into()));
        }

        // Anything still queued belongs to an earlier link, including the
        // Disconnected our own teardown produced.
        while let Ok(event) = self.events.try_recv() {
            match event {
                TransportEvent::Connected { id } => self.refuse(&id).await,
                other => trace!(?other, "discarding stale event"),
            }
        }

        self.state = PayerState::Connecting;
        if let Err(e) = self.transport.connect(&endpoint).await {
            return Err(self.fail(e.into()));
        }

        let result = match timeout(self.config.connect_timeout(), self.link_up(&endpoint)).await {
            Ok(r) => r,
            Err(_) => Err(PaymentError::Timeout("connect")),
        };
        if let Err(e) = result {
            self.pending = None;
            self.teardown().await;
            return Err(self.fail(e));
        }

        if let Some(token) = self.pending.take() {
            debug!(serial = %token.short_serial(), "flushing parked payment");
            self.send_transfer(token).await?;
        }
        Ok(())
    }

    async fn link_up(&mut self, endpoint: &EndpointId) -> Result<(), PaymentError> {
        loop {
            match self.events.recv().await.ok_or(PaymentError::Disconnected)? {
                TransportEvent::Connected { id } if &id == endpoint => break,
                TransportEvent::Connected { id } => self.refuse(&id).await,
                TransportEvent::ConnectionFailed { id, reason } if &id == endpoint => {
                    return Err(TransportError::Other(reason).into());
                }
                TransportEvent::Disconnected { id } if &id == endpoint => {
                    return Err(PaymentError::Disconnected);
                }
                other => trace!(?other, "ignored while connecting"),
            }
        }

        self.endpoint = Some(endpoint.clone());
        self.state = PayerState::Handshaking;
        let session = SecureSession::initiator_pinned(self.merchant_ephemeral);
        let hello = session.hello()?;
        self.session = Some(session);
        self.transport.send(endpoint, hello).await?;

        loop {
            match self.events.recv().await.ok_or(PaymentError::Disconnected)? {
                TransportEvent::Received { from, bytes } if &from == endpoint => {
                    let session = self.session.as_mut().ok_or(PaymentError::Disconnected)?;
                    match session.on_inbound(&bytes)? {
                        Inbound::Handshake { .. } => break,
                        Inbound::Application(_) => {
                            return Err(PaymentError::InvalidState(
                                "application data before handshake".into(),
                            ));
                        }
                    }
                }
                TransportEvent::Disconnected { id } if &id == endpoint => {
                    return Err(PaymentError::Disconnected);
                }
                TransportEvent::Connected { id } => self.refuse(&id).await,
                other => trace!(?other, "ignored while handshaking"),
            }
        }

        info!(pos_id = %self.bootstrap.pos_id, "secure session established");
        Ok(())
    }

    /// Drop a link nobody asked for, e.g. a connect that completed after
    /// its wait was abandoned.
    async fn refuse(&self, id: &EndpointId) {
        debug!(endpoint = %id, "dropping unexpected link");
        if let Err(e) = self.transport.disconnect(id).await {
            debug!(error = %e, "disconnect of unexpected link failed");
        }
    }

    async fn teardown(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.terminate();
        }
        self.session = None;
        if let Some(endpoint) = self.endpoint.take() {
            if let Err(e) = self.transport.disconnect(&endpoint).await {
                debug!(error = %e, "disconnect failed");
            }
        }
    }

    // -- Transfer -----------------------------------------------------------

    /// Pay with `token`, now if the session is up, otherwise as soon as it
    /// is.
    pub async fn request_payment(&mut self, token: Token) -> Result<(), PaymentError> {
        if self.pending.is_some() || self.in_flight.is_some() {
            return Err(PaymentError::PaymentPending);
        }
        if !self.ledger.contains(&token.serial) {
            return Err(PaymentError::InvalidState(format!(
                "token {} is not in the wallet",
                token.short_serial()
            )));
        }

        self.poll_link().await;
        if self.is_connected() {
            self.send_transfer(token).await
        } else {
            debug!(serial = %token.short_serial(), "payment parked until handshake");
            self.pending = Some(token);
            Ok(())
        }
    }

    /// Apply link events that queued up while nothing was waiting on them.
    async fn poll_link(&mut self) {
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        while let Ok(event) = self.events.try_recv() {
            match event {
                TransportEvent::Disconnected { id } if id == endpoint => {
                    info!(endpoint = %id, "merchant dropped the link");
                    self.abort(PaymentError::Disconnected).await;
                    return;
                }
                TransportEvent::Connected { id } if id != endpoint => self.refuse(&id).await,
                other => trace!(?other, "ignored while idle"),
            }
        }
    }

    async fn send_transfer(&mut self, token: Token) -> Result<(), PaymentError> {
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| PaymentError::InvalidState("not connected".into()))?;
        self.state = PayerState::Sending;

        let transfer = Transfer::sign(&*self.custody, &token, &self.bootstrap.pos_id)?;
        let frame =
            ProtocolMessage::TokenTransfer(TokenTransferMessage::new(token.clone(), transfer))
                .encode()?;
        let sealed = self
            .session
            .as_ref()
            .ok_or(PaymentError::Disconnected)?
            .seal(&frame)?;

        if let Err(e) = self.transport.send(&endpoint, sealed).await {
            return Err(self.abort(e.into()).await);
        }

        info!(serial = %token.short_serial(), amount = token.amount, "transfer sent");
        self.in_flight = Some(token);
        self.state = PayerState::AwaitingAccept;
        Ok(())
    }

    /// Wait for the merchant's receipt for the in-flight token.
    ///
    /// On success the token is removed from the ledger. On any failure the
    /// token stays where it is and the link is dropped, so a receipt that
    /// turns up later has nowhere to land.
    pub async fn await_accept(&mut self) -> Result<AcceptReceipt, PaymentError> {
        let Some(token) = self.in_flight.clone() else {
            return Err(PaymentError::InvalidState("no transfer in flight".into()));
        };

        let wait = self.config.accept_timeout();
        let outcome = match timeout(wait, self.next_accept(&token.serial)).await {
            Ok(r) => r,
            Err(_) => Err(PaymentError::Timeout("accept")),
        };
        self.in_flight = None;

        let receipt = match outcome.and_then(|r| self.check_receipt(r)) {
            Ok(r) => r,
            Err(e) => return Err(self.abort(e).await),
        };

        if let Err(e) = self.ledger.delete(&token.serial) {
            return Err(self.fail(e.into()));
        }
        self.state = PayerState::Complete;
        info!(serial = %token.short_serial(), amount = token.amount, "payment complete");
        Ok(receipt)
    }

    async fn next_accept(&mut self, serial: &str) -> Result<AcceptReceipt, PaymentError> {
        let endpoint = self.endpoint.clone().ok_or(PaymentError::Disconnected)?;
        loop {
            match self.events.recv().await.ok_or(PaymentError::Disconnected)? {
                TransportEvent::Received { from, bytes } if from == endpoint => {
                    let session = self.session.as_mut().ok_or(PaymentError::Disconnected)?;
                    let receipt = match session.on_inbound(&bytes)? {
                        Inbound::Application(plaintext) => match ProtocolMessage::decode(&plaintext)? {
                            ProtocolMessage::Accept(receipt) => receipt,
                            other => {
                                return Err(PaymentError::Parse(format!(
                                    "expected ACCEPT, got {:?}",
                                    other.kind()
                                )));
                            }
                        },
                        Inbound::Handshake { .. } => {
                            return Err(PaymentError::InvalidState(
                                "handshake frame on an established session".into(),
                            ));
                        }
                    };
                    if receipt.token_serial != serial {
                        debug!(serial = %receipt.token_serial, "ignoring receipt for another token");
                        continue;
                    }
                    return Ok(receipt);
                }
                TransportEvent::Disconnected { id } if id == endpoint => {
                    return Err(PaymentError::Disconnected);
                }
                TransportEvent::Connected { id } if id != endpoint => self.refuse(&id).await,
                other => trace!(?other, "ignored while awaiting accept"),
            }
        }
    }

    fn check_receipt(&self, receipt: AcceptReceipt) -> Result<AcceptReceipt, PaymentError> {
        if receipt.kind != MessageKind::Accept {
            return Err(PaymentError::Parse("receipt is not an ACCEPT".into()));
        }
        if !receipt.verify_signature() {
            return Err(PaymentError::SignatureVerification(
                "accept receipt signature".into(),
            ));
        }
        if receipt.pos_id != self.bootstrap.pos_id {
            return Err(PaymentError::SignatureVerification(
                "receipt from a different point of sale".into(),
            ));
        }
        if receipt.merchant_public_key != self.bootstrap.merchant_public_key {
            return Err(PaymentError::SignatureVerification(
                "receipt not signed by the scanned merchant".into(),
            ));
        }
        Ok(receipt)
    }

    // -- Convenience --------------------------------------------------------

    /// Pay `amount` with exact change: select tokens, connect if needed, and
    /// transfer them one by one over the same session.
    ///
    /// Stops at the first failure. Tokens already accepted stay spent; the
    /// rest stay in the wallet.
    pub async fn pay(&mut self, amount: u64) -> Result<Vec<AcceptReceipt>, PaymentError> {
        let available = self.ledger.balance();
        if amount > available {
            return Err(PaymentError::InsufficientFunds {
                requested: amount,
                available,
            });
        }
        let tokens = self.ledger.select_tokens_for_amount(amount)?;

        if !self.is_connected() {
            let endpoint = self.discover().await?;
            self.connect(endpoint).await?;
        }

        let mut receipts = Vec::with_capacity(tokens.len());
        for token in tokens {
            self.request_payment(token).await?;
            if self.pending.take().is_some() {
                // The link went down since the last receipt.
                return Err(self.fail(PaymentError::Disconnected));
            }
            receipts.push(self.await_accept().await?);
        }
        Ok(receipts)
    }

    /// Close the link and wipe the session. The wallet is not touched.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
        self.pending = None;
        self.in_flight = None;
        self.state = PayerState::Idle;
    }
}

impl<T: Transport> std::fmt::Debug for PayerSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayerSession")
            .field("pos_id", &self.bootstrap.pos_id)
            .field("state", &self.state)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
