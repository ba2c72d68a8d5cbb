//! End-to-end integration tests for the OFFCASH protocol.
//!
//! Every test runs a real payer and a real merchant against each other over
//! the in-memory transport: QR bootstrap, discovery, handshake, encrypted
//! transfer, receipt, and the ledger changes on both sides. The merchant
//! runs in its own task, exactly as it would behind a point-of-sale UI.
//! A few link-loss tests swap the merchant for a bare responder whose
//! timing they control.
//!
//! Each test builds its own devices and medium. No shared state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use offcash_protocol::bootstrap::BootstrapPayload;
use offcash_protocol::config::{
    ProtocolConfig, DEFAULT_ISSUER_ID, MERCHANT_ENDPOINT_PREFIX, PAYER_ENDPOINT_NAME,
};
use offcash_protocol::crypto::custody::{KeyCustody, SoftwareKeyCustody};
use offcash_protocol::crypto::pfs::EphemeralKeyPair;
use offcash_protocol::session::{Inbound, SecureSession};
use offcash_protocol::transfer::{
    MerchantEvent, MerchantSession, MerchantState, PayerSession, PayerState, PaymentError,
    ProtocolMessage,
};
use offcash_protocol::transport::{
    EndpointCache, MemoryMedium, MemoryTransport, Transport, TransportEvent,
};
use offcash_protocol::wallet::{
    AcceptReceipt, ChainProof, DeviceDb, LedgerError, Token, WalletLedger,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct Device {
    custody: Arc<SoftwareKeyCustody>,
    ledger: Arc<WalletLedger>,
}

fn device() -> Device {
    Device {
        custody: Arc::new(SoftwareKeyCustody::generate()),
        ledger: Arc::new(WalletLedger::in_memory()),
    }
}

impl Device {
    fn mint(&self, amount: u64) -> Token {
        self.ledger
            .mint(&*self.custody, amount, DEFAULT_ISSUER_ID)
            .expect("mint")
    }
}

fn fast_config() -> ProtocolConfig {
    ProtocolConfig {
        discovery_timeout_ms: 1_000,
        connect_timeout_ms: 1_000,
        accept_timeout_ms: 500,
        ..ProtocolConfig::default()
    }
}

/// Build a merchant, start advertising, and return its QR text.
async fn merchant(
    medium: &MemoryMedium,
    dev: &Device,
    pos_id: &str,
) -> (MerchantSession<MemoryTransport>, String) {
    let mut m = MerchantSession::with_pos_id(
        medium.endpoint("merchant"),
        dev.custody.clone(),
        dev.ledger.clone(),
        fast_config(),
        pos_id,
    )
    .expect("merchant");
    let qr = m.bootstrap_payload().expect("qr");
    m.start_advertising().await.expect("advertise");
    (m, qr)
}

/// Run the merchant in the background, forwarding its events.
fn spawn_merchant(
    mut m: MerchantSession<MemoryTransport>,
) -> (mpsc::UnboundedReceiver<MerchantEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        while let Ok(event) = m.next_event().await {
            if tx.send(event).is_err() {
                break;
            }
        }
    });
    (rx, task)
}

async fn next(events: &mut mpsc::UnboundedReceiver<MerchantEvent>) -> MerchantEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("merchant event in time")
        .expect("merchant task alive")
}

fn payer(medium: &MemoryMedium, dev: &Device, qr: &str) -> PayerSession<MemoryTransport> {
    PayerSession::from_qr(
        medium.endpoint(PAYER_ENDPOINT_NAME),
        dev.custody.clone(),
        dev.ledger.clone(),
        qr,
        fast_config(),
    )
    .expect("payer")
}

/// A bare responder standing in for a merchant: it completes the handshake
/// and answers every transfer with a signed ACCEPT, holding the first one
/// back for `delay`. It never files the token anywhere.
async fn slow_merchant(
    medium: &MemoryMedium,
    dev: &Device,
    pos_id: &str,
    delay: Duration,
) -> (String, JoinHandle<()>) {
    let transport = medium.endpoint("slow-merchant");
    let mut events = transport.take_events().expect("events");
    let ephemeral = EphemeralKeyPair::generate();
    let service_id = fast_config().service_id;
    let qr = BootstrapPayload::encode(
        &*dev.custody,
        pos_id,
        &ephemeral.public_key_bytes(),
        &service_id,
    )
    .expect("qr");
    transport
        .advertise(&format!("{MERCHANT_ENDPOINT_PREFIX}{pos_id}"), &service_id)
        .await
        .expect("advertise");

    let custody = dev.custody.clone();
    let pos_id = pos_id.to_string();
    let task = tokio::spawn(async move {
        let mut session: Option<SecureSession> = None;
        let mut delay = Some(delay);
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected { .. } => {
                    session = Some(SecureSession::responder(ephemeral.clone()));
                }
                TransportEvent::Received { from, bytes } => {
                    let Some(s) = session.as_mut() else {
                        continue;
                    };
                    let reply = match s.on_inbound(&bytes).expect("inbound") {
                        Inbound::Handshake { reply } => reply,
                        Inbound::Application(plaintext) => {
                            let Ok(ProtocolMessage::TokenTransfer(m)) =
                                ProtocolMessage::decode(&plaintext)
                            else {
                                continue;
                            };
                            let receipt = AcceptReceipt::sign(&*custody, &m.token.serial, &pos_id)
                                .expect("sign");
                            if let Some(d) = delay.take() {
                                tokio::time::sleep(d).await;
                            }
                            let frame = ProtocolMessage::Accept(receipt).encode().expect("encode");
                            Some(s.seal(&frame).expect("seal"))
                        }
                    };
                    // The payer may have hung up in the meantime.
                    if let Some(frame) = reply {
                        let _ = transport.send(&from, frame).await;
                    }
                }
                _ => {}
            }
        }
    });
    (qr, task)
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_token_payment_moves_token_with_chain_proof() {
    let medium = MemoryMedium::new();
    let alice = device();
    let shop = device();
    let token = alice.mint(100);

    let (m, qr) = merchant(&medium, &shop, "3f9a2c1e").await;
    let (mut events, _task) = spawn_merchant(m);

    let mut session = payer(&medium, &alice, &qr);
    assert_eq!(session.state(), PayerState::Idle);

    let endpoint = session.discover().await.expect("discover");
    session.connect(endpoint).await.expect("connect");
    assert!(session.is_connected());

    session.request_payment(token.clone()).await.expect("send");
    assert_eq!(session.state(), PayerState::AwaitingAccept);

    let receipt = session.await_accept().await.expect("accept");
    assert_eq!(session.state(), PayerState::Complete);
    assert_eq!(receipt.token_serial, token.serial);
    assert_eq!(receipt.pos_id, "3f9a2c1e");
    assert_eq!(receipt.merchant_public_key, shop.custody.public_key());

    // Payer no longer holds S1.
    assert!(!alice.ledger.contains(&token.serial));
    assert_eq!(alice.ledger.balance(), 0);

    // Merchant holds S1, untouched, with Transfer + Receipt attached.
    assert_eq!(shop.ledger.balance(), 100);
    let entry = shop.ledger.get(&token.serial).expect("merchant holds token");
    assert_eq!(entry.token, token);
    assert!(entry.token.verify_signature());
    let proof: ChainProof = entry.chain_proof.expect("chain proof");
    assert_eq!(proof.transfer_chain.len(), 1);
    assert_eq!(proof.transfer_chain[0].payer_public_key, alice.custody.public_key());
    assert_eq!(proof.accept_receipt, receipt);
    assert!(proof.verify_for(&token.serial));

    assert!(matches!(next(&mut events).await, MerchantEvent::ClientConnected { .. }));
    match next(&mut events).await {
        MerchantEvent::PaymentReceived {
            serial,
            amount,
            payer,
        } => {
            assert_eq!(serial, token.serial);
            assert_eq!(amount, 100);
            assert_eq!(payer, alice.custody.public_key());
        }
        other => panic!("unexpected {other:?}"),
    }

    session.disconnect().await;
    assert!(matches!(
        next(&mut events).await,
        MerchantEvent::ClientDisconnected { .. }
    ));
}

#[tokio::test]
async fn pay_uses_exact_change_over_one_session() {
    let medium = MemoryMedium::new();
    let alice = device();
    let shop = device();
    for amount in [500, 100, 100, 50] {
        alice.mint(amount);
    }

    let (m, qr) = merchant(&medium, &shop, "cafe0001").await;
    let (_events, _task) = spawn_merchant(m);
    let mut session = payer(&medium, &alice, &qr);

    let receipts = session.pay(150).await.expect("pay 150");
    assert_eq!(receipts.len(), 2);
    assert_eq!(alice.ledger.balance(), 600);
    assert_eq!(shop.ledger.balance(), 150);
    let mut received: Vec<u64> = shop.ledger.tokens().iter().map(|t| t.amount).collect();
    received.sort_unstable();
    assert_eq!(received, vec![50, 100]);

    // 500 + 100 left: greedy cannot make 300, and nothing moves.
    assert!(matches!(
        session.pay(300).await,
        Err(PaymentError::Ledger(LedgerError::NoExactCombination { target: 300 }))
    ));
    assert!(matches!(
        session.pay(10_000).await,
        Err(PaymentError::InsufficientFunds {
            requested: 10_000,
            available: 600
        })
    ));
    assert_eq!(alice.ledger.balance(), 600);
    assert_eq!(shop.ledger.balance(), 150);
}

#[tokio::test]
async fn parked_payment_flushes_after_handshake_and_second_is_refused() {
    let medium = MemoryMedium::new();
    let alice = device();
    let shop = device();
    let first = alice.mint(20);
    let second = alice.mint(10);

    let (m, qr) = merchant(&medium, &shop, "queue001").await;
    let (_events, _task) = spawn_merchant(m);
    let mut session = payer(&medium, &alice, &qr);

    session.request_payment(first.clone()).await.expect("park");
    assert!(session.has_pending());
    assert!(matches!(
        session.request_payment(second.clone()).await,
        Err(PaymentError::PaymentPending)
    ));

    let endpoint = session.discover().await.expect("discover");
    session.connect(endpoint).await.expect("connect");
    assert!(!session.has_pending());
    assert_eq!(session.state(), PayerState::AwaitingAccept);

    // Still one in flight.
    assert!(matches!(
        session.request_payment(second.clone()).await,
        Err(PaymentError::PaymentPending)
    ));

    session.await_accept().await.expect("accept");
    assert!(shop.ledger.contains(&first.serial));
    assert!(!alice.ledger.contains(&first.serial));
    assert!(alice.ledger.contains(&second.serial));
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tampered_token_is_rejected_without_mutation() {
    let medium = MemoryMedium::new();
    let alice = device();
    let shop = device();
    let token = alice.mint(5);

    let (m, qr) = merchant(&medium, &shop, "tamper01").await;
    let (mut events, _task) = spawn_merchant(m);
    let mut session = payer(&medium, &alice, &qr);

    let endpoint = session.discover().await.expect("discover");
    session.connect(endpoint).await.expect("connect");

    let mut forged = token.clone();
    forged.amount = 500;
    session.request_payment(forged).await.expect("send");
    assert!(matches!(
        session.await_accept().await,
        Err(PaymentError::Timeout("accept"))
    ));
    assert_eq!(session.state(), PayerState::Failed);
    assert!(!session.is_connected());

    assert!(matches!(next(&mut events).await, MerchantEvent::ClientConnected { .. }));
    assert!(matches!(
        next(&mut events).await,
        MerchantEvent::PaymentRejected {
            error: PaymentError::SignatureVerification(_)
        }
    ));

    assert!(shop.ledger.is_empty());
    assert_eq!(alice.ledger.balance(), 5);
    assert_eq!(alice.ledger.get(&token.serial).unwrap().token, token);
}

#[tokio::test]
async fn replayed_serial_is_refused_by_the_same_merchant() {
    let medium = MemoryMedium::new();
    let alice = device();
    let mallory = device();
    let shop = device();
    let token = alice.mint(50);

    let (m, qr) = merchant(&medium, &shop, "replay01").await;
    let (mut events, _task) = spawn_merchant(m);

    let mut session = payer(&medium, &alice, &qr);
    session.pay(50).await.expect("first spend");
    session.disconnect().await;

    // A copy taken before acceptance, shown to the same merchant again.
    let proof = shop.ledger.get(&token.serial).unwrap().chain_proof.unwrap();
    mallory.ledger.add_received(token.clone(), proof).unwrap();
    let mut replay = payer(&medium, &mallory, &qr);
    let endpoint = replay.discover().await.expect("discover");
    replay.connect(endpoint).await.expect("connect");
    replay.request_payment(token.clone()).await.expect("send");
    assert!(replay.await_accept().await.is_err());

    let mut saw_duplicate = false;
    for _ in 0..5 {
        if let MerchantEvent::PaymentRejected {
            error: PaymentError::Ledger(LedgerError::DuplicateSerial(s)),
        } = next(&mut events).await
        {
            assert_eq!(s, token.serial);
            saw_duplicate = true;
            break;
        }
    }
    assert!(saw_duplicate);
    assert_eq!(shop.ledger.balance(), 50);
    assert!(mallory.ledger.contains(&token.serial));
}

#[tokio::test]
async fn substituted_ephemeral_key_aborts_handshake() {
    let medium = MemoryMedium::new();
    let alice = device();
    let shop = device();
    let token = alice.mint(10);

    // The genuine merchant's QR, but it never comes on air.
    let genuine = MerchantSession::with_pos_id(
        medium.endpoint("genuine"),
        shop.custody.clone(),
        shop.ledger.clone(),
        fast_config(),
        "samepos1",
    )
    .unwrap();
    let qr = genuine.bootstrap_payload().unwrap();

    // An impostor advertising the same name with its own ephemeral key.
    let impostor_dev = device();
    let (impostor, _) = merchant(&medium, &impostor_dev, "samepos1").await;
    let (_events, _task) = spawn_merchant(impostor);

    let mut session = payer(&medium, &alice, &qr);
    let endpoint = session.discover().await.expect("discover");
    assert!(matches!(
        session.connect(endpoint).await,
        Err(PaymentError::KeyAgreement(_))
    ));
    assert_eq!(session.state(), PayerState::Failed);
    assert!(!session.is_connected());

    assert!(alice.ledger.contains(&token.serial));
    assert!(impostor_dev.ledger.is_empty());
}

#[tokio::test]
async fn forged_qr_is_refused_up_front() {
    let medium = MemoryMedium::new();
    let alice = device();
    let shop = device();
    let (m, qr) = merchant(&medium, &shop, "forge001").await;
    drop(m);

    let forged = qr.replace("forge001", "forge002");
    let result = PayerSession::from_qr(
        medium.endpoint(PAYER_ENDPOINT_NAME),
        alice.custody.clone(),
        alice.ledger.clone(),
        &forged,
        fast_config(),
    );
    assert!(matches!(
        result,
        Err(PaymentError::SignatureVerification(_))
    ));

    let garbage = PayerSession::from_qr(
        medium.endpoint(PAYER_ENDPOINT_NAME),
        alice.custody.clone(),
        alice.ledger.clone(),
        "definitely not a qr payload",
        fast_config(),
    );
    assert!(matches!(garbage, Err(PaymentError::Parse(_))));
}

#[tokio::test]
async fn second_payer_is_refused_while_first_is_attached() {
    let medium = MemoryMedium::new();
    let alice = device();
    let bob = device();
    let shop = device();
    alice.mint(2);
    bob.mint(1);

    let (m, qr) = merchant(&medium, &shop, "busy0001").await;
    let (_events, _task) = spawn_merchant(m);

    let mut first = payer(&medium, &alice, &qr);
    let endpoint = first.discover().await.expect("discover");
    first.connect(endpoint).await.expect("first connects");

    let mut second = payer(&medium, &bob, &qr);
    let endpoint = second.discover().await.expect("discover");
    assert!(second.connect(endpoint).await.is_err());
    assert_eq!(second.state(), PayerState::Failed);

    // The first payer is unaffected.
    first.pay(2).await.expect("first pays");
    assert_eq!(shop.ledger.balance(), 2);
    assert_eq!(bob.ledger.balance(), 1);
}

#[tokio::test]
async fn payer_vanishing_mid_handshake_does_not_stop_the_merchant() {
    let medium = MemoryMedium::new();
    let alice = device();
    let shop = device();
    let token = alice.mint(20);
    let (mut m, qr) = merchant(&medium, &shop, "9a0e1b2c").await;

    // A payer that says hello and leaves before the merchant answers.
    let ghost = medium.endpoint("ghost");
    let mut ghost_events = ghost.take_events().expect("events");
    ghost.discover(&fast_config().service_id).await.expect("discover");
    let target = match ghost_events.recv().await {
        Some(TransportEvent::EndpointFound { id, .. }) => id,
        other => panic!("expected the merchant, got {other:?}"),
    };
    ghost.connect(&target).await.expect("connect");
    let hello = SecureSession::initiator().hello().expect("hello");
    ghost.send(&target, hello).await.expect("send hello");
    ghost.disconnect(&target).await.expect("disconnect");

    assert!(matches!(
        m.next_event().await,
        Ok(MerchantEvent::ClientConnected { .. })
    ));
    match m.next_event().await {
        Ok(MerchantEvent::PaymentRejected {
            error: PaymentError::Transport(_),
        }) => {}
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert!(m.client().is_none());
    assert_eq!(m.state(), MerchantState::Advertising);

    // Still serving.
    let (mut events, _task) = spawn_merchant(m);
    let mut session = payer(&medium, &alice, &qr);
    let receipts = session.pay(20).await.expect("pay");
    assert_eq!(receipts.len(), 1);
    assert!(matches!(
        next(&mut events).await,
        MerchantEvent::ClientConnected { .. }
    ));
    assert!(matches!(
        next(&mut events).await,
        MerchantEvent::PaymentReceived { amount: 20, .. }
    ));
    assert!(!alice.ledger.contains(&token.serial));
    assert!(shop.ledger.contains(&token.serial));
}

// ---------------------------------------------------------------------------
// Link loss
// ---------------------------------------------------------------------------

#[tokio::test]
async fn merchant_dropping_an_idle_link_clears_the_payer_session() {
    let medium = MemoryMedium::new();
    let alice = device();
    let shop = device();
    let token = alice.mint(50);

    let (m, qr) = merchant(&medium, &shop, "d0d0cafe").await;
    let (_events, task) = spawn_merchant(m);

    let mut session = payer(&medium, &alice, &qr);
    let endpoint = session.discover().await.expect("discover");
    session.connect(endpoint).await.expect("connect");
    assert!(session.is_connected());

    task.abort();
    let _ = task.await;

    // Nothing goes out on a dead link; the payment waits for a new one.
    session.request_payment(token.clone()).await.expect("parked");
    assert!(!session.is_connected());
    assert!(session.has_pending());
    assert_eq!(session.state(), PayerState::Failed);
    assert!(alice.ledger.contains(&token.serial));
}

#[tokio::test]
async fn link_loss_while_awaiting_accept_keeps_the_token() {
    let medium = MemoryMedium::new();
    let alice = device();
    let shop = device();
    let token = alice.mint(10);

    let (qr, task) = slow_merchant(&medium, &shop, "5eed0001", Duration::from_secs(30)).await;
    let mut session = payer(&medium, &alice, &qr);
    let endpoint = session.discover().await.expect("discover");
    session.connect(endpoint.clone()).await.expect("connect");
    session.request_payment(token.clone()).await.expect("send");

    task.abort();
    let _ = task.await;

    assert!(matches!(
        session.await_accept().await,
        Err(PaymentError::Disconnected)
    ));
    assert!(!session.is_connected());
    assert_eq!(session.state(), PayerState::Failed);
    assert!(alice.ledger.contains(&token.serial));

    // The session is free for a new link. The merchant is gone, so this one
    // fails at the transport, not as "already connected".
    assert!(matches!(
        session.connect(endpoint).await,
        Err(PaymentError::Transport(_))
    ));
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn accept_timeout_drops_the_link_and_a_late_receipt_is_harmless() {
    let medium = MemoryMedium::new();
    let alice = device();
    let shop = device();
    let t1 = alice.mint(10);
    let t2 = alice.mint(5);

    let config = ProtocolConfig {
        accept_timeout_ms: 100,
        ..fast_config()
    };
    let (qr, _task) = slow_merchant(&medium, &shop, "1a7e0001", Duration::from_millis(150)).await;
    let mut session = PayerSession::from_qr(
        medium.endpoint(PAYER_ENDPOINT_NAME),
        alice.custody.clone(),
        alice.ledger.clone(),
        &qr,
        config,
    )
    .expect("payer");

    let endpoint = session.discover().await.expect("discover");
    session.connect(endpoint.clone()).await.expect("connect");
    session.request_payment(t1.clone()).await.expect("send t1");
    assert!(matches!(
        session.await_accept().await,
        Err(PaymentError::Timeout("accept"))
    ));
    assert!(!session.is_connected());
    assert!(alice.ledger.contains(&t1.serial));

    // Let the held-back ACCEPT for t1 go out into the void.
    tokio::time::sleep(Duration::from_millis(150)).await;

    session.connect(endpoint).await.expect("reconnect");
    session.request_payment(t2.clone()).await.expect("send t2");
    let receipt = session.await_accept().await.expect("accept t2");
    assert_eq!(receipt.token_serial, t2.serial);
    assert_eq!(session.state(), PayerState::Complete);

    // t1 was never confirmed, so the payer keeps it.
    assert!(alice.ledger.contains(&t1.serial));
    assert!(!alice.ledger.contains(&t2.serial));
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn discovery_times_out_and_a_fresh_attempt_succeeds() {
    let medium = MemoryMedium::new();
    let alice = device();
    let shop = device();

    let mut m = MerchantSession::with_pos_id(
        medium.endpoint("late"),
        shop.custody.clone(),
        shop.ledger.clone(),
        fast_config(),
        "late0001",
    )
    .unwrap();
    let qr = m.bootstrap_payload().unwrap();

    let config = ProtocolConfig {
        discovery_timeout_ms: 100,
        ..fast_config()
    };
    let mut session = PayerSession::from_qr(
        medium.endpoint(PAYER_ENDPOINT_NAME),
        alice.custody.clone(),
        alice.ledger.clone(),
        &qr,
        config,
    )
    .unwrap();

    assert!(matches!(
        session.discover().await,
        Err(PaymentError::Timeout("discovery"))
    ));
    assert_eq!(session.state(), PayerState::Failed);

    // The merchant shows up after the payer gave up: nothing happens to the
    // abandoned attempt.
    m.start_advertising().await.unwrap();
    assert_eq!(session.state(), PayerState::Failed);

    // A new attempt finds it.
    assert!(session.discover().await.is_ok());
}

#[tokio::test]
async fn shared_endpoint_cache_lets_the_next_session_skip_discovery() {
    let medium = MemoryMedium::new();
    let alice = device();
    let shop = device();
    let (mut m, qr) = merchant(&medium, &shop, "c0ffee01").await;
    let cache = Arc::new(EndpointCache::default());

    let mut first = payer(&medium, &alice, &qr).with_cache(cache.clone());
    let endpoint = first.discover().await.expect("discover");
    assert_eq!(cache.len(), 1);

    // Nobody is advertising any more, so only the cache can answer.
    m.stop_advertising().await.expect("stop advertising");
    let config = ProtocolConfig {
        discovery_timeout_ms: 50,
        ..fast_config()
    };
    let session = |cache: Option<Arc<EndpointCache>>| {
        let s = PayerSession::from_qr(
            medium.endpoint(PAYER_ENDPOINT_NAME),
            alice.custody.clone(),
            alice.ledger.clone(),
            &qr,
            config.clone(),
        )
        .expect("payer");
        match cache {
            Some(c) => s.with_cache(c),
            None => s,
        }
    };

    let mut second = session(Some(cache.clone()));
    assert_eq!(second.discover().await.expect("cached"), endpoint);
    assert_eq!(second.state(), PayerState::Idle);

    let mut third = session(None);
    assert!(matches!(
        third.discover().await,
        Err(PaymentError::Timeout("discovery"))
    ));
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sled_ledgers_reload_identically_after_payment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let payer_dir = dir.path().join("payer");
    let shop_dir = dir.path().join("shop");

    let alice_key = Arc::new(SoftwareKeyCustody::generate());
    let shop_key = Arc::new(SoftwareKeyCustody::generate());

    let (alice_before, shop_before, spent) = {
        let alice_db = DeviceDb::open(&payer_dir).unwrap();
        let shop_db = DeviceDb::open(&shop_dir).unwrap();
        let alice = Device {
            custody: alice_key.clone(),
            ledger: Arc::new(WalletLedger::open(Box::new(alice_db.ledger_store())).unwrap()),
        };
        let shop = Device {
            custody: shop_key.clone(),
            ledger: Arc::new(WalletLedger::open(Box::new(shop_db.ledger_store())).unwrap()),
        };
        let spent = alice.mint(200);
        alice.mint(20);

        let medium = MemoryMedium::new();
        let (m, qr) = merchant(&medium, &shop, "persist1").await;
        let (_events, task) = spawn_merchant(m);
        let mut session = payer(&medium, &alice, &qr);
        session.pay(200).await.expect("pay");
        session.disconnect().await;

        // sled holds a file lock until every handle on the database is gone,
        // including the one inside the merchant task.
        task.abort();
        let _ = task.await;

        (alice.ledger.entries(), shop.ledger.entries(), spent)
    };

    let alice_db = DeviceDb::open(&payer_dir).unwrap();
    let shop_db = DeviceDb::open(&shop_dir).unwrap();
    let alice = WalletLedger::open(Box::new(alice_db.ledger_store())).unwrap();
    let shop = WalletLedger::open(Box::new(shop_db.ledger_store())).unwrap();

    assert_eq!(alice.entries(), alice_before);
    assert_eq!(shop.entries(), shop_before);
    assert_eq!(alice.balance(), 20);
    assert!(!alice.contains(&spent.serial));
    let proof = shop.get(&spent.serial).unwrap().chain_proof.unwrap();
    assert!(proof.verify_for(&spent.serial));
}
