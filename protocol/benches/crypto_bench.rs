// Cryptography benchmarks for the OFFCASH protocol.
//
// Covers the per-payment hot path: Ed25519 signing and verification of
// tokens and transfers, the X25519 + HKDF handshake, AES-256-GCM sealing,
// and bootstrap payload verification.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use offcash_protocol::bootstrap::BootstrapPayload;
use offcash_protocol::config::{DEFAULT_ISSUER_ID, SERVICE_ID};
use offcash_protocol::crypto::custody::SoftwareKeyCustody;
use offcash_protocol::crypto::keys::IdentityKeypair;
use offcash_protocol::crypto::pfs::{agree_session_key, EphemeralKeyPair};
use offcash_protocol::crypto::{aead_decrypt, aead_encrypt, sign, verify};
use offcash_protocol::wallet::{Token, Transfer};

fn bench_sign_verify(c: &mut Criterion) {
    let keypair = IdentityKeypair::generate();
    let message = b"TOKEN_TRANSFER 3f9a2c1e 100";
    let signature = sign(&keypair, message);
    let public_key = keypair.public_key();

    c.bench_function("ed25519/sign", |b| {
        b.iter(|| sign(&keypair, message));
    });
    c.bench_function("ed25519/verify", |b| {
        b.iter(|| verify(&public_key, message, &signature));
    });
}

fn bench_token(c: &mut Criterion) {
    let custody = SoftwareKeyCustody::generate();
    let token = Token::mint(&custody, 100, DEFAULT_ISSUER_ID).unwrap();

    c.bench_function("token/mint", |b| {
        b.iter(|| Token::mint(&custody, 100, DEFAULT_ISSUER_ID).unwrap());
    });
    c.bench_function("token/verify", |b| {
        b.iter(|| token.verify_signature());
    });
    c.bench_function("transfer/sign", |b| {
        b.iter(|| Transfer::sign(&custody, &token, "3f9a2c1e").unwrap());
    });
}

fn bench_handshake(c: &mut Criterion) {
    let merchant = EphemeralKeyPair::generate();
    let merchant_public = merchant.public_key_bytes();

    c.bench_function("x25519_hkdf/agree_session_key", |b| {
        b.iter(|| {
            let payer = EphemeralKeyPair::generate();
            agree_session_key(&payer, &merchant_public).unwrap()
        });
    });
}

fn bench_aead(c: &mut Criterion) {
    let key = [0x42u8; 32];
    let mut group = c.benchmark_group("aes256gcm/seal_open");

    // A TOKEN_TRANSFER frame is a little under 1 KiB.
    for size in [256usize, 1024, 4096] {
        let plaintext = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &plaintext, |b, pt| {
            b.iter(|| {
                let sealed = aead_encrypt(&key, pt, None).unwrap();
                aead_decrypt(&key, &sealed, None).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_bootstrap(c: &mut Criterion) {
    let custody = SoftwareKeyCustody::generate();
    let ephemeral = EphemeralKeyPair::generate();
    let qr = BootstrapPayload::encode(
        &custody,
        "3f9a2c1e",
        &ephemeral.public_key_bytes(),
        SERVICE_ID,
    )
    .unwrap();

    c.bench_function("bootstrap/decode_verify", |b| {
        b.iter(|| {
            let payload = BootstrapPayload::decode(&qr).unwrap();
            assert!(payload.verify());
        });
    });
}

criterion_group!(
    benches,
    bench_sign_verify,
    bench_token,
    bench_handshake,
    bench_aead,
    bench_bootstrap
);
criterion_main!(benches);
