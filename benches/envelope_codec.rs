//! Envelope Codec Benchmarks
//!
//! Measures envelope encode/decode at payload sizes seen on the control
//! endpoint, from empty pings up to large session listings.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use freerds_session_manager::calls::logon::LogonUserRequest;
use freerds_session_manager::calls::{to_payload, MessageType};
use freerds_session_manager::rpc::{CallEnvelope, CallStatus};

const PAYLOAD_SIZES: [usize; 4] = [0, 256, 4 * 1024, 64 * 1024];

fn payload(size: usize) -> Bytes {
    Bytes::from((0..size).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_encode");

    for size in PAYLOAD_SIZES {
        let envelope = CallEnvelope::request(7, MessageType::EnumerateSessions.as_u32(), payload(size));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &envelope, |b, envelope| {
            b.iter(|| black_box(envelope.encode()));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_decode");

    for size in PAYLOAD_SIZES {
        let encoded = CallEnvelope::request(7, MessageType::EnumerateSessions.as_u32(), payload(size)).encode();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            // Bytes clone is a refcount bump
            b.iter(|| black_box(CallEnvelope::decode(encoded.clone())));
        });
    }

    group.finish();
}

/// Failure responses carry an error string after the payload
fn bench_failure_response(c: &mut Criterion) {
    let request = CallEnvelope::request(1, 999, Bytes::new());
    let response = request.failure(CallStatus::NotFound, "no handler for message type 999");
    let encoded = response.encode();

    c.bench_function("envelope_failure_encode", |b| {
        b.iter(|| black_box(response.encode()));
    });
    c.bench_function("envelope_failure_decode", |b| {
        b.iter(|| black_box(CallEnvelope::decode(encoded.clone())));
    });
}

/// Full request path for a logon: JSON body, envelope, and back
fn bench_logon_request(c: &mut Criterion) {
    let request = LogonUserRequest {
        connection_id: 42,
        username: "alice".to_string(),
        domain: "CORP".to_string(),
        password: "correct horse battery staple".to_string(),
        width: Some(1920),
        height: Some(1080),
        color_depth: Some(32),
    };

    c.bench_function("logon_request_roundtrip", |b| {
        b.iter(|| {
            let body = to_payload(black_box(&request)).unwrap_or_default();
            let wire = CallEnvelope::request(1, MessageType::LogonUser.as_u32(), body).encode();
            let decoded = CallEnvelope::decode(wire);
            black_box(decoded.map(|e| serde_json::from_slice::<LogonUserRequest>(&e.payload).is_ok()))
        });
    });
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_failure_response,
    bench_logon_request
);
criterion_main!(benches);
