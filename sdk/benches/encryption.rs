#![expect(
    clippy::unwrap_used,
    clippy::default_numeric_fallback,
    reason = "benchmark"
)]

use {
    criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main},
    kontecst_protocol::{Algorithm, EncryptionKey},
    kontecst_sdk::crypto::Cipher,
};

fn criterion_benchmark(c: &mut Criterion) {
    let cipher = Cipher::new(Algorithm::Aes256Gcm, &EncryptionKey::generate().unwrap());

    let mut group = c.benchmark_group("encrypt");
    for size in [1024, 1024 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || (0..size).map(|_| rand::random::<u8>()).collect::<Vec<u8>>(),
                |input| cipher.encrypt(&input).unwrap(),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();

    let mut group = c.benchmark_group("decrypt");
    for size in [1024, 1024 * 1024] {
        let plaintext: Vec<u8> = (0..size).map(|_| rand::random::<u8>()).collect();
        let fields = cipher.encrypt(&plaintext).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &fields, |b, fields| {
            b.iter(|| cipher.decrypt(fields).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
