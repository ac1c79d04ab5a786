use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::path::Path;

use mimestream::store::blob::MemoryBlobStore;

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(path).unwrap()
}

fn bench_decode_fixtures(c: &mut Criterion) {
    for name in ["simple.eml", "alternative.eml", "attachment.eml"] {
        let raw = fixture(name);
        c.bench_function(&format!("decode_{name}"), |b| {
            b.iter(|| {
                let mut store = MemoryBlobStore::new();
                mimestream::decode_stream(raw.as_slice(), "bench", "bench", &mut store).unwrap()
            })
        });
    }
}

fn bench_decode_large_base64(c: &mut Criterion) {
    use base64::Engine as _;

    let payload = vec![0xA5u8; 4 * 1024 * 1024];
    let encoded = base64::engine::general_purpose::STANDARD.encode(&payload);
    let mut raw = String::from(
        "Content-Type: multipart/mixed; boundary=bench\r\n\r\n\
--bench\r\nContent-Type: application/octet-stream\r\nContent-Transfer-Encoding: base64\r\n\r\n",
    );
    for line in encoded.as_bytes().chunks(76) {
        raw.push_str(std::str::from_utf8(line).unwrap());
        raw.push_str("\r\n");
    }
    raw.push_str("--bench--\r\n");

    let mut group = c.benchmark_group("large");
    group.throughput(Throughput::Bytes(raw.len() as u64));
    group.sample_size(10);
    group.bench_function("decode_4mib_base64_part", |b| {
        b.iter(|| {
            let mut store = MemoryBlobStore::new();
            mimestream::decode_stream(raw.as_bytes(), "bench", "bench", &mut store).unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_decode_fixtures, bench_decode_large_base64);
criterion_main!(benches);
