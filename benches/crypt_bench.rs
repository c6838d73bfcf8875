use criterion::{black_box, criterion_group, criterion_main, Criterion};
use drpvault::codec::ZstdCodec;
use drpvault::keystream::{Keystream, SeedTable, SEED_TABLE_LEN};
use drpvault::{DrpArchive, FileEntry};

fn bench_keystream(c: &mut Criterion) {
    let mut data = vec![0u8; 1024 * 1024];

    c.bench_function("keystream_xor_1mb", |b| {
        b.iter(|| Keystream::new(black_box(0x1234_5678)).crypt_words(&mut data))
    });
}

fn sample_archive() -> DrpArchive {
    let mut table = [0u8; SEED_TABLE_LEN];
    for (i, t) in table.iter_mut().enumerate() {
        *t = (i * 13) as u8;
    }
    let mut arc = DrpArchive::new(SeedTable::new(table), true);
    for i in 0..16 {
        let data = vec![i as u8; 64 * 1024];
        arc.push(FileEntry::new(&format!("entry_{i:02}"), 0, data, i % 2 == 0).unwrap());
    }
    arc
}

fn bench_archive(c: &mut Criterion) {
    let arc = sample_archive();
    let bytes = arc.to_bytes(&ZstdCodec).unwrap();

    c.bench_function("archive_to_bytes_1mb", |b| b.iter(|| arc.to_bytes(&ZstdCodec).unwrap()));
    c.bench_function("archive_from_bytes_1mb", |b| {
        b.iter(|| DrpArchive::from_bytes(black_box(bytes.clone()), &ZstdCodec).unwrap())
    });
}

criterion_group!(benches, bench_keystream, bench_archive);
criterion_main!(benches);
