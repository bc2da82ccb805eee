use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mpt_rs::{MemoryStore, Trie};

fn bench_put(c: &mut Criterion) {
    c.bench_function("put 1000 sequential keys", |b| {
        b.iter(|| {
            let mut trie = Trie::new(None, MemoryStore::new());
            for i in 0u32..1000 {
                let key = i.to_be_bytes().to_vec();
                trie.put(black_box(key), black_box(vec![0xab; 32])).unwrap();
            }
        });
    });
}

fn bench_put_and_commit(c: &mut Criterion) {
    c.bench_function("put 1000 keys then commit", |b| {
        b.iter(|| {
            let mut trie = Trie::new(None, MemoryStore::new());
            for i in 0u32..1000 {
                let key = i.to_be_bytes().to_vec();
                trie.put(key, vec![0xab; 32]).unwrap();
            }
            black_box(trie.commit().unwrap());
        });
    });
}

fn bench_get(c: &mut Criterion) {
    let mut trie = Trie::new(None, MemoryStore::new());
    for i in 0u32..1000 {
        trie.put(i.to_be_bytes().to_vec(), vec![0xab; 32]).unwrap();
    }
    trie.commit().unwrap();

    c.bench_function("get from a 1000-key trie", |b| {
        b.iter(|| {
            for i in 0u32..1000 {
                black_box(trie.get(&i.to_be_bytes()).unwrap());
            }
        });
    });
}

criterion_group!(benches, bench_put, bench_put_and_commit, bench_get);
criterion_main!(benches);
