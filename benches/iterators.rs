use criterion::{criterion_group, criterion_main, Criterion};
use piecebuf::Buffer;

/// Deterministic filler content, standing in for the teacher benchmark's
/// `include_str!("large.txt")`: a few thousand lines mixing ASCII and a
/// couple of multi-byte/grapheme-cluster sequences so codepoint and
/// grapheme advance are exercised, not just plain bytes.
fn large_text() -> String {
    let mut s = String::with_capacity(1 << 20);
    for i in 0..20_000 {
        s.push_str(&format!("line {i} caf\u{00e9} \u{1f469}\u{200d}\u{1f4bb}\n"));
    }
    s
}

fn bytes(c: &mut Criterion) {
    c.bench_function("byte_next", |bench| {
        let buf = Buffer::from_bytes(large_text().into_bytes());
        let start = buf.cursor_at(0);
        let mut cur = start.clone();
        bench.iter(|| {
            if cur.pos() >= buf.size() {
                cur = start.clone();
            }
            cur.byte_next();
        });
    });

    c.bench_function("byte_prev", |bench| {
        let buf = Buffer::from_bytes(large_text().into_bytes());
        let start = buf.cursor_at(buf.size());
        let mut cur = start.clone();
        bench.iter(|| {
            if cur.pos() == 0 {
                cur = start.clone();
            }
            cur.byte_prev();
        });
    });
}

fn codepoints(c: &mut Criterion) {
    c.bench_function("codepoint_next", |bench| {
        let buf = Buffer::from_bytes(large_text().into_bytes());
        let start = buf.cursor_at(0);
        let mut cur = start.clone();
        bench.iter(|| {
            if cur.pos() >= buf.size() {
                cur = start.clone();
            }
            cur.codepoint_next();
        });
    });

    c.bench_function("codepoint_prev", |bench| {
        let buf = Buffer::from_bytes(large_text().into_bytes());
        let start = buf.cursor_at(buf.size());
        let mut cur = start.clone();
        bench.iter(|| {
            if cur.pos() == 0 {
                cur = start.clone();
            }
            cur.codepoint_prev();
        });
    });
}

fn graphemes(c: &mut Criterion) {
    c.bench_function("grapheme_next", |bench| {
        let buf = Buffer::from_bytes(large_text().into_bytes());
        let start = buf.cursor_at(0);
        let mut cur = start.clone();
        bench.iter(|| {
            if cur.pos() >= buf.size() {
                cur = start.clone();
            }
            cur.char_next();
        });
    });

    c.bench_function("grapheme_prev", |bench| {
        let buf = Buffer::from_bytes(large_text().into_bytes());
        let start = buf.cursor_at(buf.size());
        let mut cur = start.clone();
        bench.iter(|| {
            if cur.pos() == 0 {
                cur = start.clone();
            }
            cur.char_prev();
        });
    });
}

fn create(c: &mut Criterion) {
    c.bench_function("create_cursor_after_10_000_inserts", |bench| {
        let mut buf = Buffer::from_bytes(large_text().into_bytes());
        for _ in 0..10_000 {
            buf.insert(0, b"A").unwrap();
        }

        bench.iter(|| {
            let _cur = buf.cursor_at(0);
        });
    });
}

criterion_group!(benches, bytes, codepoints, graphemes, create);
criterion_main!(benches);
