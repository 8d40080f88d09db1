use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use linkdex_core::tokenizer::{tokenize, Tokenizer};

const PARAGRAPH: &str = "Search engines crawl the web, follow hyperlinks between pages and build an \
inverted index over the words they find. Running queries against that index means merging \
postings lists, weighting rare terms above common ones and blending in link authority. \
Visit https://example.com/docs or write to team@example.com for the café’s opening hours. ";

fn bench_tokenize(c: &mut Criterion) {
    let text = PARAGRAPH.repeat(64);
    let mut group = c.benchmark_group("tokenize");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("default", |b| b.iter(|| tokenize(black_box(&text))));

    let tokenizer = Tokenizer::default();
    group.bench_function("lazy_count", |b| b.iter(|| tokenizer.tokens(black_box(&text)).count()));
    group.bench_function("from_bytes", |b| {
        b.iter(|| tokenizer.tokens_from_bytes(black_box(text.as_bytes())).count())
    });
    group.finish();
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
