use booksdb::normalize::normalize;
use booksdb::SearchIndex;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

const WORDS: &[&str] = &[
    "a", "be", "to", "of", "and", "in", "it", "you", "that", "he", "was", "for", "on", "are", "with", "his", "they",
    "at", "have", "this", "from", "word", "what", "when", "your", "said", "there", "each", "which", "their", "time",
    "about", "many", "then", "them", "these", "some", "would", "make", "like", "into", "more", "very", "after",
];

fn generate_titles(count: usize, max_len: usize) -> Vec<String> {
    let mut state = 0x2545_f491_4f6c_dd1d_u64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state as usize
    };
    (0..count)
        .map(|_| {
            let len = next() % max_len + 1;
            (0..len).map(|_| WORDS[next() % WORDS.len()]).collect::<Vec<_>>().join(" ")
        })
        .collect()
}

fn bench_find_similar(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_similar");
    for (books, query_len) in [(10_000, 6), (50_000, 6), (10_000, 12)] {
        let index = SearchIndex::build(generate_titles(books, 12));
        let query: Vec<_> = WORDS.iter().step_by(3).take(query_len).map(|w| normalize(w)).collect();
        group.bench_with_input(BenchmarkId::new(format!("{books}books"), query_len), &query, |b, q| {
            b.iter(|| index.find_similar(q))
        });
    }
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let titles = generate_titles(50_000, 12);
    c.bench_function("build_50000", |b| b.iter(|| SearchIndex::build(&titles)));
}

criterion_group!(benches, bench_find_similar, bench_build);
criterion_main!(benches);
