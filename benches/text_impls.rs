use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use webcorpus::text;

fn generate_input(length: u64, values: &[&str]) -> String {
    // generate inputs from fixed seeds
    let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(length); /* define specific algorithm to ensure reproducibility */
    let mut input = String::new();
    for _ in 0..length {
        // mostly ASCII letters, like real pages
        if rng.gen_bool(0.9) {
            input.push(rng.gen_range(b'a'..=b'z') as char);
        } else {
            input.push(rng.gen());
        }
    }

    // add some expected values at random places
    for _ in 0..(length / 5) {
        let mut pos = rng.gen_range(0..input.len());
        while !input.is_char_boundary(pos) {
            pos = rng.gen_range(0..input.len());
        }

        let value = values[rng.gen_range(0..values.len())];
        input.insert_str(pos, value);
    }

    input
}

fn bench_normalize_line_endings(c: &mut Criterion) {
    const VALUES: &[&str] = &["\r\n", "\r", "\n", " ", "\r\n\r\n"];
    let mut group = c.benchmark_group("normalize_line_endings");
    for length in [500u64, 1000u64, 5000u64, 10000u64].into_iter() {
        let input = generate_input(length, VALUES);
        group.bench_with_input(BenchmarkId::new("Naive", length), &input, |b, i| {
            b.iter(|| text::normalize_line_endings_naive(i));
        });
        group.bench_with_input(BenchmarkId::new("Optimized", length), &input, |b, i| {
            let mut scratch_buffers = (String::new(), String::new());
            b.iter(|| {
                text::normalize_line_endings_optimized(
                    i,
                    (&mut scratch_buffers.0, &mut scratch_buffers.1),
                )
            });
        });
    }
}

fn bench_split_into_sentences(c: &mut Criterion) {
    const VALUES: &[&str] = &[" ", "\n", ". ", "! ", "? ", "... ", "Dr. ", "e.g. ", ", "];
    let mut group = c.benchmark_group("split_into_sentences");
    for length in [100u64, 500u64, 1000u64, 5000u64].into_iter() {
        let input = generate_input(length, VALUES);
        group.bench_with_input(BenchmarkId::new("Naive", length), &input, |b, i| {
            b.iter(|| text::split_into_sentences_naive(i));
        });
        group.bench_with_input(BenchmarkId::new("Optimized", length), &input, |b, i| {
            b.iter(|| text::split_into_sentences_optimized(i));
        });
    }
}

fn bench_split_into_tokens(c: &mut Criterion) {
    const VALUES: &[&str] = &[" ", "\n", "-", "'", ".", ",", "é", "ß", "’", "—", "0", "€"];
    let mut group = c.benchmark_group("split_into_tokens");
    for length in [100u64, 500u64, 1000u64, 5000u64].into_iter() {
        let input = generate_input(length, VALUES);
        group.bench_with_input(BenchmarkId::new("Naive", length), &input, |b, i| {
            b.iter(|| text::split_into_tokens_naive(i));
        });
        group.bench_with_input(BenchmarkId::new("Optimized", length), &input, |b, i| {
            b.iter(|| text::split_into_tokens_optimized(i));
        });
    }
}

fn bench_to_lowercase(c: &mut Criterion) {
    const VALUES: &[&str] = &[" ", "A", "Z", "Ä", "É", "Σ", "İ"];
    let mut group = c.benchmark_group("to_lowercase");
    for length in [100u64, 1000u64, 10000u64].into_iter() {
        let input = generate_input(length, VALUES);
        group.bench_with_input(BenchmarkId::new("Std", length), &input, |b, i| {
            b.iter(|| i.to_lowercase());
        });
        group.bench_with_input(BenchmarkId::new("CaseMapping", length), &input, |b, i| {
            b.iter(|| text::to_lowercase_opt(i));
        });
    }
}

criterion_group!(
    benches,
    bench_normalize_line_endings,
    bench_split_into_sentences,
    bench_split_into_tokens,
    bench_to_lowercase
);
criterion_main!(benches);
