//! Throughput benchmarks for Vocab Pregen.

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use vocab_pregen::generator::estimate_tokens;
use vocab_pregen::sse::{SseParser, parse_stream};

fn sample_stream(chunks: usize) -> Vec<u8> {
    let mut body = String::new();
    for i in 0..chunks {
        let chunk = serde_json::json!({
            "choices": [{"delta": {"content": format!("token{i} 同义词 ")}}]
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

fn benchmark_sse_parsing(c: &mut Criterion) {
    let body = sample_stream(500);

    let mut group = c.benchmark_group("sse");
    group.throughput(Throughput::Bytes(body.len() as u64));

    group.bench_function("parse_whole", |b| {
        b.iter(|| parse_stream(&body).unwrap());
    });

    group.bench_function("parse_64_byte_chunks", |b| {
        b.iter(|| {
            let mut parser = SseParser::new();
            for piece in body.chunks(64) {
                parser.feed(piece);
            }
            parser.finish().unwrap()
        });
    });

    group.finish();
}

fn benchmark_token_estimate(c: &mut Criterion) {
    let text = "## Synonyms\n\n| word | 区别 |\n|---|---|\n| forsake | 更正式，带感情色彩 |\n"
        .repeat(50);

    let mut group = c.benchmark_group("tokens");
    group.throughput(Throughput::Bytes(text.len() as u64));

    group.bench_function("estimate_tokens", |b| {
        b.iter(|| estimate_tokens(&text));
    });

    group.finish();
}

criterion_group!(benches, benchmark_sse_parsing, benchmark_token_estimate);
criterion_main!(benches);
