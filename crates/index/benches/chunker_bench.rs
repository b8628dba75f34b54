use criterion::{Criterion, black_box, criterion_group, criterion_main};
use index::{Chunker, ChunkerConfig};
use std::io::Write;

fn bench_text_chunking(c: &mut Criterion) {
  let dir = tempfile::TempDir::new().unwrap();
  let path = dir.path().join("large.txt");

  let mut file = std::fs::File::create(&path).unwrap();
  for i in 0..2000 {
    writeln!(
      file,
      "Paragraph {i} talks about folder indexing, embeddings, and chunk extraction in some detail.\n"
    )
    .unwrap();
  }
  drop(file);

  let chunker = Chunker::new(ChunkerConfig::default());

  c.bench_function("chunk_large_text", |b| {
    b.iter(|| {
      let result = chunker.chunk_file(black_box(&path), dir.path()).unwrap();
      black_box(result.chunks.len())
    })
  });
}

criterion_group!(benches, bench_text_chunking);
criterion_main!(benches);
