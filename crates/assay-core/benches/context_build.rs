use assay_core::context::{enumerate_sources, ContextBuilder, ContextOptions, ImportGraph};
use assay_core::{DiffEntry, DiffStatus};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

fn synthetic_repo(root: &Path, file_count: usize) {
    fs::write(
        root.join("package.json"),
        r#"{"dependencies":{"express":"^4","react":"^18"},"devDependencies":{"jest":"^29"}}"#,
    )
    .unwrap();
    for i in 0..file_count {
        let dir = root.join(format!("src/feature_{:03}", i % 40));
        fs::create_dir_all(&dir).unwrap();
        let import = if i > 0 {
            format!(
                "import {{ f{prev} }} from '../feature_{:03}/file_{prev:05}';\n",
                (i - 1) % 40,
                prev = i - 1
            )
        } else {
            String::new()
        };
        fs::write(
            dir.join(format!("file_{i:05}.ts")),
            format!("{import}export function f{i}(x: number) {{\n  return x + {i};\n}}\n"),
        )
        .unwrap();
    }
}

fn bench_context_build(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    synthetic_repo(dir.path(), 2_000);
    let diff = vec![
        DiffEntry::new("src/feature_010/file_00010.ts", DiffStatus::Modified),
        DiffEntry::new("src/feature_020/file_01020.ts", DiffStatus::Modified),
    ];
    let builder = ContextBuilder::new(ContextOptions {
        max_related_files: 20,
        related_hops: 3,
    });

    c.bench_function("context_build_2k_files", |b| {
        b.iter(|| {
            let ctx = builder
                .build(black_box(&diff), black_box(dir.path()), None)
                .unwrap();
            black_box(ctx.related_files.len());
        });
    });
}

fn bench_import_graph(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    synthetic_repo(dir.path(), 2_000);
    let files: BTreeMap<String, String> = enumerate_sources(dir.path(), None)
        .into_iter()
        .map(|rel| {
            let content = fs::read_to_string(dir.path().join(&rel)).unwrap();
            (rel, content)
        })
        .collect();

    c.bench_function("import_graph_build_2k_files", |b| {
        b.iter(|| {
            let graph = ImportGraph::build(black_box(&files));
            black_box(graph.edge_count());
        });
    });
}

criterion_group!(benches, bench_context_build, bench_import_graph);
criterion_main!(benches);
