use asarpack::{create_asar_archive, PackOptions};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, RngCore, SeedableRng};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Builds an application-like tree: `dirs` directories with `files_per_dir`
/// small files each, plus one dependency carrying a native binary.
fn generate_tree(root: &Path, dirs: usize, files_per_dir: usize) -> u64 {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut total = 0u64;
    for d in 0..dirs {
        let dir = root.join(format!("src/module_{d:03}"));
        fs::create_dir_all(&dir).unwrap();
        for f in 0..files_per_dir {
            let len = rng.gen_range(256..16 * 1024);
            let line = format!("export const value_{d}_{f} = {};\n", rng.gen::<u32>());
            let content = line.repeat(len / line.len() + 1);
            fs::write(dir.join(format!("file_{f:03}.js")), &content).unwrap();
            total += content.len() as u64;
        }
    }
    let native = root.join("node_modules/native/build/Release");
    fs::create_dir_all(&native).unwrap();
    let mut binary = vec![0u8; 64 * 1024];
    rng.fill_bytes(&mut binary);
    binary[..4].copy_from_slice(b"\x7fELF");
    fs::write(native.join("addon"), &binary).unwrap();
    total + binary.len() as u64
}

fn bench_pack(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack");
    group.sample_size(10);

    for &(dirs, files) in &[(10usize, 20usize), (50, 40)] {
        let source = TempDir::new().unwrap();
        let bytes = generate_tree(source.path(), dirs, files);
        let out_dir = TempDir::new().unwrap();
        let output = out_dir.path().join("app.asar");

        group.throughput(Throughput::Bytes(bytes));
        group.bench_with_input(BenchmarkId::from_parameter(dirs * files), &output, |b, output| {
            b.iter(|| create_asar_archive(source.path(), output, PackOptions::default(), None).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pack);
criterion_main!(benches);
