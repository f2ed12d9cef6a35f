use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use lyro_rs::{
    Dependencies, Gibbs, GibbsSettings, RandomKey, Result, Runtime, ThreadRandomKey, UniformHash,
    Value,
};
use std::sync::Arc;

fn hash_chain(rt: &Runtime, len: usize) -> Result<Value> {
    let mut x = Value::from("foo");
    for i in 0..len {
        let seed = x.as_str().unwrap_or_default().to_string();
        x = rt.draw(&format!("x_{i}"), UniformHash::new(seed))?;
    }
    Ok(x)
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("split + digest 1000", |b| {
        b.iter(|| {
            let mut key = RandomKey::root();
            for _ in 0..1000 {
                let (fresh, rest) = key.split();
                key = rest;
                black_box(fresh.digest());
            }
        })
    });

    let rt = Runtime::default();
    c.bench_function("hash chain 100", |b| {
        b.iter(|| {
            rt.scope(Arc::new(ThreadRandomKey::new()), |rt| hash_chain(rt, black_box(100)))
                .unwrap()
        })
    });

    for (name, dependencies) in [
        ("gibbs complete 20x50", Dependencies::Complete),
        ("gibbs independent 20x50", Dependencies::Independent),
    ] {
        c.bench_function(name, |b| {
            b.iter_batched(
                || {
                    let program = |rt: &Runtime| hash_chain(rt, 20).map(|_| ());
                    Gibbs::new(program, Vec::<(String, Value)>::new()).with_settings(
                        GibbsSettings {
                            dependencies: dependencies.clone(),
                            ..Default::default()
                        },
                    )
                },
                |mut gibbs| gibbs.sample(black_box(50)).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
