//! Draw a chain of hash-derived values, then resample it with the last
//! value held fixed.
//!
//! Run with `RUST_LOG=debug` to see the scheduler at work.

use std::sync::Arc;

use anyhow::Context;
use lyro_rs::{
    Dependencies, Gibbs, GibbsSettings, Result, Runtime, Trace, UniformHash, Value,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const LENGTH: usize = 5;

fn hash_chain(rt: &Runtime) -> Result<()> {
    let mut x = json!("foo");
    for i in 0..LENGTH {
        let seed = x.as_str().unwrap_or_default().to_string();
        x = rt.draw(&format!("x_{i}"), UniformHash::new(seed))?;
    }
    Ok(())
}

fn print_values(title: &str, values: impl IntoIterator<Item = (String, Value)>) {
    println!("{title}");
    for (name, value) in values {
        println!("  {name} = {value}");
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let rt = Runtime::default();
    let trace = Arc::new(Trace::new());
    rt.scope(trace.clone(), hash_chain)
        .context("Prior draw failed")?;
    print_values("prior", trace.values());

    let mut gibbs = Gibbs::new(hash_chain, [(format!("x_{}", LENGTH - 1), json!("end"))])
        .with_settings(GibbsSettings {
            dependencies: Dependencies::Complete,
            ..Default::default()
        });
    let latent = gibbs.sample(20).context("Resampling failed")?;
    print_values("resampled", latent);
    println!("steps per site: {:?}", gibbs.counts());
    Ok(())
}
