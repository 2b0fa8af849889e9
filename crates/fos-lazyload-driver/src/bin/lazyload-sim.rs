//! lazyload-sim - replay a widget scenario and print what the renderer sees

use std::rc::Rc;

use anyhow::Context;
use fos_lazyload_driver::{Driver, RenderSignal, Scenario, ScriptedHost};
use smol::channel::Receiver;
use smol::future;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: lazyload-sim <scenario.json> [--http]")?;
    let http = std::env::args().skip(2).any(|arg| arg == "--http");

    let json = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
    let scenario = Scenario::from_json(&json).with_context(|| format!("parsing {}", path))?;
    tracing::info!("replaying {} ({}ms)", path, scenario.run_ms);

    if http {
        return run_http(scenario);
    }

    let host = Rc::new(ScriptedHost::new(scenario));
    let (driver, handle, renders) =
        Driver::new(Rc::clone(&host), host.scenario().options.clone(), host.capabilities())?;

    let (driven, (played, ())) = smol::block_on(future::zip(
        driver.run(),
        future::zip(host.play(&handle), print_renders(renders)),
    ));
    driven?;
    played?;

    println!("requests:");
    for url in host.requests() {
        println!("  {}", url);
    }
    if host.polyfill_loads() > 0 {
        println!("polyfill loads: {}", host.polyfill_loads());
    }
    Ok(())
}

async fn print_renders(renders: Receiver<RenderSignal>) {
    while let Ok(signal) = renders.recv().await {
        match signal {
            RenderSignal::State(snapshot) => println!(
                "{} {:<16} {} (attempts: {})",
                snapshot.session,
                snapshot.state.as_str(),
                snapshot.current_variant,
                snapshot.attempts_used
            ),
            RenderSignal::Loaded(session) => println!("{} onLoad", session),
            RenderSignal::Failed(session, reason) => println!("{} onError: {}", session, reason),
        }
    }
}

#[cfg(feature = "http")]
fn run_http(scenario: Scenario) -> anyhow::Result<()> {
    use fos_lazyload::CapabilityCache;
    use fos_lazyload_driver::http::HttpHost;
    use std::time::Duration;

    let host = HttpHost::new("fOS-lazyload/0.1", Duration::from_millis(scenario.options.timeout_ms))?
        .with_format_support(scenario.format_support);
    let capabilities = CapabilityCache::shared(scenario.environment);
    let (driver, handle, renders) = Driver::new(Rc::new(host), scenario.options.clone(), capabilities)?;

    let script = async {
        handle.activate(scenario.descriptor.clone())?;
        smol::Timer::after(Duration::from_millis(scenario.run_ms)).await;
        handle.shutdown()
    };
    let (driven, (played, ())) = smol::block_on(future::zip(driver.run(), future::zip(script, print_renders(renders))));
    driven?;
    played?;
    Ok(())
}

#[cfg(not(feature = "http"))]
fn run_http(_scenario: Scenario) -> anyhow::Result<()> {
    anyhow::bail!("built without the `http` feature")
}
