//! 'main' for the Kestrel devnet process

use anyhow::Result;
use clap::Parser;
use config::{Config, Environment, File};
use tracing::info;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter, fmt, EnvFilter, Registry};

mod devnet;

use crate::devnet::Devnet;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, value_name = "PATH", default_value = "devnet.toml")]
    config: String,

    /// Blocks the remote peers serve ahead of the local node
    #[arg(long, default_value_t = 200)]
    blocks: usize,

    /// Competing blocks offered after the node is running
    #[arg(long, default_value_t = 2)]
    forks: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Standard logging using RUST_LOG for log levels
    let fmt_layer = fmt::layer().with_filter(EnvFilter::from_default_env());

    // Only turn on tracing if some OTEL environment variables exist
    if std::env::vars().any(|(name, _)| name.starts_with("OTEL_")) {
        let otel_exporter = SpanExporter::builder().with_tonic().build()?;
        let otel_tracer = SdkTracerProvider::builder()
            .with_batch_exporter(otel_exporter)
            .build()
            .tracer("kestrel-devnet");
        let otel_layer = OpenTelemetryLayer::new(otel_tracer)
            .with_filter(EnvFilter::from_default_env().add_directive(filter::LevelFilter::INFO.into()))
            .with_filter(filter::filter_fn(|meta| meta.is_span()));
        Registry::default().with(fmt_layer).with(otel_layer).init();
    } else {
        Registry::default().with(fmt_layer).init();
    }

    info!("Kestrel devnet process");

    let config = Config::builder()
        .add_source(File::with_name(&args.config).required(false))
        .add_source(Environment::with_prefix("KESTREL").separator("__"))
        .build()?;

    let devnet = Devnet::new(&config, args.blocks)?;
    let summary = devnet.run(args.forks).await?;
    info!(
        sync = ?summary.sync,
        height = summary.height,
        forks = summary.forks,
        orphans = summary.orphans,
        relayed = summary.relayed,
        "devnet finished"
    );

    Ok(())
}
