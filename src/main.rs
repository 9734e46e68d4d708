use axum::serve;
use clap::Parser;
use performstat::config::Config;
use performstat::http;
use performstat::metrics::Metrics;
use performstat::node::PerformanceStatsNode;
use performstat::probe::{CapabilitySource, HostCapabilities};
use performstat::report::assemble_record;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "performstat")]
#[command(version)]
struct Cli {
    /// YAML config; built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `listen` from the config.
    #[arg(long)]
    listen: Option<String>,
    /// Print the text report once and exit.
    #[arg(long, conflicts_with = "json")]
    report: bool,
    /// Print the JSON record once and exit.
    #[arg(long, conflicts_with = "report")]
    json: bool,
    #[arg(long)]
    sample_ms: Option<i64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return ExitCode::SUCCESS;
    }

    let mut cfg = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "failed to load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
    }

    let gpu = match cfg.gpu.settings() {
        Ok(gpu) => gpu,
        Err(err) => {
            error!(error = %err, "invalid GPU settings");
            return ExitCode::FAILURE;
        }
    };
    let caps: Arc<dyn CapabilitySource> = Arc::new(HostCapabilities::new(gpu));

    if cli.report || cli.json {
        let sample_ms = http::clamp_sample_ms(cli.sample_ms, &cfg.sample);
        return print_once(caps, sample_ms, cli.json).await;
    }

    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "invalid listen address");
            return ExitCode::FAILURE;
        }
    };

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            return ExitCode::FAILURE;
        }
    };

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, "failed to bind HTTP listener");
            return ExitCode::FAILURE;
        }
    };

    info!(
        listen = %addr,
        default_sample_ms = cfg.sample.default_ms,
        max_sample_ms = cfg.sample.max_ms,
        gpu = cfg.gpu.enabled,
        "starting performstat"
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let app = http::build_router(metrics, caps, cfg.sample);
    let http_task = tokio::spawn(async move {
        let server = serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        if let Err(err) = server.await {
            error!(error = %err, "HTTP server error");
        }
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);
    let _ = http_task.await;
    ExitCode::SUCCESS
}

async fn print_once(caps: Arc<dyn CapabilitySource>, sample_ms: i64, json: bool) -> ExitCode {
    let output = tokio::task::spawn_blocking(move || {
        if json {
            serde_json::to_string_pretty(&assemble_record(caps.as_ref(), sample_ms))
                .map_err(|err| err.to_string())
        } else {
            Ok(PerformanceStatsNode::new(caps).get_stats(Some(sample_ms)))
        }
    })
    .await;

    match output {
        Ok(Ok(text)) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Ok(Err(err)) => {
            error!(error = %err, "failed to serialise stats");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!(error = %err, "stats collection task failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
