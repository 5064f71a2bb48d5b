//! hostwatch_agent: samples host metrics, streams them over HTTP/WebSocket
//! and emails throttled alerts when thresholds are exceeded.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hostwatch_agent::alert_log::AlertLog;
use hostwatch_agent::config::{parse_args, Settings, USAGE};
use hostwatch_agent::hub::BroadcastHub;
use hostwatch_agent::notify::{EmailNotifier, Notifier, TracingNotifier};
use hostwatch_agent::scheduler::Scheduler;
use hostwatch_agent::source::{shared, SysinfoSource};
use hostwatch_agent::state::AppState;
use hostwatch_agent::{tls, ws};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hostwatch_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = match parse_args(std::env::args()) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }

    let settings = Settings::from_env(&args).context("loading configuration")?;
    match &settings.email {
        Some(email) => {
            let notifier = EmailNotifier::new(email).context("configuring email transport")?;
            info!(?email, "email notifications enabled");
            run(settings, notifier).await
        }
        None => {
            warn!("EMAIL/PASSWORD not configured; alerts will only be logged");
            run(settings, TracingNotifier).await
        }
    }
}

async fn run<N: Notifier>(settings: Settings, notifier: N) -> anyhow::Result<()> {
    let source = shared(SysinfoSource::new());
    let hub = Arc::new(BroadcastHub::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let collector = Scheduler::new(
        source.clone(),
        hub.clone(),
        AlertLog::new(settings.alert_log.clone()),
        notifier,
        settings.scheduler.clone(),
    )
    .spawn(shutdown_rx);

    let app = ws::router(AppState {
        hub,
        source,
        gpu_selection: settings.scheduler.gpu_selection,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));

    let served = tokio::select! {
        r = serve(app, addr, settings.enable_ssl) => r,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    if let Err(e) = collector.await {
        warn!(error = %e, "collection task ended abnormally");
    }
    served
}

async fn serve(app: Router, addr: SocketAddr, enable_ssl: bool) -> anyhow::Result<()> {
    if enable_ssl {
        let files = tls::ensure_self_signed_cert()?;
        let config = axum_server::tls_rustls::RustlsConfig::from_pem_file(files.cert, files.key)
            .await
            .context("loading TLS certificate")?;
        info!(%addr, "listening (https/wss)");
        axum_server::bind_rustls(addr, config)
            .serve(app.into_make_service())
            .await
            .context("TLS server failed")?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(addr = %listener.local_addr()?, "listening (http/ws)");
        axum::serve(listener, app).await.context("server failed")?;
    }
    Ok(())
}
