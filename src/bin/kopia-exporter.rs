//! kopia-exporter - Prometheus exporter daemon for kopia backups.
//!
//! Connects to the kopia repository server once at startup, then polls
//! snapshot and repository state on an interval while serving /metrics.

use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use kopia_exporter::collector::Collector;
use kopia_exporter::command::RealRunner;
use kopia_exporter::config::{Args, init_logging};
use kopia_exporter::freespace::RealSpaceProbe;
use kopia_exporter::reconcile::Reconciler;
use kopia_exporter::store::shared_store;
use kopia_exporter::{scheduler, server};

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!(version = kopia_exporter::VERSION, "kopia-exporter starting");
    info!(
        listen = %args.listen,
        server_url = %args.server_url,
        repo_path = %args.repo_path.display(),
        interval_secs = args.interval,
        "configuration"
    );

    // Fatal conditions live here at startup: bad configuration, a missing
    // credential, an unbindable listen address. Everything later degrades
    // and retries.
    if let Err(e) = args.validate() {
        error!(error = %e, "invalid configuration");
        process::exit(1);
    }

    let Some(password) = args.password.clone() else {
        error!("no repository password configured (set KOPIA_PASSWORD or --password)");
        process::exit(1);
    };

    for dir in [&args.config_dir, &args.cache_dir] {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(path = %dir.display(), error = %e, "could not create directory");
        }
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async_main(args, password));
}

async fn async_main(args: Args, password: String) {
    let store = match shared_store() {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "failed to build metric registry");
            process::exit(1);
        }
    };

    let collector = Arc::new(
        Collector::new(RealRunner::new(), RealSpaceProbe::new(), args.repo_path.clone())
            .with_kopia_bin(&args.kopia_bin)
            .with_config_file(args.config_file())
            .with_command_timeout(args.command_timeout_duration()),
    );

    let reconciler = Reconciler::new(store.clone());

    // One-shot handshake. A failure is logged, published as disconnected and
    // left to the poll loop to recover; the exporter keeps serving.
    let handshake = {
        let collector = collector.clone();
        let server_url = args.server_url.clone();
        let cache_dir = args.cache_dir.clone();
        tokio::task::spawn_blocking(move || {
            collector.connect_server(&server_url, &password, &cache_dir)
        })
        .await
    };
    match handshake {
        Ok(Ok(())) => {
            info!(server_url = %args.server_url, "connected to repository server");
            reconciler.record_handshake(true);
        }
        Ok(Err(e)) => {
            warn!(error = %e, "initial repository connect failed; will keep polling");
            reconciler.record_handshake(false);
        }
        Err(e) => {
            error!(error = %e, "repository connect panicked");
            reconciler.record_handshake(false);
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let loop_handle = tokio::spawn(scheduler::run_loop(
        collector,
        reconciler,
        args.interval_duration(),
        shutdown_rx,
    ));

    let app = server::router(store);

    let listener = match tokio::net::TcpListener::bind(&args.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(listen = %args.listen, error = %e, "failed to bind listen address");
            process::exit(1);
        }
    };
    info!(listen = %args.listen, "serving metrics");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
        })
        .await;

    if let Err(e) = serve_result {
        error!(error = %e, "server error");
    }

    let _ = shutdown_tx.send(true);
    let _ = loop_handle.await;
    info!("shutdown complete");
}
