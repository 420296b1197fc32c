// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use authsync::context::origin_for;
use authsync::transport::HttpBackend;
use authsync::{ApiRequest, Method, SessionConfig, SessionContext};

/// Keep an API session alive across concurrent calls.
#[derive(Debug, Parser)]
#[command(name = "authsync", version)]
struct Cli {
    #[command(flatten)]
    session: SessionConfig,

    /// Log filter (tracing EnvFilter syntax).
    #[arg(long, default_value = "info", env = "AUTHSYNC_LOG_LEVEL")]
    log_level: String,

    /// Log output format: text or json.
    #[arg(long, default_value = "text", env = "AUTHSYNC_LOG_FORMAT")]
    log_format: String,

    /// Initial bearer credential, as issued by a login flow.
    #[arg(long, env = "AUTHSYNC_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Issue calls concurrently through one session and print each result.
    Call {
        method: Method,
        #[arg(required = true)]
        paths: Vec<String>,
        /// JSON request body.
        #[arg(long)]
        body: Option<String>,
        /// Send without a credential.
        #[arg(long)]
        anonymous: bool,
    },
    /// Log out server-side and end the session.
    Logout,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match cli.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let origin = origin_for(&cli.session)?;
    let backend = Arc::new(HttpBackend::new(&cli.session)?);
    let ctx = SessionContext::new(cli.session, &origin, backend);

    let shutdown = CancellationToken::new();
    let tasks = ctx.start(shutdown.clone());

    if let Some(ref token) = cli.token {
        let credential = ctx.client().sign_in(token)?;
        info!(subject = %credential.subject(), role = %credential.role(), "using provided credential");
    }

    let result = match cli.command {
        Command::Call { method, paths, body, anonymous } => {
            let body = body.map(|b| serde_json::from_str::<serde_json::Value>(&b)).transpose()?;
            call_all(&ctx, method, paths, body, anonymous).await
        }
        Command::Logout => {
            ctx.client().logout().await?;
            println!("{}", serde_json::json!({ "logged_out": true }));
            Ok(())
        }
    };

    shutdown.cancel();
    let _ = tasks.sweeper.await;
    let _ = tasks.listener.await;
    result
}

async fn call_all(
    ctx: &SessionContext,
    method: Method,
    paths: Vec<String>,
    body: Option<serde_json::Value>,
    anonymous: bool,
) -> anyhow::Result<()> {
    let calls = paths.into_iter().map(|path| {
        let mut request = ApiRequest::new(method, path.clone());
        if let Some(ref body) = body {
            request = request.with_body(body.clone());
        }
        if anonymous {
            request = request.anonymous();
        }
        let client = Arc::clone(ctx.client());
        async move { (path, client.call(request).await) }
    });

    let mut failures = 0usize;
    for (path, outcome) in join_all(calls).await {
        let line = match outcome {
            Ok(response) => serde_json::json!({
                "path": path,
                "status": response.status,
                "body": response.body,
            }),
            Err(e) => {
                failures += 1;
                serde_json::json!({
                    "path": path,
                    "error": e.as_str(),
                    "status": e.status(),
                    "message": e.to_string(),
                })
            }
        };
        println!("{line}");
    }

    if failures > 0 {
        anyhow::bail!("{failures} call(s) failed");
    }
    Ok(())
}
