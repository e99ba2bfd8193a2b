use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use chrono::Utc;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use imgvault::api;
use imgvault::cli;
use imgvault::config;
use imgvault::store::postgres::{NewToken, PgStore};
use imgvault::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "imgvault=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Token { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            db.migrate().await?;
            handle_token_command(&db, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let state = Arc::new(AppState { db, config: cfg });

    let app = axum::Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .nest("/api", api::api_router())
        .fallback(api::fallback_404)
        .with_state(state)
        .layer(DefaultBodyLimit::max(api::images::BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        // Uploads come from browsers on arbitrary origins.
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(request_id_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("imgvault listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response so clients
/// can correlate errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

async fn handle_token_command(db: &PgStore, cmd: cli::TokenCommands) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Create { name, lifetime } => {
            let lifetime = api::tokens::validate_lifetime(
                lifetime.unwrap_or(api::tokens::DEFAULT_LIFETIME_SECS),
            )?;
            let name = api::tokens::validate_name(name)?;

            let now = Utc::now();
            let token = NewToken {
                public_id: Uuid::new_v4(),
                secret: api::tokens::generate_secret(),
                name,
                created_at: now,
                expires_at: api::tokens::expiry_for(now, lifetime),
            };
            db.insert_token(&token).await?;

            println!(
                "Token created:\n  ID:      {}\n  Expires: {}\n  Use:     Authorization: Bearer {}",
                token.public_id, token.expires_at, token.secret
            );
        }
        cli::TokenCommands::List => {
            let tokens = db.list_tokens().await?;
            if tokens.is_empty() {
                println!("No tokens found.");
            } else {
                println!("{:<38} {:<20} {:<22} EXPIRES", "ID", "NAME", "CREATED");
                for t in tokens {
                    println!(
                        "{:<38} {:<20} {:<22} {}",
                        t.public_id,
                        t.name.as_deref().unwrap_or("-"),
                        t.created_at.format("%Y-%m-%d %H:%M:%S"),
                        t.expires_at.format("%Y-%m-%d %H:%M:%S"),
                    );
                }
            }
        }
        cli::TokenCommands::Delete { id } => {
            let public_id =
                Uuid::parse_str(&id).map_err(|_| anyhow::anyhow!("invalid token ID: {}", id))?;
            if db.delete_token(public_id).await? {
                println!("Token deleted.");
            } else {
                println!("Token not found.");
            }
        }
    }
    Ok(())
}
