use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tq_core::model::Actor;

mod api;
mod auth;
mod config;
mod mutate;
mod search;
mod store;

use config::Config;
use search::{Dispatcher, SearchServices};
use store::memory::{
    Dataset, MembershipAccess, MemoryColumnarStore, MemoryRelationalStore, MemoryWorkflow,
    StaticFeatures,
};
use store::StatusWorkflow;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "tq-hub", version, about = "TRIAGE issue search service")]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: String,

    /// Path to config file
    #[arg(long, default_value = "tq-hub.toml")]
    config: PathBuf,

    /// JSON dataset the in-memory stores are seeded from
    #[arg(long, default_value = "fixtures/demo.json")]
    data: PathBuf,

    /// Serve the dataset's timestamps as written instead of moving them up
    /// to the present
    #[arg(long)]
    no_rebase: bool,
}

// =============================================================================
// Application State
// =============================================================================

pub struct AppState {
    pub dispatcher: Dispatcher,
    pub workflow: Arc<dyn StatusWorkflow>,
    pub auth_layer: Arc<auth::AuthLayer>,
    pub config: Config,
    pub start_time: Instant,
}

/// Wire the in-memory stores over `dataset`.
pub fn build_state(config: Config, dataset: Dataset) -> Arc<AppState> {
    let relational = Arc::new(MemoryRelationalStore::new(&dataset));
    let columnar = Arc::new(MemoryColumnarStore::new(&dataset, config.search.retention_days));
    let features = StaticFeatures::new(
        config.features.enabled.clone(),
        config.features.organization_grants(),
    );

    let services = SearchServices {
        relational: relational.clone(),
        columnar,
        access: Arc::new(MembershipAccess {
            open_membership: config.search.open_membership,
        }),
        features: Arc::new(features),
        settings: config.search.clone(),
    };

    Arc::new(AppState {
        dispatcher: Dispatcher::new(services),
        workflow: Arc::new(MemoryWorkflow::new(relational)),
        auth_layer: Arc::new(auth::AuthLayer::new(config.server.audit_capacity)),
        config,
        start_time: Instant::now(),
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(api::api_status))
        .route(
            "/api/organizations/:org/issues",
            get(api::list_issues)
                .put(api::update_issues)
                .delete(api::delete_issues),
        )
        .route(
            "/api/organizations/:org/issues/:group/events/:event/adjacent",
            get(api::adjacent_events),
        )
        .route(
            "/api/auth/keys",
            post(api::create_api_key).get(api::list_api_keys),
        )
        .route("/api/auth/keys/:id", delete(api::revoke_api_key))
        .route("/api/auth/audit", get(api::get_audit_log))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tq_hub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config);

    let mut dataset = match Dataset::load(&args.data) {
        Ok(dataset) => dataset,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };
    if !args.no_rebase {
        dataset.shift_to(Utc::now());
    }
    tracing::info!(
        projects = dataset.projects.len(),
        groups = dataset.groups.len(),
        events = dataset.events.len(),
        "Loaded dataset {:?}",
        args.data
    );

    let organization_id = config.server.organization_id;
    let root_actor = Actor {
        user_id: 0,
        organization_id,
        team_ids: Vec::new(),
        project_ids: dataset
            .projects
            .iter()
            .filter(|p| p.organization_id == organization_id)
            .map(|p| p.id)
            .collect(),
        is_superuser: true,
    };

    let state = build_state(config, dataset);

    // Generate Root API Key on startup
    {
        let root_key = state
            .auth_layer
            .create_key(
                "system",
                "Root Key (Startup)".into(),
                vec![auth::Scope::Admin, auth::Scope::Read, auth::Scope::Write],
                root_actor,
            )
            .await;

        if let Some(raw) = &root_key.key {
            tracing::info!("🔑 GENERATED ROOT API KEY: {}", raw);
            tracing::warn!("⚠️  Copy this key! It will not be shown again.");
        }
    }

    let addr: SocketAddr = match args.bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid bind address {}: {}", args.bind, e);
            std::process::exit(1);
        }
    };
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("  🔎 TRIAGE v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  API:           http://{}/api/status", addr);
    tracing::info!("  Issues:        http://{}/api/organizations/{}/issues", addr, organization_id);
    tracing::info!("  Dataset:       {:?}", args.data);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, router(state)).await {
        tracing::error!("Server error: {}", e);
    }
}

// =============================================================================
// Auth Middleware
// =============================================================================

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    // Public routes bypass
    if path == "/api/status" || !path.starts_with("/api") || method == Method::OPTIONS {
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::to_string);

    let Some(token) = token else {
        tracing::warn!("Missing Authorization header for {}", path);
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Some(key) = state.auth_layer.validate_token(&token).await else {
        tracing::warn!("Invalid API Key for {}", path);
        return Err(StatusCode::UNAUTHORIZED);
    };
    if let Some(scope) = required_scope(&path, &method) {
        if !key.allows(scope) {
            tracing::warn!("Insufficient scope for {} {}", method, path);
            return Err(StatusCode::FORBIDDEN);
        }
    }

    req.extensions_mut().insert(key.actor);
    Ok(next.run(req).await)
}

fn required_scope(path: &str, method: &Method) -> Option<auth::Scope> {
    if !path.starts_with("/api") || path == "/api/status" {
        return None;
    }
    if path.starts_with("/api/auth") {
        return Some(auth::Scope::Admin);
    }
    match *method {
        Method::GET | Method::HEAD => Some(auth::Scope::Read),
        _ => Some(auth::Scope::Write),
    }
}
