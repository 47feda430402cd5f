use super::config::AppConfig;
use super::error::Error;
use super::fetch::ExternalFetcher;
use super::store::ReportStore;
use anyhow::Context as _;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::get,
    Router,
};
use clap::Parser;
use clap_verbosity_flag::{log::LevelFilter, InfoLevel, Verbosity};
use figment::{providers::Format as _, Figment};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// The application user agent. Concatenates the package name and version. e.g. `abusewatch/0.0.0`.
pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// The application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug, Clone)]
/// Command line arguments.
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "default.toml")]
    pub config: PathBuf,
    /// The verbosity level.
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

#[derive(Clone, FromRef)]
/// The application state, shared across all routes.
pub struct AppState {
    /// The application configuration.
    pub(crate) config: AppConfig,
    /// The report database.
    pub store: ReportStore,
    /// The client used for external report feeds.
    pub fetcher: ExternalFetcher,
}

impl AppState {
    /// Open the report store and build the outbound client described by `config`.
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store = ReportStore::open(&config.db)
            .await
            .context("failed to open report store")?;
        let fetcher = ExternalFetcher::new(Duration::from_secs(config.upstream.timeout_secs))?;

        Ok(Self {
            config,
            store,
            fetcher,
        })
    }
}

/// Build the HTTP router over `state`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(super::index))
        .merge(super::endpoints::routes())
        .layer(DefaultBodyLimit::max(state.config.upload_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The main application entry point.
pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up trace logging to console and account for the user-provided verbosity flag.
    if args.verbosity.log_level_filter() != LevelFilter::Off {
        let lvl = match args.verbosity.log_level_filter() {
            LevelFilter::Error => tracing::Level::ERROR,
            LevelFilter::Warn => tracing::Level::WARN,
            LevelFilter::Info | LevelFilter::Off => tracing::Level::INFO,
            LevelFilter::Debug => tracing::Level::DEBUG,
            LevelFilter::Trace => tracing::Level::TRACE,
        };
        tracing_subscriber::fmt().with_max_level(lvl).init();
    }

    if !args.config.exists() {
        // Not fatal: every setting can come from the environment, but a missing
        // file is most likely a mistake (e.g. forgot to mount it into Docker).
        warn!(
            "configuration file {} does not exist",
            args.config.display()
        );
    }

    // Read and parse the user-provided configuration.
    let config: AppConfig = Figment::new()
        .admerge(figment::providers::Toml::file(args.config))
        .admerge(figment::providers::Env::prefixed("ABUSEWATCH_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    // Initialize metrics reporting.
    super::metrics::setup(config.metrics.as_ref()).context("failed to set up metrics exporter")?;

    let addr = config
        .listen_address
        .unwrap_or(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000));

    let state = AppState::new(config).await?;
    let router = app(state);

    let listener = TcpListener::bind(&addr)
        .await
        .context("failed to bind address")?;

    info!("listening on {addr}");
    info!("connect to: http://127.0.0.1:{}", addr.port());

    axum::serve(listener, router.into_make_service())
        .await
        .context("failed to serve app")
}
