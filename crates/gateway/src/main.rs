//! DisasterShift API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Streaming chat answers over server-sent events
//! - Prediction and forecast lookups
//! - Rate limiting
//! - Observability (logging, metrics, tracing)

mod handlers;
mod middleware;

use axum::{
    extract::Request,
    http::{HeaderValue, Method},
    middleware::Next,
    routing::{get, post},
    Router,
};
use disastershift_common::{
    analytics::AnalyticsStore,
    config::AppConfig,
    context::ContextAssembler,
    embeddings::create_embedder,
    generation::create_backend,
    knowledge::{open_index, Retriever},
    metrics, AnalyticsEngine, AnswerStreamer,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: AnalyticsEngine,
    pub streamer: AnswerStreamer,
}

impl AppState {
    /// Wire the store, index and backend named by `config`
    async fn bootstrap(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        info!(
            predictions = %config.data.predictions_path.display(),
            forecasts = %config.data.forecasts_path.display(),
            "Loading analytics datasets"
        );
        let store = AnalyticsStore::load(&config.data.predictions_path, &config.data.forecasts_path)?;
        let stats = store.stats();
        info!(
            scenarios = stats.scenarios,
            prediction_rows = stats.prediction_rows,
            rejected_rows = stats.rejected_rows,
            forecasts = stats.forecasts,
            "Analytics store ready"
        );

        let embedder = create_embedder(&config.embedding)?;
        let index = open_index(&config.knowledge, embedder.model_name(), embedder.dimension()).await?;
        info!(
            backend = index.backend(),
            chunks = index.len(),
            model = index.embedding_model(),
            "Knowledge index ready"
        );
        let retriever = Retriever::new(embedder, index, config.knowledge.top_k)?;

        let engine = AnalyticsEngine::new(Arc::new(store));
        let backend = create_backend(&config.llm)?;

        let assembler = ContextAssembler::new(engine.clone(), retriever);

        Ok(Self {
            config,
            engine,
            streamer: AnswerStreamer::new(assembler, backend),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    init_tracing(&config);
    info!("Starting DisasterShift API Gateway v{}", disastershift_common::VERSION);

    config.validate()?;
    let config = Arc::new(config);

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Metrics exporter listening on {}", addr);
    }
    metrics::register_metrics();

    let state = AppState::bootstrap(Arc::clone(&config)).await?;
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Open chat streams get `shutdown_timeout` to finish after the signal
    let draining = Arc::new(Notify::new());
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let draining = Arc::clone(&draining);
        async move {
            shutdown_signal().await;
            draining.notify_one();
        }
    });

    let shutdown_timeout = config.shutdown_timeout();
    tokio::select! {
        result = server.into_future() => result?,
        _ = async {
            draining.notified().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => warn!(timeout_secs = shutdown_timeout.as_secs(), "Shutdown timeout elapsed, dropping open connections"),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Lookups are bounded; the chat stream is paced by generation
    let lookup_routes = Router::new()
        .route("/predict", get(handlers::lookup::predict))
        .route("/predict/scenarios", get(handlers::lookup::scenarios))
        .route("/forecast/available", get(handlers::lookup::available_forecasts))
        .route("/forecast/states", get(handlers::lookup::forecast_states))
        .route("/forecast/types", get(handlers::lookup::forecast_types))
        .route("/forecast/chart", get(handlers::lookup::forecast_chart))
        .route("/forecast/{state}/{disaster_type}", get(handlers::lookup::forecast))
        .layer(TimeoutLayer::new(config.request_timeout()));

    let mut api_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/chat", post(handlers::chat::chat))
        .merge(lookup_routes)
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_requests));

    if config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            config.rate_limit.requests_per_second,
            config.rate_limit.burst,
        );
        let limit = config.rate_limit.requests_per_second;
        api_routes = api_routes.layer(axum::middleware::from_fn(move |request: Request, next: Next| {
            middleware::rate_limit::rate_limit_middleware(request, next, Arc::clone(&limiter), limit)
        }));
    }

    // Compose the app
    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.server.cors_origins))
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use disastershift_common::embeddings::HashingEmbedder;
    use disastershift_common::generation::TokenStream;
    use disastershift_common::knowledge::{Category, ChunkMetadata, InMemoryIndex, IndexSnapshot, KnowledgeChunk};
    use disastershift_common::{GenerationBackend, Result};
    use futures::stream::{self, StreamExt};
    use serde_json::json;
    use tower::ServiceExt;

    const PREDICTIONS: &str = r#"[
        {"disaster_type": "hurricane", "fips_code": "12086", "region": "Miami-Dade County, FL",
         "predictions": {
            "Retail": {"job_loss_pct": 20, "recovery_months": 6},
            "Construction": {"job_change_pct": 120, "peak_month": 3}}}
    ]"#;

    const FORECASTS: &str = r#"{
        "FL_Hurricane": {
            "model_info": {"total_historical": 48, "peak_months": ["September"], "cv_mae": 0.4},
            "forecast": {"dates": ["2026-09"], "predicted_counts": [2.0], "upper_bound": [3.5]}
        },
        "FL_Flood": {
            "model_info": {"total_historical": 9, "peak_months": ["June"]},
            "forecast": {"dates": ["2026-06", "2026-07"], "predicted_counts": [0.4, 0.6]}
        },
        "LA_Hurricane": {
            "model_info": {"total_historical": 30, "peak_months": ["August"]},
            "forecast": {"dates": [], "predicted_counts": [], "upper_bound": []}
        }
    }"#;

    struct Echo;

    #[async_trait]
    impl GenerationBackend for Echo {
        async fn stream(&self, _system_prompt: &str, question: &str) -> Result<TokenStream> {
            Ok(stream::iter(vec![Ok("You asked: ".to_string()), Ok(question.to_string())]).boxed())
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    fn test_state(config: AppConfig) -> AppState {
        let store = AnalyticsStore::from_json(PREDICTIONS, FORECASTS).unwrap();
        let embedder = HashingEmbedder::new(32);
        let text = "Florida reemployment assistance";
        let index = InMemoryIndex::from_snapshot(IndexSnapshot {
            embedding_model: HashingEmbedder::MODEL.to_string(),
            dimension: 32,
            chunks: vec![KnowledgeChunk {
                text: text.to_string(),
                embedding: embedder.embed_text(text),
                metadata: ChunkMetadata {
                    category: Category::Unemployment,
                    state: Some("FL".to_string()),
                    disaster_type: None,
                    source: "unemployment.md".to_string(),
                },
            }],
        })
        .unwrap();

        let engine = AnalyticsEngine::new(Arc::new(store));
        let retriever = Retriever::new(Arc::new(embedder), Arc::new(index), 4).unwrap();
        AppState {
            config: Arc::new(config),
            engine: engine.clone(),
            streamer: AnswerStreamer::new(ContextAssembler::new(engine, retriever), Arc::new(Echo)),
        }
    }

    fn app() -> Router {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        create_router(test_state(config))
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn get_json(uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = serde_json::from_str(&body_text(response).await).unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_chat_streams_events_in_order() {
        let request = Request::post("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"message": "When is hurricane season?", "state": "fl"}"#))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let body = body_text(response).await;
        let data: Vec<&str> = body
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .collect();
        assert_eq!(
            data,
            vec![
                "[STATUS] retrieving",
                "[STATUS] generating",
                "You asked: ",
                "When is hurricane season?",
                "[DONE]",
            ]
        );
    }

    #[tokio::test]
    async fn test_chat_rejects_bad_state_before_streaming() {
        let request = Request::post("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"message": "hi", "state": "ZZ"}"#))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("state"));
    }

    #[tokio::test]
    async fn test_forecast_lookup_and_not_found() {
        let found = app()
            .oneshot(Request::get("/api/forecast/FL/hurricane").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(found.status(), StatusCode::OK);
        assert!(body_text(found).await.contains("\"total_historical\":48"));

        let missing = app()
            .oneshot(Request::get("/api/forecast/TX/flood").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_forecast_states_and_types() {
        let (status, body) = get_json("/api/forecast/states").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["states"], json!(["FL", "LA"]));

        let (status, body) = get_json("/api/forecast/types").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["disaster_types"], json!(["flood", "hurricane"]));
        assert!(body.get("state").is_none());

        let (status, body) = get_json("/api/forecast/types?state=la").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "LA");
        assert_eq!(body["disaster_types"], json!(["hurricane"]));

        let (status, _) = get_json("/api/forecast/types?state=TX").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get_json("/api/forecast/types?state=Texas").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_forecast_chart_series() {
        let (status, body) = get_json("/api/forecast/chart?state=FL&disaster_type=Flood").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["disaster_type"], "flood");
        assert_eq!(body["meta"]["total_historical_declarations"], 9);
        assert_eq!(body["meta"]["forecast_start"], "2026-06");
        assert_eq!(body["meta"]["forecast_end"], "2026-07");
        assert_eq!(body["meta"]["forecast_horizon_months"], 2);
        assert_eq!(
            body["forecast"],
            json!([
                {"date": "2026-06", "predicted": 0.4, "upper": null},
                {"date": "2026-07", "predicted": 0.6, "upper": null}
            ])
        );

        let (_, body) = get_json("/api/forecast/chart?state=FL&disaster_type=hurricane").await;
        assert_eq!(body["forecast"][0]["upper"], 3.5);

        let (status, _) = get_json("/api/forecast/chart?state=TX&disaster_type=flood").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_excess() {
        let mut config = AppConfig::default();
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let app = create_router(test_state(config));

        let first = app
            .clone()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
