// Impact Footprint - Web Server
// REST API with Axum: live impact aggregation per geography

use anyhow::anyhow;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use impact_footprint::resolver::disambiguate;
use impact_footprint::{
    AggregateOptions, CandidateMode, CbpDatabase, CrosswalkResolver, CsvSnapshot, FootprintConfig,
    FootprintError, GeographyId, ImpactAggregator, ImpactModelStore, IndustrySource, VERSION,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<ImpactModelStore>,
    cbp: Arc<Mutex<CbpDatabase>>,
    config: Arc<FootprintConfig>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    snapshot_loaded: bool,
}

/// Sampling query parameters, kept as text so bad values get the JSON envelope
#[derive(Debug, Default, Deserialize)]
struct SamplingQuery {
    trials: Option<String>,
    mode: Option<String>,
    seed: Option<String>,
}

impl SamplingQuery {
    fn options(&self, config: &FootprintConfig) -> Result<AggregateOptions, FootprintError> {
        let mut options = config.aggregate_options();

        if let Some(trials) = &self.trials {
            options.trials = trials
                .trim()
                .parse()
                .ok()
                .filter(|t: &u32| *t > 0)
                .ok_or_else(|| {
                    FootprintError::invalid_parameter(format!("trials must be a positive integer, got '{}'", trials))
                })?;
        }
        if let Some(mode) = &self.mode {
            options.candidate_mode = mode.parse::<CandidateMode>()?;
        }
        if let Some(seed) = &self.seed {
            options.seed = Some(seed.trim().parse().map_err(|_| {
                FootprintError::invalid_parameter(format!("seed must be an unsigned integer, got '{}'", seed))
            })?);
        }

        Ok(options)
    }
}

// ============================================================================
// Error mapping
// ============================================================================

fn status_for(err: &anyhow::Error) -> StatusCode {
    match err.downcast_ref::<FootprintError>() {
        Some(FootprintError::InvalidParameter(_)) => StatusCode::BAD_REQUEST,
        Some(FootprintError::DataLoad(_)) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: anyhow::Error) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Request failed: {:#}", err);
    } else {
        warn!("Rejected request: {}", err);
    }
    (status, Json(ApiResponse::err(err.to_string()))).into_response()
}

/// Run synchronous work (SQLite, sampling) off the async workers
async fn run_blocking<T, F>(work: F) -> Response
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(data)) => (StatusCode::OK, Json(ApiResponse::ok(data))).into_response(),
        Ok(Err(e)) => error_response(e),
        Err(e) => error_response(anyhow!("worker task failed: {}", e)),
    }
}

fn parse_fips(value: &str, name: &str) -> Result<u32, FootprintError> {
    value
        .trim()
        .parse()
        .map_err(|_| FootprintError::invalid_parameter(format!("{} must be numeric, got '{}'", name, value)))
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(HealthResponse {
        status: "OK",
        version: VERSION,
        snapshot_loaded: state.store.is_loaded(),
    }))
}

/// GET /api/indicators - Impact indicator catalog
async fn get_indicators(State(state): State<AppState>) -> Response {
    run_blocking(move || Ok(state.store.get_indicators()?.to_vec())).await
}

/// GET /api/resolve/:naics - Candidate model sectors for a NAICS-2017 code
async fn resolve_naics(State(state): State<AppState>, Path(naics): Path<String>) -> Response {
    run_blocking(move || {
        let resolution = CrosswalkResolver::new(&state.store).candidates(&naics)?;
        let best = disambiguate(resolution.clone());
        Ok(serde_json::json!({
            "resolution": resolution,
            "disambiguated": best,
        }))
    })
    .await
}

async fn geography_impacts(state: AppState, geography: GeographyId, query: SamplingQuery) -> Response {
    run_blocking(move || {
        let options = query.options(&state.config)?;

        let records = {
            let cbp = state
                .cbp
                .lock()
                .map_err(|_| anyhow!("CBP database lock poisoned"))?;
            cbp.fetch_industry_records(&geography)?
        };

        let report = ImpactAggregator::new(&state.store).aggregate_report(&geography.to_string(), &records, &options)?;
        Ok(report)
    })
    .await
}

/// GET /api/impacts/zipcode/:zipcode
async fn zipcode_impacts(
    State(state): State<AppState>,
    Path(zipcode): Path<String>,
    Query(query): Query<SamplingQuery>,
) -> Response {
    match GeographyId::zipcode(&zipcode) {
        Ok(geography) => geography_impacts(state, geography, query).await,
        Err(e) => error_response(e.into()),
    }
}

/// GET /api/impacts/state/:statefp
async fn state_impacts(
    State(state): State<AppState>,
    Path(statefp): Path<String>,
    Query(query): Query<SamplingQuery>,
) -> Response {
    match parse_fips(&statefp, "statefp") {
        Ok(statefp) => geography_impacts(state, GeographyId::state(statefp), query).await,
        Err(e) => error_response(e.into()),
    }
}

/// GET /api/impacts/state/:statefp/county/:countyfp
async fn county_impacts(
    State(state): State<AppState>,
    Path((statefp, countyfp)): Path<(String, String)>,
    Query(query): Query<SamplingQuery>,
) -> Response {
    let geography = parse_fips(&statefp, "statefp")
        .and_then(|s| Ok(GeographyId::county(s, parse_fips(&countyfp, "countyfp")?)));

    match geography {
        Ok(geography) => geography_impacts(state, geography, query).await,
        Err(e) => error_response(e.into()),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🌐 Impact Footprint - Web Server v{}", VERSION);

    // Optional config file as the only argument
    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = FootprintConfig::load(config_path.as_deref())?;

    let cbp = CbpDatabase::open(&config.cbp_database)?;
    info!("✓ CBP database opened: {:?}", config.cbp_database);

    // Create shared state
    let state = AppState {
        store: Arc::new(ImpactModelStore::new(CsvSnapshot::new(&config.snapshot_dir))),
        cbp: Arc::new(Mutex::new(cbp)),
        config: Arc::new(config),
    };

    // Warm the impact model in the background; requests before it is ready just wait on it
    let warm = state.store.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = warm.model() {
            error!("Impact model unavailable, impact routes will answer 503: {}", e);
        }
    });

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/indicators", get(get_indicators))
        .route("/resolve/:naics", get(resolve_naics))
        .route("/impacts/zipcode/:zipcode", get(zipcode_impacts))
        .route("/impacts/state/:statefp", get(state_impacts))
        .route("/impacts/state/:statefp/county/:countyfp", get(county_impacts))
        .with_state(state.clone());

    // Build main router
    let app = Router::new()
        .nest("/api", api_routes)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    // Start server
    let addr = state.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server running on http://{}", addr);
    info!("   API: http://{}/api/impacts/state/13", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(trials: Option<&str>, mode: Option<&str>, seed: Option<&str>) -> SamplingQuery {
        SamplingQuery {
            trials: trials.map(String::from),
            mode: mode.map(String::from),
            seed: seed.map(String::from),
        }
    }

    #[test]
    fn test_query_defaults_come_from_config() {
        let config = FootprintConfig {
            trials: 50,
            ..FootprintConfig::default()
        };
        let options = SamplingQuery::default().options(&config).unwrap();
        assert_eq!(options.trials, 50);
        assert_eq!(options.candidate_mode, CandidateMode::Ambiguous);
        assert_eq!(options.seed, None);
    }

    #[test]
    fn test_query_overrides() {
        let options = query(Some("10"), Some("disambiguated"), Some("7"))
            .options(&FootprintConfig::default())
            .unwrap();
        assert_eq!(options.trials, 10);
        assert_eq!(options.candidate_mode, CandidateMode::Disambiguated);
        assert_eq!(options.seed, Some(7));
    }

    #[test]
    fn test_bad_query_values_are_bad_requests() {
        let config = FootprintConfig::default();
        for q in [
            query(Some("0"), None, None),
            query(Some("lots"), None, None),
            query(None, Some("random"), None),
            query(None, None, Some("-3")),
        ] {
            let err = q.options(&config).unwrap_err();
            assert_eq!(status_for(&err.into()), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for(&FootprintError::data_load("missing D.csv").into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&anyhow!("disk on fire")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(parse_fips("13", "statefp").unwrap(), 13);
        assert!(parse_fips("GA", "statefp").is_err());
    }
}
