use crate::config::AppConfig;
use crate::data::Dataset;
use crate::page::dashboard_page;
use crate::processing::{filter_by_year, state_names};
use crate::types::{GeometryTable, Level};
use crate::view::{render_view, single_region_layer, Selection, SelectionQuery, ViewError, ViewMode};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use geo::algorithm::contains::Contains;
use geo::bounding_rect::BoundingRect;
use geo::Point;
use geojson::FeatureCollection;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};

// Wrapper for RTree indexing
pub struct AreaIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for AreaIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub fn build_index(geometry: &GeometryTable) -> RTree<AreaIndex> {
    let items: Vec<AreaIndex> = geometry.records.iter().enumerate()
        .filter_map(|(i, record)| {
            let rect = record.geometry.bounding_rect()?;
            Some(AreaIndex {
                index: i,
                aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            })
        })
        .collect();
    RTree::bulk_load(items)
}

pub struct AppState {
    pub dataset: Dataset,
    pub config: AppConfig,
    state_tree: RTree<AreaIndex>,
    municipality_tree: RTree<AreaIndex>,
}

impl AppState {
    pub fn new(config: AppConfig, dataset: Dataset) -> Self {
        info!("Building spatial index for API...");
        let state_tree = build_index(&dataset.state_geometry);
        let municipality_tree = build_index(&dataset.municipality_geometry);
        Self { dataset, config, state_tree, municipality_tree }
    }

    fn tree(&self, level: Level) -> &RTree<AreaIndex> {
        match level {
            Level::State => &self.state_tree,
            Level::Municipality => &self.municipality_tree,
        }
    }
}

/// Error returned from a request handler.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<ViewError> for AppError {
    fn from(err: ViewError) -> Self {
        let status = match &err {
            ViewError::UnsupportedYear(_) | ViewError::UnknownView(_) => StatusCode::BAD_REQUEST,
            ViewError::UnknownState(_) => StatusCode::NOT_FOUND,
            ViewError::NoStates | ViewError::Document { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("{:#}", anyhow::Error::new(err));
            return Self { status, message: "internal error".to_string() };
        }
        Self { status, message: err.to_string() }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!("{:#}", err);
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: "internal error".to_string() }
    }
}

#[derive(Deserialize)]
pub struct PointQuery {
    lat: f64,
    lon: f64,
    year: Option<i32>,
    level: Option<Level>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    code: String,
    name: String,
    level: Level,
    year: i32,
    gini: Option<f64>,
    income: Option<f64>,
    state_name: Option<String>,
}

pub fn build_app(state: Arc<AppState>) -> Router {
    let maps_service = ServeDir::new(state.config.maps_dir());

    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api/regions", get(regions_handler))
        .route("/api/query", get(query_handler))
        .nest_service("/maps", maps_service)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig, dataset: Dataset) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;

    let state = Arc::new(AppState::new(config, dataset));
    let app = build_app(state);

    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SelectionQuery>,
) -> Result<Html<String>, AppError> {
    let selection = Selection::from_query(&query, &state.config, &state.dataset)?;

    // Reads a precomputed map from disk
    let render_state = state.clone();
    let render_selection = selection.clone();
    let rendered = tokio::task::spawn_blocking(move || {
        render_view(&render_state.dataset, &render_state.config, &render_selection)
    })
    .await
    .context("Render task failed")??;

    let names = state_names(&state.dataset.state_geometry);

    let page = dashboard_page(&selection, &state.config.years, &names, &rendered)?;
    Ok(Html(page))
}

/// GeoJSON of the single-region overlay for the same query as `/`.
async fn regions_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SelectionQuery>,
) -> Result<Json<FeatureCollection>, AppError> {
    let selection = Selection::from_query(&query, &state.config, &state.dataset)?;

    let features = match &selection.mode {
        ViewMode::SingleRegion { state: name, detail } => {
            single_region_layer(&state.dataset, selection.year, name, *detail)?.features
        }
        ViewMode::AllStates | ViewMode::AllMunicipalities => FeatureCollection {
            bbox: None,
            features: Vec::new(),
            foreign_members: None,
        },
    };

    Ok(Json(features))
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PointQuery>,
) -> Result<Json<Option<QueryResponse>>, AppError> {
    let year = params.year.unwrap_or(state.config.years[0]);
    if !state.config.supports_year(year) {
        return Err(ViewError::UnsupportedYear(year).into());
    }
    let level = params.level.unwrap_or(Level::State);

    Ok(Json(lookup_point(&state, level, year, params.lon, params.lat)))
}

/// The joined region containing `(lon, lat)` for `year`, if any.
pub fn lookup_point(state: &AppState, level: Level, year: i32, lon: f64, lat: f64) -> Option<QueryResponse> {
    let point = Point::new(lon, lat);
    let envelope = AABB::from_point([lon, lat]);
    let geometry = state.dataset.geometry(level);
    let rows = filter_by_year(state.dataset.indicators(level), year);

    // Query RTree
    let candidates = state.tree(level).locate_in_envelope_intersecting(&envelope);

    for candidate in candidates {
        let Some(area) = geometry.records.get(candidate.index) else { continue };
        if !area.geometry.contains(&point) {
            continue;
        }
        if let Some(row) = rows.iter().find(|row| row.code == area.code) {
            return Some(QueryResponse {
                code: area.code.clone(),
                name: area.name.clone(),
                level,
                year,
                gini: row.gini,
                income: row.income,
                state_name: row.state_name.clone(),
            });
        }
    }

    None
}
