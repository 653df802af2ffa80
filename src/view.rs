use crate::config::AppConfig;
use crate::data::Dataset;
use crate::processing::{
    filter_and_join, filter_by_year, join_rows, municipalities_of_state, resolve_state_code,
    state_names,
};
use crate::render::{region_layer, Layer, MapDocument};
use crate::types::Level;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Raw dashboard query string. Every field is optional; missing values fall
/// back to the initial selection.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SelectionQuery {
    pub year: Option<i32>,
    pub view: Option<String>,
    pub state: Option<String>,
    pub municipalities: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    State,
    Municipality,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewMode {
    AllStates,
    AllMunicipalities,
    SingleRegion { state: String, detail: Detail },
}

impl ViewMode {
    pub fn param(&self) -> &'static str {
        match self {
            ViewMode::AllStates => "states",
            ViewMode::AllMunicipalities => "municipalities",
            ViewMode::SingleRegion { .. } => "region",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub year: i32,
    pub mode: ViewMode,
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("year {0} is not available")]
    UnsupportedYear(i32),
    #[error("unknown view '{0}'")]
    UnknownView(String),
    #[error("unknown state '{0}'")]
    UnknownState(String),
    #[error("no states were loaded")]
    NoStates,
    #[error("failed to read precomputed map {path:?}")]
    Document {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Selection {
    pub fn from_query(query: &SelectionQuery, config: &AppConfig, dataset: &Dataset) -> Result<Self, ViewError> {
        let year = match query.year {
            Some(year) if config.supports_year(year) => year,
            Some(year) => return Err(ViewError::UnsupportedYear(year)),
            None => config.years[0],
        };

        let mode = match query.view.as_deref().unwrap_or("region") {
            "states" => ViewMode::AllStates,
            "municipalities" => ViewMode::AllMunicipalities,
            "region" => {
                let state = match query.state.as_deref().filter(|s| !s.is_empty()) {
                    Some(state) => state.to_string(),
                    None => state_names(&dataset.state_geometry)
                        .first()
                        .map(|s| s.to_string())
                        .ok_or(ViewError::NoStates)?,
                };
                let detail = match query.municipalities.as_deref() {
                    Some("on" | "true" | "1") => Detail::Municipality,
                    _ => Detail::State,
                };
                ViewMode::SingleRegion { state, detail }
            }
            other => return Err(ViewError::UnknownView(other.to_string())),
        };

        Ok(Selection { year, mode })
    }
}

#[derive(Debug)]
pub enum MapContent {
    /// A map built for this request.
    Built(MapDocument),
    /// A precomputed document, embedded verbatim.
    Embedded { path: PathBuf, html: String },
    /// The precomputed document does not exist; nothing is drawn.
    Missing { path: PathBuf },
}

#[derive(Debug)]
pub struct RenderedView {
    pub content: MapContent,
    pub caption: Option<String>,
}

pub fn render_view(dataset: &Dataset, config: &AppConfig, selection: &Selection) -> Result<RenderedView, ViewError> {
    match &selection.mode {
        ViewMode::AllStates => {
            let content = load_static_document(&config.maps_dir(), selection.year, Level::State)?;
            let caption = present(&content).then(|| "Mostrando todos los estados de México".to_string());
            Ok(RenderedView { content, caption })
        }
        ViewMode::AllMunicipalities => {
            let content = load_static_document(&config.maps_dir(), selection.year, Level::Municipality)?;
            let caption = present(&content).then(|| "Mostrando todos los municipios de México con datos".to_string());
            Ok(RenderedView { content, caption })
        }
        ViewMode::SingleRegion { state, detail } => {
            let mut document = MapDocument::new(&config.map);
            document.layers.push(single_region_layer(dataset, selection.year, state, *detail)?);
            let caption = match detail {
                Detail::Municipality => format!("Mostrando la vista por municipios del estado: {}", state),
                Detail::State => format!("Mostrando la vista del estado completo: {}", state),
            };
            Ok(RenderedView { content: MapContent::Built(document), caption: Some(caption) })
        }
    }
}

fn present(content: &MapContent) -> bool {
    matches!(content, MapContent::Embedded { .. })
}

/// Builds the overlay for one state, or for its municipalities.
pub fn single_region_layer(
    dataset: &Dataset,
    year: i32,
    state: &str,
    detail: Detail,
) -> Result<Layer, ViewError> {
    let state_code = resolve_state_code(&dataset.state_geometry, state)
        .ok_or_else(|| ViewError::UnknownState(state.to_string()))?;

    let layer = match detail {
        Detail::Municipality => {
            let year_rows = filter_by_year(&dataset.municipality_indicators, year);
            let rows = municipalities_of_state(&year_rows, state_code);
            let joined = join_rows(rows, &dataset.municipality_geometry);
            debug!(state, year, regions = joined.len(), "Joined municipalities");
            region_layer(&joined, Level::Municipality)
        }
        Detail::State => {
            let joined: Vec<_> = filter_and_join(&dataset.state_indicators, &dataset.state_geometry, year)
                .into_iter()
                .filter(|region| region.code() == state_code)
                .collect();
            debug!(state, year, regions = joined.len(), "Joined state");
            region_layer(&joined, Level::State)
        }
    };

    Ok(layer)
}

/// Reads `{year}_{ent|mpio}_map.html` from `maps_dir`. A missing file is not
/// an error.
pub fn load_static_document(maps_dir: &Path, year: i32, level: Level) -> Result<MapContent, ViewError> {
    let path = maps_dir.join(level.document_name(year));
    match fs::read_to_string(&path) {
        Ok(html) => Ok(MapContent::Embedded { path, html }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(?path, "Precomputed map not found; nothing will be rendered");
            Ok(MapContent::Missing { path })
        }
        Err(source) => Err(ViewError::Document { path, source }),
    }
}
