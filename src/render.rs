use crate::config::{AppConfig, MapConfig};
use crate::data::Dataset;
use crate::processing::filter_and_join;
use crate::types::{GeometryTable, JoinedRegion, Level};
use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, JsonObject};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::json;
use std::fs;
use tracing::{error, info};

pub const LEAFLET_VERSION: &str = "1.9.4";

// Five-class sequential palette, low to high inequality
const GINI_PALETTE: [&str; 5] = ["#ffffb2", "#fecc5c", "#fd8d3c", "#f03b20", "#bd0026"];
const NO_DATA_COLOR: &str = "#bdbdbd";

/// Leaflet path options.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    pub fill_color: &'static str,
    pub color: &'static str,
    pub weight: f64,
    pub fill_opacity: f64,
}

pub const REGION_STYLE: Style = Style {
    fill_color: "green",
    color: "black",
    weight: 1.0,
    fill_opacity: 0.5,
};

const CHOROPLETH_STYLE: Style = Style {
    fill_color: NO_DATA_COLOR,
    color: "black",
    weight: 0.3,
    fill_opacity: 0.7,
};

const OUTLINE_STYLE: Style = Style {
    fill_color: "none",
    color: "#555555",
    weight: 1.0,
    fill_opacity: 0.0,
};

/// A feature property shown in the hover tooltip under `alias`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TooltipField {
    pub field: &'static str,
    pub alias: &'static str,
}

const fn field(field: &'static str, alias: &'static str) -> TooltipField {
    TooltipField { field, alias }
}

pub const STATE_TOOLTIP: [TooltipField; 4] = [
    field("year", "Año"),
    field("name", "Estado"),
    field("gini", "Índice Gini"),
    field("income", "Ingreso promedio"),
];

pub const MUNICIPALITY_TOOLTIP: [TooltipField; 5] = [
    field("year", "Año"),
    field("state", "Estado"),
    field("name", "Municipio"),
    field("gini", "Índice Gini"),
    field("income", "Ingreso promedio"),
];

pub fn tooltip_for(level: Level) -> Vec<TooltipField> {
    match level {
        Level::State => STATE_TOOLTIP.to_vec(),
        Level::Municipality => MUNICIPALITY_TOOLTIP.to_vec(),
    }
}

/// One GeoJSON overlay with its style and tooltip.
#[derive(Debug, Clone, Serialize)]
pub struct Layer {
    #[serde(rename = "data")]
    pub features: FeatureCollection,
    pub style: Style,
    pub tooltip: Vec<TooltipField>,
}

#[derive(Debug, Clone)]
pub struct MapDocument {
    pub center: [f64; 2],
    pub zoom: u8,
    pub layers: Vec<Layer>,
}

impl MapDocument {
    pub fn new(map: &MapConfig) -> Self {
        Self {
            center: map.center,
            zoom: map.zoom,
            layers: Vec::new(),
        }
    }

    pub fn to_html(&self) -> Result<String> {
        let layers = serde_json::to_string(&self.layers)
            .context("Failed to serialize map layers")?
            // keep "</script>" inside string literals from closing the tag
            .replace("</", "<\\/");
        let center = serde_json::to_string(&self.center)
            .context("Failed to serialize map center")?;

        Ok(MAP_TEMPLATE
            .replace("__LEAFLET__", LEAFLET_VERSION)
            .replace("__CENTER__", &center)
            .replace("__ZOOM__", &self.zoom.to_string())
            .replace("__LAYERS__", &layers))
    }
}

fn region_feature(region: &JoinedRegion<'_>, fill: Option<&str>) -> Feature {
    let row = region.indicators;
    let mut properties = JsonObject::new();
    properties.insert("cvegeo".to_string(), json!(region.code()));
    properties.insert("name".to_string(), json!(region.name()));
    properties.insert("year".to_string(), json!(row.year));
    properties.insert("gini".to_string(), json!(row.gini));
    properties.insert("income".to_string(), json!(row.income));
    if let Some(state) = &row.state_name {
        properties.insert("state".to_string(), json!(state));
    }
    if let Some(fill) = fill {
        properties.insert("fill".to_string(), json!(fill));
    }

    Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::from(&region.geometry.geometry))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Fixed-style overlay used by the single-region view.
pub fn region_layer(regions: &[JoinedRegion<'_>], level: Level) -> Layer {
    Layer {
        features: collection(regions.iter().map(|r| region_feature(r, None)).collect()),
        style: REGION_STYLE,
        tooltip: tooltip_for(level),
    }
}

pub fn outline_layer(geometry: &GeometryTable) -> Layer {
    let features = geometry.records.iter()
        .map(|record| Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&record.geometry))),
            id: None,
            properties: None,
            foreign_members: None,
        })
        .collect();

    Layer {
        features: collection(features),
        style: OUTLINE_STYLE,
        tooltip: Vec::new(),
    }
}

/// Inclusive upper bounds of the first four quantile classes.
pub fn quantile_breaks(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return Vec::new();
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let classes = GINI_PALETTE.len();
    (1..classes)
        .map(|i| {
            let idx = (i * sorted.len() / classes).min(sorted.len() - 1);
            sorted[idx]
        })
        .collect()
}

pub fn class_color(value: Option<f64>, breaks: &[f64]) -> &'static str {
    match value {
        Some(v) if v.is_finite() && !breaks.is_empty() => {
            let class = breaks.iter().filter(|b| v > **b).count();
            GINI_PALETTE[class.min(GINI_PALETTE.len() - 1)]
        }
        _ => NO_DATA_COLOR,
    }
}

/// Every region of a level for one year, colored by Gini class.
pub fn choropleth_layer(regions: &[JoinedRegion<'_>], level: Level) -> Layer {
    let values: Vec<f64> = regions.iter().filter_map(|r| r.indicators.gini).collect();
    let breaks = quantile_breaks(&values);

    let features = regions.iter()
        .map(|r| region_feature(r, Some(class_color(r.indicators.gini, &breaks))))
        .collect();

    Layer {
        features: collection(features),
        style: CHOROPLETH_STYLE,
        tooltip: tooltip_for(level),
    }
}

pub fn aggregate_document(config: &AppConfig, dataset: &Dataset, year: i32, level: Level) -> MapDocument {
    let joined = filter_and_join(dataset.indicators(level), dataset.geometry(level), year);

    let mut document = MapDocument::new(&config.map);
    document.layers.push(outline_layer(&dataset.country_geometry));
    document.layers.push(choropleth_layer(&joined, level));
    document
}

/// Writes `{year}_{ent|mpio}_map.html` for every configured year and level.
pub fn generate_documents(config: &AppConfig, dataset: &Dataset) -> Result<()> {
    let maps_dir = config.maps_dir();
    fs::create_dir_all(&maps_dir)
        .with_context(|| format!("Failed to create maps directory: {:?}", maps_dir))?;

    let jobs: Vec<(i32, Level)> = config.years.iter()
        .flat_map(|&year| Level::ALL.into_iter().map(move |level| (year, level)))
        .collect();
    info!("Generating {} map documents into {:?}...", jobs.len(), maps_dir);

    let failures: Vec<anyhow::Error> = jobs.par_iter()
        .filter_map(|&(year, level)| {
            let path = maps_dir.join(level.document_name(year));
            let result = aggregate_document(config, dataset, year, level)
                .to_html()
                .and_then(|html| {
                    fs::write(&path, html).with_context(|| format!("Failed to write {:?}", path))
                });
            match result {
                Ok(()) => {
                    info!(?path, "Wrote map document");
                    None
                }
                Err(e) => {
                    error!(?path, "Failed to generate map document: {:#}", e);
                    Some(e)
                }
            }
        })
        .collect();

    match failures.into_iter().next() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

const MAP_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8" />
<meta name="viewport" content="width=device-width, initial-scale=1.0" />
<link rel="stylesheet" href="https://unpkg.com/leaflet@__LEAFLET__/dist/leaflet.css" />
<script src="https://unpkg.com/leaflet@__LEAFLET__/dist/leaflet.js"></script>
<style>
  html, body, #map { height: 100%; width: 100%; margin: 0; padding: 0; }
  .region-tooltip th { text-align: left; padding-right: 8px; }
</style>
</head>
<body>
<div id="map"></div>
<script>
  const map = L.map('map').setView(__CENTER__, __ZOOM__);
  L.tileLayer('https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png', {
    maxZoom: 18,
    attribution: '&copy; OpenStreetMap contributors'
  }).addTo(map);

  const escapeHtml = (value) => String(value ?? '')
    .replace(/&/g, '&amp;').replace(/</g, '&lt;').replace(/>/g, '&gt;')
    .replace(/"/g, '&quot;').replace(/'/g, '&#39;');

  const layers = __LAYERS__;
  for (const layer of layers) {
    L.geoJSON(layer.data, {
      style: (feature) => {
        const fill = feature.properties && feature.properties.fill;
        return fill ? Object.assign({}, layer.style, { fillColor: fill }) : layer.style;
      },
      onEachFeature: (feature, leafletLayer) => {
        if (!layer.tooltip.length) return;
        const rows = layer.tooltip
          .map((t) => `<tr><th>${escapeHtml(t.alias)}</th><td>${escapeHtml(feature.properties[t.field])}</td></tr>`)
          .join('');
        leafletLayer.bindTooltip(`<table class="region-tooltip">${rows}</table>`, { sticky: true });
      }
    }).addTo(map);
  }
</script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::tests::{indicator, region};
    use crate::types::{IndicatorTable, JoinedRegion};

    #[test]
    fn region_style_serializes_for_leaflet() {
        let value = serde_json::to_value(REGION_STYLE).unwrap();
        assert_eq!(
            value,
            json!({"fillColor": "green", "color": "black", "weight": 1.0, "fillOpacity": 0.5})
        );
    }

    #[test]
    fn municipality_tooltip_adds_state_name() {
        let state: Vec<&str> = STATE_TOOLTIP.iter().map(|f| f.alias).collect();
        let municipality: Vec<&str> = MUNICIPALITY_TOOLTIP.iter().map(|f| f.alias).collect();

        assert_eq!(state, vec!["Año", "Estado", "Índice Gini", "Ingreso promedio"]);
        assert_eq!(municipality, vec!["Año", "Estado", "Municipio", "Índice Gini", "Ingreso promedio"]);
    }

    #[test]
    fn region_layer_carries_tooltip_properties() {
        let geometry = region("14039", "Guadalajara");
        let row = indicator("14039", 2020, 0.42, Some(14));
        let joined = [JoinedRegion { geometry: &geometry, indicators: &row }];

        let layer = region_layer(&joined, Level::Municipality);
        let feature = &layer.features.features[0];

        assert_eq!(feature.property("name"), Some(&json!("Guadalajara")));
        assert_eq!(feature.property("year"), Some(&json!(2020)));
        assert_eq!(feature.property("gini"), Some(&json!(0.42)));
        assert_eq!(feature.property("state"), Some(&json!("Estado")));
        assert!(feature.property("fill").is_none());
        assert!(feature.geometry.is_some());
    }

    #[test]
    fn document_embeds_center_zoom_and_layers() {
        let mut document = MapDocument::new(&MapConfig::default());
        document.layers.push(region_layer(&[], Level::State));

        let html = document.to_html().unwrap();

        assert!(html.contains("setView([23.634915,-102.552784], 5)"));
        assert!(html.contains(r#""fillColor":"green""#));
        assert!(!html.contains("__LAYERS__"));
    }

    #[test]
    fn script_terminators_in_names_are_neutralized() {
        let geometry = region("01", "</script><b>");
        let row = indicator("01", 2018, 0.4, None);
        let mut document = MapDocument::new(&MapConfig::default());
        document.layers.push(region_layer(&[JoinedRegion { geometry: &geometry, indicators: &row }], Level::State));

        let html = document.to_html().unwrap();
        assert_eq!(html.matches("</script>").count(), 2);
    }

    #[test]
    fn quantile_classes_cover_palette() {
        let values = [0.30, 0.35, 0.40, 0.45, 0.50, 0.55, 0.60, 0.65, 0.70, 0.75];
        let breaks = quantile_breaks(&values);

        assert_eq!(breaks.len(), 4);
        assert_eq!(class_color(Some(0.30), &breaks), GINI_PALETTE[0]);
        assert_eq!(class_color(Some(0.75), &breaks), GINI_PALETTE[4]);
        assert_eq!(class_color(None, &breaks), NO_DATA_COLOR);
        assert_eq!(class_color(Some(0.5), &[]), NO_DATA_COLOR);
    }

    #[test]
    fn choropleth_colors_every_feature() {
        let geometries = [region("09", "A"), region("14", "B")];
        let table = IndicatorTable {
            rows: vec![indicator("09", 2018, 0.3, None), indicator("14", 2018, 0.6, None)],
        };
        let joined: Vec<JoinedRegion> = geometries.iter()
            .zip(&table.rows)
            .map(|(geometry, indicators)| JoinedRegion { geometry, indicators })
            .collect();

        let layer = choropleth_layer(&joined, Level::State);

        let fills: Vec<_> = layer.features.features.iter().map(|f| f.property("fill").cloned()).collect();
        assert_eq!(fills, vec![Some(json!(GINI_PALETTE[0])), Some(json!(GINI_PALETTE[2]))]);
    }

    #[test]
    fn generate_writes_every_year_and_level() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::data::fixtures::write_data_dir(dir.path());
        let dataset = crate::data::load_dataset(&config).unwrap();

        generate_documents(&config, &dataset).unwrap();

        for year in [2018, 2020, 2022] {
            for level in Level::ALL {
                let html = fs::read_to_string(config.maps_dir().join(level.document_name(year))).unwrap();
                assert!(html.contains("L.geoJSON"));
            }
        }
    }
}
