use crate::config::{AppConfig, ColumnConfig};
use crate::types::{
    pad_numeric_code, GeometryRecord, GeometryTable, IndicatorRecord, IndicatorTable, Level,
};
use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, StringRecord};
use geo::MultiPolygon;
use shapefile::dbase::FieldValue;
use shapefile::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

/// Every base table, loaded once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub municipality_indicators: IndicatorTable,
    pub state_indicators: IndicatorTable,
    pub municipality_geometry: GeometryTable,
    pub state_geometry: GeometryTable,
    pub country_geometry: GeometryTable,
}

impl Dataset {
    pub fn indicators(&self, level: Level) -> &IndicatorTable {
        match level {
            Level::State => &self.state_indicators,
            Level::Municipality => &self.municipality_indicators,
        }
    }

    pub fn geometry(&self, level: Level) -> &GeometryTable {
        match level {
            Level::State => &self.state_geometry,
            Level::Municipality => &self.municipality_geometry,
        }
    }
}

pub fn load_dataset(config: &AppConfig) -> Result<Dataset> {
    info!("Loading data from {:?}", config.input.data_dir);
    let columns = &config.columns;

    let municipality_indicators =
        load_indicator_csv(&config.municipality_csv_path(), columns)?;
    let state_indicators = load_indicator_csv(&config.state_csv_path(), columns)?;
    info!(
        municipalities = municipality_indicators.rows.len(),
        states = state_indicators.rows.len(),
        "Loaded indicator tables"
    );

    let municipality_geometry =
        load_geometry(&config.municipality_geometry_path(), Level::Municipality, columns)?;
    let state_geometry = load_geometry(&config.state_geometry_path(), Level::State, columns)?;
    let country_geometry = load_geometry(&config.country_geometry_path(), Level::State, columns)?;
    info!(
        municipalities = municipality_geometry.records.len(),
        states = state_geometry.records.len(),
        country = country_geometry.records.len(),
        "Loaded geometry tables"
    );

    let duplicates = crate::processing::duplicate_names(&state_geometry);
    if !duplicates.is_empty() {
        warn!(?duplicates, "State display names are not unique; the dropdown resolves to the first match");
    }

    Ok(Dataset {
        municipality_indicators,
        state_indicators,
        municipality_geometry,
        state_geometry,
        country_geometry,
    })
}

pub fn load_indicator_csv(path: &Path, columns: &ColumnConfig) -> Result<IndicatorTable> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);
    let headers = rdr.headers()
        .with_context(|| format!("Failed to read CSV header: {:?}", path))?
        .clone();

    let required = |name: &str| {
        headers.iter().position(|h| h.trim() == name)
            .ok_or_else(|| anyhow!("Column '{}' not found in CSV {:?}", name, path))
    };
    let optional = |name: &str| headers.iter().position(|h| h.trim() == name);

    let code_idx = required(&columns.code)?;
    let year_idx = required(&columns.year)?;
    let gini_idx = required(&columns.gini)?;
    let income_idx = required(&columns.income)?;
    let state_name_idx = optional(&columns.state_name);
    let state_code_idx = optional(&columns.state_code);

    let mut rows = Vec::new();

    for result in rdr.records() {
        let record = result.with_context(|| format!("Malformed CSV row in {:?}", path))?;
        let code = record.get(code_idx).unwrap_or("").trim().to_string();

        if code.is_empty() { continue; }

        let year = parse_number(&record, year_idx, &columns.year)?
            .ok_or_else(|| anyhow!("Missing '{}' for {} in {:?}", columns.year, code, path))
            .and_then(|y| whole_number(y).ok_or_else(|| anyhow!("Year {} is not a whole number", y)))?;
        let year = i32::try_from(year)
            .map_err(|_| anyhow!("Year {} out of range in {:?}", year, path))?;

        let state_code = match state_code_idx {
            Some(idx) => parse_number(&record, idx, &columns.state_code)?
                .map(|c| whole_number(c)
                    .and_then(|c| u32::try_from(c).ok())
                    .ok_or_else(|| anyhow!("State code {} is not a valid code", c)))
                .transpose()?,
            None => None,
        };

        rows.push(IndicatorRecord {
            code,
            year,
            gini: parse_number(&record, gini_idx, &columns.gini)?,
            income: parse_number(&record, income_idx, &columns.income)?,
            state_name: text_cell(&record, state_name_idx),
            state_code,
        });
    }

    Ok(IndicatorTable { rows })
}

fn text_cell(record: &StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Empty cells are missing values; anything else must parse.
fn parse_number(record: &StringRecord, idx: usize, column: &str) -> Result<Option<f64>> {
    let raw = record.get(idx).unwrap_or("").trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let line = record.position().map(|p| p.line()).unwrap_or(0);
    raw.parse::<f64>()
        .map(Some)
        .with_context(|| format!("Invalid number '{}' in column '{}' at line {}", raw, column, line))
}

fn whole_number(value: f64) -> Option<i64> {
    if value.is_finite() && value.fract() == 0.0 {
        Some(value as i64)
    } else {
        None
    }
}

/// Loads a Shapefile or GeoJSON FeatureCollection, picked by extension.
pub fn load_geometry(path: &Path, level: Level, columns: &ColumnConfig) -> Result<GeometryTable> {
    let extension = path.extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Input geometry file has no extension: {:?}", path))?;

    let records = match extension.as_str() {
        "shp" => load_shapefile(path, level, columns)?,
        "json" | "geojson" => load_geojson(path, level, columns)?,
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };

    Ok(GeometryTable { records })
}

fn load_shapefile(path: &Path, level: Level, columns: &ColumnConfig) -> Result<Vec<GeometryRecord>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut records = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result
            .with_context(|| format!("Failed to read Shapefile record: {:?}", path))?;

        let code_value = record.get(&columns.code)
            .ok_or_else(|| anyhow!("Join column '{}' not found in Shapefile {:?}", columns.code, path))?;

        let Some(code) = dbase_code(code_value, level)
            .with_context(|| format!("Invalid join column '{}' in Shapefile {:?}", columns.code, path))?
        else {
            continue;
        };

        let name = match record.get(&columns.name) {
            Some(FieldValue::Character(Some(s))) => s.trim().to_string(),
            _ => code.clone(),
        };

        let geometry = match shape {
            shapefile::Shape::Polygon(polygon) => {
                let geo_polygon: MultiPolygon<f64> = polygon.try_into()
                    .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?;
                geo_polygon
            },
            shapefile::Shape::PolygonM(polygon) => {
                let geo_polygon: MultiPolygon<f64> = polygon.try_into()
                    .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?;
                geo_polygon
            },
            shapefile::Shape::PolygonZ(polygon) => {
                let geo_polygon: MultiPolygon<f64> = polygon.try_into()
                    .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?;
                geo_polygon
            },
            _ => continue, // Skip non-polygon shapes
        };

        records.push(GeometryRecord { code, name, geometry });
    }

    Ok(records)
}

/// Code from a dBASE attribute. Null cells are `None`; numbers of any dBASE
/// numeric type are zero-padded to the level width.
fn dbase_code(value: &FieldValue, level: Level) -> Result<Option<String>> {
    let number = match value {
        FieldValue::Character(s) => return Ok(s.as_ref().map(|s| s.trim().to_string())),
        FieldValue::Numeric(n) => *n,
        FieldValue::Float(n) => n.map(f64::from),
        FieldValue::Double(n) => Some(*n),
        FieldValue::Integer(n) => Some(f64::from(*n)),
        other => return Err(anyhow!("Join column must be a string or number, got {:?}", other)),
    };

    number
        .map(|n| pad_numeric_code(n, level).ok_or_else(|| anyhow!("Invalid numeric code {}", n)))
        .transpose()
}

fn load_geojson(path: &Path, level: Level, columns: &ColumnConfig) -> Result<Vec<GeometryRecord>> {
    use geojson::GeoJson;

    let file = File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let reader = BufReader::new(file);

    let geojson = GeoJson::from_reader(reader)
        .with_context(|| format!("Failed to parse GeoJSON: {:?}", path))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection: {:?}", path)),
    };

    let mut records = Vec::new();

    for feature in collection.features {
        let properties = feature.properties.as_ref();

        let code = match properties.and_then(|props| props.get(&columns.code)) {
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            Some(serde_json::Value::Number(n)) => n.as_f64()
                .and_then(|n| pad_numeric_code(n, level))
                .ok_or_else(|| anyhow!("Invalid numeric code {} in {:?}", n, path))?,
            Some(serde_json::Value::Null) => continue,
            Some(other) => return Err(anyhow!("GeoJSON join column must be a string or number, got {}", other)),
            None => return Err(anyhow!("Join column '{}' not found in GeoJSON {:?}", columns.code, path)),
        };

        let name = match properties.and_then(|props| props.get(&columns.name)) {
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            _ => code.clone(),
        };

        let geometry = match feature.geometry {
            Some(geom) => {
                let valid_geo: geo::Geometry<f64> = geom.value.try_into()
                    .map_err(|e| anyhow!("Failed to convert geojson geometry: {:?}", e))?;

                match valid_geo {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => continue, // Skip points/lines
                }
            },
            None => continue,
        };

        records.push(GeometryRecord { code, name, geometry });
    }

    Ok(records)
}
