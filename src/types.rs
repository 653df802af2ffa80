use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

/// Administrative granularity of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    #[serde(rename = "ent")]
    State,
    #[serde(rename = "mpio")]
    Municipality,
}

impl Level {
    pub const ALL: [Level; 2] = [Level::State, Level::Municipality];

    /// Suffix used in precomputed document names.
    pub fn suffix(self) -> &'static str {
        match self {
            Level::State => "ent",
            Level::Municipality => "mpio",
        }
    }

    /// Width of a zero-padded cvegeo at this level.
    pub fn code_width(self) -> usize {
        match self {
            Level::State => 2,
            Level::Municipality => 5,
        }
    }

    /// `{year}_{ent|mpio}_map.html`
    pub fn document_name(self, year: i32) -> String {
        format!("{}_{}_map.html", year, self.suffix())
    }
}

/// One row of an indicator table.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRecord {
    pub code: String,
    pub year: i32,
    pub gini: Option<f64>,
    pub income: Option<f64>,
    // Municipality rows only
    pub state_name: Option<String>,
    pub state_code: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct GeometryRecord {
    pub code: String,
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone)]
pub struct IndicatorTable {
    pub rows: Vec<IndicatorRecord>,
}

#[derive(Debug, Clone)]
pub struct GeometryTable {
    pub records: Vec<GeometryRecord>,
}

/// A geometry matched to its indicator row for one year. Borrowed from the
/// base tables and dropped at the end of the request that built it.
#[derive(Debug, Clone, Copy)]
pub struct JoinedRegion<'a> {
    pub geometry: &'a GeometryRecord,
    pub indicators: &'a IndicatorRecord,
}

impl<'a> JoinedRegion<'a> {
    pub fn code(&self) -> &'a str {
        &self.geometry.code
    }

    pub fn name(&self) -> &'a str {
        &self.geometry.name
    }
}

/// Normalizes a numeric code read from a geometry attribute into the
/// zero-padded string form used by the indicator tables.
pub fn pad_numeric_code(value: f64, level: Level) -> Option<String> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return None;
    }
    Some(format!("{:0width$}", value as u64, width = level.code_width()))
}
