use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{anyhow, Context, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub columns: ColumnConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default = "default_years")]
    pub years: Vec<i32>,
    #[serde(default)]
    pub server: ServerConfig,
}

/// File locations. Every path except `data_dir` is relative to `data_dir`.
#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub data_dir: PathBuf,
    #[serde(default = "default_municipality_csv")]
    pub municipality_csv: PathBuf,
    #[serde(default = "default_state_csv")]
    pub state_csv: PathBuf,
    #[serde(default = "default_state_geometry")]
    pub state_geometry: PathBuf,
    #[serde(default = "default_municipality_geometry")]
    pub municipality_geometry: PathBuf,
    #[serde(default = "default_country_geometry")]
    pub country_geometry: PathBuf,
    #[serde(default = "default_maps_dir")]
    pub maps_dir: PathBuf,
}

/// Column names shared by the indicator CSVs and the geometry attributes.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ColumnConfig {
    pub code: String,
    pub year: String,
    pub gini: String,
    pub income: String,
    pub name: String,
    pub state_name: String,
    pub state_code: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            code: "cvegeo".to_string(),
            year: "Año".to_string(),
            gini: "GINI".to_string(),
            income: "Ingreso promedio total".to_string(),
            name: "nom_geo".to_string(),
            state_name: "Estado".to_string(),
            state_code: "estado_codigo".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    /// `[lat, lon]`
    pub center: [f64; 2],
    pub zoom: u8,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center: [23.634915, -102.552784],
            zoom: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

fn default_years() -> Vec<i32> {
    vec![2018, 2020, 2022]
}

fn default_municipality_csv() -> PathBuf {
    PathBuf::from("mpio_cluster.csv")
}

fn default_state_csv() -> PathBuf {
    PathBuf::from("ent_cluster.csv")
}

fn default_state_geometry() -> PathBuf {
    PathBuf::from("shp/shp_ent_tidy_data.shp")
}

fn default_municipality_geometry() -> PathBuf {
    PathBuf::from("shp/shp_mun_tidy_data.shp")
}

fn default_country_geometry() -> PathBuf {
    PathBuf::from("shp/dest_2010cw.shp")
}

fn default_maps_dir() -> PathBuf {
    PathBuf::from("maps")
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        if config.years.is_empty() {
            return Err(anyhow!("At least one year must be configured"));
        }
        Ok(config)
    }

    pub fn municipality_csv_path(&self) -> PathBuf {
        self.input.data_dir.join(&self.input.municipality_csv)
    }

    pub fn state_csv_path(&self) -> PathBuf {
        self.input.data_dir.join(&self.input.state_csv)
    }

    pub fn state_geometry_path(&self) -> PathBuf {
        self.input.data_dir.join(&self.input.state_geometry)
    }

    pub fn municipality_geometry_path(&self) -> PathBuf {
        self.input.data_dir.join(&self.input.municipality_geometry)
    }

    pub fn country_geometry_path(&self) -> PathBuf {
        self.input.data_dir.join(&self.input.country_geometry)
    }

    pub fn maps_dir(&self) -> PathBuf {
        self.input.data_dir.join(&self.input.maps_dir)
    }

    pub fn supports_year(&self, year: i32) -> bool {
        self.years.contains(&year)
    }
}
