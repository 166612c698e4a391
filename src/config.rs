use std::path::PathBuf;

use dirs::home_dir;
use log::error;

const DEFAULT_TILE_URL: &str =
  "https://a.basemaps.cartocdn.com/rastertiles/voyager/{zoom}/{x}/{y}.png";
const DEFAULT_CADASTRE_TILE_URL: &str =
  "https://openmaptiles.data.gouv.fr/data/cadastre-dvf/{zoom}/{x}/{y}.pbf";
const DEFAULT_DVF_API_URL: &str = "https://dvf-api.data.gouv.fr";
const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_LISTINGS_API_URL: &str = "http://localhost:3000";

/// Default viewport: Pessac, at a zoom where parcels are visible.
pub const DEFAULT_CENTER: (f32, f32) = (44.8067, -0.6311);
pub const DEFAULT_ZOOM: u8 = 17;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Config {
  pub config_path: Option<PathBuf>,
  pub tile_url: String,
  pub cadastre_tile_url: String,
  pub dvf_api_url: String,
  pub geocoder_url: String,
  pub listings_api_url: String,
  pub tile_cache_dir: Option<PathBuf>,
}

/// Partial config as read from the config file; anything absent falls back
/// to env or defaults.
#[derive(Debug, Default, serde::Deserialize)]
struct ConfigFile {
  tile_url: Option<String>,
  cadastre_tile_url: Option<String>,
  dvf_api_url: Option<String>,
  geocoder_url: Option<String>,
  listings_api_url: Option<String>,
  tile_cache_dir: Option<PathBuf>,
}

impl Config {
  #[must_use]
  pub fn new() -> Self {
    let config_path = std::env::var("IMMOCARTE_CONFIG")
      .ok()
      .map(PathBuf::from)
      .or_else(|| home_dir().map(|home| home.join(".config").join("immocarte")));
    let from_file = Self::from_file(config_path.as_ref());

    let pick = |env: &str, file: &Option<String>, default: &str| {
      std::env::var(env)
        .ok()
        .or_else(|| file.clone())
        .unwrap_or_else(|| default.to_string())
    };

    let tile_cache_dir = std::env::var("IMMOCARTE_TILE_CACHE_DIR")
      .ok()
      .map(PathBuf::from)
      .or_else(|| from_file.tile_cache_dir.clone())
      .or_else(|| config_path.as_ref().map(|p| p.join("tile_cache")));

    Self {
      tile_url: pick("IMMOCARTE_TILE_URL", &from_file.tile_url, DEFAULT_TILE_URL),
      cadastre_tile_url: pick(
        "IMMOCARTE_CADASTRE_TILE_URL",
        &from_file.cadastre_tile_url,
        DEFAULT_CADASTRE_TILE_URL,
      ),
      dvf_api_url: pick(
        "IMMOCARTE_DVF_API",
        &from_file.dvf_api_url,
        DEFAULT_DVF_API_URL,
      ),
      geocoder_url: pick(
        "IMMOCARTE_GEOCODER",
        &from_file.geocoder_url,
        DEFAULT_GEOCODER_URL,
      ),
      listings_api_url: pick(
        "IMMOCARTE_LISTINGS_API",
        &from_file.listings_api_url,
        DEFAULT_LISTINGS_API_URL,
      ),
      tile_cache_dir,
      config_path,
    }
  }

  fn from_file(config_path: Option<&PathBuf>) -> ConfigFile {
    let Some(path) = config_path else {
      return ConfigFile::default();
    };
    let file = path.join("config.json5");
    if !file.exists() {
      return ConfigFile::default();
    }
    std::fs::read_to_string(&file)
      .map_err(anyhow::Error::from)
      .and_then(|raw| json5::from_str(&raw).map_err(anyhow::Error::from))
      .unwrap_or_else(|e| {
        error!("Could not read config file {}: {e}", file.display());
        ConfigFile::default()
      })
  }
}

impl Default for Config {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn config_file_is_partial() {
    let parsed: ConfigFile =
      json5::from_str(r#"{ dvf_api_url: "https://dvf.example.org" }"#).unwrap();
    assert_eq!(parsed.dvf_api_url.as_deref(), Some("https://dvf.example.org"));
    assert!(parsed.tile_url.is_none());
  }
}
