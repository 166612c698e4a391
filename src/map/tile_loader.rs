use crate::map::coordinates::Tile;
use anyhow::Result;
use log::{debug, error, trace};
use regex::Regex;
use std::collections::HashSet;
use std::fs::{self, File};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use surf::http::Method;
use surf::{Config, Request, Url};
use surf_governor::GovernorMiddleware;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TileLoaderError {
  #[error("Tile not available.")]
  TileNotAvailable { tile: Tile },
  #[error("Download already in progress.")]
  TileDownloadInProgress { tile: Tile },
}

/// The raw bytes of a tile (png for the base map, pbf for the cadastre).
pub type TileData = Vec<u8>;

/// The interface of the cached and non-cached tile loader.
pub trait TileLoader {
  /// Tries to fetch the tile data asynchronously.
  async fn tile_data(&self, tile: &Tile) -> Result<TileData>;
}

#[derive(Debug, Clone)]
struct TileCache {
  base_path: Option<PathBuf>,
  extension: &'static str,
}

impl TileCache {
  fn path(&self, tile: &Tile) -> Option<PathBuf> {
    self.base_path.clone().map(|b| {
      b.join(format!(
        "{}_{}_{}.{}",
        tile.zoom, tile.x, tile.y, self.extension
      ))
    })
  }

  fn cache_tile(&self, tile: &Tile, data: &[u8]) {
    let Some(path) = self.path(tile) else { return };
    let succ = File::create(path).map(|mut f| f.write_all(data));
    if succ.is_err() {
      debug!("Error when writing tile to cache: {}", succ.unwrap_err());
    }
  }
}

impl TileLoader for TileCache {
  async fn tile_data(&self, tile: &Tile) -> Result<TileData> {
    match self.path(tile) {
      Some(p) if p.exists() => Ok(fs::read(p)?),
      _ => Err(TileLoaderError::TileNotAvailable { tile: *tile }.into()),
    }
  }
}

#[derive(Debug)]
struct TileDownloader {
  name: String,
  url_template: String,
  tiles_in_download: Arc<Mutex<HashSet<Tile>>>,
  client: surf::Client,
}

impl TileDownloader {
  fn from_url(url: &str, name: String) -> Self {
    let client: surf::Client = Config::new()
      .set_timeout(Some(Duration::from_secs(5)))
      .try_into()
      .expect("client");
    Self {
      name,
      url_template: url.to_string(),
      tiles_in_download: Arc::default(),
      client: client.with(GovernorMiddleware::per_second(10).unwrap()),
    }
  }

  fn get_path_for_tile(&self, tile: &Tile) -> String {
    self
      .url_template
      .replace("{x}", &tile.x.to_string())
      .replace("{y}", &tile.y.to_string())
      .replace("{zoom}", &tile.zoom.to_string())
      .replace("{z}", &tile.zoom.to_string())
  }
}

impl TileLoader for TileDownloader {
  async fn tile_data(&self, tile: &Tile) -> Result<TileData> {
    {
      let mut tiles_in_download = self.tiles_in_download.lock().unwrap();
      if tiles_in_download.contains(tile) {
        return Err(TileLoaderError::TileDownloadInProgress { tile: *tile }.into());
      }
      tiles_in_download.insert(*tile);
    }

    let url = self.get_path_for_tile(tile);
    let request = Request::new(Method::Get, Url::parse(&url)?);
    let result = self
      .client
      .send(request)
      .await
      .inspect_err(|e| error!("Error when downloading tile: {e}"))
      .map_err(|_| TileLoaderError::TileNotAvailable { tile: *tile });
    let result = if let Ok(mut result) = result {
      if result.status() == 200 {
        result
          .body_bytes()
          .await
          .map_err(|_| TileLoaderError::TileNotAvailable { tile: *tile })
      } else {
        error!(
          "Error when downloading tile: {}, {:?}",
          result.status(),
          result.body_string().await
        );
        Err(TileLoaderError::TileNotAvailable { tile: *tile })
      }
    } else {
      debug!("{result:?}");
      Err(TileLoaderError::TileNotAvailable { tile: *tile })
    };
    debug!("Downloaded {tile:?}.");

    self.tiles_in_download.lock().unwrap().remove(tile);

    Ok(result?)
  }
}

/// Downloads tiles and keeps a copy in a per-provider on-disk cache.
#[derive(Debug)]
pub struct CachedTileLoader {
  tile_cache: TileCache,
  tile_loader: TileDownloader,
}

impl CachedTileLoader {
  #[must_use]
  pub fn name(&self) -> &str {
    &self.tile_loader.name
  }

  #[must_use]
  pub fn from_url(
    url: &str,
    name: String,
    cache: Option<PathBuf>,
    extension: &'static str,
  ) -> Self {
    let tile_loader = TileDownloader::from_url(url, name);
    let cache_path = cache.map(|mut p| {
      // API keys do not belong in the cache directory name.
      let key_re = Regex::new("[Kk]ey=([A-Za-z0-9-_]*)").expect("re did not compile");
      let res = key_re.replace(&tile_loader.url_template, "*");
      let mut hasher = DefaultHasher::new();
      res.hash(&mut hasher);
      p.push(hasher.finish().to_string());
      p
    });

    Self::create_cache(cache_path.as_ref());

    CachedTileLoader {
      tile_cache: TileCache {
        base_path: cache_path,
        extension,
      },
      tile_loader,
    }
  }

  fn create_cache(cache_path: Option<&PathBuf>) {
    let Some(cache_path) = cache_path else { return };
    if cache_path.exists() {
      return;
    }
    let _ = fs::create_dir_all(cache_path).inspect_err(|e| {
      error!("Failed to create cache directory: {e}");
    });
  }

  async fn download(&self, tile: &Tile) -> Result<TileData> {
    match self.tile_loader.tile_data(tile).await {
      Ok(data) => {
        self.tile_cache.cache_tile(tile, &data);
        match data.len() {
          0..=100 => Err(TileLoaderError::TileNotAvailable { tile: *tile }.into()),
          _ => Ok(data),
        }
      }
      Err(e) => Err(e),
    }
  }
}

impl TileLoader for CachedTileLoader {
  async fn tile_data(&self, tile: &Tile) -> Result<TileData> {
    trace!("Loading tile from file {:?}", &tile);
    if let Ok(data) = self.tile_cache.tile_data(tile).await {
      debug!("cache_hit: {tile:?}");
      Ok(data)
    } else {
      debug!("cache_miss: {tile:?}");
      self.download(tile).await
    }
  }
}
