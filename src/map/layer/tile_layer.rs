use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex},
};

use egui::{Color32, ColorImage, Rect, Ui};
use log::{debug, error};

use crate::map::{
  coordinates::{Tile, TileCoordinate, Transform, tiles_in_box},
  tile_loader::{CachedTileLoader, TileLoader},
};

use super::{Layer, LayerProperties};

const NAME: &str = "Base map";
/// Most raster providers stop at this zoom.
const MAX_TILE_ZOOM: u8 = 19;

/// A layer that loads and displays the raster base map tiles.
pub struct TileLayer {
  receiver: std::sync::mpsc::Receiver<(Tile, ColorImage)>,
  sender: std::sync::mpsc::Sender<(Tile, ColorImage)>,
  tile_loader: Arc<CachedTileLoader>,
  loaded_tiles: HashMap<Tile, egui::TextureHandle>,
  in_flight_tiles: Arc<Mutex<HashSet<Tile>>>,
  ctx: egui::Context,
  layer_properties: LayerProperties,
}

impl TileLayer {
  pub fn from_config(ctx: egui::Context, config: &crate::config::Config) -> Self {
    let (sender, receiver) = std::sync::mpsc::channel();
    let tile_loader = Arc::new(CachedTileLoader::from_url(
      &config.tile_url,
      "base".to_string(),
      config.tile_cache_dir.clone(),
      "png",
    ));
    Self {
      receiver,
      sender,
      tile_loader,
      loaded_tiles: HashMap::new(),
      in_flight_tiles: Arc::new(Mutex::new(HashSet::new())),
      ctx,
      layer_properties: LayerProperties::default(),
    }
  }

  fn get_tile(&self, tile: Tile) {
    if self.loaded_tiles.contains_key(&tile) {
      return;
    }
    {
      let mut in_flight = self.in_flight_tiles.lock().unwrap();
      if !in_flight.insert(tile) {
        return;
      }
    }

    let sender = self.sender.clone();
    let tile_loader = self.tile_loader.clone();
    let ctx = self.ctx.clone();
    let in_flight_tiles = self.in_flight_tiles.clone();
    tokio::spawn(async move {
      let tile_data = tile_loader.tile_data(&tile).await;
      match tile_data {
        Ok(data) => match image::load_from_memory(&data) {
          Ok(image) => {
            let image = image.to_rgba8();
            let egui_image = ColorImage::from_rgba_unmultiplied(
              [image.width() as usize, image.height() as usize],
              image.as_flat_samples().as_slice(),
            );
            if sender.send((tile, egui_image)).is_ok() {
              ctx.request_repaint();
            }
          }
          Err(e) => {
            error!("Could not decode tile {tile:?}: {e}");
            in_flight_tiles.lock().unwrap().remove(&tile);
          }
        },
        Err(e) => {
          debug!("Tile {tile:?} not available: {e}");
          in_flight_tiles.lock().unwrap().remove(&tile);
        }
      }
    });
  }

  fn collect_new_tile_data(&mut self, ui: &Ui) {
    for (tile, egui_image) in self.receiver.try_iter() {
      let handle = ui.ctx().load_texture(
        format!("{}-{}-{}", tile.zoom, tile.x, tile.y),
        egui_image,
        egui::TextureOptions::default(),
      );
      self.loaded_tiles.insert(tile, handle);
      self.in_flight_tiles.lock().unwrap().remove(&tile);
    }
  }

  fn draw_tile(&self, ui: &mut Ui, rect: Rect, tile: &Tile, transform: &Transform) -> bool {
    if let Some(image_data) = self.loaded_tiles.get(tile) {
      let (nw, se) = tile.position();
      let (nw, se) = (transform.apply(nw), transform.apply(se));
      ui.painter_at(rect).image(
        image_data.id(),
        Rect::from_min_max(nw.into(), se.into()),
        Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
        Color32::WHITE,
      );
      return true;
    }
    false
  }
}

impl Layer for TileLayer {
  fn draw(&mut self, ui: &mut Ui, transform: &Transform, rect: Rect) {
    self.collect_new_tile_data(ui);
    if !self.visible() {
      return;
    }

    let zoom = transform
      .tile_zoom(rect.width(), rect.height())
      .min(MAX_TILE_ZOOM);
    let min_pos = TileCoordinate::from_pixel_position(transform.unapply(rect.min.into()), zoom);
    let max_pos = TileCoordinate::from_pixel_position(transform.unapply(rect.max.into()), zoom);

    for tile in tiles_in_box(min_pos, max_pos) {
      self.get_tile(tile);
    }

    // Fall back to parent tiles while the detailed ones download; coarser
    // tiles draw first so details end up on top.
    let mut tiles_to_draw = tiles_in_box(min_pos, max_pos)
      .filter_map(|mut tile| {
        while !self.loaded_tiles.contains_key(&tile) {
          tile = tile.parent()?;
        }
        Some(tile)
      })
      .collect::<Vec<_>>();
    tiles_to_draw.sort_unstable_by_key(|tile| tile.zoom);
    tiles_to_draw.dedup();

    for tile in tiles_to_draw {
      self.draw_tile(ui, rect, &tile, transform);
    }
  }

  fn name(&self) -> &str {
    NAME
  }

  fn visible(&self) -> bool {
    self.layer_properties.visible
  }

  fn visible_mut(&mut self) -> &mut bool {
    &mut self.layer_properties.visible
  }
}
