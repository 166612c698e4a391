use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex},
};

use egui::{
  Color32, Rect, Ui,
  epaint::{PathShape, PathStroke},
};
use itertools::Itertools;
use log::{debug, warn};

use crate::cadastre::{
  FeatureRef, FeatureState, ParcelFeature, ParcelHost, ParcelProperties, StateWriteOutcome,
};
use crate::map::{
  coordinates::{PixelCoordinate, TILE_SIZE, Tile, TileCoordinate, Transform, tiles_in_box},
  tile_loader::{CachedTileLoader, TileLoader},
};

use super::{Layer, LayerProperties};

const NAME: &str = "Cadastre";
/// The cadastre tileset is published at this single zoom level; below it the
/// overlay is hidden instead of requesting tiles that do not exist.
pub const PARCEL_ZOOM: u8 = 16;
/// Coordinate extent of an MVT tile.
const MVT_EXTENT: f32 = 4096.;

// Premultiplied: selection blue at ~35 % alpha, DVF red at ~27 %.
const FILL_SELECTED: Color32 = Color32::from_rgba_premultiplied(11, 28, 78, 90);
const FILL_HAS_DVF: Color32 = Color32::from_rgba_premultiplied(60, 14, 14, 70);
const STROKE_COLOR: Color32 = Color32::from_rgba_premultiplied(75, 75, 75, 160);

/// A parcel decoded from a vector tile, rings in canvas coordinates with the
/// exterior first.
#[derive(Debug, Clone)]
struct DecodedParcel {
  props: ParcelProperties,
  rings: Vec<Vec<PixelCoordinate>>,
}

/// The cadastral parcel overlay.
///
/// Downloads the `parcelles` vector tiles, decodes them off the UI thread and
/// keeps per-feature presentation state keyed by parcel id, so a parcel that
/// is clipped across several tiles renders consistently.
pub struct ParcelLayer {
  receiver: std::sync::mpsc::Receiver<(Tile, Vec<DecodedParcel>)>,
  sender: std::sync::mpsc::Sender<(Tile, Vec<DecodedParcel>)>,
  tile_loader: Arc<CachedTileLoader>,
  decoded_tiles: HashMap<Tile, Vec<u64>>,
  parcels: HashMap<u64, DecodedParcel>,
  handles_by_id: HashMap<String, Vec<u64>>,
  feature_state: HashMap<String, FeatureState>,
  in_flight_tiles: Arc<Mutex<HashSet<Tile>>>,
  next_handle: u64,
  visible_handles: Vec<u64>,
  ctx: egui::Context,
  layer_properties: LayerProperties,
}

impl ParcelLayer {
  pub fn from_config(ctx: egui::Context, config: &crate::config::Config) -> Self {
    let (sender, receiver) = std::sync::mpsc::channel();
    let tile_loader = Arc::new(CachedTileLoader::from_url(
      &config.cadastre_tile_url,
      "cadastre".to_string(),
      config.tile_cache_dir.clone(),
      "pbf",
    ));
    Self {
      receiver,
      sender,
      tile_loader,
      decoded_tiles: HashMap::new(),
      parcels: HashMap::new(),
      handles_by_id: HashMap::new(),
      feature_state: HashMap::new(),
      in_flight_tiles: Arc::new(Mutex::new(HashSet::new())),
      next_handle: 1,
      visible_handles: Vec::new(),
      ctx,
      layer_properties: LayerProperties::default(),
    }
  }

  fn get_tile(&self, tile: Tile) {
    if self.decoded_tiles.contains_key(&tile) {
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
      match tile_loader.tile_data(&tile).await {
        Ok(data) => match decode_parcelles(&tile, &data) {
          Ok(parcels) => {
            if sender.send((tile, parcels)).is_ok() {
              ctx.request_repaint();
            }
          }
          Err(e) => {
            warn!("Could not decode cadastre tile {tile:?}: {e}");
            in_flight_tiles.lock().unwrap().remove(&tile);
          }
        },
        Err(e) => {
          debug!("Cadastre tile {tile:?} not available: {e}");
          in_flight_tiles.lock().unwrap().remove(&tile);
        }
      }
    });
  }

  /// Registers decoded tiles and assigns feature handles. Handles are only
  /// handed out on the UI thread so they are unique and race-free.
  fn collect_decoded(&mut self) {
    for (tile, parcels) in self.receiver.try_iter() {
      let mut handles = Vec::with_capacity(parcels.len());
      for parcel in parcels {
        let handle = self.next_handle;
        self.next_handle += 1;
        self
          .handles_by_id
          .entry(parcel.props.id.clone())
          .or_default()
          .push(handle);
        self.parcels.insert(handle, parcel);
        handles.push(handle);
      }
      self.decoded_tiles.insert(tile, handles);
      self.in_flight_tiles.lock().unwrap().remove(&tile);
    }
  }

  fn state_of(&self, parcel_id: &str) -> FeatureState {
    self
      .feature_state
      .get(parcel_id)
      .copied()
      .unwrap_or_default()
  }

  fn draw_parcel(&self, ui: &Ui, rect: Rect, parcel: &DecodedParcel, transform: &Transform) {
    let state = self.state_of(&parcel.props.id);
    let fill = if state.selected {
      FILL_SELECTED
    } else if state.has_dvf {
      FILL_HAS_DVF
    } else {
      Color32::TRANSPARENT
    };
    let stroke_width = if state.selected { 2.0 } else { 1.0 };

    let painter = ui.painter_at(rect);
    for ring in &parcel.rings {
      painter.add(egui::Shape::Path(PathShape {
        points: ring.iter().map(|c| transform.apply(*c).into()).collect(),
        closed: true,
        fill,
        stroke: PathStroke::new(stroke_width, STROKE_COLOR),
      }));
    }
  }
}

impl Layer for ParcelLayer {
  fn draw(&mut self, ui: &mut Ui, transform: &Transform, rect: Rect) {
    self.collect_decoded();
    self.visible_handles.clear();
    if !self.visible() || transform.tile_zoom(rect.width(), rect.height()) < PARCEL_ZOOM {
      return;
    }

    let min_pos =
      TileCoordinate::from_pixel_position(transform.unapply(rect.min.into()), PARCEL_ZOOM);
    let max_pos =
      TileCoordinate::from_pixel_position(transform.unapply(rect.max.into()), PARCEL_ZOOM);

    for tile in tiles_in_box(min_pos, max_pos) {
      match self.decoded_tiles.get(&tile) {
        Some(handles) => self.visible_handles.extend_from_slice(handles),
        None => self.get_tile(tile),
      }
    }

    for handle in &self.visible_handles {
      if let Some(parcel) = self.parcels.get(handle) {
        self.draw_parcel(ui, rect, parcel, transform);
      }
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

impl ParcelHost for ParcelLayer {
  fn visible_parcels(&self) -> Vec<ParcelFeature> {
    self
      .visible_handles
      .iter()
      .filter_map(|handle| {
        self.parcels.get(handle).map(|parcel| ParcelFeature {
          handle: *handle,
          props: parcel.props.clone(),
        })
      })
      .unique_by(|feature| feature.props.id.clone())
      .collect()
  }

  fn parcel_at(&self, pos: PixelCoordinate) -> Option<ParcelFeature> {
    // Later-decoded features are drawn on top, so search back to front.
    self
      .visible_handles
      .iter()
      .rev()
      .filter_map(|handle| self.parcels.get(handle).map(|parcel| (*handle, parcel)))
      .find(|(_, parcel)| contains(&parcel.rings, pos))
      .map(|(handle, parcel)| ParcelFeature {
        handle,
        props: parcel.props.clone(),
      })
  }

  fn set_feature_state(&mut self, feature: &FeatureRef, state: FeatureState) -> StateWriteOutcome {
    // State lives under the parcel id so every clipped copy of the parcel
    // picks it up; the handle only decides which id the write resolves to.
    if let Some(handle) = feature.handle
      && let Some(parcel) = self.parcels.get(&handle)
    {
      self.feature_state.insert(parcel.props.id.clone(), state);
      return StateWriteOutcome::Applied;
    }
    if self.handles_by_id.contains_key(&feature.parcel_id) {
      self.feature_state.insert(feature.parcel_id.clone(), state);
      return StateWriteOutcome::HostLimitation;
    }
    StateWriteOutcome::NotFound
  }

  fn remove_feature_state(&mut self, feature: &FeatureRef) {
    let id = feature
      .handle
      .and_then(|handle| self.parcels.get(&handle))
      .map_or(feature.parcel_id.as_str(), |parcel| &parcel.props.id);
    self.feature_state.remove(id);
  }
}

/// Even-odd point-in-polygon over all rings, so holes are excluded.
fn contains(rings: &[Vec<PixelCoordinate>], pos: PixelCoordinate) -> bool {
  let mut inside = false;
  for ring in rings {
    if ring.len() < 3 {
      continue;
    }
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
      let (a, b) = (ring[i], ring[j]);
      if (a.y > pos.y) != (b.y > pos.y)
        && pos.x < (b.x - a.x) * (pos.y - a.y) / (b.y - a.y) + a.x
      {
        inside = !inside;
      }
      j = i;
    }
  }
  inside
}

fn decode_parcelles(tile: &Tile, data: &[u8]) -> anyhow::Result<Vec<DecodedParcel>> {
  let reader = mvt_reader::Reader::new(data.to_vec())
    .map_err(|e| anyhow::anyhow!("MVT parse failed: {e}"))?;
  let layer_names = reader
    .get_layer_names()
    .map_err(|e| anyhow::anyhow!("MVT layer listing failed: {e}"))?;
  let Some(layer_index) = layer_names.iter().position(|n| n == "parcelles") else {
    return Ok(Vec::new());
  };
  let features = reader
    .get_features(layer_index)
    .map_err(|e| anyhow::anyhow!("MVT feature decoding failed: {e}"))?;

  let (nw, _) = tile.position();
  let span = TILE_SIZE / 2f32.powi(i32::from(tile.zoom) - 2);
  let scale = span / MVT_EXTENT;
  let to_canvas = |c: &geo_types::Coord<f32>| PixelCoordinate {
    x: nw.x + c.x * scale,
    y: nw.y + c.y * scale,
  };
  let rings_of = |polygon: &geo_types::Polygon<f32>| {
    std::iter::once(polygon.exterior())
      .chain(polygon.interiors())
      .map(|ring| ring.coords().map(to_canvas).collect::<Vec<_>>())
      .collect::<Vec<_>>()
  };

  let mut parcels = Vec::new();
  for feature in features {
    let props = parcel_properties(feature.properties.as_ref());
    if props.id.is_empty() {
      continue;
    }
    let rings = match &feature.geometry {
      geo_types::Geometry::Polygon(polygon) => rings_of(polygon),
      geo_types::Geometry::MultiPolygon(multi) => multi.iter().flat_map(&rings_of).collect(),
      _ => continue,
    };
    parcels.push(DecodedParcel { props, rings });
  }
  Ok(parcels)
}

fn parcel_properties(
  props: Option<&HashMap<String, mvt_reader::feature::Value>>,
) -> ParcelProperties {
  let string = |key: &str| {
    props.and_then(|p| p.get(key)).and_then(|v| {
      if let mvt_reader::feature::Value::String(s) = v {
        Some(s.clone())
      } else {
        None
      }
    })
  };
  #[allow(clippy::cast_precision_loss)]
  let number = |key: &str| {
    props.and_then(|p| p.get(key)).and_then(|v| match v {
      mvt_reader::feature::Value::Float(n) => Some(f64::from(*n)),
      mvt_reader::feature::Value::Double(n) => Some(*n),
      mvt_reader::feature::Value::UInt(n) => Some(*n as f64),
      mvt_reader::feature::Value::Int(n) | mvt_reader::feature::Value::SInt(n) => Some(*n as f64),
      _ => None,
    })
  };
  ParcelProperties {
    id: string("id").unwrap_or_default(),
    commune: string("commune"),
    prefixe: string("prefixe"),
    section: string("section"),
    contenance: number("contenance"),
    created: string("created"),
    updated: string("updated"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn contains_respects_holes() {
    let outer = vec![
      PixelCoordinate { x: 0., y: 0. },
      PixelCoordinate { x: 10., y: 0. },
      PixelCoordinate { x: 10., y: 10. },
      PixelCoordinate { x: 0., y: 10. },
    ];
    let hole = vec![
      PixelCoordinate { x: 4., y: 4. },
      PixelCoordinate { x: 6., y: 4. },
      PixelCoordinate { x: 6., y: 6. },
      PixelCoordinate { x: 4., y: 6. },
    ];
    let rings = vec![outer, hole];
    assert!(contains(&rings, PixelCoordinate { x: 2., y: 2. }));
    assert!(!contains(&rings, PixelCoordinate { x: 5., y: 5. }));
    assert!(!contains(&rings, PixelCoordinate { x: 11., y: 5. }));
  }

  #[test]
  fn properties_from_mvt_values() {
    use mvt_reader::feature::Value;
    let mut raw = HashMap::new();
    raw.insert("id".to_string(), Value::String("033000AB0123".to_string()));
    raw.insert("commune".to_string(), Value::String("033".to_string()));
    raw.insert("prefixe".to_string(), Value::String("000".to_string()));
    raw.insert("section".to_string(), Value::String("AB".to_string()));
    raw.insert("contenance".to_string(), Value::UInt(542));

    let props = parcel_properties(Some(&raw));
    assert_eq!(props.id, "033000AB0123");
    assert_eq!(props.section_key().unwrap().to_string(), "033/000AB");
    assert_eq!(props.contenance, Some(542.0));
  }

  #[test]
  fn missing_properties_give_empty_id() {
    let props = parcel_properties(None);
    assert!(props.id.is_empty());
    assert!(props.section_key().is_none());
  }
}
