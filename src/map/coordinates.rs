use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

/// Size of a map tile in pixels.
pub const TILE_SIZE: f32 = 512.;
/// The fixed canvas size the whole world is projected onto.
const CANVAS_SIZE: f32 = 1024. * 2.;

/// A WGS84 coordinate (latitude/longitude in degrees).
#[derive(Debug, PartialEq, Copy, Clone, Default, Serialize, Deserialize)]
pub struct WGS84Coordinate {
  pub lat: f32,
  pub lon: f32,
}

impl WGS84Coordinate {
  #[must_use]
  pub fn new(lat: f32, lon: f32) -> Self {
    Self { lat, lon }
  }

  #[must_use]
  pub fn is_valid(&self) -> bool {
    (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
  }
}

/// A coordinate on the fixed-size map canvas (Web Mercator).
#[derive(Debug, PartialEq, Copy, Clone, Default, Serialize, Deserialize)]
pub struct PixelCoordinate {
  pub x: f32,
  pub y: f32,
}

/// A pixel on the screen.
#[derive(Debug, PartialEq, Copy, Clone, Default, Serialize, Deserialize)]
pub struct PixelPosition {
  pub x: f32,
  pub y: f32,
}

impl From<egui::Pos2> for PixelPosition {
  fn from(pos: egui::Pos2) -> Self {
    PixelPosition { x: pos.x, y: pos.y }
  }
}

impl From<PixelPosition> for egui::Pos2 {
  fn from(pp: PixelPosition) -> Self {
    egui::Pos2::new(pp.x, pp.y)
  }
}

/// A fractional tile coordinate at a given zoom level.
#[derive(Debug, PartialEq, Copy, Clone)]
pub struct TileCoordinate {
  pub x: f32,
  pub y: f32,
  pub zoom: u8,
}

impl TileCoordinate {
  #[must_use]
  pub fn from_coordinate(coord: WGS84Coordinate, zoom: u8) -> Self {
    let factor = 2f32.powi(i32::from(zoom));
    let lat_rad = coord.lat.to_radians();
    Self {
      x: (coord.lon + 180.) / 360. * factor,
      y: (1. - lat_rad.tan().asinh() / PI) / 2. * factor,
      zoom,
    }
  }

  #[must_use]
  pub fn from_pixel_position(pos: PixelCoordinate, zoom: u8) -> Self {
    let scale = TILE_SIZE / 2f32.powi(i32::from(zoom) - 2);
    Self {
      x: pos.x / scale,
      y: pos.y / scale,
      zoom,
    }
  }
}

impl From<TileCoordinate> for PixelCoordinate {
  fn from(tile_coord: TileCoordinate) -> Self {
    PixelCoordinate {
      x: tile_coord.x * TILE_SIZE / 2f32.powi(i32::from(tile_coord.zoom) - 2),
      y: tile_coord.y * TILE_SIZE / 2f32.powi(i32::from(tile_coord.zoom) - 2),
    }
  }
}

impl From<WGS84Coordinate> for PixelCoordinate {
  fn from(coord: WGS84Coordinate) -> Self {
    TileCoordinate::from_coordinate(coord, 2).into()
  }
}

impl From<PixelCoordinate> for WGS84Coordinate {
  fn from(pp: PixelCoordinate) -> Self {
    let x = pp.x / CANVAS_SIZE;
    let y = pp.y / CANVAS_SIZE;
    Self {
      lat: (PI * (1. - 2. * y)).sinh().atan().to_degrees(),
      lon: x * 360. - 180.,
    }
  }
}

impl PixelCoordinate {
  #[must_use]
  pub fn clamp(&self) -> Self {
    PixelCoordinate {
      x: self.x.clamp(0.0, CANVAS_SIZE),
      y: self.y.clamp(0.0, CANVAS_SIZE),
    }
  }
}

/// A tile in the Web Mercator projection.
#[derive(Debug, PartialEq, Copy, Clone, Hash, Eq, Serialize, Deserialize)]
pub struct Tile {
  pub x: u32,
  pub y: u32,
  pub zoom: u8,
}

impl Tile {
  /// Checks existence of the tile.
  #[must_use]
  pub fn exists(&self) -> bool {
    let max_tile = 2u32.pow(self.zoom.into()) - 1;
    self.x <= max_tile && self.y <= max_tile
  }

  /// The parent one zoom level lower.
  #[must_use]
  pub fn parent(&self) -> Option<Self> {
    match self.zoom {
      0 => None,
      _ => Some(Self {
        x: self.x >> 1,
        y: self.y >> 1,
        zoom: self.zoom - 1,
      }),
    }
  }

  /// The north-west and south-east corner of the tile on the canvas.
  #[must_use]
  #[allow(clippy::cast_precision_loss)]
  pub fn position(&self) -> (PixelCoordinate, PixelCoordinate) {
    (
      PixelCoordinate::from(TileCoordinate {
        x: self.x as f32,
        y: self.y as f32,
        zoom: self.zoom,
      }),
      PixelCoordinate::from(TileCoordinate {
        x: (self.x + 1) as f32,
        y: (self.y + 1) as f32,
        zoom: self.zoom,
      }),
    )
  }
}

impl From<TileCoordinate> for Tile {
  #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
  fn from(tile_coord: TileCoordinate) -> Self {
    Self {
      x: tile_coord.x.floor().max(0.) as u32,
      y: tile_coord.y.floor().max(0.) as u32,
      zoom: tile_coord.zoom,
    }
  }
}

/// A tile iterator for a given bounding box.
pub fn tiles_in_box(nw: TileCoordinate, se: TileCoordinate) -> impl Iterator<Item = Tile> {
  let nw_tile = Tile::from(nw);
  let se_tile = Tile::from(se);
  (nw_tile.x..=se_tile.x)
    .flat_map(move |x| {
      (nw_tile.y..=se_tile.y).map(move |y| Tile {
        x,
        y,
        zoom: nw_tile.zoom,
      })
    })
    .filter(Tile::exists)
}

/// Keeps track of the zoom/translation between the map canvas and the screen.
#[derive(Debug, PartialEq, Copy, Clone)]
pub struct Transform {
  pub zoom: f32,
  pub trans: PixelPosition,
}

impl Default for Transform {
  fn default() -> Self {
    Self {
      zoom: 1.,
      trans: PixelPosition::default(),
    }
  }
}

impl Transform {
  /// Returns an invalid transform, used until the first frame sized the viewport.
  #[must_use]
  pub fn invalid() -> Self {
    Self {
      zoom: 0.,
      trans: PixelPosition::default(),
    }
  }

  #[must_use]
  pub fn is_invalid(&self) -> bool {
    self.zoom == 0. || self.zoom.is_nan() || self.trans.x.is_nan() || self.trans.y.is_nan()
  }

  pub fn zoom(&mut self, factor: f32) -> &mut Self {
    self.zoom *= factor;
    self
  }

  pub fn translate(&mut self, delta: PixelPosition) -> &mut Self {
    self.trans.x += delta.x;
    self.trans.y += delta.y;
    self
  }

  /// Canvas coordinate to screen pixel.
  #[must_use]
  pub fn apply(&self, from: PixelCoordinate) -> PixelPosition {
    PixelPosition {
      x: from.x * self.zoom + self.trans.x,
      y: from.y * self.zoom + self.trans.y,
    }
  }

  /// Screen pixel back to canvas coordinate.
  #[must_use]
  pub fn unapply(&self, from: PixelPosition) -> PixelCoordinate {
    PixelCoordinate {
      x: (from.x - self.trans.x) / self.zoom,
      y: (from.y - self.trans.y) / self.zoom,
    }
  }

  /// Zooms while keeping the given screen position fixed.
  pub fn zoom_with_center(&mut self, factor: f32, center: PixelPosition) {
    self.trans.x = center.x - (center.x - self.trans.x) * factor;
    self.trans.y = center.y - (center.y - self.trans.y) * factor;
    self.zoom *= factor;
  }

  /// Centers the given coordinate in a viewport of the given size at a tile zoom level.
  pub fn center_on(&mut self, coord: WGS84Coordinate, zoom_level: u8, width: f32, height: f32) {
    let pixel = PixelCoordinate::from(coord);
    // A tile spans TILE_SIZE / 2^(z-2) canvas units, so this makes one tile TILE_SIZE px.
    self.zoom = 2f32.powi(i32::from(zoom_level) - 2);
    self.trans = PixelPosition {
      x: width / 2. - pixel.x * self.zoom,
      y: height / 2. - pixel.y * self.zoom,
    };
  }

  /// The tile zoom level that matches the current scale for a viewport of the given size.
  #[must_use]
  #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
  pub fn tile_zoom(&self, width: f32, height: f32) -> u8 {
    (self.zoom * (width.max(height) / TILE_SIZE)).log2() as u8 + 2
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use assert_approx_eq::assert_approx_eq;

  #[test]
  fn wgs84_pixel_roundtrip() {
    let pessac = WGS84Coordinate::new(44.8067, -0.6311);
    let pixel = PixelCoordinate::from(pessac);
    let back = WGS84Coordinate::from(pixel);
    assert_approx_eq!(back.lat, pessac.lat, 1e-3);
    assert_approx_eq!(back.lon, pessac.lon, 1e-3);
  }

  #[test]
  fn transform_roundtrip() {
    let mut transform = Transform::default();
    transform.zoom(5.);
    transform.translate(PixelPosition { x: 10., y: 20. });
    let coord = PixelCoordinate { x: 3., y: 7. };
    let back = transform.unapply(transform.apply(coord));
    assert_approx_eq!(back.x, coord.x);
    assert_approx_eq!(back.y, coord.y);
  }

  #[test]
  fn zoom_with_center_keeps_anchor() {
    let mut transform = Transform::default();
    transform.translate(PixelPosition { x: 100., y: 50. });
    let anchor = PixelPosition { x: 400., y: 300. };
    let before = transform.unapply(anchor);
    transform.zoom_with_center(2., anchor);
    let after = transform.unapply(anchor);
    assert_approx_eq!(before.x, after.x, 1e-3);
    assert_approx_eq!(before.y, after.y, 1e-3);
  }

  #[test]
  fn tiles_in_box_covers_range() {
    let nw = TileCoordinate {
      x: 1.2,
      y: 1.4,
      zoom: 4,
    };
    let se = TileCoordinate {
      x: 3.8,
      y: 2.1,
      zoom: 4,
    };
    let tiles: Vec<_> = tiles_in_box(nw, se).collect();
    assert_eq!(tiles.len(), 6);
    assert!(tiles.contains(&Tile { x: 1, y: 1, zoom: 4 }));
    assert!(tiles.contains(&Tile { x: 3, y: 2, zoom: 4 }));
  }
}
