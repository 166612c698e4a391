use egui::{Pos2, Rect, Ui};

use super::coordinates::Transform;

/// Draws the raster base map.
mod tile_layer;
/// Cadastral parcel overlay with per-feature state.
mod parcel_layer;
/// Property listing pins.
mod marker_layer;

pub use marker_layer::MarkerLayer;
pub use parcel_layer::ParcelLayer;
pub use tile_layer::TileLayer;

/// A layer is everything that forms a logical unit on the map, e.g. the base
/// tiles, the parcel overlay or the listing pins.
pub trait Layer {
  fn draw(&mut self, ui: &mut Ui, transform: &Transform, rect: Rect);
  fn name(&self) -> &str;
  fn visible(&self) -> bool;
  fn visible_mut(&mut self) -> &mut bool;
  fn ui(&mut self, ui: &mut Ui) {
    ui.collapsing(self.name().to_owned(), |ui| {
      ui.checkbox(self.visible_mut(), "visible");
      self.ui_content(ui);
    });
  }
  fn ui_content(&mut self, _ui: &mut Ui) {}
  /// Returns true when the click was consumed by this layer.
  fn handle_click(&mut self, _pos: Pos2, _transform: &Transform) -> bool {
    false
  }
}

/// Common properties for all layers.
pub struct LayerProperties {
  pub visible: bool,
}

impl Default for LayerProperties {
  fn default() -> Self {
    Self { visible: true }
  }
}
