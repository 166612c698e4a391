use egui::{Align2, Color32, Pos2, Rect, RichText, Stroke, Ui};

use crate::listing::Property;
use crate::map::coordinates::{PixelCoordinate, Transform};
use crate::popup::format_price;

use super::{Layer, LayerProperties};

const NAME: &str = "Biens";
const PIN_RADIUS: f32 = 7.0;
const PIN_COLOR: Color32 = Color32::from_rgb(30, 150, 70);

/// Listing pins with a details popup on click.
pub struct MarkerLayer {
  properties: Vec<Property>,
  selected: Option<usize>,
  layer_properties: LayerProperties,
}

impl MarkerLayer {
  #[must_use]
  pub fn new() -> Self {
    Self {
      properties: Vec::new(),
      selected: None,
      layer_properties: LayerProperties::default(),
    }
  }

  pub fn set_properties(&mut self, properties: Vec<Property>) {
    self.selected = None;
    self.properties = properties;
  }

  pub fn add_property(&mut self, property: Property) {
    self.properties.push(property);
  }

  fn pin_position(&self, property: &Property, transform: &Transform) -> Pos2 {
    transform
      .apply(PixelCoordinate::from(property.position()))
      .into()
  }

  fn draw_pin(&self, ui: &Ui, rect: Rect, at: Pos2, selected: bool) {
    let painter = ui.painter_at(rect);
    let radius = if selected { PIN_RADIUS + 2.0 } else { PIN_RADIUS };
    // A dot with a stem reads as a pin without needing an icon font.
    painter.line_segment(
      [at, at - egui::vec2(0.0, radius * 2.0)],
      Stroke::new(2.0, PIN_COLOR),
    );
    painter.circle(
      at - egui::vec2(0.0, radius * 2.0),
      radius,
      PIN_COLOR,
      Stroke::new(1.5, Color32::WHITE),
    );
  }

  fn property_popup(&mut self, ui: &Ui, at: Pos2, index: usize) {
    let property = &self.properties[index];
    let mut close = false;
    egui::Area::new(egui::Id::new("property_popup"))
      .fixed_pos(at - egui::vec2(0.0, PIN_RADIUS * 3.0))
      .pivot(Align2::CENTER_BOTTOM)
      .show(ui.ctx(), |ui| {
        egui::Frame::popup(ui.style()).show(ui, |ui| {
          ui.set_max_width(240.);
          ui.horizontal(|ui| {
            ui.label(RichText::new(&property.title).strong());
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
              if ui.small_button("✕").clicked() {
                close = true;
              }
            });
          });
          ui.label(
            RichText::new(format_price(property.price))
              .color(Color32::from_rgb(30, 120, 60))
              .strong(),
          );
          if !property.address.is_empty() {
            ui.label(format!("{}, {}", property.address, property.city));
          }
          let mut facts = Vec::new();
          if !property.property_type.is_empty() {
            facts.push(property.property_type.clone());
          }
          if let Some(bedrooms) = property.bedrooms {
            facts.push(format!("{bedrooms} ch."));
          }
          if let Some(area) = property.area_sqm {
            facts.push(format!("{area:.0} m²"));
          }
          if !facts.is_empty() {
            ui.label(RichText::new(facts.join(" · ")).weak());
          }
          if !property.description.is_empty() {
            ui.label(RichText::new(&property.description).weak());
          }
        });
      });
    if close {
      self.selected = None;
    }
  }
}

impl Default for MarkerLayer {
  fn default() -> Self {
    Self::new()
  }
}

impl Layer for MarkerLayer {
  fn draw(&mut self, ui: &mut Ui, transform: &Transform, rect: Rect) {
    if !self.visible() {
      return;
    }
    for (index, property) in self.properties.iter().enumerate() {
      let at = self.pin_position(property, transform);
      if rect.contains(at) {
        self.draw_pin(ui, rect, at, self.selected == Some(index));
      }
    }
    if let Some(index) = self.selected
      && index < self.properties.len()
    {
      let at = self.pin_position(&self.properties[index], transform);
      self.property_popup(ui, at, index);
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

  fn handle_click(&mut self, pos: Pos2, transform: &Transform) -> bool {
    if !self.visible() {
      return false;
    }
    let hit = self.properties.iter().position(|property| {
      let at = self.pin_position(property, transform) - egui::vec2(0.0, PIN_RADIUS * 2.0);
      at.distance(pos) <= PIN_RADIUS + 3.0
    });
    match hit {
      Some(index) => {
        self.selected = Some(index);
        true
      }
      None => {
        // A click elsewhere only closes the popup; it falls through to the
        // parcel layer.
        self.selected = None;
        false
      }
    }
  }
}
