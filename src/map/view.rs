use std::time::Instant;

use egui::{PointerButton, Response, Sense, Ui, Widget};

use crate::config::Config;
use crate::dvf::client::DvfClient;
use crate::interaction::CadastreInteraction;
use crate::listing::Property;
use crate::map::coordinates::{PixelPosition, Transform, WGS84Coordinate};
use crate::map::layer::{Layer, MarkerLayer, ParcelLayer, TileLayer};

/// Scale limits, expressed in canvas scale (2^(z-2) for tile zoom z).
const MIN_ZOOM: f32 = 0.5;
const MAX_ZOOM: f32 = 262_144.; // 2^18, tile zoom 20

/// The map widget: base tiles, parcel overlay, listing pins and the
/// interaction core, in one egui widget.
pub struct Map {
  transform: Transform,
  tile_layer: TileLayer,
  parcel_layer: ParcelLayer,
  marker_layer: MarkerLayer,
  interaction: CadastreInteraction,
  initial_center: WGS84Coordinate,
  initial_zoom: u8,
}

impl Map {
  #[must_use]
  pub fn new(
    ctx: egui::Context,
    config: &Config,
    center: WGS84Coordinate,
    zoom: u8,
  ) -> Self {
    Self {
      transform: Transform::invalid(),
      tile_layer: TileLayer::from_config(ctx.clone(), config),
      parcel_layer: ParcelLayer::from_config(ctx.clone(), config),
      marker_layer: MarkerLayer::new(),
      interaction: CadastreInteraction::new(
        ctx,
        DvfClient::new(config.dvf_api_url.clone()),
        Instant::now(),
      ),
      initial_center: center,
      initial_zoom: zoom,
    }
  }

  pub fn set_properties(&mut self, properties: Vec<Property>) {
    self.marker_layer.set_properties(properties);
  }

  pub fn add_property(&mut self, property: Property) {
    self.marker_layer.add_property(property);
  }

  /// A pending "create listing here" request from the parcel popup.
  pub fn take_listing_request(&mut self) -> Option<WGS84Coordinate> {
    self.interaction.take_listing_request()
  }

  fn zoom_with_center(&mut self, delta: f32, center: PixelPosition) {
    let zoomed = self.transform.zoom * delta;
    if !(MIN_ZOOM..=MAX_ZOOM).contains(&zoomed) {
      return;
    }
    self.transform.zoom_with_center(delta, center);
  }

  fn handle_mouse_wheel(&mut self, ui: &Ui, response: &Response) {
    if !response.hovered() {
      return;
    }
    let delta = ui
      .input(|i| {
        i.events
          .iter()
          .find_map(|e| match e {
            egui::Event::MouseWheel { delta, .. } => Some(delta),
            _ => None,
          })
          .copied()
      })
      .map(|d| (d.y / 1. + 1.).clamp(0.8, 1.4).sqrt());
    if let Some(delta) = delta {
      let cursor = response.hover_pos().unwrap_or_default().into();
      self.zoom_with_center(delta, cursor);
    }
  }

  fn handle_click(&mut self, response: &Response) {
    if !response.clicked() {
      return;
    }
    let Some(pos) = response.interact_pointer_pos() else {
      return;
    };
    // Pins sit on top of parcels.
    if self.marker_layer.handle_click(pos, &self.transform) {
      return;
    }
    let canvas = self.transform.unapply(pos.into());
    self
      .interaction
      .handle_click(&mut self.parcel_layer, canvas, Instant::now());
  }
}

impl Widget for &mut Map {
  fn ui(self, ui: &mut Ui) -> Response {
    let size = ui.available_size();
    let (rect, response) = ui.allocate_exact_size(size, Sense::click_and_drag());
    let now = Instant::now();

    if self.transform.is_invalid() {
      self
        .transform
        .center_on(self.initial_center, self.initial_zoom, rect.width(), rect.height());
    }

    let camera_before = self.transform;
    self.handle_mouse_wheel(ui, &response);
    if response.dragged() && response.dragged_by(PointerButton::Primary) {
      self.transform.translate(PixelPosition {
        x: response.drag_delta().x,
        y: response.drag_delta().y,
      });
    }
    if self.transform != camera_before {
      self.interaction.camera_changed(now);
    }

    self.handle_click(&response);

    if ui.is_rect_visible(rect) {
      self.tile_layer.draw(ui, &self.transform, rect);
      self.parcel_layer.draw(ui, &self.transform, rect);
      self.marker_layer.draw(ui, &self.transform, rect);
    }

    self.interaction.tick(&mut self.parcel_layer, now);
    self
      .interaction
      .show_overlays(ui.ctx(), &mut self.parcel_layer, &self.transform);

    // The debounce deadline needs a frame to fire even when the user goes
    // idle.
    if let Some(deadline) = self.interaction.next_wakeup() {
      ui.ctx()
        .request_repaint_after(deadline.saturating_duration_since(now));
    }

    response
  }
}
