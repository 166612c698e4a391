use log::warn;

use crate::config::Config;
use crate::geocode::ReverseGeocoder;
use crate::listing::{FormOutcome, ListingClient, ListingForm, Property};
use crate::map::coordinates::WGS84Coordinate;
use crate::map::view::Map;

enum ListingUpdate {
  Loaded(Vec<Property>),
  Created(Property),
}

/// The application shell: the map plus the listing form and the marker
/// updates flowing back from the backend.
pub struct ImmocarteApp {
  map: Map,
  geocoder: ReverseGeocoder,
  listing_client: ListingClient,
  listing_form: Option<ListingForm>,
  sender: std::sync::mpsc::Sender<ListingUpdate>,
  receiver: std::sync::mpsc::Receiver<ListingUpdate>,
}

impl ImmocarteApp {
  #[must_use]
  pub fn new(ctx: egui::Context, config: &Config, center: WGS84Coordinate, zoom: u8) -> Self {
    let (sender, receiver) = std::sync::mpsc::channel();
    let app = Self {
      map: Map::new(ctx.clone(), config, center, zoom),
      geocoder: ReverseGeocoder::new(config.geocoder_url.clone()),
      listing_client: ListingClient::new(config.listings_api_url.clone()),
      listing_form: None,
      sender,
      receiver,
    };
    app.fetch_listings(ctx);
    app
  }

  /// Populates the markers from the backend on startup.
  fn fetch_listings(&self, ctx: egui::Context) {
    let client = self.listing_client.clone();
    let sender = self.sender.clone();
    tokio::spawn(async move {
      match client.fetch_properties().await {
        Ok(properties) => {
          if sender.send(ListingUpdate::Loaded(properties)).is_ok() {
            ctx.request_repaint();
          }
        }
        Err(e) => warn!("Could not load listings: {e}"),
      }
    });
  }

  fn open_listing_form(&mut self, ctx: &egui::Context, position: WGS84Coordinate) {
    self.listing_form = Some(ListingForm::new(
      ctx.clone(),
      self.geocoder.clone(),
      self.listing_client.clone(),
      position,
    ));
  }

  fn show_listing_form(&mut self, ctx: &egui::Context) {
    let Some(form) = &mut self.listing_form else {
      return;
    };
    match form.show(ctx) {
      FormOutcome::Open => {}
      FormOutcome::Cancelled => self.listing_form = None,
      FormOutcome::Created(property) => {
        let _ = self.sender.send(ListingUpdate::Created(property));
        self.listing_form = None;
      }
    }
  }
}

impl eframe::App for ImmocarteApp {
  fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
    for update in self.receiver.try_iter() {
      match update {
        ListingUpdate::Loaded(properties) => self.map.set_properties(properties),
        ListingUpdate::Created(property) => self.map.add_property(property),
      }
    }

    egui::CentralPanel::default()
      .frame(egui::Frame::NONE)
      .show(ctx, |ui| {
        ui.add(&mut self.map);
      });

    if let Some(position) = self.map.take_listing_request() {
      self.open_listing_form(ctx, position);
    }
    self.show_listing_form(ctx);
  }
}
