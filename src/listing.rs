use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::geocode::{Address, ReverseGeocoder};
use crate::map::coordinates::WGS84Coordinate;

/// A property listing as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
  #[serde(default)]
  pub id: Option<i64>,
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub address: String,
  #[serde(default)]
  pub city: String,
  #[serde(default)]
  pub postcode: String,
  pub price: f64,
  #[serde(default)]
  pub bedrooms: Option<u32>,
  #[serde(default)]
  pub bathrooms: Option<u32>,
  #[serde(default)]
  pub area_sqm: Option<f64>,
  #[serde(default)]
  pub property_type: String,
  pub latitude: f32,
  pub longitude: f32,
}

impl Property {
  #[must_use]
  pub fn position(&self) -> WGS84Coordinate {
    WGS84Coordinate::new(self.latitude, self.longitude)
  }
}

#[derive(Debug, Deserialize)]
struct PropertiesEnvelope {
  properties: Vec<Property>,
}

#[derive(Debug, Deserialize)]
struct PropertyEnvelope {
  property: Property,
}

#[derive(Debug, Serialize)]
struct NewPropertyEnvelope<'a> {
  property: &'a Property,
}

/// HTTP client for the listings backend.
#[derive(Debug, Clone)]
pub struct ListingClient {
  base_url: String,
  client: surf::Client,
}

impl ListingClient {
  #[must_use]
  pub fn new(base_url: String) -> Self {
    let client: surf::Client = surf::Config::new()
      .set_timeout(Some(Duration::from_secs(5)))
      .try_into()
      .expect("client");
    Self { base_url, client }
  }

  fn properties_url(&self) -> String {
    format!("{}/api/properties", self.base_url)
  }

  /// All stored listings, for the marker layer.
  pub async fn fetch_properties(&self) -> Result<Vec<Property>> {
    let envelope: PropertiesEnvelope = self
      .client
      .get(self.properties_url())
      .recv_json()
      .await
      .map_err(|e| anyhow!("Could not fetch listings: {e}"))?;
    Ok(envelope.properties)
  }

  /// Creates a listing and returns it as stored (with its id).
  pub async fn create_property(&self, property: &Property) -> Result<Property> {
    let mut response = self
      .client
      .post(self.properties_url())
      .body_json(&NewPropertyEnvelope { property })
      .map_err(|e| anyhow!("Could not serialize listing: {e}"))?
      .await
      .map_err(|e| anyhow!("Could not submit listing: {e}"))?;
    if !response.status().is_success() {
      bail!("Listing submission returned status {}", response.status());
    }
    let envelope: PropertyEnvelope = response
      .body_json()
      .await
      .map_err(|e| anyhow!("Unexpected listing response: {e}"))?;
    Ok(envelope.property)
  }
}

/// State of the new-listing form while it is open.
#[derive(Debug, Clone)]
pub struct ListingDraft {
  pub position: WGS84Coordinate,
  pub title: String,
  pub description: String,
  pub address: String,
  pub city: String,
  pub postcode: String,
  pub price: String,
  pub bedrooms: String,
  pub bathrooms: String,
  pub area_sqm: String,
  pub property_type: String,
}

impl ListingDraft {
  #[must_use]
  pub fn at(position: WGS84Coordinate) -> Self {
    Self {
      position,
      title: String::new(),
      description: String::new(),
      address: String::new(),
      city: String::new(),
      postcode: String::new(),
      price: String::new(),
      bedrooms: String::new(),
      bathrooms: String::new(),
      area_sqm: String::new(),
      property_type: "Maison".to_string(),
    }
  }

  /// Pre-fills the location fields from a reverse-geocoded address, leaving
  /// whatever the user already typed untouched.
  pub fn apply_address(&mut self, address: &Address) {
    if self.address.is_empty() {
      self.address = address.address_line();
    }
    if self.city.is_empty() {
      self.city = address.city();
    }
    if self.postcode.is_empty() {
      self.postcode = address.postcode.clone().unwrap_or_default();
    }
  }

  /// Validates the form into a submittable property.
  pub fn to_property(&self) -> Result<Property> {
    if self.title.trim().is_empty() {
      bail!("Le titre est obligatoire");
    }
    let price: f64 = self
      .price
      .trim()
      .replace(' ', "")
      .parse()
      .map_err(|_| anyhow!("Prix invalide"))?;
    if price <= 0. {
      bail!("Prix invalide");
    }
    let optional_u32 = |raw: &str| -> Result<Option<u32>> {
      let raw = raw.trim();
      if raw.is_empty() {
        return Ok(None);
      }
      raw.parse().map(Some).map_err(|_| anyhow!("Nombre invalide"))
    };
    let area_sqm = if self.area_sqm.trim().is_empty() {
      None
    } else {
      Some(
        self
          .area_sqm
          .trim()
          .parse()
          .map_err(|_| anyhow!("Surface invalide"))?,
      )
    };
    Ok(Property {
      id: None,
      title: self.title.trim().to_string(),
      description: self.description.trim().to_string(),
      address: self.address.trim().to_string(),
      city: self.city.trim().to_string(),
      postcode: self.postcode.trim().to_string(),
      price,
      bedrooms: optional_u32(&self.bedrooms)?,
      bathrooms: optional_u32(&self.bathrooms)?,
      area_sqm,
      property_type: self.property_type.clone(),
      latitude: self.position.lat,
      longitude: self.position.lon,
    })
  }
}

pub enum ListingEvent {
  AddressResolved(Address),
  Created(Property),
  Failed(String),
}

/// The new-listing window. Reverse geocoding and submission run as tasks and
/// report back over a channel.
pub struct ListingForm {
  draft: ListingDraft,
  geocoder: ReverseGeocoder,
  client: ListingClient,
  sender: std::sync::mpsc::Sender<ListingEvent>,
  receiver: std::sync::mpsc::Receiver<ListingEvent>,
  ctx: egui::Context,
  submitting: bool,
  error: Option<String>,
}

pub enum FormOutcome {
  Open,
  Cancelled,
  Created(Property),
}

impl ListingForm {
  #[must_use]
  pub fn new(
    ctx: egui::Context,
    geocoder: ReverseGeocoder,
    client: ListingClient,
    position: WGS84Coordinate,
  ) -> Self {
    let (sender, receiver) = std::sync::mpsc::channel();
    let form = Self {
      draft: ListingDraft::at(position),
      geocoder,
      client,
      sender,
      receiver,
      ctx,
      submitting: false,
      error: None,
    };
    form.spawn_reverse_geocode();
    form
  }

  fn spawn_reverse_geocode(&self) {
    let geocoder = self.geocoder.clone();
    let position = self.draft.position;
    let sender = self.sender.clone();
    let ctx = self.ctx.clone();
    tokio::spawn(async move {
      match geocoder.reverse(position).await {
        Ok(address) => {
          if sender.send(ListingEvent::AddressResolved(address)).is_ok() {
            ctx.request_repaint();
          }
        }
        Err(e) => log::info!("Reverse geocoding failed, leaving the form empty: {e}"),
      }
    });
  }

  fn spawn_submit(&mut self, property: Property) {
    self.submitting = true;
    let client = self.client.clone();
    let sender = self.sender.clone();
    let ctx = self.ctx.clone();
    tokio::spawn(async move {
      let event = match client.create_property(&property).await {
        Ok(created) => ListingEvent::Created(created),
        Err(e) => ListingEvent::Failed(e.to_string()),
      };
      if sender.send(event).is_ok() {
        ctx.request_repaint();
      }
    });
  }

  /// Shows the form window; returns how to proceed.
  pub fn show(&mut self, ctx: &egui::Context) -> FormOutcome {
    let mut created = None;
    for event in self.receiver.try_iter() {
      match event {
        ListingEvent::AddressResolved(address) => self.draft.apply_address(&address),
        ListingEvent::Created(property) => created = Some(property),
        ListingEvent::Failed(message) => {
          self.submitting = false;
          self.error = Some(message);
        }
      }
    }
    if let Some(property) = created {
      return FormOutcome::Created(property);
    }

    let mut outcome = FormOutcome::Open;
    let mut open = true;
    egui::Window::new("Nouveau bien")
      .open(&mut open)
      .collapsible(false)
      .resizable(false)
      .show(ctx, |ui| {
        egui::Grid::new("listing_form").num_columns(2).show(ui, |ui| {
          ui.label("Titre");
          ui.text_edit_singleline(&mut self.draft.title);
          ui.end_row();
          ui.label("Type");
          egui::ComboBox::from_id_salt("property_type")
            .selected_text(self.draft.property_type.clone())
            .show_ui(ui, |ui| {
              for kind in ["Maison", "Appartement", "Terrain", "Local"] {
                ui.selectable_value(&mut self.draft.property_type, kind.to_string(), kind);
              }
            });
          ui.end_row();
          ui.label("Adresse");
          ui.text_edit_singleline(&mut self.draft.address);
          ui.end_row();
          ui.label("Ville");
          ui.text_edit_singleline(&mut self.draft.city);
          ui.end_row();
          ui.label("Code postal");
          ui.text_edit_singleline(&mut self.draft.postcode);
          ui.end_row();
          ui.label("Prix (€)");
          ui.text_edit_singleline(&mut self.draft.price);
          ui.end_row();
          ui.label("Chambres");
          ui.text_edit_singleline(&mut self.draft.bedrooms);
          ui.end_row();
          ui.label("Salles de bain");
          ui.text_edit_singleline(&mut self.draft.bathrooms);
          ui.end_row();
          ui.label("Surface (m²)");
          ui.text_edit_singleline(&mut self.draft.area_sqm);
          ui.end_row();
          ui.label("Description");
          ui.text_edit_multiline(&mut self.draft.description);
          ui.end_row();
        });

        if let Some(error) = &self.error {
          ui.colored_label(egui::Color32::RED, error);
        }

        ui.horizontal(|ui| {
          let submit = ui
            .add_enabled(!self.submitting, egui::Button::new("Publier"))
            .clicked();
          if ui.button("Annuler").clicked() {
            outcome = FormOutcome::Cancelled;
          }
          if self.submitting {
            ui.spinner();
          }
          if submit {
            match self.draft.to_property() {
              Ok(property) => {
                self.error = None;
                self.spawn_submit(property);
              }
              Err(e) => self.error = Some(e.to_string()),
            }
          }
        });
      });
    if !open {
      outcome = FormOutcome::Cancelled;
    }
    outcome
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn draft() -> ListingDraft {
    let mut draft = ListingDraft::at(WGS84Coordinate::new(44.8067, -0.6311));
    draft.title = "Échoppe rénovée".to_string();
    draft.price = "250 000".to_string();
    draft
  }

  #[test]
  fn draft_validates_into_property() {
    let mut d = draft();
    d.bedrooms = "3".to_string();
    d.area_sqm = "92.5".to_string();
    let property = d.to_property().unwrap();
    assert_eq!(property.title, "Échoppe rénovée");
    assert_eq!(property.price, 250_000.);
    assert_eq!(property.bedrooms, Some(3));
    assert_eq!(property.area_sqm, Some(92.5));
    assert_eq!(property.latitude, 44.8067);
  }

  #[test]
  fn draft_rejects_missing_title_and_bad_price() {
    let mut d = draft();
    d.title = String::new();
    assert!(d.to_property().is_err());

    let mut d = draft();
    d.price = "beaucoup".to_string();
    assert!(d.to_property().is_err());
  }

  #[test]
  fn address_prefill_keeps_user_input() {
    let mut d = draft();
    d.city = "Pessac".to_string();
    let address = Address {
      house_number: Some("12".to_string()),
      road: Some("Rue des Acacias".to_string()),
      town: Some("Mérignac".to_string()),
      postcode: Some("33600".to_string()),
      ..Address::default()
    };
    d.apply_address(&address);
    assert_eq!(d.address, "12 Rue des Acacias");
    // The typed city wins over the geocoder.
    assert_eq!(d.city, "Pessac");
    assert_eq!(d.postcode, "33600");
  }

  #[test]
  fn property_envelopes_roundtrip() {
    let parsed: PropertyEnvelope = serde_json::from_str(
      r#"{"property": {"id": 7, "title": "Maison", "price": 320000.0,
          "latitude": 44.8, "longitude": -0.63}}"#,
    )
    .unwrap();
    assert_eq!(parsed.property.id, Some(7));
    assert_eq!(parsed.property.position().lon, -0.63);
  }
}
