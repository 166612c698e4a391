use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::map::coordinates::WGS84Coordinate;

/// Address components of a reverse-geocoded point, used to pre-fill the
/// listing form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Address {
  pub house_number: Option<String>,
  pub road: Option<String>,
  pub town: Option<String>,
  pub village: Option<String>,
  pub suburb: Option<String>,
  pub neighbourhood: Option<String>,
  pub postcode: Option<String>,
  pub display_name: Option<String>,
}

impl Address {
  /// "12 Rue des Acacias" or just the road when no number is known.
  #[must_use]
  pub fn address_line(&self) -> String {
    match (&self.house_number, &self.road) {
      (Some(number), Some(road)) => format!("{number} {road}"),
      (None, Some(road)) => road.clone(),
      _ => String::new(),
    }
  }

  #[must_use]
  pub fn city(&self) -> String {
    self
      .town
      .clone()
      .or_else(|| self.village.clone())
      .unwrap_or_default()
  }

  #[must_use]
  pub fn district(&self) -> String {
    self
      .suburb
      .clone()
      .or_else(|| self.neighbourhood.clone())
      .unwrap_or_default()
  }
}

/// Reverse geocoding against a Nominatim instance.
#[derive(Clone)]
pub struct ReverseGeocoder {
  base_url: String,
  client: surf::Client,
}

impl ReverseGeocoder {
  #[must_use]
  pub fn new(base_url: String) -> Self {
    let client: surf::Client = surf::Config::new()
      .set_timeout(Some(Duration::from_secs(5)))
      .try_into()
      .expect("client");
    Self { base_url, client }
  }

  /// Resolves a coordinate to address components at house-number zoom.
  pub async fn reverse(&self, coord: WGS84Coordinate) -> Result<Address> {
    let url = format!(
      "{}/reverse?format=json&lat={}&lon={}&zoom=18&addressdetails=1",
      self.base_url, coord.lat, coord.lon
    );

    let response = self
      .client
      .get(&url)
      .header("User-Agent", "immocarte/0.1 (real-estate map viewer)")
      .recv_json::<Value>()
      .await
      .map_err(|e| anyhow!("Reverse geocoding request failed: {e}"))?;

    Ok(parse_address(&response))
  }
}

fn parse_address(response: &Value) -> Address {
  let component = |key: &str| {
    response["address"][key]
      .as_str()
      .map(std::string::ToString::to_string)
  };
  Address {
    house_number: component("house_number"),
    road: component("road"),
    town: component("town"),
    village: component("village"),
    suburb: component("suburb"),
    neighbourhood: component("neighbourhood"),
    postcode: component("postcode"),
    display_name: response["display_name"]
      .as_str()
      .map(std::string::ToString::to_string),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_nominatim_payload() {
    let payload: Value = serde_json::from_str(
      r#"{
        "display_name": "12, Rue des Acacias, Pessac, 33600, France",
        "address": {
          "house_number": "12",
          "road": "Rue des Acacias",
          "town": "Pessac",
          "suburb": "Le Monteil",
          "postcode": "33600"
        }
      }"#,
    )
    .unwrap();

    let address = parse_address(&payload);
    assert_eq!(address.address_line(), "12 Rue des Acacias");
    assert_eq!(address.city(), "Pessac");
    assert_eq!(address.district(), "Le Monteil");
    assert_eq!(address.postcode.as_deref(), Some("33600"));
  }

  #[test]
  fn village_and_neighbourhood_fallbacks() {
    let payload: Value = serde_json::from_str(
      r#"{"address": {"road": "Le Bourg", "village": "Camblanes", "neighbourhood": "Centre"}}"#,
    )
    .unwrap();
    let address = parse_address(&payload);
    assert_eq!(address.address_line(), "Le Bourg");
    assert_eq!(address.city(), "Camblanes");
    assert_eq!(address.district(), "Centre");
  }
}
