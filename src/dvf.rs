use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod client;

/// A historical real-estate sale record ("mutation") from the DVF open-data
/// provider. Immutable; the application only aggregates these.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DvfMutation {
  pub id_mutation: String,
  pub date_mutation: String,
  pub nature_mutation: String,
  pub valeur_fonciere: f64,
  pub adresse_numero: String,
  pub adresse_nom_voie: String,
  pub code_postal: String,
  pub nom_commune: String,
  pub type_local: String,
  pub surface_reelle_bati: f64,
  pub surface_terrain: f64,
  pub nombre_pieces_principales: u32,
  pub nombre_lots: u32,
  pub nature_culture: String,
  pub id_parcelle: String,
}

impl DvfMutation {
  /// Dedup key: the provider repeats mutation ids across the parcels a sale
  /// touches, so the parcel id is part of the key.
  #[must_use]
  pub fn key(&self) -> (String, String) {
    (self.id_mutation.clone(), self.id_parcelle.clone())
  }

  #[must_use]
  pub fn parsed_date(&self) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&self.date_mutation, "%Y-%m-%d").ok()
  }
}

/// The `GET /mutations/{commune}/{prefixe}{section}` response envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MutationsResponse {
  #[serde(default)]
  pub data: Vec<DvfMutation>,
}

/// Sorts mutations by date descending. The sort is stable, so records with
/// equal dates keep their original fetch order.
pub fn sort_by_date_desc(mutations: &mut [DvfMutation]) {
  mutations.sort_by(|a, b| {
    let da = a.parsed_date().unwrap_or(NaiveDate::MIN);
    let db = b.parsed_date().unwrap_or(NaiveDate::MIN);
    db.cmp(&da)
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  fn mutation(id: &str, date: &str) -> DvfMutation {
    DvfMutation {
      id_mutation: id.to_string(),
      date_mutation: date.to_string(),
      id_parcelle: "033000AB0123".to_string(),
      ..DvfMutation::default()
    }
  }

  #[test]
  fn sort_is_date_descending_and_stable() {
    let mut mutations = vec![
      mutation("a", "2021-03-01"),
      mutation("b", "2024-06-15"),
      mutation("c", "2021-03-01"),
      mutation("d", "not-a-date"),
    ];
    sort_by_date_desc(&mut mutations);
    let ids: Vec<_> = mutations.iter().map(|m| m.id_mutation.as_str()).collect();
    // Equal dates keep fetch order (a before c); unparsable dates sink last.
    assert_eq!(ids, vec!["b", "a", "c", "d"]);
  }

  #[test]
  fn response_tolerates_missing_fields() {
    let parsed: MutationsResponse = serde_json::from_str(
      r#"{"data":[{"id_mutation":"2024-1","date_mutation":"2024-01-10","valeur_fonciere":250000,"id_parcelle":"033000AB0123"}]}"#,
    )
    .unwrap();
    assert_eq!(parsed.data.len(), 1);
    assert_eq!(parsed.data[0].nombre_lots, 0);
    assert!((parsed.data[0].valeur_fonciere - 250_000.).abs() < f64::EPSILON);
  }
}
