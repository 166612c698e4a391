use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::map::coordinates::PixelCoordinate;

pub mod selection;

/// Attributes of a cadastral parcel as decoded from the `parcelles` vector-tile layer.
///
/// The commune/prefixe/section triple may be incomplete on malformed features;
/// such parcels are skipped when grouping fetches.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParcelProperties {
  pub id: String,
  pub commune: Option<String>,
  pub prefixe: Option<String>,
  pub section: Option<String>,
  pub contenance: Option<f64>,
  pub created: Option<String>,
  pub updated: Option<String>,
}

impl ParcelProperties {
  /// The section grouping key, if the cadastral identifiers are complete.
  #[must_use]
  pub fn section_key(&self) -> Option<SectionKey> {
    match (&self.commune, &self.prefixe, &self.section) {
      (Some(commune), Some(prefixe), Some(section)) => Some(SectionKey {
        commune: commune.clone(),
        prefixe: prefixe.clone(),
        section: section.clone(),
      }),
      _ => None,
    }
  }
}

/// The cadastral grouping key coarser than a single parcel: transaction
/// history is fetched per section, not per parcel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SectionKey {
  pub commune: String,
  pub prefixe: String,
  pub section: String,
}

impl Display for SectionKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}{}", self.commune, self.prefixe, self.section)
  }
}

/// Ephemeral per-feature presentation flags. Not part of the parcel's
/// identity; reconstructable from the transaction cache at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureState {
  pub selected: bool,
  pub has_dvf: bool,
}

/// Identifies a rendered parcel feature towards the host.
///
/// The numeric handle is assigned per decoded vector-tile feature and is not
/// stable across tile reloads, so the parcel id string is carried as the
/// secondary identifier form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRef {
  pub handle: Option<u64>,
  pub parcel_id: String,
}

impl FeatureRef {
  #[must_use]
  pub fn new(handle: u64, parcel_id: String) -> Self {
    Self {
      handle: Some(handle),
      parcel_id,
    }
  }
}

/// Outcome of a feature-state write. Never surfaced to the user, only logged
/// at the boundary; writes are non-fatal by design of the selection flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateWriteOutcome {
  /// The write was applied under the primary (numeric) identifier.
  Applied,
  /// The primary identifier was unknown to the host and the parcel-id
  /// fallback was applied instead.
  HostLimitation,
  /// Neither identifier form resolved to a rendered feature.
  NotFound,
}

/// A rendered parcel feature as reported by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelFeature {
  pub handle: u64,
  pub props: ParcelProperties,
}

impl ParcelFeature {
  #[must_use]
  pub fn feature_ref(&self) -> FeatureRef {
    FeatureRef::new(self.handle, self.props.id.clone())
  }
}

/// The map host seam: everything the interaction core needs from the vector
/// parcel layer. Implemented by the egui parcel layer and by fakes in tests.
pub trait ParcelHost {
  /// All parcel features currently rendered in the viewport.
  fn visible_parcels(&self) -> Vec<ParcelFeature>;
  /// The topmost parcel feature containing the given canvas coordinate.
  fn parcel_at(&self, pos: PixelCoordinate) -> Option<ParcelFeature>;
  /// Writes the full presentation state of a feature, trying the numeric
  /// handle first and falling back to the parcel id.
  fn set_feature_state(&mut self, feature: &FeatureRef, state: FeatureState) -> StateWriteOutcome;
  /// Drops the presentation state of a feature.
  fn remove_feature_state(&mut self, feature: &FeatureRef);
}

#[cfg(test)]
mod tests {
  use super::*;

  fn props(commune: Option<&str>, prefixe: Option<&str>, section: Option<&str>) -> ParcelProperties {
    ParcelProperties {
      id: "033000AB0123".to_string(),
      commune: commune.map(String::from),
      prefixe: prefixe.map(String::from),
      section: section.map(String::from),
      ..ParcelProperties::default()
    }
  }

  #[test]
  fn section_key_requires_complete_identifiers() {
    assert!(props(Some("033"), Some("000"), Some("AB")).section_key().is_some());
    assert!(props(None, Some("000"), Some("AB")).section_key().is_none());
    assert!(props(Some("033"), None, Some("AB")).section_key().is_none());
    assert!(props(Some("033"), Some("000"), None).section_key().is_none());
  }

  #[test]
  fn section_key_display_is_the_request_path() {
    let key = props(Some("033"), Some("000"), Some("AB"))
      .section_key()
      .unwrap();
    assert_eq!(key.to_string(), "033/000AB");
  }
}
