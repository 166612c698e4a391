use log::{debug, warn};

use super::{FeatureRef, FeatureState, ParcelFeature, ParcelHost, ParcelProperties, StateWriteOutcome};
use crate::map::coordinates::WGS84Coordinate;

/// The currently selected parcel: identifier, host handle and a snapshot of
/// its properties taken at click time.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
  pub parcel_id: String,
  pub feature: FeatureRef,
  pub properties: ParcelProperties,
  pub anchor: WGS84Coordinate,
}

/// Owns "which parcel is selected" and paints the host accordingly.
///
/// At most one parcel is selected at any time. Visual-state write failures
/// are logged and never block the selection bookkeeping.
#[derive(Debug, Default)]
pub struct ParcelSelector {
  current: Option<Selection>,
}

impl ParcelSelector {
  #[must_use]
  pub fn current(&self) -> Option<&Selection> {
    self.current.as_ref()
  }

  #[must_use]
  pub fn is_selected(&self, parcel_id: &str) -> bool {
    self
      .current
      .as_ref()
      .is_some_and(|s| s.parcel_id == parcel_id)
  }

  /// Selects the clicked feature, clearing any previous selection first.
  /// `has_dvf` is the cached DVF-presence flag for the clicked parcel.
  pub fn select(
    &mut self,
    host: &mut dyn ParcelHost,
    feature: &ParcelFeature,
    anchor: WGS84Coordinate,
    has_dvf: bool,
    previous_has_dvf: impl Fn(&str) -> bool,
  ) -> &Selection {
    self.clear(host, previous_has_dvf);

    let feature_ref = feature.feature_ref();
    write_feature_state(
      host,
      &feature_ref,
      FeatureState {
        selected: true,
        has_dvf,
      },
    );

    self.current = Some(Selection {
      parcel_id: feature.props.id.clone(),
      feature: feature_ref,
      properties: feature.props.clone(),
      anchor,
    });
    self.current.as_ref().unwrap()
  }

  /// Clears the selection, restoring the parcel's DVF presentation state
  /// from the cache instead of erasing it.
  pub fn clear(&mut self, host: &mut dyn ParcelHost, has_dvf: impl Fn(&str) -> bool) {
    let Some(selection) = self.current.take() else {
      return;
    };

    host.remove_feature_state(&selection.feature);
    write_feature_state(
      host,
      &selection.feature,
      FeatureState {
        selected: false,
        has_dvf: has_dvf(&selection.parcel_id),
      },
    );
  }
}

/// Applies a feature-state write and logs the tagged outcome. Host
/// limitations are expected when tiles were reloaded under the selection.
pub fn write_feature_state(
  host: &mut dyn ParcelHost,
  feature: &FeatureRef,
  state: FeatureState,
) -> StateWriteOutcome {
  let outcome = host.set_feature_state(feature, state);
  match outcome {
    StateWriteOutcome::Applied => {}
    StateWriteOutcome::HostLimitation => {
      debug!(
        "Feature state for parcel {} applied via id fallback (handle {:?} unknown)",
        feature.parcel_id, feature.handle
      );
    }
    StateWriteOutcome::NotFound => {
      warn!(
        "Could not set feature state for parcel {} (handle {:?})",
        feature.parcel_id, feature.handle
      );
    }
  }
  outcome
}
