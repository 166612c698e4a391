use std::collections::HashMap;
use std::time::Instant;

use immocarte::cadastre::{
  FeatureRef, FeatureState, ParcelFeature, ParcelHost, ParcelProperties, SectionKey,
  StateWriteOutcome,
};
use immocarte::dvf::DvfMutation;
use immocarte::dvf::client::DvfClient;
use immocarte::interaction::{CadastreInteraction, DvfEvent};
use immocarte::map::coordinates::PixelCoordinate;

/// A parcel host with hit testing by convention: parcel `i` occupies the
/// canvas band `x ∈ [10 i, 10 i + 10)`.
#[derive(Default)]
struct FakeHost {
  parcels: Vec<ParcelFeature>,
  states: HashMap<String, FeatureState>,
}

impl FakeHost {
  fn with_parcels(ids: &[(&str, &str, &str, &str)]) -> Self {
    let parcels = ids
      .iter()
      .enumerate()
      .map(|(i, (id, commune, prefixe, section))| ParcelFeature {
        handle: i as u64 + 1,
        props: ParcelProperties {
          id: (*id).to_string(),
          commune: (!commune.is_empty()).then(|| (*commune).to_string()),
          prefixe: (!prefixe.is_empty()).then(|| (*prefixe).to_string()),
          section: (!section.is_empty()).then(|| (*section).to_string()),
          ..ParcelProperties::default()
        },
      })
      .collect();
    Self {
      parcels,
      states: HashMap::new(),
    }
  }

  fn state(&self, id: &str) -> FeatureState {
    self.states.get(id).copied().unwrap_or_default()
  }

  fn selected_count(&self) -> usize {
    self.states.values().filter(|s| s.selected).count()
  }

  fn click_position(index: usize) -> PixelCoordinate {
    PixelCoordinate {
      x: index as f32 * 10. + 5.,
      y: 5.,
    }
  }
}

impl ParcelHost for FakeHost {
  fn visible_parcels(&self) -> Vec<ParcelFeature> {
    self.parcels.clone()
  }

  fn parcel_at(&self, pos: PixelCoordinate) -> Option<ParcelFeature> {
    if pos.x < 0. {
      return None;
    }
    self.parcels.get(pos.x as usize / 10).cloned()
  }

  fn set_feature_state(&mut self, feature: &FeatureRef, state: FeatureState) -> StateWriteOutcome {
    if let Some(handle) = feature.handle
      && let Some(parcel) = self.parcels.iter().find(|p| p.handle == handle)
    {
      self.states.insert(parcel.props.id.clone(), state);
      return StateWriteOutcome::Applied;
    }
    if self.parcels.iter().any(|p| p.props.id == feature.parcel_id) {
      self.states.insert(feature.parcel_id.clone(), state);
      return StateWriteOutcome::HostLimitation;
    }
    StateWriteOutcome::NotFound
  }

  fn remove_feature_state(&mut self, feature: &FeatureRef) {
    self.states.remove(&feature.parcel_id);
  }
}

fn interaction() -> CadastreInteraction {
  CadastreInteraction::new(
    egui::Context::default(),
    DvfClient::new("http://127.0.0.1:1".to_string()),
    Instant::now(),
  )
}

fn section_ab() -> SectionKey {
  SectionKey {
    commune: "033".to_string(),
    prefixe: "000".to_string(),
    section: "AB".to_string(),
  }
}

/// Marks the section fresh so a click does not spawn a network fetch.
fn freshen(interaction: &mut CadastreInteraction, key: SectionKey, now: Instant) {
  interaction.cache_mut().mark_fetched(key, now);
}

fn mutation(id: &str, parcel: &str, date: &str, value: f64) -> DvfMutation {
  DvfMutation {
    id_mutation: id.to_string(),
    id_parcelle: parcel.to_string(),
    date_mutation: date.to_string(),
    valeur_fonciere: value,
    ..DvfMutation::default()
  }
}

#[test]
fn click_sequence_leaves_at_most_one_selected() {
  let now = Instant::now();
  let mut host = FakeHost::with_parcels(&[
    ("033000AB0123", "033", "000", "AB"),
    ("033000AB0124", "033", "000", "AB"),
    ("033000AB0125", "033", "000", "AB"),
  ]);
  let mut interaction = interaction();
  freshen(&mut interaction, section_ab(), now);

  for index in [0, 1, 2, 1] {
    assert!(interaction.handle_click(&mut host, FakeHost::click_position(index), now));
    assert_eq!(host.selected_count(), 1);
  }
  assert!(host.state("033000AB0124").selected);
  assert_eq!(interaction.selected_parcel(), Some("033000AB0124"));
}

#[test]
fn clearing_restores_cached_dvf_flag() {
  let now = Instant::now();
  let mut host = FakeHost::with_parcels(&[("033000AB0123", "033", "000", "AB")]);
  let mut interaction = interaction();
  freshen(&mut interaction, section_ab(), now);
  interaction.cache_mut().set_flag("033000AB0123", true);

  interaction.handle_click(&mut host, FakeHost::click_position(0), now);
  assert!(host.state("033000AB0123").selected);
  assert!(host.state("033000AB0123").has_dvf);

  // Empty-map click clears the selection but keeps the red DVF paint.
  assert!(!interaction.handle_click(&mut host, PixelCoordinate { x: 900., y: 5. }, now));
  assert_eq!(host.selected_count(), 0);
  assert!(host.state("033000AB0123").has_dvf);
  assert_eq!(interaction.selected_parcel(), None);
}

#[test]
fn failed_section_flags_no_data_and_loading_settles_once() {
  let now = Instant::now();
  let mut host = FakeHost::with_parcels(&[
    ("033000AB0123", "033", "000", "AB"),
    ("033000AC0001", "033", "000", "AC"),
  ]);
  let mut interaction = interaction();

  let generation = interaction.cache_mut().begin_refresh();
  assert!(interaction.cache().is_loading());

  let group_ab = vec![FeatureRef::new(1, "033000AB0123".to_string())];
  let group_ac = vec![FeatureRef::new(2, "033000AC0001".to_string())];

  interaction.apply_event(
    &mut host,
    DvfEvent::SectionFailed {
      key: section_ab(),
      parcels: group_ab,
    },
    now,
  );
  assert!(interaction.cache().is_loading());

  interaction.apply_event(
    &mut host,
    DvfEvent::SectionLoaded {
      key: SectionKey {
        commune: "033".to_string(),
        prefixe: "000".to_string(),
        section: "AC".to_string(),
      },
      parcels: group_ac,
      records: vec![mutation("2024-1", "033000AC0001", "2024-02-01", 310_000.)],
    },
    now,
  );
  interaction.apply_event(&mut host, DvfEvent::RefreshSettled { generation }, now);

  assert!(!interaction.cache().is_loading());
  assert!(!host.state("033000AB0123").has_dvf);
  assert!(host.state("033000AC0001").has_dvf);
}

#[test]
fn refetch_preserves_and_appends() {
  let now = Instant::now();
  let mut host = FakeHost::with_parcels(&[("033000AB0123", "033", "000", "AB")]);
  let mut interaction = interaction();
  let parcels = vec![FeatureRef::new(1, "033000AB0123".to_string())];

  interaction.apply_event(
    &mut host,
    DvfEvent::SectionLoaded {
      key: section_ab(),
      parcels: parcels.clone(),
      records: vec![
        mutation("2023-1", "033000AB0123", "2023-05-01", 250_000.),
        mutation("2023-2", "033000AB0123", "2023-07-01", 20_000.),
      ],
    },
    now,
  );
  interaction.apply_event(
    &mut host,
    DvfEvent::SectionLoaded {
      key: section_ab(),
      parcels,
      records: vec![
        mutation("2023-1", "033000AB0123", "2023-05-01", 250_000.),
        mutation("2024-1", "033000AB0123", "2024-02-01", 275_000.),
      ],
    },
    now,
  );

  let cached = interaction.cache().mutations_for("033000AB0123");
  let ids: Vec<_> = cached.iter().map(|m| m.id_mutation.as_str()).collect();
  assert_eq!(ids, vec!["2023-1", "2023-2", "2024-1"]);
}

#[test]
fn late_fetch_updates_selected_parcel_without_reclick() {
  let now = Instant::now();
  let mut host = FakeHost::with_parcels(&[("033000AB0123", "033", "000", "AB")]);
  let mut interaction = interaction();
  freshen(&mut interaction, section_ab(), now);

  interaction.handle_click(&mut host, FakeHost::click_position(0), now);
  // Nothing cached yet: the popup would show "no recent transaction".
  assert!(interaction.cache().mutations_for("033000AB0123").is_empty());
  assert!(!host.state("033000AB0123").has_dvf);

  interaction.apply_event(
    &mut host,
    DvfEvent::OnDemandLoaded {
      key: section_ab(),
      records: vec![mutation("2024-1", "033000AB0123", "2024-02-01", 275_000.)],
    },
    now,
  );

  // Same selection, updated content and paint.
  assert_eq!(interaction.selected_parcel(), Some("033000AB0123"));
  assert_eq!(interaction.cache().mutations_for("033000AB0123").len(), 1);
  assert!(host.state("033000AB0123").selected);
  assert!(host.state("033000AB0123").has_dvf);
}

#[test]
fn selection_survives_host_limitation_fallback() {
  let now = Instant::now();
  let mut host = FakeHost::with_parcels(&[("033000AB0123", "033", "000", "AB")]);
  let mut interaction = interaction();
  freshen(&mut interaction, section_ab(), now);

  interaction.handle_click(&mut host, FakeHost::click_position(0), now);

  // The tile reloads under the selection: the old handle is gone but the
  // parcel id still resolves.
  host.parcels[0].handle = 99;
  let stale = FeatureRef::new(1, "033000AB0123".to_string());
  assert_eq!(
    host.set_feature_state(
      &stale,
      FeatureState {
        selected: true,
        has_dvf: true
      }
    ),
    StateWriteOutcome::HostLimitation
  );
  assert!(host.state("033000AB0123").has_dvf);

  let unknown = FeatureRef::new(7, "033000ZZ9999".to_string());
  assert_eq!(
    host.set_feature_state(
      &unknown,
      FeatureState {
        selected: false,
        has_dvf: false
      }
    ),
    StateWriteOutcome::NotFound
  );
}

#[tokio::test(flavor = "multi_thread")]
async fn bounds_refresh_settles_against_unreachable_backend() {
  let mut host = FakeHost::with_parcels(&[
    ("033000AB0123", "033", "000", "AB"),
    // Incomplete identifiers: skipped by the refresh, never flagged.
    ("033000XX0001", "", "", ""),
  ]);
  let mut interaction = interaction();

  // The tracker fires its initial refresh on the first tick; every fetch
  // fails against the unreachable backend.
  let deadline = Instant::now() + std::time::Duration::from_secs(10);
  interaction.tick(&mut host, Instant::now());
  loop {
    interaction.tick(&mut host, Instant::now());
    if !interaction.cache().is_loading() && host.states.contains_key("033000AB0123") {
      break;
    }
    assert!(Instant::now() < deadline, "refresh did not settle");
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
  }

  assert!(!host.state("033000AB0123").has_dvf);
  assert!(!host.states.contains_key("033000XX0001"));
}
