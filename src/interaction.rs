use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use itertools::Itertools;
use log::{debug, info, warn};

use crate::cadastre::{
  FeatureRef, FeatureState, ParcelHost, SectionKey,
  selection::{ParcelSelector, write_feature_state},
};
use crate::dvf::{DvfMutation, cache::TransactionCache, client::DvfClient};
use crate::map::coordinates::{PixelCoordinate, Transform, WGS84Coordinate};
use crate::popup::{ParcelPopup, PopupAction};
use crate::viewport::ViewportTracker;

/// How long a transient status notice stays on screen.
const STATUS_DURATION: Duration = Duration::from_secs(4);

/// Results of background DVF fetches, sent to the UI thread.
#[derive(Debug)]
pub enum DvfEvent {
  /// One section of a bounds refresh came back.
  SectionLoaded {
    key: SectionKey,
    parcels: Vec<FeatureRef>,
    records: Vec<DvfMutation>,
  },
  /// One section of a bounds refresh failed; its parcels show as "no data".
  SectionFailed {
    key: SectionKey,
    parcels: Vec<FeatureRef>,
  },
  /// Every section fetch of the tagged refresh has settled.
  RefreshSettled { generation: u64 },
  /// The on-demand fetch for the current selection came back.
  OnDemandLoaded {
    key: SectionKey,
    records: Vec<DvfMutation>,
  },
  OnDemandFailed { key: SectionKey },
}

/// The interaction core: owns the selection, the transaction cache, the
/// viewport debounce and the popup, and coordinates the background fetches.
///
/// All mutation happens on the UI thread; background tasks only report back
/// over the channel.
pub struct CadastreInteraction {
  selector: ParcelSelector,
  cache: TransactionCache,
  tracker: ViewportTracker,
  popup: ParcelPopup,
  client: DvfClient,
  sender: std::sync::mpsc::Sender<DvfEvent>,
  receiver: std::sync::mpsc::Receiver<DvfEvent>,
  ctx: egui::Context,
  /// Cancellation flag of the in-flight on-demand fetch, if any.
  on_demand: Option<Arc<AtomicBool>>,
  status: Option<(String, Instant)>,
  listing_request: Option<WGS84Coordinate>,
}

impl CadastreInteraction {
  #[must_use]
  pub fn new(ctx: egui::Context, client: DvfClient, now: Instant) -> Self {
    let (sender, receiver) = std::sync::mpsc::channel();
    Self {
      selector: ParcelSelector::default(),
      cache: TransactionCache::new(),
      tracker: ViewportTracker::new(now),
      popup: ParcelPopup::default(),
      client,
      sender,
      receiver,
      ctx,
      on_demand: None,
      status: None,
      listing_request: None,
    }
  }

  #[must_use]
  pub fn cache(&self) -> &TransactionCache {
    &self.cache
  }

  #[must_use]
  pub fn cache_mut(&mut self) -> &mut TransactionCache {
    &mut self.cache
  }

  #[must_use]
  pub fn selected_parcel(&self) -> Option<&str> {
    self.selector.current().map(|s| s.parcel_id.as_str())
  }

  /// The map view reports every camera change here; the refresh fires once
  /// the camera has been still for the debounce window.
  pub fn camera_changed(&mut self, now: Instant) {
    self.tracker.touch(now);
  }

  #[must_use]
  pub fn next_wakeup(&self) -> Option<Instant> {
    self.tracker.next_deadline()
  }

  /// Hands out a pending "create listing here" request exactly once.
  pub fn take_listing_request(&mut self) -> Option<WGS84Coordinate> {
    self.listing_request.take()
  }

  /// Per-frame driver: applies arrived fetch results and starts a bounds
  /// refresh when the debounce window elapsed.
  pub fn tick(&mut self, host: &mut dyn ParcelHost, now: Instant) {
    while let Ok(event) = self.receiver.try_recv() {
      self.apply_event(host, event, now);
    }
    if self.tracker.poll(now) {
      self.refresh_visible(host);
    }
  }

  /// A primary click on the map at the given canvas coordinate. Returns true
  /// when a parcel was hit.
  pub fn handle_click(&mut self, host: &mut dyn ParcelHost, pos: PixelCoordinate, now: Instant) -> bool {
    match host.parcel_at(pos) {
      Some(feature) => {
        self.cancel_on_demand();
        self.popup.close();
        let has_dvf = self.cache.has_dvf(&feature.props.id)
          || !self.cache.mutations_for(&feature.props.id).is_empty();
        let anchor = WGS84Coordinate::from(pos);
        let cache = &self.cache;
        self
          .selector
          .select(host, &feature, anchor, has_dvf, |id| cache.has_dvf(id));

        match feature.props.section_key() {
          Some(key) if !self.cache.is_fresh(&key, now) => self.spawn_on_demand(key),
          Some(key) => debug!("Section {key} is fresh, skipping on-demand fetch"),
          None => info!(
            "Parcel {} has incomplete cadastral identifiers, no history available",
            feature.props.id
          ),
        }
        true
      }
      None => {
        self.clear_selection(host);
        false
      }
    }
  }

  /// Clears selection and popup, restoring the cached DVF presentation.
  pub fn clear_selection(&mut self, host: &mut dyn ParcelHost) {
    self.cancel_on_demand();
    self.popup.close();
    let cache = &self.cache;
    self.selector.clear(host, |id| cache.has_dvf(id));
  }

  /// Renders the parcel popup, the mutations dialog and the status notice.
  pub fn show_overlays(&mut self, ctx: &egui::Context, host: &mut dyn ParcelHost, transform: &Transform) {
    let mut action = PopupAction::None;
    let mut anchor = None;
    if let Some(selection) = self.selector.current() {
      let mutations = self.cache.sorted_mutations_for(&selection.parcel_id);
      let loading = self.cache.is_loading() || self.on_demand.is_some();
      anchor = Some(selection.anchor);
      action = self.popup.show(ctx, transform, selection, &mutations, loading);
    }
    match action {
      PopupAction::None => {}
      PopupAction::Close => self.clear_selection(host),
      PopupAction::CreateListing => {
        self.listing_request = anchor;
        self.clear_selection(host);
      }
    }

    if self
      .status
      .as_ref()
      .is_some_and(|(_, shown_at)| shown_at.elapsed() > STATUS_DURATION)
    {
      self.status = None;
    }
    if let Some((message, _)) = &self.status {
      egui::Area::new(egui::Id::new("dvf_status"))
        .anchor(egui::Align2::CENTER_TOP, egui::vec2(0.0, 12.0))
        .show(ctx, |ui| {
          egui::Frame::popup(ui.style()).show(ui, |ui| {
            ui.label(message.as_str());
          });
        });
    }
  }

  /// Groups the visible parcels by section and fetches every distinct
  /// section concurrently. Parcels without complete cadastral identifiers
  /// are skipped.
  fn refresh_visible(&mut self, host: &mut dyn ParcelHost) {
    let groups: Vec<(SectionKey, Vec<FeatureRef>)> = host
      .visible_parcels()
      .into_iter()
      .filter_map(|feature| match feature.props.section_key() {
        Some(key) => Some((key, feature.feature_ref())),
        None => {
          info!(
            "Skipping parcel {} with incomplete cadastral identifiers",
            feature.props.id
          );
          None
        }
      })
      .into_group_map()
      .into_iter()
      .collect();
    if groups.is_empty() {
      return;
    }

    let generation = self.cache.begin_refresh();
    debug!(
      "Refreshing DVF data for {} visible sections (generation {generation})",
      groups.len()
    );

    let client = self.client.clone();
    let sender = self.sender.clone();
    let ctx = self.ctx.clone();
    tokio::spawn(async move {
      let mut tasks = tokio::task::JoinSet::new();
      for (key, parcels) in groups {
        let client = client.clone();
        tasks.spawn(async move {
          match client.fetch_section(&key).await {
            Ok(records) => DvfEvent::SectionLoaded {
              key,
              parcels,
              records,
            },
            Err(e) => {
              warn!("DVF refresh failed for section {key}: {e}");
              DvfEvent::SectionFailed { key, parcels }
            }
          }
        });
      }
      while let Some(joined) = tasks.join_next().await {
        match joined {
          Ok(event) => {
            if sender.send(event).is_ok() {
              ctx.request_repaint();
            }
          }
          Err(e) => warn!("DVF section fetch task failed: {e}"),
        }
      }
      // Deasserts the loading flag exactly once, failures included.
      if sender.send(DvfEvent::RefreshSettled { generation }).is_ok() {
        ctx.request_repaint();
      }
    });
  }

  fn spawn_on_demand(&mut self, key: SectionKey) {
    self.cancel_on_demand();
    let cancelled = Arc::new(AtomicBool::new(false));
    self.on_demand = Some(cancelled.clone());

    let client = self.client.clone();
    let sender = self.sender.clone();
    let ctx = self.ctx.clone();
    tokio::spawn(async move {
      let result = client.fetch_section_with_retry(&key).await;
      if cancelled.load(Ordering::Relaxed) {
        debug!("Discarding on-demand DVF result for {key}: selection changed");
        return;
      }
      let event = match result {
        Ok(records) => DvfEvent::OnDemandLoaded { key, records },
        Err(e) => {
          warn!("On-demand DVF fetch failed for section {key}: {e}");
          DvfEvent::OnDemandFailed { key }
        }
      };
      if sender.send(event).is_ok() {
        ctx.request_repaint();
      }
    });
  }

  fn cancel_on_demand(&mut self) {
    if let Some(flag) = self.on_demand.take() {
      flag.store(true, Ordering::Relaxed);
    }
  }

  /// Applies one fetch result to the cache and paints the affected parcels.
  /// Public so the event flow is testable without the network.
  pub fn apply_event(&mut self, host: &mut dyn ParcelHost, event: DvfEvent, now: Instant) {
    match event {
      DvfEvent::SectionLoaded {
        key,
        parcels,
        records,
      } => {
        let appended = self.cache.merge(records);
        self.cache.mark_fetched(key.clone(), now);
        debug!("Section {key}: {appended} new mutations");
        for parcel in parcels {
          let has_dvf = !self.cache.mutations_for(&parcel.parcel_id).is_empty();
          self.paint_parcel(host, &parcel, has_dvf);
        }
      }
      DvfEvent::SectionFailed { key, parcels } => {
        debug!("Section {key} marked without data after failed fetch");
        for parcel in parcels {
          self.paint_parcel(host, &parcel, false);
        }
      }
      DvfEvent::RefreshSettled { generation } => {
        self.cache.finish_refresh(generation);
      }
      DvfEvent::OnDemandLoaded { key, records } => {
        self.on_demand = None;
        self.cache.merge(records);
        self.cache.mark_fetched(key, now);
        if let Some(parcel) = self.selector.current().map(|s| s.feature.clone()) {
          let has_dvf = !self.cache.mutations_for(&parcel.parcel_id).is_empty();
          self.paint_parcel(host, &parcel, has_dvf);
        }
      }
      DvfEvent::OnDemandFailed { key } => {
        self.on_demand = None;
        self.status = Some((
          format!("Données DVF indisponibles pour la section {key}"),
          Instant::now(),
        ));
      }
    }
  }

  /// Records the flag and rewrites the feature state, preserving a live
  /// selection on the same parcel.
  fn paint_parcel(&mut self, host: &mut dyn ParcelHost, parcel: &FeatureRef, has_dvf: bool) {
    self.cache.set_flag(&parcel.parcel_id, has_dvf);
    write_feature_state(
      host,
      parcel,
      FeatureState {
        selected: self.selector.is_selected(&parcel.parcel_id),
        has_dvf,
      },
    );
  }
}
