use chrono::NaiveDate;
use egui::{Align2, Color32, RichText};

use crate::cadastre::selection::Selection;
use crate::dvf::DvfMutation;
use crate::map::coordinates::{PixelCoordinate, Transform};

/// What the user asked the parcel popup to do this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupAction {
  None,
  /// Close the popup and clear the selection.
  Close,
  /// Open the listing form anchored at the selection.
  CreateListing,
}

/// State of the DVF block inside the popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DvfBlock {
  Loading,
  NoTransactions,
  Transactions,
}

/// The parcel popup and its mutations dialog.
///
/// Pure presentation: the interaction controller owns the selection and the
/// cache, the popup renders whatever it is handed each frame, so cache
/// updates show up without re-clicking.
#[derive(Debug, Default)]
pub struct ParcelPopup {
  show_mutations: bool,
}

impl ParcelPopup {
  pub fn close(&mut self) {
    self.show_mutations = false;
  }

  pub fn show(
    &mut self,
    ctx: &egui::Context,
    transform: &Transform,
    selection: &Selection,
    mutations: &[DvfMutation],
    loading: bool,
  ) -> PopupAction {
    let mut action = PopupAction::None;
    let anchor = transform.apply(PixelCoordinate::from(selection.anchor));

    let block = if !mutations.is_empty() {
      DvfBlock::Transactions
    } else if loading {
      DvfBlock::Loading
    } else {
      DvfBlock::NoTransactions
    };

    egui::Area::new(egui::Id::new("parcel_popup"))
      .fixed_pos(egui::Pos2::from(anchor))
      .pivot(Align2::CENTER_BOTTOM)
      .show(ctx, |ui| {
        egui::Frame::popup(ui.style()).show(ui, |ui| {
          ui.set_max_width(260.);
          ui.horizontal(|ui| {
            ui.label(RichText::new(&selection.parcel_id).strong());
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
              if ui.small_button("✕").clicked() {
                action = PopupAction::Close;
              }
            });
          });
          parcel_details(ui, selection);
          ui.separator();
          dvf_block(ui, block, mutations);
          ui.separator();
          ui.horizontal(|ui| {
            if ui.button("Créer un bien ici").clicked() {
              action = PopupAction::CreateListing;
            }
            if mutations.len() > 1 {
              let label = format!("Voir {} transactions", mutations.len());
              if ui.button(label).clicked() {
                self.show_mutations = true;
              }
            }
          });
        });
      });

    if self.show_mutations {
      self.mutations_dialog(ctx, selection, mutations);
    }
    if action == PopupAction::Close {
      self.close();
    }
    action
  }

  fn mutations_dialog(
    &mut self,
    ctx: &egui::Context,
    selection: &Selection,
    mutations: &[DvfMutation],
  ) {
    let mut open = self.show_mutations;
    egui::Window::new(format!("Transactions {}", selection.parcel_id))
      .open(&mut open)
      .collapsible(false)
      .show(ctx, |ui| {
        egui::ScrollArea::vertical().max_height(300.).show(ui, |ui| {
          for mutation in mutations {
            mutation_row(ui, mutation);
            ui.separator();
          }
        });
      });
    self.show_mutations = open;
  }
}

fn parcel_details(ui: &mut egui::Ui, selection: &Selection) {
  let props = &selection.properties;
  if let (Some(commune), Some(section)) = (&props.commune, &props.section) {
    ui.label(format!("Commune {commune}, section {section}"));
  }
  if let Some(contenance) = props.contenance {
    ui.label(format!("Contenance : {contenance:.0} m²"));
  }
  if let Some(updated) = &props.updated {
    ui.label(format!("Mis à jour : {}", format_date(updated)));
  } else if let Some(created) = &props.created {
    ui.label(format!("Créé : {}", format_date(created)));
  }
}

fn dvf_block(ui: &mut egui::Ui, block: DvfBlock, mutations: &[DvfMutation]) {
  match block {
    DvfBlock::Loading => {
      ui.horizontal(|ui| {
        ui.spinner();
        ui.label("Chargement des données DVF…");
      });
    }
    DvfBlock::NoTransactions => {
      ui.label(RichText::new("Aucune transaction récente").weak());
    }
    DvfBlock::Transactions => {
      // Callers hand over display-sorted mutations, most recent first.
      ui.label(RichText::new("Dernière transaction").strong());
      mutation_row(ui, &mutations[0]);
    }
  }
}

fn mutation_row(ui: &mut egui::Ui, mutation: &DvfMutation) {
  ui.horizontal(|ui| {
    ui.label(
      RichText::new(format_price(mutation.valeur_fonciere))
        .color(Color32::from_rgb(30, 120, 60))
        .strong(),
    );
    ui.label(format_date(&mutation.date_mutation));
  });
  let mut details = mutation.nature_mutation.clone();
  if !mutation.type_local.is_empty() {
    if !details.is_empty() {
      details.push_str(", ");
    }
    details.push_str(&mutation.type_local);
  }
  if mutation.surface_reelle_bati > 0. {
    details.push_str(&format!(" ({:.0} m²)", mutation.surface_reelle_bati));
  }
  if !details.is_empty() {
    ui.label(RichText::new(details).weak());
  }
}

/// fr-FR price formatting, e.g. `250 000 €`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn format_price(value: f64) -> String {
  let rounded = value.round() as i64;
  let digits = rounded.abs().to_string();
  let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
  let offset = digits.len() % 3;
  for (i, c) in digits.chars().enumerate() {
    if i > 0 && (i + 3 - offset) % 3 == 0 {
      grouped.push(' ');
    }
    grouped.push(c);
  }
  if rounded < 0 {
    format!("-{grouped} €")
  } else {
    format!("{grouped} €")
  }
}

/// `2023-07-15` as `15/07/2023`; anything unparsable passes through.
#[must_use]
pub fn format_date(raw: &str) -> String {
  NaiveDate::parse_from_str(raw, "%Y-%m-%d")
    .map_or_else(|_| raw.to_string(), |d| d.format("%d/%m/%Y").to_string())
}
