use clap::Parser;

use immocarte::app::ImmocarteApp;
use immocarte::config::{Config, DEFAULT_CENTER, DEFAULT_ZOOM};
use immocarte::map::coordinates::WGS84Coordinate;

#[derive(Parser)]
#[command(version, about = "Cadastre and DVF map viewer")]
struct Args {
  /// Initial latitude of the map center.
  #[arg(long)]
  lat: Option<f32>,
  /// Initial longitude of the map center.
  #[arg(long)]
  lon: Option<f32>,
  /// Initial tile zoom level.
  #[arg(long)]
  zoom: Option<u8>,
}

fn main() -> eframe::Result {
  env_logger::init();

  let args = Args::parse();
  let center = WGS84Coordinate::new(
    args.lat.unwrap_or(DEFAULT_CENTER.0),
    args.lon.unwrap_or(DEFAULT_CENTER.1),
  );
  let zoom = args.zoom.unwrap_or(DEFAULT_ZOOM).clamp(2, 20);

  let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
  let _enter = rt.enter();

  let options = eframe::NativeOptions {
    viewport: egui::ViewportBuilder {
      inner_size: Some(egui::vec2(1280.0, 900.0)),
      clamp_size_to_monitor_size: Some(true),
      ..Default::default()
    },
    ..Default::default()
  };

  eframe::run_native(
    "immocarte",
    options,
    Box::new(move |cc| {
      egui_extras::install_image_loaders(&cc.egui_ctx);
      let config = Config::new();
      Ok(Box::new(ImmocarteApp::new(
        cc.egui_ctx.clone(),
        &config,
        center,
        zoom,
      )))
    }),
  )
}
