pub mod app;
pub mod cadastre;
pub mod config;
pub mod dvf;
pub mod geocode;
pub mod interaction;
pub mod listing;
pub mod map;
pub mod popup;
pub mod viewport;
