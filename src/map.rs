pub mod coordinates;
pub mod layer;
pub mod tile_loader;
pub mod view;
