mod open_water;
mod subsurface;
mod surface_layer;

pub use open_water::OpenWaterBucket;
pub use subsurface::SoilBucket;
pub use surface_layer::CanopySnow;
