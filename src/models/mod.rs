pub mod api;
pub mod engine;
pub mod health;
pub mod image;

pub use api::*;
pub use engine::*;
pub use health::*;
pub use image::*;
