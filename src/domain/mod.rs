//! Domain layer: pipeline value objects and ports.

pub mod model;
pub mod ports;
