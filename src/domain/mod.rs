// Domain layer: receipt models and ports (interfaces) for the external extractors.

pub mod model;
pub mod ports;
