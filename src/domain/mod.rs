// Domain layer: core models and ports (interfaces). No process or OS details here.

pub mod model;
pub mod ports;
