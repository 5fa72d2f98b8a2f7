// Privacy — route selection, onion layering and cover traffic

pub mod circuit;
pub mod cover;
pub mod onion;

pub use circuit::{relay_weight, select_route, CircuitError, Route, ROUTE_LENGTH};
pub use cover::{spawn_padding, CoverTrafficError, PaddingConfig};
pub use onion::{
    build_create, build_data, build_destroy, peel_response, seal_message, CircuitHandle, CircuitHop,
    CircuitParams, OnionError,
};
