//! HTTP API handlers for bgref-cr

pub mod health;
pub mod reconcile;
pub mod relations;
pub mod settings;
pub mod sse;

pub use health::health_routes;
pub use reconcile::reconcile_routes;
pub use relations::relation_routes;
pub use settings::settings_routes;
pub use sse::event_stream;
