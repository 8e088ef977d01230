//! Conflux Config
//!
//! Static configuration for the topology engine. The configuration is loaded
//! once at startup (from a JSON file or built in code), validated, and then
//! shared read-only with the engine as an `Arc<EngineConfig>`.
//!
//! ```json
//! {
//!   "max_splitter_rules": 5,
//!   "splitter_operation": "splitter",
//!   "routing_tag_field": "_route",
//!   "connectors": [
//!     { "connector_type": "s3", "category": "file", "supports_dependent_flow": true }
//!   ]
//! }
//! ```

mod connector;
mod engine;
mod error;

pub use connector::{ConnectorCategory, ConnectorSpec};
pub use engine::EngineConfig;
pub use error::ConfigError;
