//! Image factory integration.
//!
//! Profiles are turned into schematics, registered with the factory to
//! obtain a content-addressed id, and combined with a version into an
//! installer image reference. The same profile data also renders a
//! browser URL for the factory's web UI.

pub mod client;
pub mod error;
pub mod release;
pub mod schematic;
pub mod url;

pub use client::{DEFAULT_FACTORY_URL, FactoryClient, installer_image_ref};
pub use error::{FactoryError, FactoryResult};
pub use release::latest_release_version;
pub use schematic::{Customization, Schematic, SchematicOverlay, SystemExtensions};
pub use url::factory_url;
