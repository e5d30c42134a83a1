//! Installer image resolution port.

use std::future::Future;
use std::pin::Pin;

use crate::types::Profile;

/// Turns a profile and target version into an installer image reference.
///
/// Called once per distinct profile before any node is touched.
pub trait ImageResolver: Send + Sync {
    fn installer_image<'a>(
        &'a self,
        profile: &'a Profile,
        version: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}
