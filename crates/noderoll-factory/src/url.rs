//! Browser URLs for the factory web UI.

use noderoll_core::Profile;
use reqwest::Url;

use crate::client::DEFAULT_FACTORY_URL;
use crate::error::{FactoryError, FactoryResult};

/// A URL that opens the factory UI preloaded with the profile's choices.
///
/// Query keys are emitted in sorted order; repeated keys keep their
/// declaration order. Overlay boards reset the default extension set with
/// a leading `-`.
pub fn factory_url(profile: &Profile, version: &str, base_url: &str) -> FactoryResult<String> {
    let base_url = match base_url.trim_end_matches('/') {
        "" => DEFAULT_FACTORY_URL,
        url => url,
    };
    let mut url = Url::parse(&format!("{base_url}/")).map_err(|e| FactoryError::InvalidUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;

    let mut params: Vec<(&str, &str)> = vec![("arch", profile.arch.as_str())];
    match &profile.overlay {
        Some(overlay) => {
            params.push(("board", overlay.name.as_str()));
            params.push(("target", "sbc"));
        }
        None => {
            params.push(("target", "metal"));
            if profile.secureboot {
                params.push(("secureboot", "true"));
            }
        }
    }
    params.push(("platform", profile.platform.as_str()));
    params.push(("bootloader", "auto"));
    params.push(("cmdline-set", "true"));
    params.push(("version", version));
    params.extend(profile.kernel_args.iter().map(|arg| ("cmdline", arg.as_str())));
    if profile.overlay.is_some() {
        params.push(("extensions", "-"));
    }
    params.extend(profile.extensions.iter().map(|ext| ("extensions", ext.as_str())));

    params.sort_by(|a, b| a.0.cmp(b.0));
    url.query_pairs_mut().extend_pairs(params);
    Ok(url.to_string())
}
