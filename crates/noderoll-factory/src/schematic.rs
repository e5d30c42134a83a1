//! Schematic documents accepted by the factory's `/schematics` endpoint.

use noderoll_core::Profile;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schematic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<SchematicOverlay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customization: Option<Customization>,
}

/// Board overlay for single-board computers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchematicOverlay {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_kernel_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_extensions: Option<SystemExtensions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemExtensions {
    pub official_extensions: Vec<String>,
}

impl Schematic {
    pub fn from_profile(profile: &Profile) -> Self {
        let system_extensions = (!profile.extensions.is_empty()).then(|| SystemExtensions {
            official_extensions: profile.extensions.clone(),
        });
        Self {
            overlay: profile.overlay.as_ref().map(|o| SchematicOverlay {
                name: o.name.clone(),
                image: o.image.clone(),
            }),
            customization: Some(Customization {
                extra_kernel_args: profile.kernel_args.clone(),
                system_extensions,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noderoll_core::Overlay;
    use serde_json::json;

    #[test]
    fn minimal_profile_has_empty_customization() {
        let profile = Profile {
            arch: "amd64".into(),
            platform: "metal".into(),
            ..Default::default()
        };
        let body = serde_json::to_value(Schematic::from_profile(&profile)).unwrap();
        assert_eq!(body, json!({ "customization": {} }));
    }

    #[test]
    fn full_profile_shape() {
        let profile = Profile {
            arch: "arm64".into(),
            platform: "metal".into(),
            kernel_args: vec!["console=ttyS0".into()],
            extensions: vec!["siderolabs/iscsi-tools".into()],
            overlay: Some(Overlay {
                name: "turingrk1".into(),
                image: "siderolabs/sbc-rockchip".into(),
            }),
            ..Default::default()
        };
        let body = serde_json::to_value(Schematic::from_profile(&profile)).unwrap();
        assert_eq!(
            body,
            json!({
                "overlay": { "name": "turingrk1", "image": "siderolabs/sbc-rockchip" },
                "customization": {
                    "extraKernelArgs": ["console=ttyS0"],
                    "systemExtensions": { "officialExtensions": ["siderolabs/iscsi-tools"] }
                }
            })
        );
    }
}
