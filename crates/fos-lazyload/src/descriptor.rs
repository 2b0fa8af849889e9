//! Resource Descriptor
//!
//! What a widget wants to show: the primary source plus optional variants.

use serde::Deserialize;

use crate::capability::FeatureName;

/// Declared image format of the primary source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    None,
    Webp,
    Svg,
}

impl ImageFormat {
    /// Capability that must be probed before this format can be trusted
    pub fn feature(&self) -> Option<FeatureName> {
        match self {
            Self::None => None,
            Self::Webp => Some(FeatureName::Webp),
            Self::Svg => Some(FeatureName::Svg),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Webp => "webp",
            Self::Svg => "svg",
        }
    }
}

/// Media resource descriptor, immutable per activation
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceDescriptor {
    pub primary_src: String,
    #[serde(default)]
    pub format: ImageFormat,
    #[serde(default)]
    pub src_set: Option<String>,
    #[serde(default)]
    pub sizes: Option<String>,
    #[serde(default)]
    pub low_res_src: Option<String>,
    #[serde(default)]
    pub placeholder_src: Option<String>,
    #[serde(default)]
    pub is_embedded_document: bool,
}

impl ResourceDescriptor {
    pub fn new(primary_src: &str) -> Self {
        Self {
            primary_src: primary_src.to_string(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_low_res(mut self, src: &str) -> Self {
        self.low_res_src = Some(src.to_string());
        self
    }

    pub fn with_placeholder(mut self, src: &str) -> Self {
        self.placeholder_src = Some(src.to_string());
        self
    }

    pub fn with_src_set(mut self, src_set: &str, sizes: Option<&str>) -> Self {
        self.src_set = Some(src_set.to_string());
        self.sizes = sizes.map(str::to_string);
        self
    }

    pub fn embedded_document(mut self, embedded: bool) -> Self {
        self.is_embedded_document = embedded;
        self
    }
}
