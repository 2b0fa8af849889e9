//! HTTP host
//!
//! Headless host that fetches over the network with a blocking `reqwest`
//! client on smol's blocking pool. There is no layout, so every element
//! counts as visible.

use std::time::Duration;

use fos_lazyload::{FeatureName, FetchFailure, PolyfillKind};
use reqwest::blocking::Client;

use crate::host::Host;
use crate::scripted::FormatSupport;

/// Fetches sources over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpHost {
    client: Client,
    format_support: FormatSupport,
    polyfill_url: Option<String>,
}

impl HttpHost {
    /// `timeout` is a transport backstop; sessions enforce their own deadline
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(user_agent).timeout(timeout).build()?;
        Ok(Self {
            client,
            format_support: FormatSupport::default(),
            polyfill_url: None,
        })
    }

    pub fn with_format_support(mut self, support: FormatSupport) -> Self {
        self.format_support = support;
        self
    }

    pub fn with_polyfill(mut self, url: &str) -> Self {
        self.polyfill_url = Some(url.to_string());
        self
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchFailure> {
        let client = self.client.clone();
        let url = url.to_string();
        smol::unblock(move || -> Result<Vec<u8>, FetchFailure> {
            let response = client.get(&url).send().map_err(|e| FetchFailure::network(e.to_string()))?;
            classify_status(response.status().as_u16(), &url)?;
            let body = response.bytes().map_err(|e| FetchFailure::network(e.to_string()))?;
            Ok(body.to_vec())
        })
        .await
    }
}

/// Map an HTTP status to an attempt outcome
pub fn classify_status(status: u16, url: &str) -> Result<(), FetchFailure> {
    match status {
        200..=299 => Ok(()),
        401 | 403 | 451 => Err(FetchFailure::security(format!("HTTP {} for {}", status, url))),
        _ => Err(FetchFailure::network(format!("HTTP {} for {}", status, url))),
    }
}

impl Host for HttpHost {
    async fn fetch(&self, url: &str) -> Result<(), FetchFailure> {
        let body = self.get(url).await?;
        if body.is_empty() {
            return Err(FetchFailure::decode(format!("empty body from {}", url)));
        }
        tracing::debug!("fetched {} ({} bytes)", url, body.len());
        Ok(())
    }

    async fn probe_format(&self, feature: FeatureName) -> Result<bool, String> {
        let support = match feature {
            FeatureName::Webp => self.format_support.webp,
            FeatureName::Svg => self.format_support.svg,
        };
        support.ok_or_else(|| format!("{} support unknown", feature))
    }

    async fn load_polyfill(&self, kind: PolyfillKind) -> Result<(), String> {
        let Some(url) = &self.polyfill_url else {
            return Err(format!("no {:?} polyfill configured", kind));
        };
        self.get(url).await.map(|_| ()).map_err(|failure| failure.message)
    }

    async fn wait_until_visible(&self, _margin_px: u32) {}
}
