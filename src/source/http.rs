//! Tiles fetched over HTTP from a URL template.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, trace};
use url::Url;

use crate::error::FetchError;
use crate::geometry::{ImageSpec, Size, TileIndex};
use crate::tile::TileBitmap;

use super::TileDataSource;

/// Default per-request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("tiled-map/", env!("CARGO_PKG_VERSION"));

/// A tile URL with `{level}`, `{x}` and `{y}` placeholders.
///
/// `{x}` is the tile column and `{y}` the tile row.
///
/// ```ignore
/// let template = UrlTemplate::parse("https://tiles.example.com/{level}/{x}_{y}.jpg")?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    template: String,
}

impl UrlTemplate {
    /// Check that `template` names every placeholder and forms a valid URL.
    pub fn parse(template: impl Into<String>) -> Result<Self, FetchError> {
        let template = template.into();
        for placeholder in ["{level}", "{x}", "{y}"] {
            if !template.contains(placeholder) {
                return Err(FetchError::Source(format!(
                    "URL template `{template}` is missing {placeholder}"
                )));
            }
        }
        let parsed = Self { template };
        parsed.url(TileIndex::new(0, 0, 0))?;
        Ok(parsed)
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Fill in the placeholders for `index`.
    pub fn url(&self, index: TileIndex) -> Result<Url, FetchError> {
        let filled = self
            .template
            .replace("{level}", &index.level.to_string())
            .replace("{x}", &index.column.to_string())
            .replace("{y}", &index.row.to_string());
        Url::parse(&filled).map_err(|e| FetchError::Http {
            url: filled.clone(),
            message: e.to_string(),
        })
    }
}

/// Fetches tiles with a shared HTTP client.
#[derive(Debug, Clone)]
pub struct HttpTileSource {
    client: Client,
    template: UrlTemplate,
    spec: ImageSpec,
}

impl HttpTileSource {
    /// Create a source with the default request timeout.
    pub fn new(template: UrlTemplate, spec: ImageSpec) -> Result<Self, FetchError> {
        Self::with_timeout(template, spec, DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(
        template: UrlTemplate,
        spec: ImageSpec,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Source(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, template, spec))
    }

    /// Create a source that shares an existing client.
    pub fn with_client(client: Client, template: UrlTemplate, spec: ImageSpec) -> Self {
        Self {
            client,
            template,
            spec,
        }
    }

    pub fn template(&self) -> &UrlTemplate {
        &self.template
    }
}

#[async_trait]
impl TileDataSource for HttpTileSource {
    async fn fetch_tile(&self, index: TileIndex) -> Result<TileBitmap, FetchError> {
        if !self.spec.contains_tile(index) {
            return Err(FetchError::NotFound(index));
        }

        let url = self.template.url(index)?;
        trace!(%index, %url, "Requesting tile");

        let http_error = |message: String| FetchError::Http {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| http_error(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(index));
        }
        if !status.is_success() {
            debug!(%index, %url, %status, "Tile request rejected");
            return Err(http_error(format!("HTTP {status}")));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| http_error(e.to_string()))?;
        Ok(TileBitmap::new(index, data))
    }

    fn tile_size(&self) -> Size {
        self.spec.tile_size()
    }

    fn image_size(&self) -> Size {
        self.spec.image_size()
    }

    fn min_level(&self) -> u32 {
        self.spec.min_level()
    }

    fn max_level(&self) -> u32 {
        self.spec.max_level()
    }

    fn tile_url(&self, index: TileIndex) -> Option<Url> {
        self.template.url(index).ok()
    }
}
