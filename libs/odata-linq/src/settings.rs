//! Per-query settings and their figment loading.
//!
//! ```yaml
//! query:
//!   odata:
//!     handle_null_propagation: true
//!     time_zone: "+02:00"
//!     page_size: 50
//!     limits:
//!       max_top: 500
//!   projection:
//!     parameters:
//!       tenant: "acme"
//! ```

use chrono::{FixedOffset, Offset, Utc};
use figment::Figment;
use indexmap::IndexMap;
use odata_query::ODataLimits;
use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::filter::FilterContext;
use crate::provider::QueryProvider;

/// Figment section the settings are read from.
pub const SECTION: &str = "query";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub odata: ODataSettings,
    pub projection: ProjectionSettings,
    #[serde(skip)]
    pub async_settings: AsyncSettings,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ODataSettings {
    /// Guard filters against null members. Unset defers to the provider.
    pub handle_null_propagation: Option<bool>,
    /// Offset DateTime literals in filters are normalised to.
    #[serde(deserialize_with = "deserialize_offset")]
    pub time_zone: Option<FixedOffset>,
    /// Rows per response; enables next-page links.
    pub page_size: Option<u64>,
    pub limits: ODataLimits,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProjectionSettings {
    /// Named values for model members mapped from projection parameters.
    pub parameters: IndexMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default)]
pub struct AsyncSettings {
    pub cancellation_token: CancellationToken,
}

impl QuerySettings {
    /// Read the `query` section, falling back to defaults when it is absent.
    ///
    /// # Errors
    /// `Error::Config` when the section does not deserialize.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        if !figment.contains(SECTION) {
            return Ok(Self::default());
        }
        Ok(figment.extract_inner::<Self>(SECTION)?)
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.odata.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn with_null_propagation(mut self, enabled: bool) -> Self {
        self.odata.handle_null_propagation = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_time_zone(mut self, offset: FixedOffset) -> Self {
        self.odata.time_zone = Some(offset);
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ODataLimits) -> Self {
        self.odata.limits = limits;
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, name: &str, value: serde_json::Value) -> Self {
        self.projection.parameters.insert(name.to_owned(), value);
        self
    }

    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.async_settings.cancellation_token = token;
        self
    }

    /// Page size, ignoring a configured zero.
    #[must_use]
    pub fn page_size(&self) -> Option<u64> {
        self.odata.page_size.filter(|p| *p > 0)
    }

    /// Binding context for filters executed by `provider`.
    #[must_use]
    pub fn filter_context(&self, provider: &dyn QueryProvider) -> FilterContext {
        FilterContext {
            null_propagation: self
                .odata
                .handle_null_propagation
                .unwrap_or_else(|| provider.null_propagation_default()),
            time_zone: self.odata.time_zone,
        }
    }
}

fn deserialize_offset<'de, D>(deserializer: D) -> std::result::Result<Option<FixedOffset>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("utc") || raw == "Z" {
        return Ok(Some(Utc.fix()));
    }
    raw.parse::<FixedOffset>()
        .map(Some)
        .map_err(|e| serde::de::Error::custom(format!("invalid time zone offset '{raw}': {e}")))
}
