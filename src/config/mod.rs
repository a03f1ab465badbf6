//! Session configuration.
//!
//! Use [`SessionConfig::builder()`] to create a validated configuration.
//!
//! # Example
//!
//! ```
//! use dual_stream_session::SessionConfig;
//!
//! # fn example() -> dual_stream_session::Result<()> {
//! let config = SessionConfig::builder()
//!     .base_url("http://localhost:3000")
//!     .max_retries(3)
//!     .retry_base_delay_ms(1000)
//!     .build()?;
//!
//! assert_eq!(config.stream_url()?.as_str(), "http://localhost:3000/stream");
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Builder for [`SessionConfig`].
pub mod builder;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

pub use builder::SessionConfigBuilder;

// ============================================================================
// Constants
// ============================================================================

/// Default server base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Window used for rate calculation.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(5);

/// How often the message rate is sampled.
pub const DEFAULT_RATE_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Connection establishment timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the session event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Engine.IO protocol revision spoken by the duplex link.
const ENGINE_IO_VERSION: &str = "4";

// ============================================================================
// SessionConfig
// ============================================================================

/// Validated session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub(crate) base_url: Url,
    pub(crate) retry: RetryPolicy,
    pub(crate) rate_window: Duration,
    pub(crate) rate_sample_interval: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) event_capacity: usize,
}

impl SessionConfig {
    /// Creates a new builder with default settings.
    #[inline]
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Server base URL.
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Maximum automatic reconnect attempts.
    #[inline]
    #[must_use]
    pub fn max_retries(&self) -> u8 {
        self.retry.max_attempts()
    }

    /// Backoff policy for duplex reconnection.
    #[inline]
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Silence window for rate calculation.
    #[inline]
    #[must_use]
    pub fn rate_window(&self) -> Duration {
        self.rate_window
    }

    /// Period of the rate sampler.
    #[inline]
    #[must_use]
    pub fn rate_sample_interval(&self) -> Duration {
        self.rate_sample_interval
    }

    /// Timeout for establishing either transport.
    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Capacity of the session event channel.
    #[inline]
    #[must_use]
    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    /// Pull endpoint: `{base}/stream`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the path cannot be joined.
    pub fn stream_url(&self) -> Result<Url> {
        Ok(directory(&self.base_url).join("stream")?)
    }

    /// Duplex endpoint: `ws(s)://{host}/socket.io/?EIO=4&transport=websocket`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the base URL scheme has no WebSocket
    /// counterpart.
    pub fn socket_url(&self) -> Result<Url> {
        let mut url = directory(&self.base_url).join("socket.io/")?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::config(format!(
                    "Unsupported URL scheme for duplex transport: {other}"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::config(format!("Cannot switch URL scheme to {scheme}")))?;

        url.query_pairs_mut()
            .clear()
            .append_pair("EIO", ENGINE_IO_VERSION)
            .append_pair("transport", "websocket");

        Ok(url)
    }
}

/// Base URL with a trailing slash so that relative joins append.
fn directory(base: &Url) -> Url {
    let mut url = base.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    url
}

// ============================================================================
// Tests
// ============================================================================
