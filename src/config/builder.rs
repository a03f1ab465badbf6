//! Builder pattern for session configuration.
//!
//! Provides a fluent API for configuring and validating [`SessionConfig`]
//! instances.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::retry::{DEFAULT_BASE_DELAY, DEFAULT_CAP_DELAY, DEFAULT_MAX_ATTEMPTS, RetryPolicy};

use super::{
    DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_EVENT_CAPACITY,
    DEFAULT_RATE_SAMPLE_INTERVAL, DEFAULT_RATE_WINDOW, SessionConfig,
};

// ============================================================================
// SessionConfigBuilder
// ============================================================================

/// Builder for a [`SessionConfig`].
///
/// Use [`SessionConfig::builder()`] to create a new builder.
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    /// Server base URL.
    base_url: String,
    /// Maximum automatic reconnect attempts.
    max_retries: u8,
    /// First backoff delay in milliseconds.
    retry_base_delay_ms: u32,
    /// Backoff cap in milliseconds.
    retry_cap_delay_ms: u32,
    /// Silence window for rates.
    rate_window: Duration,
    /// Rate sampling period.
    rate_sample_interval: Duration,
    /// Transport connect timeout.
    connect_timeout: Duration,
    /// Event channel capacity.
    event_capacity: usize,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u32,
            retry_cap_delay_ms: DEFAULT_CAP_DELAY.as_millis() as u32,
            rate_window: DEFAULT_RATE_WINDOW,
            rate_sample_interval: DEFAULT_RATE_SAMPLE_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

// ============================================================================
// SessionConfigBuilder Implementation
// ============================================================================

impl SessionConfigBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server base URL (e.g. `http://localhost:3000`).
    #[inline]
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the maximum number of automatic reconnect attempts.
    #[inline]
    #[must_use]
    pub fn max_retries(mut self, max_retries: u8) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first reconnect attempt.
    #[inline]
    #[must_use]
    pub fn retry_base_delay_ms(mut self, delay_ms: u32) -> Self {
        self.retry_base_delay_ms = delay_ms;
        self
    }

    /// Sets the upper bound on any reconnect delay.
    #[inline]
    #[must_use]
    pub fn retry_cap_delay_ms(mut self, delay_ms: u32) -> Self {
        self.retry_cap_delay_ms = delay_ms;
        self
    }

    /// Sets the silence window used for message rates.
    #[inline]
    #[must_use]
    pub fn rate_window(mut self, window: Duration) -> Self {
        self.rate_window = window;
        self
    }

    /// Sets how often the message rate is recomputed.
    #[inline]
    #[must_use]
    pub fn rate_sample_interval(mut self, interval: Duration) -> Self {
        self.rate_sample_interval = interval;
        self
    }

    /// Sets the transport connect timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the capacity of the session event channel.
    #[inline]
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the base URL is not an absolute http(s) or
    ///   ws(s) URL
    /// - [`Error::Config`] if a delay, window, interval or capacity is zero
    /// - [`Error::Config`] if the retry cap is below the base delay
    pub fn build(self) -> Result<SessionConfig> {
        let base_url = self.validate_base_url()?;
        let retry = self.validate_retry()?;
        self.validate_timing()?;

        Ok(SessionConfig {
            base_url,
            retry,
            rate_window: self.rate_window,
            rate_sample_interval: self.rate_sample_interval,
            connect_timeout: self.connect_timeout,
            event_capacity: self.event_capacity,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SessionConfigBuilder {
    /// Validates the base URL configuration.
    fn validate_base_url(&self) -> Result<Url> {
        if self.base_url.trim().is_empty() {
            return Err(Error::config(
                "Base URL is required. Use .base_url() to set it.\n\
                 Example: SessionConfig::builder().base_url(\"http://localhost:3000\")",
            ));
        }

        let url = Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("Invalid base URL '{}': {e}", self.base_url)))?;

        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(Error::config(format!(
                "Base URL must use http, https, ws or wss, got '{}'",
                url.scheme()
            )));
        }

        Ok(url)
    }

    /// Validates the backoff configuration.
    fn validate_retry(&self) -> Result<RetryPolicy> {
        if self.retry_base_delay_ms == 0 {
            return Err(Error::config("Retry base delay must be greater than zero"));
        }

        if self.retry_cap_delay_ms < self.retry_base_delay_ms {
            return Err(Error::config(format!(
                "Retry cap ({}ms) must not be below the base delay ({}ms)",
                self.retry_cap_delay_ms, self.retry_base_delay_ms
            )));
        }

        Ok(RetryPolicy::new(
            Duration::from_millis(u64::from(self.retry_base_delay_ms)),
            Duration::from_millis(u64::from(self.retry_cap_delay_ms)),
            self.max_retries,
        ))
    }

    /// Validates windows, intervals and capacities.
    fn validate_timing(&self) -> Result<()> {
        if self.rate_window.is_zero() {
            return Err(Error::config("Rate window must be greater than zero"));
        }
        if self.rate_sample_interval.is_zero() {
            return Err(Error::config("Rate sample interval must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("Connect timeout must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(Error::config("Event capacity must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfigBuilder::new().build().unwrap();

        assert_eq!(config.base_url().as_str(), "http://localhost:3000/");
        assert_eq!(config.max_retries(), 3);
        assert_eq!(config.retry_policy().base_delay(), Duration::from_secs(1));
        assert_eq!(config.retry_policy().cap_delay(), Duration::from_secs(10));
        assert_eq!(config.rate_window(), Duration::from_secs(5));
        assert_eq!(config.rate_sample_interval(), Duration::from_secs(1));
        assert_eq!(config.event_capacity(), 256);
    }

    #[test]
    fn test_build_fails_with_empty_url() {
        let err = SessionConfigBuilder::new().base_url("  ").build().unwrap_err();
        assert!(err.to_string().contains("Base URL is required"));
    }

    #[test]
    fn test_build_fails_with_relative_url() {
        let err = SessionConfigBuilder::new().base_url("/stream").build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_build_fails_with_unsupported_scheme() {
        let err = SessionConfigBuilder::new()
            .base_url("ftp://example.com")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("ftp"));
    }

    #[test]
    fn test_build_fails_with_zero_base_delay() {
        let result = SessionConfigBuilder::new().retry_base_delay_ms(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_fails_with_cap_below_base() {
        let result = SessionConfigBuilder::new()
            .retry_base_delay_ms(2000)
            .retry_cap_delay_ms(1000)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_fails_with_zero_window() {
        let result = SessionConfigBuilder::new()
            .rate_window(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_retries_is_allowed() {
        let config = SessionConfigBuilder::new().max_retries(0).build().unwrap();
        assert!(!config.retry_policy().should_retry(1));
    }

    #[test]
    fn test_builder_is_clone() {
        let builder = SessionConfigBuilder::new().base_url("http://example.com");
        let cloned = builder.clone();
        assert_eq!(builder.base_url, cloned.base_url);
    }
}
