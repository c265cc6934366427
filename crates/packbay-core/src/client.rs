//! Upstream registry client.
//!
//! One pooled reqwest client per proxy instance. TLS 1.2 minimum with
//! mandatory certificate validation, explicit timeouts, and no retries:
//! retrying is a policy decision left to callers.

use crate::error::ProxyError;
use crate::Result;
use bytes::Bytes;
use futures::Stream;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Total timeout for packument fetches.
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle timeout while streaming a tarball body.
const TARBALL_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Nominal ceiling of pooled upstream sockets.
const MAX_IDLE_PER_HOST: usize = 50;

/// Client for the upstream package registry.
///
/// Clone freely; all clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
}

/// Percent-encode a scoped package name for use in a URL path segment or a
/// cache filename (`@scope/pkg` → `@scope%2Fpkg`).
#[must_use]
pub fn encode_name(name: &str) -> String {
    name.replace('/', "%2F")
}

impl RegistryClient {
    /// Create a client against `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| ProxyError::InvalidRegistryUrl {
                url: base_url.to_string(),
                reason: e.to_string(),
            })?;

        let http = Client::builder()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(TARBALL_READ_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .user_agent(concat!("packbay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { base_url, http })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Upstream URL for a tarball served under `{name}/-/{filename}`.
    #[must_use]
    pub fn tarball_url(&self, name: &str, filename: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{}/-/{filename}", encode_name(name))
    }

    /// Fetch the full packument for a package.
    pub async fn fetch_packument(&self, name: &str) -> Result<Value> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let url = format!("{base}/{}", encode_name(name));

        let response = self
            .http
            .get(&url)
            .timeout(METADATA_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProxyError::PackageNotFound {
                name: name.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ProxyError::UpstreamStatus {
                status: status.as_u16(),
                url,
            });
        }

        Ok(response.json().await?)
    }

    /// Open a tarball body as a byte stream. The HTTP status is checked
    /// before any bytes flow; the stream itself may still fail mid-flight.
    pub async fn open_tarball_stream(
        &self,
        url: &str,
    ) -> Result<impl Stream<Item = reqwest::Result<Bytes>>> {
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProxyError::UpstreamStatus {
                status: 404,
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ProxyError::UpstreamStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.bytes_stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        assert!(RegistryClient::new("https://registry.npmjs.org").is_ok());
        assert!(RegistryClient::new("not-a-url").is_err());
    }

    #[test]
    fn test_encode_scoped_name() {
        assert_eq!(encode_name("lodash"), "lodash");
        assert_eq!(encode_name("@types/node"), "@types%2Fnode");
    }

    #[test]
    fn test_tarball_url_shape() {
        let client = RegistryClient::new("https://registry.npmjs.org/").unwrap();
        assert_eq!(
            client.tarball_url("left-pad", "left-pad-1.3.0.tgz"),
            "https://registry.npmjs.org/left-pad/-/left-pad-1.3.0.tgz"
        );
        assert_eq!(
            client.tarball_url("@types/node", "node-20.0.0.tgz"),
            "https://registry.npmjs.org/@types%2Fnode/-/node-20.0.0.tgz"
        );
    }
}
