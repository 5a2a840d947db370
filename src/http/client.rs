//! HTTP wrapper for Microsoft service endpoints
//!
//! Every outgoing request carries `User-Agent: StoreLib` and a fresh `MS-CV`
//! header taken from the process-wide correlation vector. The value is read
//! and the vector incremented under a single lock acquisition, so the CV
//! sequence the server observes is strictly monotonic across threads.

use crate::error::{Result, ToolkitError};
use crate::http::cv::CorrelationVector;
use parking_lot::Mutex;
use reqwest::blocking::{Client, Response};
use reqwest::Method;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// User-Agent sent on every Microsoft request
pub const USER_AGENT: &str = "StoreLib";

/// Default deadline for REST requests
pub const REST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for SOAP round trips
pub const SOAP_TIMEOUT: Duration = Duration::from_secs(60);

/// Blocking HTTP client shared by every Microsoft-facing component
pub struct MsHttpClient {
    client: Client,
    cv: Arc<Mutex<CorrelationVector>>,
}

impl MsHttpClient {
    /// Create a client bound to the given correlation vector
    pub fn new(cv: Arc<Mutex<CorrelationVector>>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(ToolkitError::from)?;
        Ok(Self { client, cv })
    }

    /// Read the current CV value and advance the sequence in one step
    fn next_cv(&self) -> String {
        let mut cv = self.cv.lock();
        let value = cv.value();
        cv.increment();
        value
    }

    /// Issue a request with the standard Microsoft headers
    ///
    /// `extra_headers` override the defaults for this call only. Non-2xx
    /// responses are returned to the caller, who decides whether the status
    /// is an error (the PackageManifests client maps 404 to "not found").
    pub fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<String>,
        content_type: Option<&str>,
        extra_headers: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let cv = self.next_cv();
        debug!(%url, %cv, "dispatching {method} request");

        let mut builder = self
            .client
            .request(method, url)
            .timeout(timeout.unwrap_or(REST_TIMEOUT))
            .header("MS-CV", cv);

        if let Some(content_type) = content_type {
            builder = builder.header("Content-Type", content_type);
        }
        for (name, value) in extra_headers {
            builder = builder.header(*name, *value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send()?;
        if !response.status().is_success() {
            warn!(
                status = response.status().as_u16(),
                url = response.url().as_str(),
                "request returned error status"
            );
        }
        Ok(response)
    }

    /// GET with `Accept: application/json`
    pub fn get_json(&self, url: &str) -> Result<Response> {
        self.request(
            Method::GET,
            url,
            None,
            None,
            &[("Accept", "application/json")],
            Some(REST_TIMEOUT),
        )
    }

    /// POST a SOAP 1.2 envelope
    pub fn post_soap(&self, url: &str, envelope: String) -> Result<Response> {
        self.request(
            Method::POST,
            url,
            Some(envelope),
            Some("application/soap+xml; charset=utf-8"),
            &[],
            Some(SOAP_TIMEOUT),
        )
    }

    /// Download a URL to a file, streaming the body
    ///
    /// No overall deadline; package and catalog downloads run to completion
    /// and callers retry from scratch on failure.
    pub fn download_to_file(&self, url: &str, target: &Path) -> Result<u64> {
        let cv = self.next_cv();
        debug!(%url, target = %target.display(), "downloading");

        let mut response = self.client.get(url).header("MS-CV", cv).send()?;
        if !response.status().is_success() {
            return Err(ToolkitError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let mut file = std::fs::File::create(target)?;
        let written = response.copy_to(&mut file).map_err(ToolkitError::from)?;
        file.flush()?;
        Ok(written)
    }
}

/// Map a non-2xx response to a structured HTTP status error
pub fn expect_success(response: Response) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ToolkitError::HttpStatus {
            status: response.status().as_u16(),
            url: response.url().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(value: &str) -> (String, i32) {
        let (base, counter) = value.rsplit_once('.').unwrap();
        (base.to_string(), counter.parse().unwrap())
    }

    #[test]
    fn test_header_values_strictly_monotonic() {
        let cv = Arc::new(Mutex::new(CorrelationVector::new()));
        let client = MsHttpClient::new(Arc::clone(&cv)).unwrap();

        let values: Vec<String> = (0..20).map(|_| client.next_cv()).collect();
        for window in values.windows(2) {
            let (base_a, counter_a) = split(&window[0]);
            let (base_b, counter_b) = split(&window[1]);
            assert_eq!(base_a, base_b);
            assert!(counter_b > counter_a);
        }
        // The client advanced the shared vector, not a copy.
        let (_, live_counter) = split(&cv.lock().value());
        assert_eq!(live_counter, 21);
    }
}
