//! HTTP plumbing shared by every Microsoft-facing component
//!
//! The correlation vector and the header-injecting client live here; all
//! REST and SOAP callers go through [`MsHttpClient`] so the `MS-CV`
//! ordering guarantee holds process-wide.

pub mod client;
pub mod cv;

pub use client::{expect_success, MsHttpClient, REST_TIMEOUT, SOAP_TIMEOUT, USER_AGENT};
pub use cv::CorrelationVector;
