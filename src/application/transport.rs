//! Transport-neutral request and response values.
//!
//! The orchestrator never touches axum extractors directly; the HTTP adapter
//! converts into [`ResourceRequest`] and back out of [`ResourceResponse`].

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::application::error::ErrorReport;

/// The parts of an inbound request the orchestrator consumes.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    uri: Uri,
    headers: HeaderMap,
}

impl ResourceRequest {
    pub fn new(uri: Uri, headers: HeaderMap) -> Self {
        Self { uri, headers }
    }

    /// Build a header-less request from a uri string.
    pub fn from_uri(uri: &str) -> Result<Self, axum::http::uri::InvalidUri> {
        Ok(Self::new(uri.parse()?, HeaderMap::new()))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a query parameter, undecoded.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.uri.query()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then_some(value)
        })
    }
}

/// A fully buffered response produced by the orchestrator or a failure hook.
#[derive(Debug, Clone)]
pub struct ResourceResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    report: Option<ErrorReport>,
}

impl ResourceResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            report: None,
        }
    }

    /// Attach a diagnostic that travels with the converted axum response.
    pub fn with_report(mut self, report: ErrorReport) -> Self {
        self.report = Some(report);
        self
    }

    pub fn report(&self) -> Option<&ErrorReport> {
        self.report.as_ref()
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

impl IntoResponse for ResourceResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        if let Some(report) = self.report {
            report.attach(&mut response);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_are_looked_up_by_name() {
        let request = ResourceRequest::from_uri("/wro/all.js?debug&minimize=false&x=1").unwrap();
        assert_eq!(request.query_param("minimize"), Some("false"));
        assert_eq!(request.query_param("debug"), Some(""));
        assert_eq!(request.query_param("missing"), None);
        assert_eq!(request.path(), "/wro/all.js");
    }

    #[test]
    fn request_without_query_has_no_params() {
        let request = ResourceRequest::from_uri("/wro/all.js").unwrap();
        assert_eq!(request.query_param("minimize"), None);
    }

    #[test]
    fn response_converts_into_axum_response() {
        let response = ResourceResponse::new(StatusCode::CREATED, "body").with_header(
            axum::http::header::ETAG,
            HeaderValue::from_static("\"abc\""),
        );
        assert_eq!(response.header_str(&axum::http::header::ETAG), Some("\"abc\""));

        let response = response.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["etag"], "\"abc\"");
    }
}
