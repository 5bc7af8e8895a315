use std::error::Error as StdError;
use std::io;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{processors::ProcessorError, runtime_config::ConfigError, sources::ResolveError},
    config::LoadError,
    infra::{error::InfraError, model::ModelError},
};

/// Diagnostic attached to error responses as a response extension.
///
/// The public body stays generic; the report carries the full message chain
/// for the response logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Per-request failure while producing an artifact.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("processor `{alias}` failed on `{target}`")]
    Processor {
        alias: String,
        target: String,
        #[source]
        source: ProcessorError,
    },
    #[error("failed to fingerprint sources of `{group}`")]
    Fingerprint {
        group: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessingError {
    pub fn processor(
        alias: impl Into<String>,
        target: impl Into<String>,
        source: ProcessorError,
    ) -> Self {
        Self::Processor {
            alias: alias.into(),
            target: target.into(),
            source,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProcessingError::Resolve(err) if err.is_not_found() => StatusCode::NOT_FOUND,
            ProcessingError::Resolve(_)
            | ProcessingError::Processor { .. }
            | ProcessingError::Fingerprint { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn presentation_message(&self) -> &'static str {
        if self.status_code() == StatusCode::NOT_FOUND {
            "Resource not found"
        } else {
            "Resource could not be processed"
        }
    }
}

impl IntoResponse for ProcessingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let report =
            ErrorReport::from_error("application::error::ProcessingError", status, &self);
        let mut response = (status, self.presentation_message()).into_response();
        report.attach(&mut response);
        response
    }
}

/// Top-level error of the `fascio` binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid filter configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to load settings: {0}")]
    Settings(#[from] LoadError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Infra(#[from] InfraError),
}
