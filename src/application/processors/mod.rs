//! Named resource processors and the registry that resolves them.
//!
//! A processor is an opaque text transformation. The orchestrator only cares
//! about three things: which alias it was configured under, which resource
//! type it applies to and whether it is a minimizer (skipped when a debug
//! request asks for `minimize=false`).

mod comments;
mod css;
mod js;
mod registry;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::resource::{Resource, ResourceType};

pub use comments::MultilineCommentStripper;
pub use css::CssMinProcessor;
pub use js::{JsMinProcessor, SemicolonAppender};
pub use registry::{ProcessorRegistry, UnknownProcessor};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("unterminated comment starting at byte {offset}")]
    UnterminatedComment { offset: usize },
    #[error("{0}")]
    Failed(String),
}

impl ProcessorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A single text transformation stage.
pub trait ResourceProcessor: Send + Sync {
    /// Transform `input`. `resource` is set when the stage runs on one member
    /// of a group and `None` when it runs on the merged group output.
    fn process(&self, input: &str, resource: Option<&Resource>) -> Result<String, ProcessorError>;

    /// Restrict the processor to one resource type. `None` means any.
    fn supported_type(&self) -> Option<ResourceType> {
        None
    }

    fn is_minimizer(&self) -> bool {
        false
    }
}

/// A processor resolved from the registry, remembered with its alias.
#[derive(Clone)]
pub struct ProcessorRef {
    alias: String,
    processor: Arc<dyn ResourceProcessor>,
}

impl ProcessorRef {
    pub(crate) fn new(alias: impl Into<String>, processor: Arc<dyn ResourceProcessor>) -> Self {
        Self {
            alias: alias.into(),
            processor,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Whether this stage runs for a group of `resource_type`.
    pub fn applies_to(&self, resource_type: ResourceType, minimize: bool) -> bool {
        let type_matches = self
            .processor
            .supported_type()
            .is_none_or(|supported| supported == resource_type);
        type_matches && (minimize || !self.processor.is_minimizer())
    }

    pub fn process(&self, input: &str, resource: Option<&Resource>) -> Result<String, ProcessorError> {
        self.processor.process(input, resource)
    }
}

impl fmt::Debug for ProcessorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRef")
            .field("alias", &self.alias)
            .field("supported_type", &self.processor.supported_type())
            .field("minimizer", &self.processor.is_minimizer())
            .finish()
    }
}

/// Remove every `/* ... */` block that sits outside a string literal opened by
/// one of `quotes`.
///
/// With `line_comments`, `//` up to the end of the line is kept verbatim and
/// never opens a string or a block comment.
pub(crate) fn strip_block_comments(
    input: &str,
    quotes: &[u8],
    line_comments: bool,
) -> Result<String, ProcessorError> {
    let bytes = input.as_bytes();
    let mut output = String::with_capacity(input.len());
    let mut quote: Option<u8> = None;
    let mut copied_up_to = 0;
    let mut index = 0;

    while index < bytes.len() {
        let byte = bytes[index];
        match quote {
            Some(_) if byte == b'\\' => {
                index += 2;
                continue;
            }
            Some(open) if byte == open => quote = None,
            Some(_) => {}
            None if quotes.contains(&byte) => quote = Some(byte),
            None if line_comments && byte == b'/' && bytes.get(index + 1) == Some(&b'/') => {
                index = input[index..]
                    .find('\n')
                    .map_or(bytes.len(), |offset| index + offset);
                continue;
            }
            None if byte == b'/' && bytes.get(index + 1) == Some(&b'*') => {
                let close = input[index + 2..]
                    .find("*/")
                    .ok_or(ProcessorError::UnterminatedComment { offset: index })?;
                output.push_str(&input[copied_up_to..index]);
                index += 2 + close + 2;
                copied_up_to = index;
                continue;
            }
            None => {}
        }
        index += 1;
    }

    output.push_str(&input[copied_up_to..]);
    Ok(output)
}
