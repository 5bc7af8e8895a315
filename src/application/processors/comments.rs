use crate::domain::resource::{Resource, ResourceType};

use super::{ProcessorError, ResourceProcessor, strip_block_comments};

/// Removes `/* ... */` comments from scripts and stylesheets alike.
///
/// `//` line comments are honoured unless the resource is a stylesheet, where
/// `//` has no meaning (`url(http://...)`). The merged group output carries no
/// resource and is scanned as script.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultilineCommentStripper;

impl MultilineCommentStripper {
    pub const ALIAS: &'static str = "multilineCommentStripper";
}

impl ResourceProcessor for MultilineCommentStripper {
    fn process(&self, input: &str, resource: Option<&Resource>) -> Result<String, ProcessorError> {
        let line_comments =
            resource.is_none_or(|resource| resource.resource_type == ResourceType::Js);
        strip_block_comments(input, b"'\"`", line_comments)
    }
}
