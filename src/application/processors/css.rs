use crate::domain::resource::{Resource, ResourceType};

use super::{ProcessorError, ResourceProcessor, strip_block_comments};

/// Characters around which whitespace carries no meaning.
const TIGHT_BEFORE: &[char] = &['{', '}', ';', ',', '>'];
const TIGHT_AFTER: &[char] = &['{', '}', ';', ',', '>', ':'];

/// Stylesheet minimizer: drops comments, collapses whitespace and removes the
/// trailing `;` of every declaration block.
///
/// Space before `:` is preserved so that `a :hover` keeps its descendant
/// meaning.
#[derive(Debug, Clone, Copy, Default)]
pub struct CssMinProcessor;

impl CssMinProcessor {
    pub const ALIAS: &'static str = "cssMin";
}

impl ResourceProcessor for CssMinProcessor {
    fn process(&self, input: &str, _resource: Option<&Resource>) -> Result<String, ProcessorError> {
        let without_comments = strip_block_comments(input, b"'\"", false)?;
        Ok(collapse(&without_comments))
    }

    fn supported_type(&self) -> Option<ResourceType> {
        Some(ResourceType::Css)
    }

    fn is_minimizer(&self) -> bool {
        true
    }
}

fn collapse(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars();
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    while let Some(ch) = chars.next() {
        if let Some(open) = quote {
            output.push(ch);
            if ch == '\\' {
                if let Some(escaped) = chars.next() {
                    output.push(escaped);
                }
            } else if ch == open {
                quote = None;
            }
            continue;
        }

        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }

        if pending_space {
            pending_space = false;
            let tight_prev = output.chars().last().is_none_or(|prev| TIGHT_AFTER.contains(&prev));
            if !tight_prev && !TIGHT_BEFORE.contains(&ch) {
                output.push(' ');
            }
        }

        if ch == '}' && output.ends_with(';') {
            output.pop();
        }
        if ch == '"' || ch == '\'' {
            quote = Some(ch);
        }
        output.push(ch);
    }

    output
}
