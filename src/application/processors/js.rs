use crate::domain::resource::{Resource, ResourceType};

use super::{ProcessorError, ResourceProcessor, strip_block_comments};

/// Appends a `;` to scripts that do not end with one, so that concatenated
/// files cannot run into each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemicolonAppender;

impl SemicolonAppender {
    pub const ALIAS: &'static str = "semicolonAppender";
}

impl ResourceProcessor for SemicolonAppender {
    fn process(&self, input: &str, _resource: Option<&Resource>) -> Result<String, ProcessorError> {
        let trimmed = input.trim_end();
        if trimmed.is_empty() || trimmed.ends_with(';') {
            return Ok(input.to_string());
        }
        let mut output = String::with_capacity(input.len() + 1);
        output.push_str(input);
        output.push(';');
        Ok(output)
    }

    fn supported_type(&self) -> Option<ResourceType> {
        Some(ResourceType::Js)
    }
}

/// Conservative script minimizer.
///
/// Removes block comments and whole-line `//` comments, trims every line and
/// drops blank ones. Statements are never joined, so automatic semicolon
/// insertion behaves exactly as in the source.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsMinProcessor;

impl JsMinProcessor {
    pub const ALIAS: &'static str = "jsMin";
}

impl ResourceProcessor for JsMinProcessor {
    fn process(&self, input: &str, _resource: Option<&Resource>) -> Result<String, ProcessorError> {
        let without_comments = strip_block_comments(input, b"'\"`", true)?;
        let lines: Vec<&str> = without_comments
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("//"))
            .collect();
        Ok(lines.join("\n"))
    }

    fn supported_type(&self) -> Option<ResourceType> {
        Some(ResourceType::Js)
    }

    fn is_minimizer(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semicolon_is_appended_once() {
        assert_eq!(SemicolonAppender.process("var a = 1", None).unwrap(), "var a = 1;");
        assert_eq!(SemicolonAppender.process("var a = 1;\n", None).unwrap(), "var a = 1;\n");
        assert_eq!(SemicolonAppender.process("  \n", None).unwrap(), "  \n");
    }

    #[test]
    fn js_min_drops_comments_and_blank_lines() {
        let input = "/**\n * Banner\n */\n\n// setup\nvar a = 1;   \n\n    function f() {\n  return 'http://x'; // trailing stays\n}\n";
        assert_eq!(
            JsMinProcessor.process(input, None).unwrap(),
            "var a = 1;\nfunction f() {\nreturn 'http://x'; // trailing stays\n}"
        );
    }

    #[test]
    fn js_min_keeps_strings_after_apostrophes_in_line_comments() {
        let input = "// don't touch\nvar open = '/*';\n";
        assert_eq!(
            JsMinProcessor.process(input, None).unwrap(),
            "var open = '/*';"
        );
    }

    #[test]
    fn js_min_reports_unterminated_comment() {
        let err = JsMinProcessor.process("var a; /* oops", None).unwrap_err();
        assert_eq!(err, ProcessorError::UnterminatedComment { offset: 7 });
    }
}
