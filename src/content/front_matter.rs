//! Front matter extraction and decoding.
//!
//! A content file may open with a delimiter line of `+++` (TOML metadata)
//! or `---` (YAML metadata); the same delimiter closes the block and
//! everything after it is the document body. A file without a leading
//! delimiter is all body with default metadata.

use crate::error::BuildError;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

/// TOML front matter delimiter
const TOML_DELIM: &str = "+++";
/// YAML front matter delimiter
const YAML_DELIM: &str = "---";

/// Decoded front matter fields. All fields are optional; defaults are
/// filled in by the page model.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FrontMatter {
    pub title: String,
    pub date: String,
    pub draft: bool,
    pub description: String,
    pub author: String,
    pub weight: i64,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub layout: String,
    pub publish_date: String,
    pub expiry_date: String,
    pub params: Map<String, Value>,
}

/// Raw split of a content file: decoded metadata plus untouched body.
#[derive(Debug)]
pub struct RawDocument {
    pub front_matter: FrontMatter,
    pub body: String,
}

/// Split a source file's text into front matter and body, decoding the
/// metadata block with the decoder selected by the opening delimiter.
pub fn split(path: &Path, input: &str) -> Result<RawDocument, BuildError> {
    let malformed = |message: String| BuildError::MalformedFrontMatter {
        path: path.to_path_buf(),
        message,
    };

    let Some((delim, rest)) = leading_delimiter(input) else {
        // No metadata block: the whole file is body.
        return Ok(RawDocument {
            front_matter: FrontMatter::default(),
            body: input.to_string(),
        });
    };

    let Some((block, body)) = split_at_closing(rest, delim) else {
        return Err(malformed(format!("unterminated `{delim}` block")));
    };

    let front_matter = match delim {
        TOML_DELIM => toml::from_str(block).map_err(|e| malformed(e.to_string()))?,
        YAML_DELIM => decode_yaml(block).map_err(|e| malformed(e.to_string()))?,
        _ => unreachable!("only known delimiters are recognized"),
    };

    Ok(RawDocument {
        front_matter,
        body: body.to_string(),
    })
}

/// Returns the recognized delimiter opening the input, plus the text
/// after its line, if any.
fn leading_delimiter(input: &str) -> Option<(&'static str, &str)> {
    let (first_line, rest) = input.split_once('\n')?;
    match first_line.trim_end_matches('\r') {
        TOML_DELIM => Some((TOML_DELIM, rest)),
        YAML_DELIM => Some((YAML_DELIM, rest)),
        _ => None,
    }
}

/// Split the remainder at the closing delimiter line.
fn split_at_closing<'a>(rest: &'a str, delim: &str) -> Option<(&'a str, &'a str)> {
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == delim {
            let block = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((block, body));
        }
        offset += line.len();
    }
    // Delimiter on the very last line without a trailing newline
    if rest[offset..].trim_end() == delim {
        return Some((&rest[..offset], ""));
    }
    None
}

/// YAML front matter decoded into the same shape as TOML. An empty block
/// (`---\n---`) decodes to `null`, which serde_yaml rejects for a struct,
/// so it is special-cased to the default.
fn decode_yaml(block: &str) -> Result<FrontMatter, serde_yaml::Error> {
    if block.trim().is_empty() {
        return Ok(FrontMatter::default());
    }
    serde_yaml::from_str(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn path() -> PathBuf {
        PathBuf::from("content/test.md")
    }

    // ------------------------------------------------------------------------
    // Delimiter handling
    // ------------------------------------------------------------------------

    #[test]
    fn test_toml_front_matter() {
        let input = "+++\ntitle = \"Hello\"\ndraft = true\n+++\n# Body\n";
        let doc = split(&path(), input).unwrap();
        assert_eq!(doc.front_matter.title, "Hello");
        assert!(doc.front_matter.draft);
        assert_eq!(doc.body, "# Body\n");
    }

    #[test]
    fn test_yaml_front_matter() {
        let input = "---\ntitle: Hello\ntags:\n  - rust\n---\nbody text\n";
        let doc = split(&path(), input).unwrap();
        assert_eq!(doc.front_matter.title, "Hello");
        assert_eq!(doc.front_matter.tags, vec!["rust"]);
        assert_eq!(doc.body, "body text\n");
    }

    #[test]
    fn test_no_front_matter_is_all_body() {
        let input = "# Just a heading\n\nsome text\n";
        let doc = split(&path(), input).unwrap();
        assert_eq!(doc.front_matter.title, "");
        assert_eq!(doc.body, input);
    }

    #[test]
    fn test_unterminated_block_is_error() {
        let input = "+++\ntitle = \"Hello\"\n";
        let err = split(&path(), input).unwrap_err();
        assert!(matches!(err, BuildError::MalformedFrontMatter { .. }));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let input = "+++\ntitle = = nope\n+++\nbody\n";
        let err = split(&path(), input).unwrap_err();
        assert!(matches!(err, BuildError::MalformedFrontMatter { .. }));
    }

    #[test]
    fn test_mismatched_closing_delimiter_is_error() {
        // A `---` line does not close a `+++` block
        let input = "+++\ntitle = \"x\"\n---\nbody\n";
        assert!(split(&path(), input).is_err());
    }

    #[test]
    fn test_empty_yaml_block() {
        let input = "---\n---\nbody\n";
        let doc = split(&path(), input).unwrap();
        assert_eq!(doc.front_matter.title, "");
        assert_eq!(doc.body, "body\n");
    }

    #[test]
    fn test_crlf_delimiters() {
        let input = "+++\r\ntitle = \"Win\"\r\n+++\r\nbody\r\n";
        let doc = split(&path(), input).unwrap();
        assert_eq!(doc.front_matter.title, "Win");
    }

    #[test]
    fn test_closing_delimiter_at_eof_without_newline() {
        let input = "+++\ntitle = \"x\"\n+++";
        let doc = split(&path(), input).unwrap();
        assert_eq!(doc.front_matter.title, "x");
        assert_eq!(doc.body, "");
    }

    // ------------------------------------------------------------------------
    // Params map
    // ------------------------------------------------------------------------

    #[test]
    fn test_params_map_decodes_mixed_values() {
        let input = "+++\n[params]\nlayout = \"special\"\ncount = 3\nnested = { a = true }\n+++\nbody\n";
        let doc = split(&path(), input).unwrap();
        let params = &doc.front_matter.params;
        assert_eq!(params["layout"], Value::String("special".into()));
        assert_eq!(params["count"], Value::from(3));
        assert!(params["nested"].is_object());
    }
}
