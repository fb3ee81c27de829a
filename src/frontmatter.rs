//! YAML frontmatter splitting.
//!
//! A file whose first line is `---` and which contains a later `---` line
//! carries a YAML mapping between the two delimiters. Everything after the
//! closing delimiter is the markdown body.

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    pub data: Map<String, Value>,
    pub content: String,
}

pub fn split_frontmatter(raw: &str) -> Result<Frontmatter> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

    let Some((yaml, body)) = find_header(raw) else {
        return Ok(Frontmatter {
            data: Map::new(),
            content: raw.to_string(),
        });
    };

    if yaml.trim().is_empty() {
        return Ok(Frontmatter {
            data: Map::new(),
            content: body.to_string(),
        });
    }

    let parsed: serde_yaml::Value =
        serde_yaml::from_str(yaml).context("invalid YAML frontmatter")?;
    let data = match serde_json::to_value(parsed).context("frontmatter is not JSON-compatible")? {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => bail!("frontmatter must be a mapping, found {}", type_name(&other)),
    };

    Ok(Frontmatter {
        data,
        content: body.to_string(),
    })
}

/// Returns `(yaml, body)` when `raw` opens with a delimited header.
fn find_header(raw: &str) -> Option<(&str, &str)> {
    let first_end = raw.find('\n')?;
    if raw[..first_end].trim_end() != "---" {
        return None;
    }
    let rest = &raw[first_end + 1..];

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_header_returns_whole_input() {
        let fm = split_frontmatter("# Title\n\nbody").unwrap();
        assert!(fm.data.is_empty());
        assert_eq!(fm.content, "# Title\n\nbody");
    }

    #[test]
    fn parses_mapping_and_strips_header() {
        let fm = split_frontmatter("---\ntitle: Notes\ntags: [a, b]\n---\n# Heading\n").unwrap();
        assert_eq!(fm.data["title"], Value::String("Notes".into()));
        assert_eq!(fm.data["tags"].as_array().unwrap().len(), 2);
        assert_eq!(fm.content, "# Heading\n");
    }

    #[test]
    fn unterminated_header_is_body() {
        let fm = split_frontmatter("---\ntitle: x\nno closing line").unwrap();
        assert!(fm.data.is_empty());
        assert!(fm.content.starts_with("---"));
    }

    #[test]
    fn horizontal_rule_later_in_file_is_not_a_header() {
        let fm = split_frontmatter("intro\n---\nmore").unwrap();
        assert!(fm.data.is_empty());
        assert_eq!(fm.content, "intro\n---\nmore");
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(split_frontmatter("---\ntitle: [unclosed\n---\nbody").is_err());
    }

    #[test]
    fn scalar_header_is_an_error() {
        let err = split_frontmatter("---\njust a string\n---\nbody").unwrap_err();
        assert!(err.to_string().contains("mapping"));
    }

    #[test]
    fn empty_header_yields_empty_map() {
        let fm = split_frontmatter("---\n---\nbody").unwrap();
        assert!(fm.data.is_empty());
        assert_eq!(fm.content, "body");
    }
}
