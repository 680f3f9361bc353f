use crate::config::{Properties, TextTransform};
use serde_json::Value;

/// Replace `{name}` tokens with feature property values; missing properties become empty
pub fn resolve_tokens(properties: &Properties, text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let key = &rest[start + 1..start + 1 + len];
        match properties.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(Value::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &rest[start + len + 2..];
    }
    out.push_str(rest);
    out
}

pub fn transform_text(text: &str, transform: TextTransform) -> String {
    match transform {
        TextTransform::Uppercase => text.to_uppercase(),
        TextTransform::Lowercase => text.to_lowercase(),
        TextTransform::None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_tokens() {
        let mut props = Properties::new();
        props.insert("name".to_string(), json!("Elm"));
        props.insert("ref".to_string(), json!(66));
        assert_eq!(resolve_tokens(&props, "{name} St"), "Elm St");
        assert_eq!(resolve_tokens(&props, "US {ref}"), "US 66");
        assert_eq!(resolve_tokens(&props, "{missing}x"), "x");
        // Unterminated token is left as is
        assert_eq!(resolve_tokens(&props, "a {name"), "a {name");
    }

    #[test]
    fn test_transform_text() {
        assert_eq!(transform_text("Elm St", TextTransform::Uppercase), "ELM ST");
        assert_eq!(transform_text("Elm St", TextTransform::Lowercase), "elm st");
    }
}
