//! `.spectemplate` rendering.
//!
//! A template is a spec file containing `@NAME@` placeholders, where `NAME`
//! is an uppercase identifier (`A-Z`, `0-9`, `_`, not starting with a digit).
//! Placeholders are replaced with values from the build context; unknown
//! ones are left as they are so that literal `@` text (mail addresses in a
//! changelog, for instance) survives rendering.

use std::collections::BTreeMap;

/// Values available to placeholders.
pub type TemplateContext = BTreeMap<String, String>;

/// Output of [`render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// Placeholder names with no value in the context, in order of first
    /// appearance.
    pub unresolved: Vec<String>,
}

pub fn render(template: &str, context: &TemplateContext) -> Rendered {
    let mut text = String::with_capacity(template.len());
    let mut unresolved: Vec<String> = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find('@') {
        text.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        match placeholder_name(after) {
            Some(name) => {
                match context.get(name) {
                    Some(value) => text.push_str(value),
                    None => {
                        if !unresolved.iter().any(|n| n == name) {
                            unresolved.push(name.to_string());
                        }
                        text.push('@');
                        text.push_str(name);
                        text.push('@');
                    }
                }
                rest = &after[name.len() + 1..];
            }
            None => {
                text.push('@');
                rest = after;
            }
        }
    }
    text.push_str(rest);

    Rendered { text, unresolved }
}

/// The name of a placeholder starting right after an `@`, if the text
/// continues with a valid name and a closing `@`.
fn placeholder_name(s: &str) -> Option<&str> {
    let end = s.find('@')?;
    let name = &s[..end];
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_uppercase() || first == '_') {
        return None;
    }
    if chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_') {
        Some(name)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(pairs: &[(&str, &str)]) -> TemplateContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitutes_known_placeholders() {
        let rendered = render(
            "Version: @VERSION@\nas GNU Screen. @PWD@\n",
            &context(&[("VERSION", "1.6"), ("PWD", "/drb/src")]),
        );
        assert_eq!(rendered.text, "Version: 1.6\nas GNU Screen. /drb/src\n");
        assert!(rendered.unresolved.is_empty());
    }

    #[test]
    fn test_unknown_placeholders_are_kept_and_reported_once() {
        let rendered = render("@MISSING@ and @MISSING@ and @OTHER_1@", &context(&[]));
        assert_eq!(rendered.text, "@MISSING@ and @MISSING@ and @OTHER_1@");
        assert_eq!(rendered.unresolved, ["MISSING", "OTHER_1"]);
    }

    #[test]
    fn test_mail_addresses_are_not_placeholders() {
        let text = "* Fri Aug 09 2013 Steven Roberts <strobert@strobe.net> - 1.6-3\n";
        let rendered = render(text, &context(&[("STROBE", "x")]));
        assert_eq!(rendered.text, text);
        assert!(rendered.unresolved.is_empty());
    }

    #[test]
    fn test_adjacent_and_dangling_at_signs() {
        let rendered = render("@@A@@ trailing @", &context(&[("A", "v")]));
        assert_eq!(rendered.text, "@v@ trailing @");
    }

    #[test]
    fn test_value_is_not_rescanned() {
        let rendered = render("@A@", &context(&[("A", "@B@"), ("B", "no")]));
        assert_eq!(rendered.text, "@B@");
    }
}
