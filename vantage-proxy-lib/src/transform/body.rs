//! Literal/regex body substitution with bounded buffering (spec §4.G).
//! Bodies are fully buffered to apply substitution, so every caller must
//! enforce [`crate::config::Limits::max_request_body`] /
//! `max_response_body` before calling `replace_body` — this module only
//! guards its own rewrite, not the original framing.

use crate::config::BodyReplace;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error)]
#[error("payload of {size} bytes exceeds the {limit} byte limit")]
pub struct PayloadTooLarge {
    pub size: u64,
    pub limit: u64,
}

pub fn check_body_size(len: u64, limit: u64) -> Result<(), PayloadTooLarge> {
    if len > limit {
        Err(PayloadTooLarge { size: len, limit })
    } else {
        Ok(())
    }
}

/// Applies a [`BodyReplace`] rule to `body` if it's enabled and (when
/// `content_types` is set) the response/request `Content-Type` matches one
/// of the listed prefixes. Returns the original bytes unchanged for a
/// content type that isn't valid UTF-8, since literal/regex substitution
/// on raw binary would corrupt the payload.
pub fn replace_body(body: Bytes, rule: &BodyReplace, content_type: Option<&str>) -> Bytes {
    if !rule.enabled {
        return body;
    }
    if let Some(allowed) = &rule.content_types {
        let matches = content_type.is_some_and(|ct| allowed.iter().any(|a| ct.starts_with(a.as_str())));
        if !matches {
            return body;
        }
    }

    let Ok(text) = std::str::from_utf8(&body) else {
        return body;
    };

    let replaced = if rule.use_regex {
        match &rule.regex {
            Some(re) => re.replace_all(text, rule.replace.as_str()).into_owned(),
            None => text.to_string(),
        }
    } else {
        text.replace(rule.find.as_str(), rule.replace.as_str())
    };

    Bytes::from(replaced)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_replace() {
        let rule = BodyReplace {
            find: "foo".into(),
            replace: "bar".into(),
            use_regex: false,
            regex: None,
            enabled: true,
            content_types: None,
        };
        let out = replace_body(Bytes::from_static(b"foo baz foo"), &rule, None);
        assert_eq!(&out[..], b"bar baz bar");
    }

    #[test]
    fn regex_replace() {
        let rule = BodyReplace {
            find: r"\d+".into(),
            replace: "N".into(),
            use_regex: true,
            regex: Some(regex::Regex::new(r"\d+").unwrap()),
            enabled: true,
            content_types: None,
        };
        let out = replace_body(Bytes::from_static(b"id=123 and 456"), &rule, None);
        assert_eq!(&out[..], b"id=N and N");
    }

    #[test]
    fn content_type_filter_skips_non_matching() {
        let rule = BodyReplace {
            find: "foo".into(),
            replace: "bar".into(),
            use_regex: false,
            regex: None,
            enabled: true,
            content_types: Some(vec!["text/html".to_string()]),
        };
        let out = replace_body(Bytes::from_static(b"foo"), &rule, Some("application/json"));
        assert_eq!(&out[..], b"foo");
    }

    #[test]
    fn disabled_rule_is_noop() {
        let rule = BodyReplace {
            find: "foo".into(),
            replace: "bar".into(),
            use_regex: false,
            regex: None,
            enabled: false,
            content_types: None,
        };
        let out = replace_body(Bytes::from_static(b"foo"), &rule, None);
        assert_eq!(&out[..], b"foo");
    }

    #[test]
    fn rejects_oversized_payload() {
        assert!(check_body_size(100, 50).is_err());
        assert!(check_body_size(50, 50).is_ok());
    }
}
