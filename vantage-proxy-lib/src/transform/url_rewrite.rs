//! Ordered regex URL rewrite rules (spec §4.G). New module built with the
//! `regex` crate the way `ferronweb-ferron` uses it for its own rewrite
//! rules — the teacher has no rewrite support at all.

use crate::config::UrlRewrite;

/// Applies the first enabled rule whose regex matches `path`, returning
/// the rewritten path. Rules are tried in declaration order; the first
/// match wins and later rules are not consulted, mirroring nginx's
/// first-match `rewrite` directive semantics.
pub fn rewrite_path(path: &str, rules: &[UrlRewrite]) -> String {
    for rule in rules {
        if !rule.enabled {
            continue;
        }
        if rule.regex.is_match(path) {
            return rule.regex.replace(path, rule.replacement.as_str()).into_owned();
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn rewrites_on_first_match() {
        let rules = vec![UrlRewrite {
            regex: Regex::new("^/old/(.*)$").unwrap(),
            replacement: "/new/$1".to_string(),
            enabled: true,
        }];
        assert_eq!(rewrite_path("/old/thing", &rules), "/new/thing");
    }

    #[test]
    fn passes_through_when_nothing_matches() {
        let rules = vec![UrlRewrite {
            regex: Regex::new("^/old/(.*)$").unwrap(),
            replacement: "/new/$1".to_string(),
            enabled: true,
        }];
        assert_eq!(rewrite_path("/other", &rules), "/other");
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let rules = vec![UrlRewrite {
            regex: Regex::new("^/old/(.*)$").unwrap(),
            replacement: "/new/$1".to_string(),
            enabled: false,
        }];
        assert_eq!(rewrite_path("/old/thing", &rules), "/old/thing");
    }
}
