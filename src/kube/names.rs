//! Validation of caller-supplied names that end up in REST paths, and path-segment
//! encoding for the values that pass.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything except RFC 3986 unreserved characters is escaped.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Which Kubernetes naming rule a value must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRule {
    /// RFC 1123 label: namespaces, versions, plural resource names.
    Label,
    /// RFC 1123 subdomain: most object names and API groups.
    Subdomain,
    /// Any name the API server accepts as a path segment (RBAC names such as
    /// `system:controller` fall here).
    PathSegment,
}

impl NameRule {
    /// Returns a description of the violation, if any.
    pub fn check(self, value: &str) -> Result<(), String> {
        match self {
            NameRule::Label => check_label(value, 63),
            NameRule::Subdomain => {
                if value.len() > 253 {
                    return Err("must be no more than 253 characters".into());
                }
                if value.is_empty() {
                    return Err("must not be empty".into());
                }
                value.split('.').try_for_each(|label| check_label(label, 63))
            }
            NameRule::PathSegment => {
                if value.is_empty() {
                    return Err("must not be empty".into());
                }
                if value == "." || value == ".." {
                    return Err(format!("may not be '{}'", value));
                }
                if let Some(c) = value.chars().find(|c| matches!(c, '/' | '%') || c.is_control()) {
                    return Err(format!("may not contain {:?}", c));
                }
                Ok(())
            }
        }
    }
}

fn check_label(value: &str, max: usize) -> Result<(), String> {
    if value.is_empty() {
        return Err("must not be empty".into());
    }
    if value.len() > max {
        return Err(format!("must be no more than {} characters", max));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("must consist of lower case alphanumeric characters or '-'".into());
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err("must start and end with an alphanumeric character".into());
    }
    Ok(())
}

/// Percent-encode one path segment.
pub fn segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_rfc_1123() {
        assert!(NameRule::Label.check("shop-prod").is_ok());
        assert!(NameRule::Label.check("v1beta1").is_ok());
        assert!(NameRule::Label.check("").is_err());
        assert!(NameRule::Label.check("-web").is_err());
        assert!(NameRule::Label.check("Web").is_err());
        assert!(NameRule::Label.check("a.b").is_err());
        assert!(NameRule::Label.check(&"a".repeat(64)).is_err());
    }

    #[test]
    fn subdomains_allow_dotted_labels_only() {
        assert!(NameRule::Subdomain.check("velero.io").is_ok());
        assert!(NameRule::Subdomain.check("web-7d9f.abc").is_ok());
        assert!(NameRule::Subdomain.check("..").is_err());
        assert!(NameRule::Subdomain.check("a..b").is_err());
        assert!(NameRule::Subdomain.check("x/../../secrets/admin").is_err());
    }

    #[test]
    fn path_segments_reject_traversal() {
        assert!(NameRule::PathSegment.check("system:controller:job").is_ok());
        assert!(NameRule::PathSegment.check("..").is_err());
        assert!(NameRule::PathSegment.check(".").is_err());
        assert!(NameRule::PathSegment.check("x/../secrets").is_err());
        assert!(NameRule::PathSegment.check("a%2Fb").is_err());
    }

    #[test]
    fn segments_escape_reserved_characters() {
        assert_eq!(segment("web-1.abc"), "web-1.abc");
        assert_eq!(segment("system:admin"), "system%3Aadmin");
        assert_eq!(segment("a/b c"), "a%2Fb%20c");
    }
}
