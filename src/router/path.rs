use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
}

/// A route path such as `/users/:userId/posts`.
///
/// Empty segments are ignored, so `/users/` and `/users` are the same
/// path. Values are matched verbatim; no percent-decoding happens here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    case_sensitive: bool,
}

impl PathPattern {
    pub(crate) fn parse(path: &str, case_sensitive: bool) -> Self {
        let segments = split(path)
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Static(s.to_string()),
            })
            .collect();

        Self {
            raw: normalize(path),
            segments,
            case_sensitive,
        }
    }

    /// Matches the whole of `path`.
    pub(crate) fn match_exact(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        self.capture(&parts)
    }

    /// Matches a leading portion of `path` (mounted middleware).
    pub(crate) fn match_prefix(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split(path).collect();
        if parts.len() < self.segments.len() {
            return None;
        }
        self.capture(&parts[..self.segments.len()])
    }

    fn capture(&self, parts: &[&str]) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Param(name) => {
                    params.insert(name.clone(), (*part).to_string());
                }
                Segment::Static(s) if self.case_sensitive => {
                    if s != part {
                        return None;
                    }
                }
                Segment::Static(s) => {
                    if !s.eq_ignore_ascii_case(part) {
                        return None;
                    }
                }
            }
        }
        Some(params)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn normalize(path: &str) -> String {
    let joined: Vec<&str> = split(path).collect();
    format!("/{}", joined.join("/"))
}

/// Joins a mount point and a relative path: `/users` + `/:id` = `/users/:id`.
pub(crate) fn join(base: &str, path: &str) -> String {
    normalize(&format!("{}/{}", base, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn join_normalizes_slashes() {
        assert_eq!(join("/users", "/:id"), "/users/:id");
        assert_eq!(join("", "/users"), "/users");
        assert_eq!(join("/", "/"), "/");
        assert_eq!(join("/a/", "b/"), "/a/b");
    }

    #[test]
    fn exact_match_captures_params() {
        let p = PathPattern::parse("/users/:userId/posts/:postId", false);
        let params = p.match_exact("/users/1/posts/abc").unwrap();
        assert_eq!(params["userId"], "1");
        assert_eq!(params["postId"], "abc");
        assert!(p.match_exact("/users/1/posts").is_none());
    }

    #[test]
    fn root_matches_root_only() {
        let p = PathPattern::parse("/", false);
        assert!(p.match_exact("/").is_some());
        assert!(p.match_exact("/x").is_none());
        assert!(p.match_prefix("/x").is_some());
    }

    #[test]
    fn prefix_match() {
        let p = PathPattern::parse("/users/:userId", false);
        assert_eq!(p.match_prefix("/users/9/posts").unwrap()["userId"], "9");
        assert!(p.match_prefix("/users").is_none());
    }

    #[test]
    fn case_sensitivity() {
        assert!(PathPattern::parse("/Users", false).match_exact("/users").is_some());
        assert!(PathPattern::parse("/Users", true).match_exact("/users").is_none());
    }

    proptest! {
        /// A concrete path always matches the pattern it was generated from.
        #[test]
        fn generated_paths_match(
            segments in prop::collection::vec(("[a-z]{1,6}", any::<bool>()), 0..5),
            value in "[a-zA-Z0-9_-]{1,8}",
        ) {
            let pattern: String = segments
                .iter()
                .map(|(s, is_param)| if *is_param { format!("/:{}", s) } else { format!("/{}", s) })
                .collect();
            let concrete: String = segments
                .iter()
                .map(|(s, is_param)| if *is_param { format!("/{}", value) } else { format!("/{}", s) })
                .collect();

            let p = PathPattern::parse(&pattern, true);
            prop_assert!(p.match_exact(&concrete).is_some());
            let longer = format!("{}/extra", concrete);
            prop_assert!(p.match_prefix(&longer).is_some());
        }
    }
}
