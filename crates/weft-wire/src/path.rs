//! Procedure-name ↔ wire-path mapping.
//!
//! The wire addresses a call with `/<service>/<method>`, using `/` as its
//! own separator, while logical procedure names may themselves contain
//! `/`. One canonical escape/unescape pair keeps the mapping exactly
//! invertible: `%` is escaped first (`%25`), then `/` (`%2F`). A procedure
//! without a method segment maps to the well-known [`DEFAULT_METHOD`].

use thiserror::Error;

/// Method segment used for procedures without an explicit method.
pub const DEFAULT_METHOD: &str = "__default__";

/// Error produced when a wire path cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("wire path {0:?} is not of the form /service/method")]
    Malformed(String),
    #[error("invalid escape sequence in wire segment {0:?}")]
    BadEscape(String),
}

/// Escape one path segment: `%` → `%25`, then `/` → `%2F`.
pub fn escape_segment(segment: &str) -> String {
    segment.replace('%', "%25").replace('/', "%2F")
}

/// Decode one path segment. The exact inverse of [`escape_segment`];
/// any other `%` sequence is an error.
pub fn unescape_segment(segment: &str) -> Result<String, PathError> {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let pair = [chars.next(), chars.next()];
        match pair {
            [Some('2'), Some('5')] => out.push('%'),
            [Some('2'), Some('F')] | [Some('2'), Some('f')] => out.push('/'),
            _ => return Err(PathError::BadEscape(segment.to_owned())),
        }
    }
    Ok(out)
}

/// Map a logical procedure name to its wire path.
///
/// The procedure is split at the first `/`: the left part becomes the
/// service segment, the rest the method segment. A procedure without `/`
/// gets [`DEFAULT_METHOD`] as its method segment.
pub fn procedure_to_path(procedure: &str) -> String {
    match procedure.split_once('/') {
        Some((service, method)) => {
            format!("/{}/{}", escape_segment(service), escape_segment(method))
        }
        None => format!("/{}/{}", escape_segment(procedure), DEFAULT_METHOD),
    }
}

/// Recover the logical procedure name from a wire path.
///
/// The inverse of [`procedure_to_path`]. The one ambiguity is a procedure
/// whose explicit method segment is literally [`DEFAULT_METHOD`]: it
/// decodes to the bare service form. Everything else round-trips exactly.
pub fn path_to_procedure(path: &str) -> Result<String, PathError> {
    let malformed = || PathError::Malformed(path.to_owned());
    let rest = path.strip_prefix('/').ok_or_else(malformed)?;
    let (service, method) = rest.split_once('/').ok_or_else(malformed)?;
    if method.contains('/') {
        return Err(malformed());
    }
    let service = unescape_segment(service)?;
    if method == DEFAULT_METHOD {
        return Ok(service);
    }
    let method = unescape_segment(method)?;
    Ok(format!("{service}/{method}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_procedure_uses_default_method() {
        assert_eq!(procedure_to_path("echo"), "/echo/__default__");
        assert_eq!(path_to_procedure("/echo/__default__").unwrap(), "echo");
    }

    #[test]
    fn procedure_with_method_splits_at_first_slash() {
        assert_eq!(procedure_to_path("KeyValue::get/read"), "/KeyValue::get/read");
        assert_eq!(procedure_to_path("a/b/c"), "/a/b%2Fc");
        assert_eq!(path_to_procedure("/a/b%2Fc").unwrap(), "a/b/c");
    }

    #[test]
    fn escaping_round_trips_exhaustively() {
        let alphabet = ['a', '/', '%', '2', 'F', '5'];
        // Every string of length <= 4 over an adversarial alphabet.
        let mut names: Vec<String> = vec![String::new()];
        for _ in 0..4 {
            let mut next = Vec::new();
            for name in &names {
                for c in alphabet {
                    let mut n = name.clone();
                    n.push(c);
                    next.push(n);
                }
            }
            names.extend(next);
        }
        for name in names {
            assert_eq!(
                unescape_segment(&escape_segment(&name)).unwrap(),
                name,
                "segment round-trip failed for {name:?}"
            );
            if !name.is_empty() {
                assert_eq!(
                    path_to_procedure(&procedure_to_path(&name)).unwrap(),
                    name,
                    "procedure round-trip failed for {name:?}"
                );
            }
        }
    }

    #[test]
    fn empty_segments_round_trip() {
        for name in ["/", "/x", "x/", "//"] {
            assert_eq!(path_to_procedure(&procedure_to_path(name)).unwrap(), name);
        }
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for path in ["", "/", "/onlyservice", "no-slash", "/a/b/c"] {
            assert!(path_to_procedure(path).is_err(), "accepted {path:?}");
        }
        assert!(matches!(
            path_to_procedure("/a/b%zz"),
            Err(PathError::BadEscape(_))
        ));
    }
}
