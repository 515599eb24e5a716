//! Declaration aggregation
//!
//! Concatenates ordered header and source fragments into the two blobs a
//! binding is built from. Order is significant: later fragments may use
//! names declared by earlier ones.

use crate::dist::Fragment;
use crate::error::Result;
use tracing::debug;

/// The assembled declaration and source blobs of one distribution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeclarationSet {
    pub declarations: String,
    pub source: String,
}

/// Reads every fragment, headers into `declarations` and sources into
/// `source`, preserving order.
pub fn aggregate(headers: &[Fragment], sources: &[Fragment]) -> Result<DeclarationSet> {
    Ok(DeclarationSet {
        declarations: concatenate(headers)?,
        source: concatenate(sources)?,
    })
}

fn concatenate(fragments: &[Fragment]) -> Result<String> {
    let mut out = String::new();
    for fragment in fragments {
        debug!(fragment = %fragment.name(), "reading fragment");
        let text = fragment.read()?;
        out.push_str(&text);
        // A fragment without a trailing newline must not run into the next.
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_order_is_preserved() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("typedefs.h");
        fs::write(&first, "typedef int... SOCKET;\n").unwrap();

        let headers = vec![
            Fragment::path(&first),
            Fragment::inline("functions.h", "SOCKET socket_of(int fd);"),
        ];
        let sources = vec![Fragment::inline("main.c", "int add(int a, int b) { return a + b; }")];

        let set = aggregate(&headers, &sources).unwrap();
        assert_eq!(
            set.declarations,
            "typedef int... SOCKET;\nSOCKET socket_of(int fd);\n"
        );
        assert!(set.source.starts_with("int add"));
    }

    #[test]
    fn test_missing_fragment() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.h");
        let err = aggregate(&[Fragment::path(&missing)], &[]).unwrap_err();
        match err {
            Error::ResourceNotFound { path, .. } => assert_eq!(path, missing),
            other => panic!("expected ResourceNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_lists() {
        assert_eq!(aggregate(&[], &[]).unwrap(), DeclarationSet::default());
    }
}
