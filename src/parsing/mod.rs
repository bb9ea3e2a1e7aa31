//! Parsers and parser-version identity.
//!
//! Every derived artifact carries the id of the parser build that produced
//! it. When the parser changes, old artifacts are treated as stale but are
//! not deleted; they may belong to a running session.

pub mod localization;
pub mod script;

pub use localization::{LocEntry, LocFile, parse_localization};
pub use script::{AstNode, Diagnostic, Operator, ParseOutcome, ValueType, parse_source};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Bump when parsing logic changes.
/// MAJOR: breaking AST shape changes. MINOR: compatible additions.
/// PATCH: bug fixes.
pub const PARSER_VERSION: &str = "1.0.0";

pub const PARSER_DESCRIPTION: &str = "script + localization parsers";

/// Hash of the embedded parser sources, for automatic change detection.
/// Computed once per process.
pub fn parser_source_hash() -> &'static str {
    static HASH: LazyLock<String> = LazyLock::new(|| {
        let mut hasher = Sha256::new();
        for (name, source) in [
            ("script/ast.rs", include_str!("script/ast.rs")),
            ("script/lexer.rs", include_str!("script/lexer.rs")),
            ("script/parser.rs", include_str!("script/parser.rs")),
            ("localization.rs", include_str!("localization.rs")),
        ] {
            hasher.update(name.as_bytes());
            hasher.update(source.as_bytes());
        }
        let digest = hasher.finalize();
        digest[..6].iter().map(|b| format!("{b:02x}")).collect()
    });
    &HASH
}

/// Commit id baked in by the release build, when available.
pub fn build_commit() -> Option<&'static str> {
    option_env!("MODRAVEN_BUILD_COMMIT")
}

/// A registered parser build. Lives in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserVersionRec {
    pub id: crate::types::ParserVersionId,
    pub version_string: String,
    pub source_hash: String,
    pub vcs_commit: Option<String>,
    pub description: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_hash_is_stable_within_a_build() {
        let a = parser_source_hash();
        let b = parser_source_hash();
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
    }
}
