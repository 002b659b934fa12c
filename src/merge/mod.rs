//! Deep-merge engine
//!
//! Combines an ordered sequence of parsed documents into one mapping. Later
//! documents win: mappings merge recursively, everything else is replaced.
//! The merged `header.version` is the maximum over all contributing
//! documents and `header.includes` is dropped, since includes have already
//! been expanded into the sequence itself.
//!
//! The `overrides` node merges like any other key, but nothing reads it here.
//! It is interpreted afterwards, once the fixpoint is complete, by
//! [`crate::repospec::apply_overrides`].

pub mod yaml;

use serde_yaml::{Mapping, Value};

use crate::document::ConfigDocument;

/// Result of merging a document sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedBody {
    pub body: Mapping,
    pub version: i64,
}

/// Merge `docs` in order.
pub fn merge_documents<'a, I>(docs: I) -> MergedBody
where
    I: IntoIterator<Item = &'a ConfigDocument>,
{
    let mut body = Mapping::new();
    let mut version = 0;
    for doc in docs {
        version = version.max(doc.version);
        let src = doc.path.display().to_string();
        yaml::merge_mappings(&mut body, &doc.body, "", &src);
    }
    finalize_header(&mut body, version);
    MergedBody { body, version }
}

/// Set `header.version` and drop `header.includes`.
pub fn finalize_header(body: &mut Mapping, version: i64) {
    let header = body
        .entry(Value::String("header".to_string()))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !header.is_mapping() {
        *header = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(header) = header {
        header.remove("includes");
        header.insert(Value::String("version".to_string()), Value::from(version));
    }
}
