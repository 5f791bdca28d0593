//! Schema ("typetree") description driving the object decoder.
//!
//! The schema file is a JSON document with one entry per record kind:
//!
//! ```json
//! {
//!     "GameInformation": {
//!         "name": "Base", "type": "GameInformation", "children": [
//!             { "name": "previewTime", "type": "float" },
//!             { "name": "levels", "type": "vector", "array": true,
//!               "children": [{ "name": "data", "type": "string" }] }
//!         ]
//!     }
//! }
//! ```
//!
//! Nodes compile into a tagged [`Schema`], giving exhaustive matching over
//! the possible shapes instead of re-inspecting flags during every decode.

use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result, bail, ensure};
use indexmap::IndexMap;
use serde_derive::Deserialize;

/// Raw JSON form of one schema node.
#[derive(Debug, Deserialize)]
pub struct SchemaNode {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub array: bool,
    #[serde(default)]
    pub children: Vec<SchemaNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    I8,
    U8,
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
}

impl ScalarKind {
    fn parse(ty: &str) -> Option<ScalarKind> {
        Some(match ty {
            "SInt8" | "char" => ScalarKind::I8,
            "UInt8" => ScalarKind::U8,
            "bool" => ScalarKind::Bool,
            "SInt16" | "short" => ScalarKind::I16,
            "UInt16" | "unsigned short" => ScalarKind::U16,
            "SInt32" | "int" => ScalarKind::I32,
            "UInt32" | "unsigned int" | "Type*" => ScalarKind::U32,
            "SInt64" | "long long" => ScalarKind::I64,
            "UInt64" | "unsigned long long" | "FileSize" => ScalarKind::U64,
            "float" => ScalarKind::F32,
            "double" => ScalarKind::F64,
            "string" => ScalarKind::String,
            _ => return None,
        })
    }

    /// Scalars narrower than the 4-byte serialization granularity; the
    /// serializer pads after them when they occur as record fields.
    pub fn is_narrow(self) -> bool {
        matches!(
            self,
            ScalarKind::I8
                | ScalarKind::U8
                | ScalarKind::Bool
                | ScalarKind::I16
                | ScalarKind::U16
        )
    }
}

#[derive(Debug)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
}

#[derive(Debug)]
pub enum Schema {
    Scalar(ScalarKind),
    /// 32-bit element count followed by that many elements.
    Array(Box<Schema>),
    /// 32-bit pair count followed by string-keyed pairs; decodes into an
    /// order-preserving object.
    Map(Box<Schema>),
    Record(Vec<Field>),
}

impl Schema {
    /// Loads the entry named `kind` from a schema file.
    pub fn from_file_entry(path: impl AsRef<Path>, kind: &str) -> Result<Schema> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("could not open schema file '{}'", path.display()))?;
        let doc: IndexMap<String, SchemaNode> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("schema file '{}' is malformed", path.display()))?;
        let node = doc
            .get(kind)
            .with_context(|| format!("schema file '{}' has no entry for '{kind}'", path.display()))?;
        Schema::compile(node)
    }

    pub fn compile(node: &SchemaNode) -> Result<Schema> {
        if node.array {
            ensure!(
                node.children.len() == 1,
                "array node '{}' must have exactly one element child",
                node.name
            );
            let element = Schema::compile(&node.children[0])?;
            return Ok(Schema::Array(Box::new(element)));
        }
        if node.ty == "map" {
            ensure!(
                node.children.len() == 2,
                "map node '{}' must have a key child and a value child",
                node.name
            );
            match Schema::compile(&node.children[0])? {
                Schema::Scalar(ScalarKind::String) => {}
                _ => bail!("map node '{}' must have string keys", node.name),
            }
            let value = Schema::compile(&node.children[1])?;
            return Ok(Schema::Map(Box::new(value)));
        }
        if !node.children.is_empty() {
            let fields = node
                .children
                .iter()
                .map(|child| {
                    Ok(Field {
                        name: child.name.clone(),
                        schema: Schema::compile(child)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Schema::Record(fields));
        }
        match ScalarKind::parse(&node.ty) {
            Some(kind) => Ok(Schema::Scalar(kind)),
            None => bail!("unknown scalar type '{}' for node '{}'", node.ty, node.name),
        }
    }
}
