//! Loading the manifest a resource node declares.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use crate::{
    context::{NODE_PROPERTY_DEFINITION, NodeContext, Properties},
    resources::{self, ResourceStore},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("node {node_id:?} has no definition mapping"))]
    MissingDefinition { node_id: String },

    #[snafu(display("invalid definition file reference: {source}"))]
    InvalidFileReference { source: serde_json::Error },

    #[snafu(display("unable to load definition file: {source}"))]
    LoadFile { source: resources::Error },

    #[snafu(display("definition file {path:?} is not valid YAML: {source}"))]
    ParseFile {
        path: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("definition file {path:?} does not contain a mapping"))]
    NotAMapping { path: String },

    #[snafu(display(
        "definition has no kind and none can be derived from node type {type_name:?}"
    ))]
    MissingKind { type_name: String },
}

/// `definition.file`: a manifest template kept with the blueprint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileReference {
    resource_path: String,
    #[serde(default)]
    target_path: Option<PathBuf>,
    #[serde(default)]
    template_variables: Properties,
}

/// A Kubernetes manifest, guaranteed to carry a non-empty `kind`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDefinition(Properties);

impl ResourceDefinition {
    /// Builds the definition from the node's `definition` property, loading
    /// it from `definition.file` when that is set. A missing `kind` defaults
    /// to the last segment of the node type.
    pub fn load(node: &NodeContext, store: &dyn ResourceStore) -> Result<Self, Error> {
        let mut inline = node
            .properties
            .get(NODE_PROPERTY_DEFINITION)
            .and_then(Value::as_object)
            .cloned()
            .context(MissingDefinitionSnafu {
                node_id: node.id.as_str(),
            })?;

        let file = inline.remove("file").filter(|file| match file {
            Value::Object(map) => !map.is_empty(),
            Value::Null => false,
            _ => true,
        });
        let mut definition = match file {
            Some(file) => load_file(file, store)?,
            None => inline,
        };

        if !definition.contains_key("kind") {
            let kind = node.type_suffix();
            ensure!(
                !kind.is_empty(),
                MissingKindSnafu {
                    type_name: node.type_name.as_str(),
                }
            );
            definition.insert("kind".into(), Value::from(kind));
        }

        let definition = Self(definition);
        ensure!(
            !definition.kind().is_empty(),
            MissingKindSnafu {
                type_name: node.type_name.as_str(),
            }
        );
        Ok(definition)
    }

    pub fn kind(&self) -> &str {
        self.0.get("kind").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn name(&self) -> Option<&str> {
        self.0
            .get("metadata")
            .and_then(|metadata| metadata.get("name"))
            .and_then(Value::as_str)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.0
            .get("metadata")
            .and_then(|metadata| metadata.get("namespace"))
            .and_then(Value::as_str)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn load_file(file: Value, store: &dyn ResourceStore) -> Result<Properties, Error> {
    let file: FileReference = serde_json::from_value(file).context(InvalidFileReferenceSnafu)?;

    let rendered = store
        .render(
            &file.resource_path,
            file.target_path.as_deref(),
            &file.template_variables,
        )
        .context(LoadFileSnafu)?;

    let parsed: Value = serde_yaml::from_str(&rendered).context(ParseFileSnafu {
        path: file.resource_path.as_str(),
    })?;
    match parsed {
        Value::Object(definition) => Ok(definition),
        _ => NotAMappingSnafu {
            path: file.resource_path,
        }
        .fail(),
    }
}
