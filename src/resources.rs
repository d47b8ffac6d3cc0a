//! Access to files shipped alongside the blueprint.
//!
//! The orchestrator normally serves these over its own download service; the
//! plugin reads them from a local directory instead and renders `{{ name }}`
//! placeholders with the caller's template variables.

use std::{
    fs,
    path::{Component, Path, PathBuf},
    sync::LazyLock,
};

use regex::{Captures, Regex};
use serde_json::Value;
use snafu::{ResultExt, Snafu, ensure};

use crate::context::Properties;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("resource path {path:?} must be relative and stay inside the resources directory"))]
    OutsideRoot { path: String },

    #[snafu(display("unable to read resource {}: {source}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("unable to write rendered resource to {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("unable to render resource {path:?}: {}", errors.join("; ")))]
    Render { path: String, errors: Vec<String> },
}

/// A source of blueprint resources.
pub trait ResourceStore: Send + Sync {
    /// Returns the content of the resource at `resource_path`.
    fn read(&self, resource_path: &str) -> Result<String, Error>;

    /// Reads and renders a resource, optionally keeping the rendered copy at
    /// `target_path`.
    fn render(
        &self,
        resource_path: &str,
        target_path: Option<&Path>,
        template_variables: &Properties,
    ) -> Result<String, Error> {
        let content = self.read(resource_path)?;
        let rendered = render_template(&content, template_variables).map_err(|errors| {
            Error::Render {
                path: resource_path.to_owned(),
                errors,
            }
        })?;

        if let Some(target_path) = target_path {
            if let Some(parent) = target_path.parent() {
                fs::create_dir_all(parent).context(WriteSnafu { path: target_path })?;
            }
            fs::write(target_path, &rendered).context(WriteSnafu { path: target_path })?;
        }

        Ok(rendered)
    }
}

/// Resources laid out under a single directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalResourceStore {
    root: PathBuf,
}

impl LocalResourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, resource_path: &str) -> Result<PathBuf, Error> {
        let relative = Path::new(resource_path);
        ensure!(
            relative
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir)),
            OutsideRootSnafu {
                path: resource_path
            }
        );
        Ok(self.root.join(relative))
    }
}

impl ResourceStore for LocalResourceStore {
    fn read(&self, resource_path: &str) -> Result<String, Error> {
        let path = self.resolve(resource_path)?;
        fs::read_to_string(&path).context(ReadSnafu { path })
    }
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([[:word:]]+(?:\.[[:word:]]+)*)\s*\}\}")
        .expect("placeholder regex is valid")
});

/// Replaces `{{ name }}` and `{{ nested.name }}` placeholders with values from
/// `variables`. Strings are inserted verbatim, other values as JSON.
///
/// Every unknown name is reported, not only the first one.
pub fn render_template(input: &str, variables: &Properties) -> Result<String, Vec<String>> {
    let mut errors = Vec::new();

    let rendered = PLACEHOLDER
        .replace_all(input, |caps: &Captures<'_>| {
            let name = &caps[1];
            let mut segments = name.split('.');
            let first = segments.next().and_then(|segment| variables.get(segment));
            let value = segments.fold(first, |value, segment| value.and_then(|v| v.get(segment)));

            match value {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => {
                    errors.push(format!("Unknown template variable. name = {name:?}"));
                    String::new()
                }
            }
        })
        .into_owned();

    if errors.is_empty() {
        Ok(rendered)
    } else {
        Err(errors)
    }
}
