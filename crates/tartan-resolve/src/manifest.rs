//! Package manifests read while aggregating design libraries.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ResolveError;
use crate::fs::LayeredFs;

/// Lockfile located by walking up from the working directory.
pub const LOCKFILE: &str = "package-lock.json";

/// The only template manifest schema understood.
pub const TEMPLATE_SCHEMA_VERSION: &str = "1.0.0";

/// `package-lock.json`. Keys of `packages` are package directories relative
/// to the lockfile, in lockfile order.
#[derive(Debug, Default, Deserialize)]
pub struct PackageLock {
    #[serde(default)]
    pub packages: serde_json::Map<String, serde_json::Value>,
}

/// The parts of `package.json` the build cares about.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDefinition {
    #[serde(default)]
    pub name: Option<String>,

    /// Path to a custom elements manifest
    #[serde(default)]
    pub custom_elements: Option<String>,

    /// Path to a template manifest
    #[serde(default)]
    pub tartan_template_manifest: Option<String>,

    /// ES module entry point
    #[serde(default)]
    pub module: Option<String>,

    #[serde(default)]
    pub main: Option<String>,
}

/// A custom elements manifest (`custom-elements.json`).
#[derive(Debug, Default, Deserialize)]
pub struct CustomElementsManifest {
    #[serde(default)]
    pub modules: Vec<ManifestModule>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestModule {
    /// Module path, relative to the manifest
    pub path: String,

    #[serde(default)]
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
    pub kind: String,

    #[serde(default)]
    pub custom_element: Option<bool>,

    #[serde(default)]
    pub tag_name: Option<String>,
}

impl Declaration {
    /// Tag name of a custom element class declaration.
    pub fn custom_element_tag(&self) -> Option<&str> {
        if self.kind == "class" && self.custom_element.is_some() {
            self.tag_name.as_deref()
        } else {
            None
        }
    }
}

/// A template manifest (`tartanTemplateManifest` in `package.json`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateManifest {
    pub schema_version: String,

    #[serde(default)]
    pub templates: Vec<TemplateRegistration>,

    #[serde(default)]
    pub partials: Vec<TemplateRegistration>,
}

#[derive(Debug, Deserialize)]
pub struct TemplateRegistration {
    pub name: String,

    /// Template path, relative to the manifest
    pub path: String,

    #[serde(default)]
    pub description: Option<String>,
}

/// Read and parse a JSON file through the layered filesystem.
pub fn read_json<T: DeserializeOwned>(fs: &LayeredFs, path: &Path) -> Result<T, ResolveError> {
    let contents = fs
        .read(path)
        .map_err(|e| ResolveError::filesystem(path, e))?;
    serde_json::from_slice(&contents).map_err(|e| ResolveError::parse(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockfile_keeps_package_order() {
        let lock: PackageLock = serde_json::from_str(
            r#"{"packages": {"": {}, "node_modules/zeta": {}, "node_modules/alpha": {}}}"#,
        )
        .unwrap();
        let keys: Vec<&str> = lock.packages.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["", "node_modules/zeta", "node_modules/alpha"]);
    }

    #[test]
    fn only_custom_element_classes_have_tags() {
        let manifest: CustomElementsManifest = serde_json::from_str(
            r#"{
                "schemaVersion": "1.0.0",
                "modules": [{
                    "kind": "javascript-module",
                    "path": "dist/button.js",
                    "declarations": [
                        {"kind": "class", "name": "Button", "customElement": true, "tagName": "x-button"},
                        {"kind": "class", "name": "Helper"},
                        {"kind": "function", "name": "f", "tagName": "x-nope"}
                    ]
                }]
            }"#,
        )
        .unwrap();

        let tags: Vec<&str> = manifest.modules[0]
            .declarations
            .iter()
            .filter_map(Declaration::custom_element_tag)
            .collect();
        assert_eq!(tags, vec!["x-button"]);
    }
}
