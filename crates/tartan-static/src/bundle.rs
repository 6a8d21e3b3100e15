//! Component script bundling.
//!
//! [`IifeBundler`] follows static `import`/`export` statements from an entry
//! program and emits a single self-invoking script with a small module table.
//! Modules are parsed with `oxc_parser`; only the spans of module statements
//! are rewritten, everything else is copied through unchanged.
//! Import cycles are tolerated: a module that is still evaluating exposes
//! whatever it has exported so far.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    BindingPattern, BindingPatternKind, Declaration, ExportDefaultDeclarationKind,
    ImportDeclarationSpecifier, ModuleExportName, Statement,
};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};
use regex::Regex;
use tartan_resolve::manifest::{read_json, PackageDefinition};
use tartan_resolve::paths::normalize;
use tartan_resolve::LayeredFs;

use crate::error::BuildError;

/// Turns an entry program into one browser-ready script.
pub trait Bundler: Send + Sync {
    /// Bundle `entry`, resolving its imports relative to `resolve_dir`.
    fn bundle(&self, fs: &LayeredFs, entry: &str, resolve_dir: &Path) -> Result<String, BuildError>;
}

/// An entry program importing each module for its side effects.
pub fn entry_program<S: AsRef<str>>(modules: &[S]) -> String {
    modules.iter().fold(String::new(), |mut out, module| {
        let _ = writeln!(out, "import {};", js_string(module.as_ref()));
        out
    })
}

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][\w$]*$").expect("Invalid identifier regex"));

/// Local binding holding an anonymous default export.
const DEFAULT_LOCAL: &str = "__default";

const RUNTIME_PRELUDE: &str = r#"(() => {
  const __modules = {};
  const __cache = {};
  const __export = (target, name, get) =>
    Object.defineProperty(target, name, { enumerable: true, configurable: true, get });
  const __exportAll = (target, source) => {
    for (const key of Object.keys(source)) {
      if (key !== "default" && !(key in target)) __export(target, key, () => source[key]);
    }
  };
  const __require = (id) => {
    if (id in __cache) return __cache[id];
    const __exports = (__cache[id] = {});
    __modules[id](__exports);
    return __exports;
  };
"#;

/// ES module bundler producing an IIFE.
#[derive(Debug, Default, Clone, Copy)]
pub struct IifeBundler;

impl IifeBundler {
    pub fn new() -> Self {
        Self
    }
}

impl Bundler for IifeBundler {
    fn bundle(&self, fs: &LayeredFs, entry: &str, resolve_dir: &Path) -> Result<String, BuildError> {
        let mut graph = ModuleGraph::new(fs);
        let mut bodies = vec![graph.transform(entry, resolve_dir, "<entry>")?];

        while let Some(id) = graph.pending.pop_front() {
            let path = graph.paths[id - 1].clone();
            let source = fs
                .read_to_string(&path)
                .map_err(|e| BuildError::filesystem(&path, e))?;
            let body = graph.module_body(&path, &source)?;
            if bodies.len() <= id {
                bodies.resize(id + 1, String::new());
            }
            bodies[id] = body;
        }

        let mut out = String::from(RUNTIME_PRELUDE);
        for (id, body) in bodies.iter().enumerate() {
            let label = match id {
                0 => "<entry>".to_string(),
                _ => graph.paths[id - 1].display().to_string(),
            };
            let _ = write!(
                out,
                "  // {}\n  __modules[{}] = function (__exports) {{\n\"use strict\";\n{}\n  }};\n",
                label, id, body
            );
        }
        out.push_str("  __require(0);\n})();\n");

        tracing::debug!("Bundled {} modules", bodies.len());
        Ok(out)
    }
}

struct ModuleGraph<'a> {
    fs: &'a LayeredFs,
    /// Module paths; a module's id is its index plus one, 0 is the entry
    paths: Vec<PathBuf>,
    ids: HashMap<PathBuf, usize>,
    pending: VecDeque<usize>,
}

impl<'a> ModuleGraph<'a> {
    fn new(fs: &'a LayeredFs) -> Self {
        Self {
            fs,
            paths: Vec::new(),
            ids: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    fn module_body(&mut self, path: &Path, source: &str) -> Result<String, BuildError> {
        let dir = path.parent().unwrap_or(Path::new("/"));
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(format!("__exports.default = {};", source.trim())),
            Some("css") => Ok(format!("__exports.default = {};", js_string(source))),
            _ => self.transform(source, dir, &path.display().to_string()),
        }
    }

    fn module_id(&mut self, from_dir: &Path, specifier: &str) -> Result<usize, BuildError> {
        let path = self.resolve(from_dir, specifier)?;
        if let Some(&id) = self.ids.get(&path) {
            return Ok(id);
        }
        self.paths.push(path.clone());
        let id = self.paths.len();
        self.ids.insert(path, id);
        self.pending.push_back(id);
        Ok(id)
    }

    /// Rewrite module syntax into calls against the runtime.
    fn transform(&mut self, source: &str, dir: &Path, label: &str) -> Result<String, BuildError> {
        let allocator = Allocator::default();
        let parsed =
            Parser::new(&allocator, source, SourceType::default().with_module(true)).parse();
        if let Some(error) = parsed.errors.first() {
            return Err(BuildError::Bundle(format!("Failed to parse {}: {}", label, error)));
        }

        let mut edits = Edits::default();
        let mut exports: Vec<(String, String)> = Vec::new();
        let mut temp = 0usize;

        for statement in &parsed.program.body {
            match statement {
                Statement::ImportDeclaration(decl) => {
                    let id = self.module_id(dir, &decl.source.value)?;
                    let replacement = match &decl.specifiers {
                        Some(specifiers) => {
                            temp += 1;
                            import_bindings(&ImportClause::new(specifiers), id, temp)
                        }
                        None => format!("__require({});", id),
                    };
                    edits.replace(decl.span, replacement);
                }
                Statement::ExportNamedDeclaration(decl) => {
                    if let Some(declaration) = &decl.declaration {
                        let mut names = Vec::new();
                        declared_names(declaration, &mut names);
                        exports.extend(names.into_iter().map(|name| (name.clone(), name)));
                        edits.replace(
                            Span::new(decl.span.start, declaration.span().start),
                            String::new(),
                        );
                    } else if let Some(from) = &decl.source {
                        let id = self.module_id(dir, &from.value)?;
                        let target = format!("__require({})", id);
                        for specifier in &decl.specifiers {
                            exports.push((
                                export_name(&specifier.exported),
                                member(&target, &export_name(&specifier.local)),
                            ));
                        }
                        edits.replace(decl.span, format!("{};", target));
                    } else {
                        for specifier in &decl.specifiers {
                            exports.push((
                                export_name(&specifier.exported),
                                export_name(&specifier.local),
                            ));
                        }
                        edits.replace(decl.span, String::new());
                    }
                }
                Statement::ExportDefaultDeclaration(decl) => {
                    let value = decl.declaration.span();
                    let name = match &decl.declaration {
                        ExportDefaultDeclarationKind::FunctionDeclaration(function) => {
                            function.id.as_ref()
                        }
                        ExportDefaultDeclarationKind::ClassDeclaration(class) => {
                            class.id.as_ref()
                        }
                        _ => None,
                    };
                    let prefix = Span::new(decl.span.start, value.start);
                    match name {
                        Some(name) => {
                            exports.push(("default".to_string(), name.name.to_string()));
                            edits.replace(prefix, String::new());
                        }
                        None => {
                            exports.push(("default".to_string(), DEFAULT_LOCAL.to_string()));
                            edits.replace(prefix, format!("const {} = ", DEFAULT_LOCAL));
                            edits.replace(Span::new(value.end, value.end), ";".to_string());
                        }
                    }
                }
                Statement::ExportAllDeclaration(decl) => {
                    let id = self.module_id(dir, &decl.source.value)?;
                    let target = format!("__require({})", id);
                    match &decl.exported {
                        Some(name) => {
                            exports.push((export_name(name), target.clone()));
                            edits.replace(decl.span, format!("{};", target));
                        }
                        None => {
                            edits.replace(decl.span, format!("__exportAll(__exports, {});", target));
                        }
                    }
                }
                _ => {}
            }
        }

        let mut body = String::new();
        for (exported, local) in &exports {
            let _ = writeln!(
                body,
                "__export(__exports, {}, () => {});",
                js_string(exported),
                local
            );
        }
        body.push_str(&edits.apply(source));
        Ok(body)
    }

    fn resolve(&self, from_dir: &Path, specifier: &str) -> Result<PathBuf, BuildError> {
        let found = if specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier.starts_with('/')
        {
            self.resolve_file(&normalize(&from_dir.join(specifier)))
        } else {
            self.resolve_package(from_dir, specifier)
        };
        found.ok_or_else(|| {
            BuildError::Bundle(format!(
                "Could not resolve \"{}\" from {}",
                specifier,
                from_dir.display()
            ))
        })
    }

    fn resolve_file(&self, path: &Path) -> Option<PathBuf> {
        if self.fs.is_file(path) {
            return Some(path.to_path_buf());
        }
        for ext in ["js", "mjs"] {
            let candidate = PathBuf::from(format!("{}.{}", path.display(), ext));
            if self.fs.is_file(&candidate) {
                return Some(candidate);
            }
        }
        if self.fs.is_dir(path) {
            for index in ["index.js", "index.mjs"] {
                let candidate = path.join(index);
                if self.fs.is_file(&candidate) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Look the package up in `node_modules` of every ancestor directory.
    fn resolve_package(&self, from_dir: &Path, specifier: &str) -> Option<PathBuf> {
        let segments: Vec<&str> = specifier.split('/').collect();
        let name_len = if specifier.starts_with('@') { 2 } else { 1 };
        if segments.len() < name_len {
            return None;
        }
        let name = segments[..name_len].join("/");
        let subpath = segments[name_len..].join("/");

        for dir in from_dir.ancestors() {
            let package_dir = dir.join("node_modules").join(&name);
            if !self.fs.is_dir(&package_dir) {
                continue;
            }
            if !subpath.is_empty() {
                return self.resolve_file(&normalize(&package_dir.join(&subpath)));
            }
            let entry = read_json::<PackageDefinition>(self.fs, &package_dir.join("package.json"))
                .ok()
                .and_then(|package| package.module.or(package.main))
                .unwrap_or_else(|| "index.js".to_string());
            return self.resolve_file(&normalize(&package_dir.join(entry)));
        }
        None
    }
}

/// Replacements of source spans, applied in source order.
#[derive(Debug, Default)]
struct Edits(Vec<(usize, usize, String)>);

impl Edits {
    fn replace(&mut self, span: Span, text: String) {
        self.0.push((span.start as usize, span.end as usize, text));
    }

    fn apply(mut self, source: &str) -> String {
        self.0.sort_by_key(|(start, end, _)| (*start, *end));
        let mut out = String::with_capacity(source.len());
        let mut last = 0;
        for (start, end, text) in &self.0 {
            out.push_str(&source[last..*start]);
            out.push_str(text);
            last = *end;
        }
        out.push_str(&source[last..]);
        out
    }
}

/// Bindings introduced by one import declaration.
#[derive(Debug, Default, PartialEq)]
struct ImportClause {
    default: Option<String>,
    namespace: Option<String>,
    /// (imported, local) pairs
    named: Vec<(String, String)>,
}

impl ImportClause {
    fn new(specifiers: &[ImportDeclarationSpecifier<'_>]) -> Self {
        let mut clause = Self::default();
        for specifier in specifiers {
            match specifier {
                ImportDeclarationSpecifier::ImportDefaultSpecifier(default) => {
                    clause.default = Some(default.local.name.to_string());
                }
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(namespace) => {
                    clause.namespace = Some(namespace.local.name.to_string());
                }
                ImportDeclarationSpecifier::ImportSpecifier(named) => {
                    clause
                        .named
                        .push((export_name(&named.imported), named.local.name.to_string()));
                }
            }
        }
        clause
    }

    fn parts(&self) -> usize {
        usize::from(self.default.is_some())
            + usize::from(self.namespace.is_some())
            + usize::from(!self.named.is_empty())
    }
}

fn import_bindings(clause: &ImportClause, id: usize, temp: usize) -> String {
    let target = format!("__require({})", id);
    match clause.parts() {
        0 => format!("{};", target),
        1 => clause_bindings(clause, &target).join(" "),
        _ => {
            let shared = format!("__import{}", temp);
            let mut out = vec![format!("const {} = {};", shared, target)];
            out.extend(clause_bindings(clause, &shared));
            out.join(" ")
        }
    }
}

fn clause_bindings(clause: &ImportClause, target: &str) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(default) = &clause.default {
        out.push(format!("const {} = {}.default;", default, target));
    }
    if let Some(namespace) = &clause.namespace {
        out.push(format!("const {} = {};", namespace, target));
    }
    if !clause.named.is_empty() {
        let bindings: Vec<String> = clause
            .named
            .iter()
            .map(|(imported, local)| {
                if imported == local {
                    local.clone()
                } else if IDENTIFIER_RE.is_match(imported) {
                    format!("{}: {}", imported, local)
                } else {
                    format!("{}: {}", js_string(imported), local)
                }
            })
            .collect();
        out.push(format!("const {{ {} }} = {};", bindings.join(", "), target));
    }
    out
}

/// Names bound by an exported declaration.
fn declared_names(declaration: &Declaration<'_>, out: &mut Vec<String>) {
    match declaration {
        Declaration::VariableDeclaration(variables) => {
            for declarator in &variables.declarations {
                bound_names(&declarator.id, out);
            }
        }
        Declaration::FunctionDeclaration(function) => {
            out.extend(function.id.as_ref().map(|id| id.name.to_string()));
        }
        Declaration::ClassDeclaration(class) => {
            out.extend(class.id.as_ref().map(|id| id.name.to_string()));
        }
        _ => {}
    }
}

fn bound_names(pattern: &BindingPattern<'_>, out: &mut Vec<String>) {
    match &pattern.kind {
        BindingPatternKind::BindingIdentifier(id) => out.push(id.name.to_string()),
        BindingPatternKind::ObjectPattern(object) => {
            for property in &object.properties {
                bound_names(&property.value, out);
            }
            if let Some(rest) = &object.rest {
                bound_names(&rest.argument, out);
            }
        }
        BindingPatternKind::ArrayPattern(array) => {
            for element in array.elements.iter().flatten() {
                bound_names(element, out);
            }
            if let Some(rest) = &array.rest {
                bound_names(&rest.argument, out);
            }
        }
        BindingPatternKind::AssignmentPattern(assignment) => bound_names(&assignment.left, out),
    }
}

fn export_name(name: &ModuleExportName<'_>) -> String {
    match name {
        ModuleExportName::IdentifierName(id) => id.name.to_string(),
        ModuleExportName::IdentifierReference(id) => id.name.to_string(),
        ModuleExportName::StringLiteral(literal) => literal.value.to_string(),
    }
}

/// Property access on `target`, bracketed when `name` is not an identifier.
fn member(target: &str, name: &str) -> String {
    if IDENTIFIER_RE.is_match(name) {
        format!("{}.{}", target, name)
    } else {
        format!("{}[{}]", target, js_string(name))
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn builds_entry_program() {
        let program = entry_program(&["/lib/a.js", "/lib/b.js"]);
        assert_eq!(program, "import \"/lib/a.js\";\nimport \"/lib/b.js\";\n");
    }

    fn clause(default: Option<&str>, namespace: Option<&str>, named: &[(&str, &str)]) -> ImportClause {
        ImportClause {
            default: default.map(String::from),
            namespace: namespace.map(String::from),
            named: named
                .iter()
                .map(|(imported, local)| (imported.to_string(), local.to_string()))
                .collect(),
        }
    }

    /// Transform `source` as a module in a directory holding `files`.
    fn transform(files: &[(&str, &str)], source: &str) -> String {
        let temp = tempdir().unwrap();
        for (name, contents) in files {
            fs::write(temp.path().join(name), contents).unwrap();
        }
        let fs = LayeredFs::new();
        let mut graph = ModuleGraph::new(&fs);
        graph.transform(source, temp.path(), "test.js").unwrap()
    }

    #[test]
    fn rewrites_imports() {
        assert_eq!(
            import_bindings(&clause(Some("x"), None, &[]), 3, 1),
            "const x = __require(3).default;"
        );
        assert_eq!(
            import_bindings(&clause(None, Some("ns"), &[]), 3, 1),
            "const ns = __require(3);"
        );
        assert_eq!(
            import_bindings(&clause(None, None, &[("a", "a"), ("b", "c"), ("x-y", "z")]), 3, 1),
            "const { a, b: c, \"x-y\": z } = __require(3);"
        );
        assert_eq!(
            import_bindings(&clause(Some("x"), None, &[("a", "a")]), 3, 2),
            "const __import2 = __require(3); const x = __import2.default; const { a } = __import2;"
        );
        assert_eq!(import_bindings(&clause(None, None, &[]), 3, 1), "__require(3);");
    }

    #[test]
    fn anonymous_default_class_gets_a_binding() {
        let body = transform(&[], "export default class extends HTMLElement {}\n");
        assert_eq!(
            body,
            "__export(__exports, \"default\", () => __default);\nconst __default = class extends HTMLElement {};\n"
        );
    }

    #[test]
    fn default_expression_gets_a_binding() {
        let body = transform(&[], "export default { size: 2 }\nlet after = 1;\n");
        assert!(body.contains("const __default = { size: 2 };\nlet after = 1;"));
        assert!(body.starts_with("__export(__exports, \"default\", () => __default);"));
    }

    #[test]
    fn minified_imports_are_rewritten() {
        let body = transform(
            &[("x.js", "export const a = 1;"), ("y.js", "")],
            "import{a}from\"./x.js\";import\"./y.js\";a();",
        );
        assert_eq!(body, "const { a } = __require(1);__require(2);a();");
    }

    #[test]
    fn destructured_exports_export_every_binding() {
        let body = transform(&[], "export const {a, b: [c, ...d], e = 1} = o;\n");
        assert_eq!(
            body,
            concat!(
                "__export(__exports, \"a\", () => a);\n",
                "__export(__exports, \"c\", () => c);\n",
                "__export(__exports, \"d\", () => d);\n",
                "__export(__exports, \"e\", () => e);\n",
                "const {a, b: [c, ...d], e = 1} = o;\n",
            )
        );
    }

    #[test]
    fn export_lists_and_reexports() {
        let body = transform(
            &[("x.js", "export const a = 1;")],
            "const local = 1;\nexport { local as renamed };\nexport { a as b } from './x.js';\nexport * as all from './x.js';\nexport * from './x.js';\n",
        );
        assert!(body.contains("__export(__exports, \"renamed\", () => local);"));
        assert!(body.contains("__export(__exports, \"b\", () => __require(1).a);"));
        assert!(body.contains("__export(__exports, \"all\", () => __require(1));"));
        assert!(body.contains("__exportAll(__exports, __require(1));"));
        assert!(!body.contains("export {"));
        assert!(!body.contains("from './x.js'"));
    }

    #[test]
    fn export_keywords_in_strings_are_left_alone() {
        let body = transform(&[], "const text = `\nexport const fake = 1;\n`;\n");
        assert_eq!(body, "const text = `\nexport const fake = 1;\n`;\n");
    }

    #[test]
    fn syntax_errors_fail_the_bundle() {
        let temp = tempdir().unwrap();
        let fs = LayeredFs::new();
        let mut graph = ModuleGraph::new(&fs);
        let err = graph
            .transform("export const = ;", temp.path(), "broken.js")
            .unwrap_err();
        assert!(matches!(&err, BuildError::Bundle(message) if message.contains("broken.js")));
    }

    #[test]
    fn bundles_a_module_graph() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("components")).unwrap();
        fs::write(
            root.join("components/button.js"),
            "import { base } from './base.js';\nexport class MyButton extends base {}\ncustomElements.define('my-button', MyButton);\n",
        )
        .unwrap();
        fs::write(
            root.join("components/base.js"),
            "import './button.js';\nexport const base = HTMLElement;\n",
        )
        .unwrap();

        let entry = entry_program(&[root.join("components/button.js").display().to_string()]);
        let script = IifeBundler::new()
            .bundle(&LayeredFs::new(), &entry, root)
            .unwrap();

        assert!(script.starts_with("(() => {"));
        assert!(script.contains("__modules[0]"));
        assert!(script.contains("__modules[1]"));
        assert!(script.contains("__modules[2]"));
        assert!(!script.contains("__modules[3]"));
        assert!(script.contains("const { base } = __require(2);"));
        assert!(script.contains("__export(__exports, \"MyButton\", () => MyButton);"));
        assert!(script.contains("customElements.define('my-button', MyButton);"));
        assert!(!script.contains("import {"));
        assert!(!script.contains("export class"));
        assert!(!script.contains("export const"));
    }

    #[test]
    fn resolves_packages_from_node_modules() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        let package = root.join("node_modules/@acme/ui");
        fs::create_dir_all(package.join("dist")).unwrap();
        fs::write(package.join("package.json"), r#"{"name": "@acme/ui", "module": "dist/ui.js"}"#).unwrap();
        fs::write(package.join("dist/ui.js"), "export default function ui() {}\n").unwrap();

        let script = IifeBundler::new()
            .bundle(&LayeredFs::new(), "import ui from '@acme/ui';\nui();\n", root)
            .unwrap();

        assert!(script.contains("dist/ui.js"));
        assert!(script.contains("__export(__exports, \"default\", () => ui);"));
        assert!(script.contains("function ui() {}"));
    }

    #[test]
    fn unresolvable_import_fails() {
        let temp = tempdir().unwrap();
        let err = IifeBundler::new()
            .bundle(&LayeredFs::new(), "import './missing.js';", temp.path())
            .unwrap_err();
        assert!(matches!(err, BuildError::Bundle(_)));
    }
}
