//! Compiled page templates.

use minijinja::{context, Environment, Value};
use serde::Serialize;

use crate::error::ResolveError;
use crate::meta::{SourceMeta, SubSourceMeta};

/// A compiled template, together with the partials it may include.
pub struct Template {
    name: String,
    env: Environment<'static>,
}

impl Template {
    /// Compile a standalone template.
    pub fn compile(name: &str, source: &str) -> Result<Self, ResolveError> {
        Self::compile_with_partials(name, source, &[])
    }

    /// Compile a template that can `{% include %}` any of `partials`.
    pub fn compile_with_partials(
        name: &str,
        source: &str,
        partials: &[(String, String)],
    ) -> Result<Self, ResolveError> {
        let mut env = Environment::new();
        let compile_error = |e: minijinja::Error| ResolveError::Template {
            name: name.to_string(),
            message: e.to_string(),
        };

        for (partial_name, partial_source) in partials {
            env.add_template_owned(partial_name.clone(), partial_source.clone())
                .map_err(compile_error)?;
        }
        env.add_template_owned(name.to_string(), source.to_string())
            .map_err(compile_error)?;

        Ok(Self {
            name: name.to_string(),
            env,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render with an arbitrary context.
    pub fn render<S: Serialize>(&self, ctx: S) -> Result<String, minijinja::Error> {
        self.env.get_template(&self.name)?.render(ctx)
    }

    /// Render a page.
    ///
    /// `page_content` is inserted unescaped; everything else follows the
    /// template's auto-escaping rules.
    pub fn render_page(
        &self,
        page_content: &str,
        extra_context: Option<&serde_json::Value>,
        page_meta: &SourceMeta,
        sub_page_meta: &[SubSourceMeta],
    ) -> Result<String, minijinja::Error> {
        self.render(context! {
            pageContent => Value::from_safe_string(page_content.to_string()),
            extraContext => Value::from_serialize(extra_context),
            pageMeta => Value::from_serialize(page_meta),
            subPageMeta => Value::from_serialize(sub_page_meta),
        })
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResolvedContext;
    use crate::meta::SourceType;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn page_meta() -> SourceMeta {
        SourceMeta {
            source_type: SourceType::Page,
            source_path: PathBuf::from("/src/index.html"),
            output_path: PathBuf::from("/out"),
            context: Arc::new(ResolvedContext::default()),
            extra: Some(serde_json::json!({"title": "Home & Away"})),
        }
    }

    #[test]
    fn renders_page_content_unescaped() {
        let template = Template::compile(
            "layout.html",
            "<main>{{ pageContent }}</main><h1>{{ pageMeta.extra.title }}</h1>",
        )
        .unwrap();

        let html = template
            .render_page("<p>hi</p>", None, &page_meta(), &[])
            .unwrap();
        assert_eq!(html, "<main><p>hi</p></main><h1>Home &amp; Away</h1>");
    }

    #[test]
    fn exposes_extra_context() {
        let template = Template::compile("t.html", "{{ extraContext.site }}").unwrap();
        let params = serde_json::json!({"site": "Tartan"});
        let html = template
            .render_page("", Some(&params), &page_meta(), &[])
            .unwrap();
        assert_eq!(html, "Tartan");
    }

    #[test]
    fn includes_partials() {
        let partials = vec![("footer".to_string(), "<footer>bye</footer>".to_string())];
        let template =
            Template::compile_with_partials("page.html", "{% include \"footer\" %}", &partials)
                .unwrap();
        let html = template.render(context! {}).unwrap();
        assert_eq!(html, "<footer>bye</footer>");
    }

    #[test]
    fn reports_syntax_errors() {
        let err = Template::compile("broken.html", "{% if %}").unwrap_err();
        assert!(matches!(err, ResolveError::Template { .. }));
    }
}
