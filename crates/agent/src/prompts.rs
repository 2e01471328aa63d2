use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PromptTemplate {
    Router,
    StructuredAgent,
    UnstructuredAgent,
    OutOfScope,
    SaveMemory,
    ReadMemory,
    SummarizeBatch,
    SummarizeCombine,
}

impl PromptTemplate {
    pub const ALL: [PromptTemplate; 8] = [
        PromptTemplate::Router,
        PromptTemplate::StructuredAgent,
        PromptTemplate::UnstructuredAgent,
        PromptTemplate::OutOfScope,
        PromptTemplate::SaveMemory,
        PromptTemplate::ReadMemory,
        PromptTemplate::SummarizeBatch,
        PromptTemplate::SummarizeCombine,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::StructuredAgent => "structured_agent",
            Self::UnstructuredAgent => "unstructured_agent",
            Self::OutOfScope => "out_of_scope",
            Self::SaveMemory => "save_memory",
            Self::ReadMemory => "read_memory",
            Self::SummarizeBatch => "summarize_batch",
            Self::SummarizeCombine => "summarize_combine",
        }
    }

    fn embedded(&self) -> &'static str {
        match self {
            Self::Router => include_str!("../templates/prompts/router.tera"),
            Self::StructuredAgent => include_str!("../templates/prompts/structured_agent.tera"),
            Self::UnstructuredAgent => {
                include_str!("../templates/prompts/unstructured_agent.tera")
            }
            Self::OutOfScope => include_str!("../templates/prompts/out_of_scope.tera"),
            Self::SaveMemory => include_str!("../templates/prompts/save_memory.tera"),
            Self::ReadMemory => include_str!("../templates/prompts/read_memory.tera"),
            Self::SummarizeBatch => include_str!("../templates/prompts/summarize_batch.tera"),
            Self::SummarizeCombine => include_str!("../templates/prompts/summarize_combine.tera"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("could not read prompt override `{path}`: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid prompt template `{name}`: {source}")]
    Parse { name: &'static str, source: tera::Error },
    #[error("could not render prompt `{name}`: {source}")]
    Render { name: &'static str, source: tera::Error },
}

/// Named prompt templates, embedded by default and overridable from a directory.
pub struct PromptLibrary {
    tera: Tera,
}

impl PromptLibrary {
    pub fn embedded() -> Result<Self, PromptError> {
        Self::load(None)
    }

    /// `<name>.tera` files in `overrides_dir` replace the embedded template of the same name.
    pub fn load(overrides_dir: Option<&Path>) -> Result<Self, PromptError> {
        let mut tera = Tera::default();
        for template in PromptTemplate::ALL {
            let source = match overrides_dir {
                Some(dir) => read_override(dir, template)?,
                None => None,
            };
            let source = source.as_deref().unwrap_or_else(|| template.embedded());
            tera.add_raw_template(template.name(), source)
                .map_err(|source| PromptError::Parse { name: template.name(), source })?;
        }
        Ok(Self { tera })
    }

    pub fn render<C>(&self, template: PromptTemplate, values: &C) -> Result<String, PromptError>
    where
        C: Serialize,
    {
        let context = Context::from_serialize(values)
            .map_err(|source| PromptError::Render { name: template.name(), source })?;
        self.tera
            .render(template.name(), &context)
            .map(|rendered| rendered.trim_end().to_string())
            .map_err(|source| PromptError::Render { name: template.name(), source })
    }
}

fn read_override(dir: &Path, template: PromptTemplate) -> Result<Option<String>, PromptError> {
    let path = dir.join(format!("{}.tera", template.name()));
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(&path).map(Some).map_err(|source| PromptError::Read { path, source })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::TempDir;

    use super::{PromptError, PromptLibrary, PromptTemplate};

    #[test]
    fn embedded_templates_render_their_placeholders() {
        let library = PromptLibrary::embedded().expect("embedded templates parse");

        let agent = library
            .render(PromptTemplate::StructuredAgent, &json!({"history": "user: hi"}))
            .expect("render agent prompt");
        assert!(agent.ends_with("user: hi"));

        let save = library
            .render(
                PromptTemplate::SaveMemory,
                &json!({
                    "memories": "- works in billing",
                    "user_query": "count refunds",
                    "final_response": "There are 12 refund rows.",
                }),
            )
            .expect("render save prompt");
        assert!(save.contains("- works in billing"));
        assert!(save.contains("There are 12 refund rows."));
    }

    #[test]
    fn missing_placeholder_is_a_render_error() {
        let library = PromptLibrary::embedded().expect("embedded templates parse");
        let error = library
            .render(PromptTemplate::UnstructuredAgent, &json!({}))
            .expect_err("history is required");
        assert!(matches!(error, PromptError::Render { name: "unstructured_agent", .. }));
    }

    #[test]
    fn directory_overrides_replace_embedded_templates() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join("out_of_scope.tera"), "Custom refusal for {{ who }}.")
            .expect("write override");

        let library = PromptLibrary::load(Some(dir.path())).expect("load overrides");
        let rendered = library
            .render(PromptTemplate::OutOfScope, &json!({"who": "tests"}))
            .expect("render override");
        assert_eq!(rendered, "Custom refusal for tests.");

        let router = library.render(PromptTemplate::Router, &json!({})).expect("router");
        assert!(router.contains("structured"));
    }
}
