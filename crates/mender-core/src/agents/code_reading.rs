//! Code-Reading agent: fetches the failing test and the files it leans on
//!
//! Retrieval is deterministic pattern scanning over source text. The model
//! only writes the summary, and a failed summary call does not fail the stage.

use super::parse::Fields;
use super::selectors::mentions_selector;
use super::{Agent, AgentFailure, AgentResult, AgentShell, UserContent};
use crate::context::{Framework, RepairContext};
use crate::source::{join_relative, SourceFetcher};
use crate::validator::is_builtin_command;
use futures::future::join_all;
use mender_llm::util::truncate_safe;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Most related files kept
pub const MAX_RELATED_FILES: usize = 10;

/// Per-file cap in characters when content is quoted in a prompt
pub const MAX_FILE_CHARS: usize = 20_000;

/// Extension search order for relative imports
const IMPORT_EXTENSIONS: [&str; 7] = ["", ".ts", ".js", ".tsx", ".jsx", "/index.ts", "/index.js"];

const CYPRESS_SUPPORT_PATHS: [&str; 5] = [
    "cypress/support/commands.ts",
    "cypress/support/commands.js",
    "cypress/support/e2e.ts",
    "cypress/support/e2e.js",
    "cypress/support/index.js",
];

const PLAYWRIGHT_SUPPORT_PATHS: [&str; 3] =
    ["playwright.config.ts", "playwright.config.js", "tests/fixtures.ts"];

const UI_EXTENSIONS: [&str; 6] = [".tsx", ".jsx", ".vue", ".svelte", ".html", ".astro"];

static IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^\s*import\s+(?:(?:type\s+)?(\{[^}]*\}|\*\s+as\s+\w+|\w+(?:\s*,\s*\{[^}]*\})?)\s+from\s+)?['"]([^'"]+)['"]"#,
    )
    .expect("IMPORT regex is a compile-time constant")
});

static REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:const|let|var)\s+(\{[^}]*\}|\w+)\s*=\s*require\(\s*['"]([^'"]+)['"]\s*\)"#)
        .expect("REQUIRE regex is a compile-time constant")
});

static CY_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bcy\s*\.\s*([A-Za-z_]\w*)\s*\(")
        .expect("CY_COMMAND regex is a compile-time constant")
});

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z_$][\w$]*").expect("IDENTIFIER regex is a compile-time constant")
});

/// Code-Reading input
#[derive(Debug, Clone, Default)]
pub struct CodeReadingInput {
    /// Repository-relative test path
    pub test_file: String,
    /// Selectors already known to be involved
    pub selectors: Vec<String>,
}

/// A fetched file related to the test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedFile {
    /// Repository-relative path
    pub path: String,
    /// Content, truncated
    pub content: String,
    /// Why it was fetched
    pub relevance: String,
}

/// An imported page object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageObject {
    /// Imported identifier
    pub name: String,
    /// Import specifier as written
    pub import_path: String,
    /// Resolved repository path, when fetched
    pub resolved_path: Option<String>,
}

/// Code-Reading output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeReadingOutput {
    /// Test source
    pub test_file_content: String,
    /// Related files, at most [`MAX_RELATED_FILES`]
    pub related_files: Vec<RelatedFile>,
    /// Non-built-in `cy.<name>()` commands used by the test
    pub custom_commands: Vec<String>,
    /// Page objects imported by the test
    pub page_objects: Vec<PageObject>,
    /// Short summary of the test
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Import {
    names: Vec<String>,
    specifier: String,
}

fn scan_imports(source: &str) -> Vec<Import> {
    let from_import = IMPORT.captures_iter(source).map(|caps| (caps.get(1), caps.get(2)));
    let from_require = REQUIRE.captures_iter(source).map(|caps| (caps.get(1), caps.get(2)));

    from_import
        .chain(from_require)
        .filter_map(|(names, specifier)| {
            let specifier = specifier?.as_str().to_string();
            let names = names
                .map(|m| {
                    IDENTIFIER
                        .find_iter(m.as_str())
                        .map(|id| id.as_str())
                        .filter(|id| !matches!(*id, "as" | "type"))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Some(Import { names, specifier })
        })
        .collect()
}

fn scan_custom_commands(source: &str) -> Vec<String> {
    let mut commands: Vec<String> = Vec::new();
    for caps in CY_COMMAND.captures_iter(source) {
        let name = &caps[1];
        if !is_builtin_command(name) && !commands.iter().any(|c| c == name) {
            commands.push(name.to_string());
        }
    }
    commands
}

fn is_page_object(import: &Import) -> bool {
    import.specifier.to_lowercase().contains("page")
        || import.names.iter().any(|n| n.ends_with("Page"))
}

fn push_related(
    related: &mut Vec<RelatedFile>,
    test_file: &str,
    path: String,
    content: &str,
    relevance: &str,
) {
    if related.len() >= MAX_RELATED_FILES || path == test_file || related.iter().any(|f| f.path == path) {
        return;
    }
    related.push(RelatedFile {
        path,
        content: content.to_string(),
        relevance: relevance.to_string(),
    });
}

fn looks_like_ui_file(path: &str) -> bool {
    UI_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        || path.contains("/components/")
        || path.starts_with("components/")
}

fn support_paths(framework: Framework, test_file: &str) -> &'static [&'static str] {
    match framework {
        Framework::Cypress => &CYPRESS_SUPPORT_PATHS,
        Framework::Playwright => &PLAYWRIGHT_SUPPORT_PATHS,
        Framework::Unknown if test_file.contains("cypress") || test_file.contains(".cy.") => {
            &CYPRESS_SUPPORT_PATHS
        }
        Framework::Unknown => &PLAYWRIGHT_SUPPORT_PATHS,
    }
}

fn deterministic_summary(output: &CodeReadingOutput, test_file: &str) -> String {
    let mut summary = format!(
        "{test_file} ({} lines) with {} related file(s)",
        output.test_file_content.lines().count(),
        output.related_files.len()
    );
    if !output.custom_commands.is_empty() {
        let _ = write!(summary, "; custom commands: {}", output.custom_commands.join(", "));
    }
    if !output.page_objects.is_empty() {
        let names: Vec<&str> = output.page_objects.iter().map(|p| p.name.as_str()).collect();
        let _ = write!(summary, "; page objects: {}", names.join(", "));
    }
    summary
}

const SYSTEM_PROMPT: &str = r#"[mender:code-reading] You summarise end-to-end test code.
Given a failing test and its support files, describe in two or three sentences what the
test does, which helpers it relies on, and which part is most likely involved in the error.

Respond with a single JSON object: {"summary": "<text>"}"#;

/// Source retrieval stage
pub struct CodeReadingAgent {
    shell: AgentShell,
    source: Arc<dyn SourceFetcher>,
}

impl CodeReadingAgent {
    /// System prompt marker
    pub const MARKER: &'static str = "[mender:code-reading]";

    /// Create the agent
    #[must_use]
    pub fn new(shell: AgentShell, source: Arc<dyn SourceFetcher>) -> Self {
        Self { shell, source }
    }

    async fn fetch_optional(&self, context: &RepairContext, path: &str) -> Option<String> {
        match self.source.fetch(&context.repository, path).await {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(path, error = %e, "Skipping unavailable file");
                None
            }
        }
    }

    async fn resolve_import(
        &self,
        context: &RepairContext,
        specifier: &str,
    ) -> Option<(String, String)> {
        let base = join_relative(&context.test_file, specifier)?;
        for ext in IMPORT_EXTENSIONS {
            let candidate = format!("{base}{ext}");
            if let Some(content) = self.fetch_optional(context, &candidate).await {
                return Some((candidate, content));
            }
        }
        None
    }

    async fn gather(
        &self,
        input: &CodeReadingInput,
        context: &RepairContext,
        test_content: String,
    ) -> CodeReadingOutput {
        let mut related: Vec<RelatedFile> = Vec::new();
        let push = |related: &mut Vec<RelatedFile>, path: String, content: String, relevance: &str| {
            push_related(related, &input.test_file, path, &content, relevance);
        };

        let conventional = support_paths(context.framework, &input.test_file);
        let fetched = join_all(conventional.iter().map(|path| self.fetch_optional(context, path))).await;
        for (path, content) in conventional.iter().zip(fetched) {
            if let Some(content) = content {
                push(&mut related, (*path).to_string(), content, "support file");
            }
        }

        let imports = scan_imports(&test_content);
        let mut page_objects = Vec::new();
        for import in imports.iter().filter(|i| i.specifier.starts_with('.')) {
            let resolved = self.resolve_import(context, &import.specifier).await;
            let resolved_path = resolved.as_ref().map(|(path, _)| path.clone());
            let page_object = is_page_object(import);

            if let Some((path, content)) = resolved {
                let relevance = if page_object { "page object" } else { "imported by test" };
                push(&mut related, path, content, relevance);
            }
            if page_object {
                let name = import
                    .names
                    .iter()
                    .find(|n| n.ends_with("Page"))
                    .or_else(|| import.names.first())
                    .cloned()
                    .unwrap_or_else(|| import.specifier.rsplit('/').next().unwrap_or_default().to_string());
                page_objects.push(PageObject {
                    name,
                    import_path: import.specifier.clone(),
                    resolved_path,
                });
            }
        }

        let mut selectors = input.selectors.clone();
        if let Some(selector) = &context.error_selector {
            if !selectors.contains(selector) {
                selectors.push(selector.clone());
            }
        }
        if let Some(diff) = context.diff.as_ref().filter(|_| !selectors.is_empty()) {
            for file in diff.files.iter().filter(|f| looks_like_ui_file(&f.filename)) {
                if file.status == "removed" {
                    continue;
                }
                if let Some(content) = self.fetch_optional(context, &file.filename).await {
                    let touches = selectors.iter().any(|s| {
                        mentions_selector(&content, s)
                            || file.patch.as_deref().is_some_and(|p| mentions_selector(p, s))
                    });
                    let relevance = if touches {
                        "changed UI component referencing error selector"
                    } else {
                        "changed UI component"
                    };
                    push(&mut related, file.filename.clone(), content, relevance);
                }
            }
        }

        CodeReadingOutput {
            custom_commands: scan_custom_commands(&test_content),
            test_file_content: test_content,
            related_files: related,
            page_objects,
            summary: String::new(),
        }
    }

    fn build_prompt(output: &CodeReadingOutput, context: &RepairContext) -> String {
        let mut prompt = format!(
            "Error: {}\n\nTest file {}:\n{}\n",
            context.error_message,
            context.test_file,
            truncate_safe(&output.test_file_content, MAX_FILE_CHARS)
        );
        for file in &output.related_files {
            let _ = write!(
                prompt,
                "\n--- {} ({}) ---\n{}\n",
                file.path,
                file.relevance,
                truncate_safe(&file.content, 4000)
            );
        }
        prompt
    }
}

#[async_trait::async_trait]
impl Agent for CodeReadingAgent {
    type Input = CodeReadingInput;
    type Output = CodeReadingOutput;

    fn name(&self) -> &'static str {
        "code-reading"
    }

    #[instrument(skip_all, fields(test_file = %input.test_file))]
    async fn execute(
        &self,
        input: &CodeReadingInput,
        context: &RepairContext,
    ) -> AgentResult<CodeReadingOutput> {
        let start = Instant::now();

        let test_content = match self.source.fetch(&context.repository, &input.test_file).await {
            Ok(content) => content,
            Err(e) => {
                return AgentResult::failed(
                    AgentFailure::Input,
                    format!("failed to fetch test file {}: {e}", input.test_file),
                    start.elapsed().as_millis() as u64,
                    0,
                );
            }
        };

        let mut output = self.gather(input, context, test_content).await;

        let prompt = Self::build_prompt(&output, context);
        let summary = self
            .shell
            .run(self.name(), SYSTEM_PROMPT, UserContent::text(prompt), |map| {
                Ok(Fields::new(map).str_or_default(&["summary"]))
            })
            .await;

        output.summary = match summary.data.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => {
                debug!(error = ?summary.error, "Using deterministic summary");
                deterministic_summary(&output, &input.test_file)
            }
        };

        info!(
            related_files = output.related_files.len(),
            custom_commands = output.custom_commands.len(),
            page_objects = output.page_objects.len(),
            "Code reading complete"
        );

        AgentResult::ok(
            output,
            start.elapsed().as_millis() as u64,
            summary.api_calls,
            summary.tokens_used,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentConfig;
    use crate::context::{ChangedFile, DiffMetadata, RepoTarget};
    use crate::source::InMemorySource;
    use mender_llm::{MockProvider, MockReply};

    const TEST_SOURCE: &str = r#"import { LoginPage } from '../support/pages/login';
import helpers from './helpers';
import { faker } from '@faker-js/faker';
const api = require('../support/api');

describe('login', () => {
  it('submits', () => {
    cy.login('a', 'b');
    cy.get('[data-testid="submit"]').click();
    cy.seedDatabase();
    cy.login('c', 'd');
  });
});
"#;

    fn context() -> RepairContext {
        RepairContext::new(
            "Expected to find element: [data-testid=\"submit\"]",
            "cypress/e2e/login.cy.ts",
            RepoTarget::new("acme", "shop", "main"),
        )
        .with_framework(Framework::Cypress)
        .with_error_selector("[data-testid=\"submit\"]")
        .with_diff(DiffMetadata {
            summary: "rename button".into(),
            files: vec![ChangedFile {
                filename: "src/components/Login.tsx".into(),
                status: "modified".into(),
                patch: Some("-<button data-testid=\"submit\">\n+<button data-testid=\"submit-btn\">".into()),
            }],
        })
    }

    fn source() -> InMemorySource {
        InMemorySource::new()
            .with_file("cypress/e2e/login.cy.ts", TEST_SOURCE)
            .with_file("cypress/support/commands.ts", "Cypress.Commands.add('login', () => {})")
            .with_file("cypress/support/pages/login.ts", "export class LoginPage {}")
            .with_file("cypress/e2e/helpers/index.ts", "export default {}")
            .with_file("cypress/support/api.js", "module.exports = {}")
            .with_file("src/components/Login.tsx", "<button data-testid=\"submit-btn\">")
    }

    fn agent(provider: MockProvider) -> CodeReadingAgent {
        let shell = AgentShell::new(Arc::new(provider), AgentConfig::default());
        CodeReadingAgent::new(shell, Arc::new(source()))
    }

    fn input() -> CodeReadingInput {
        CodeReadingInput {
            test_file: "cypress/e2e/login.cy.ts".into(),
            selectors: vec![],
        }
    }

    #[test]
    fn test_scan_imports() {
        let imports = scan_imports(TEST_SOURCE);
        let specifiers: Vec<&str> = imports.iter().map(|i| i.specifier.as_str()).collect();
        assert_eq!(
            specifiers,
            vec!["../support/pages/login", "./helpers", "@faker-js/faker", "../support/api"]
        );
        assert_eq!(imports[0].names, vec!["LoginPage"]);
        assert!(is_page_object(&imports[0]));
        assert!(!is_page_object(&imports[1]));
    }

    #[test]
    fn test_custom_commands_skip_builtins() {
        assert_eq!(scan_custom_commands(TEST_SOURCE), vec!["login", "seedDatabase"]);
    }

    #[tokio::test]
    async fn test_execute_gathers_related_files() {
        let provider = MockProvider::new();
        provider.push_text(CodeReadingAgent::MARKER, r#"{"summary": "Logs in and submits."}"#);

        let result = agent(provider).execute(&input(), &context()).await;
        assert!(result.success);
        let output = result.data.unwrap();

        let paths: Vec<&str> = output.related_files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "cypress/support/commands.ts",
                "cypress/support/pages/login.ts",
                "cypress/e2e/helpers/index.ts",
                "cypress/support/api.js",
                "src/components/Login.tsx",
            ]
        );
        assert_eq!(output.related_files[4].relevance, "changed UI component referencing error selector");
        assert_eq!(output.page_objects.len(), 1);
        assert_eq!(
            output.page_objects[0].resolved_path.as_deref(),
            Some("cypress/support/pages/login.ts")
        );
        assert_eq!(output.summary, "Logs in and submits.");
    }

    #[tokio::test]
    async fn test_summary_failure_falls_back() {
        let provider = MockProvider::new().with_default_reply(MockReply::Error("down".into()));
        let result = agent(provider).execute(&input(), &context()).await;

        assert!(result.success);
        let output = result.data.unwrap();
        assert!(output.summary.starts_with("cypress/e2e/login.cy.ts"));
        assert!(output.summary.contains("custom commands: login, seedDatabase"));
    }

    #[tokio::test]
    async fn test_missing_test_file_is_fatal() {
        let mut input = input();
        input.test_file = "cypress/e2e/missing.cy.ts".into();
        let result = agent(MockProvider::new()).execute(&input, &context()).await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(AgentFailure::Input));
        assert_eq!(result.api_calls, 0);
    }

    #[tokio::test]
    async fn test_large_files_are_kept_whole_and_capped_in_prompt() {
        let padding = "// filler line for a long spec\n".repeat(MAX_FILE_CHARS / 20);
        let test_content = format!("{TEST_SOURCE}{padding}cy.get('#tail').click();\n");
        assert!(test_content.len() > MAX_FILE_CHARS);

        let output = agent(MockProvider::new()).gather(&input(), &context(), test_content.clone()).await;
        assert_eq!(output.test_file_content, test_content);
        assert!(output.test_file_content.ends_with("cy.get('#tail').click();\n"));

        let prompt = CodeReadingAgent::build_prompt(&output, &context());
        assert!(!prompt.contains("#tail"));
    }

    #[test]
    fn test_ui_detection() {
        assert!(looks_like_ui_file("src/components/Button.ts"));
        assert!(looks_like_ui_file("app/Button.vue"));
        assert!(!looks_like_ui_file("src/api/client.ts"));
    }
}
