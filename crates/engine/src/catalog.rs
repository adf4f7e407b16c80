//! Read-only registry of reusable workflow templates.
//!
//! The catalog owns named [`WorkflowTemplate`]s — the built-in business
//! workflows plus any YAML documents loaded at startup — and instantiates
//! them into executable step lists. All validation happens here, before
//! anything touches the network: unknown templates, unknown tools, missing
//! required parameters, and duplicate step names are caller bugs surfaced as
//! validation errors.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use indexmap::{IndexMap, indexmap};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::info;

use opsflow_types::{
    ErrorDescriptor, PollSpec, TemplateParameter, TemplateStep, WorkflowStepSpec, WorkflowTemplate,
    is_known_tool,
};

use crate::resolve::apply_runtime_parameters;

/// Instantiation failures; all of them are caller bugs.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown workflow template: {0}")]
    UnknownTemplate(String),

    #[error("missing required parameter '{parameter}' for template '{template}'")]
    MissingParameter { template: String, parameter: String },

    #[error("template '{template}' step '{step}' references unknown tool '{tool}'")]
    UnknownTool {
        template: String,
        step: String,
        tool: String,
    },

    #[error("duplicate step name '{step}' in template '{template}'")]
    DuplicateStep { template: String, step: String },
}

impl From<CatalogError> for ErrorDescriptor {
    fn from(error: CatalogError) -> Self {
        ErrorDescriptor::validation(error.to_string())
    }
}

/// Named, immutable workflow templates keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    templates: IndexMap<String, WorkflowTemplate>,
}

impl WorkflowCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from authored templates, rejecting duplicates and
    /// templates without steps.
    pub fn with_templates(templates: Vec<WorkflowTemplate>) -> Result<Self> {
        let mut catalog = Self::new();
        for template in templates {
            catalog.insert(template)?;
        }
        Ok(catalog)
    }

    /// Ships the predefined business workflows.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for template in [quarterly_analysis_template(), competitive_research_template()] {
            // Built-in templates are authored here; duplicates cannot occur.
            let _ = catalog.insert(template);
        }
        catalog
    }

    /// Parses a single YAML template document.
    pub fn template_from_yaml(document: &str) -> Result<WorkflowTemplate> {
        serde_yaml::from_str(document).context("parse workflow template document")
    }

    /// Loads every `.yaml`/`.yml` template in a directory into a catalog.
    pub fn load_dir(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut catalog = Self::new();
        for entry in fs::read_dir(path).with_context(|| format!("read {}", path.display()))? {
            let entry = entry?;
            let file_path = entry.path();
            let is_yaml = file_path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !is_yaml {
                continue;
            }
            let document = fs::read_to_string(&file_path)
                .with_context(|| format!("read {}", file_path.display()))?;
            let template = Self::template_from_yaml(&document)
                .with_context(|| format!("parse {}", file_path.display()))?;
            catalog.insert(template)?;
        }
        info!(
            templates = catalog.templates.len(),
            dir = %path.display(),
            "loaded workflow templates"
        );
        Ok(catalog)
    }

    fn insert(&mut self, template: WorkflowTemplate) -> Result<()> {
        if template.name.trim().is_empty() {
            bail!("workflow template is missing its name");
        }
        if template.steps.is_empty() {
            bail!("workflow template '{}' declares no steps", template.name);
        }
        if self.templates.contains_key(&template.name) {
            bail!("duplicate workflow template: '{}'", template.name);
        }
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    /// Looks a template up by name.
    pub fn get(&self, name: &str) -> Option<&WorkflowTemplate> {
        self.templates.get(name)
    }

    /// Template names in authoring order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Instantiates a template with runtime parameters.
    ///
    /// Substitutes `${{ params.* }}` expressions and declared defaults into
    /// each step's parameter template; `steps.*` and `scratch.*` references
    /// stay deferred. Instantiation is pure — equal inputs yield
    /// structurally identical step lists.
    pub fn instantiate(
        &self,
        template_name: &str,
        runtime_params: &Map<String, Value>,
    ) -> Result<Vec<WorkflowStepSpec>, CatalogError> {
        let template = self
            .templates
            .get(template_name)
            .ok_or_else(|| CatalogError::UnknownTemplate(template_name.to_string()))?;

        let mut params = runtime_params.clone();
        for (name, declaration) in &template.parameters {
            if params.contains_key(name) {
                continue;
            }
            if let Some(default) = &declaration.default {
                params.insert(name.clone(), default.clone());
            } else if declaration.required {
                return Err(CatalogError::MissingParameter {
                    template: template_name.to_string(),
                    parameter: name.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(template.steps.len());
        for step in &template.steps {
            if !is_known_tool(&step.tool) {
                return Err(CatalogError::UnknownTool {
                    template: template_name.to_string(),
                    step: step.name.clone(),
                    tool: step.tool.clone(),
                });
            }
            if let Some(poll) = &step.poll
                && !is_known_tool(&poll.status_tool)
            {
                return Err(CatalogError::UnknownTool {
                    template: template_name.to_string(),
                    step: step.name.clone(),
                    tool: poll.status_tool.clone(),
                });
            }
            if !seen.insert(step.name.clone()) {
                return Err(CatalogError::DuplicateStep {
                    template: template_name.to_string(),
                    step: step.name.clone(),
                });
            }
            specs.push(WorkflowStepSpec {
                name: step.name.clone(),
                tool: step.tool.clone(),
                params: apply_runtime_parameters(&step.params, &params),
                poll: step.poll.clone(),
                captures: step.captures.clone(),
            });
        }
        Ok(specs)
    }
}

/// Quarterly business performance analysis: query, analyze, report, email.
fn quarterly_analysis_template() -> WorkflowTemplate {
    WorkflowTemplate {
        name: "quarterly_analysis".into(),
        title: Some("Quarterly Business Analysis".into()),
        description: Some("Comprehensive quarterly business performance analysis".into()),
        parameters: indexmap! {
            "quarter".into() => TemplateParameter {
                description: Some("Quarter under analysis, e.g. 'Q3 2025'".into()),
                required: true,
                default: None,
            },
            "recipient".into() => TemplateParameter {
                description: Some("Where the final report is sent".into()),
                required: false,
                default: Some(json!("executives@company.com")),
            },
        },
        steps: vec![
            TemplateStep {
                name: "fetch_sales_data".into(),
                tool: "queryDatabase".into(),
                params: json!({
                    "sql": "SELECT region, product, revenue FROM sales WHERE quarter = '${{ params.quarter }}'",
                    "max_results": 1000
                }),
                poll: None,
                captures: IndexMap::new(),
            },
            TemplateStep {
                name: "analyze_trends".into(),
                tool: "startThinking".into(),
                params: json!({
                    "problem": "Analyze sales trends for ${{ params.quarter }}",
                    "context": "${{ steps.fetch_sales_data.rows }}"
                }),
                poll: None,
                captures: indexmap! {
                    "thinking_session".into() => "session_id".into(),
                },
            },
            TemplateStep {
                name: "generate_report".into(),
                tool: "finishThinking".into(),
                params: json!({"session_id": "${{ scratch.thinking_session }}"}),
                poll: None,
                captures: IndexMap::new(),
            },
            TemplateStep {
                name: "email_report".into(),
                tool: "sendEmail".into(),
                params: json!({
                    "to": "${{ params.recipient }}",
                    "subject": "Quarterly analysis: ${{ params.quarter }}",
                    "body": "${{ steps.generate_report.solution }}"
                }),
                poll: None,
                captures: IndexMap::new(),
            },
        ],
    }
}

/// Competitor and market research: search, crawl (async), analyze, record.
fn competitive_research_template() -> WorkflowTemplate {
    WorkflowTemplate {
        name: "competitive_research".into(),
        title: Some("Competitive Market Research".into()),
        description: Some("Research competitors and market trends".into()),
        parameters: indexmap! {
            "query".into() => TemplateParameter {
                description: Some("Search query for the market sweep".into()),
                required: true,
                default: None,
            },
            "competitor_url".into() => TemplateParameter {
                description: Some("Competitor site to crawl".into()),
                required: true,
                default: None,
            },
        },
        steps: vec![
            TemplateStep {
                name: "search_competitors".into(),
                tool: "searchWeb".into(),
                params: json!({"query": "${{ params.query }}", "max_results": 20}),
                poll: None,
                captures: IndexMap::new(),
            },
            TemplateStep {
                name: "crawl_pricing".into(),
                tool: "crawlWebsite".into(),
                params: json!({"url": "${{ params.competitor_url }}", "max_pages": 10}),
                poll: Some(PollSpec {
                    status_tool: "getCrawlStatus".into(),
                    handle_field: "job_id".into(),
                    interval_secs: None,
                }),
                captures: IndexMap::new(),
            },
            TemplateStep {
                name: "analyze_competition".into(),
                tool: "startThinking".into(),
                params: json!({
                    "problem": "Competitive pricing strategy analysis for '${{ params.query }}'",
                    "context": "${{ steps.crawl_pricing }}"
                }),
                poll: None,
                captures: indexmap! {
                    "thinking_session".into() => "session_id".into(),
                },
            },
            TemplateStep {
                name: "conclude_analysis".into(),
                tool: "finishThinking".into(),
                params: json!({"session_id": "${{ scratch.thinking_session }}"}),
                poll: None,
                captures: IndexMap::new(),
            },
            TemplateStep {
                name: "record_findings".into(),
                tool: "executeDatabase".into(),
                params: json!({
                    "sql": "INSERT INTO competitive_analysis (query, summary) VALUES ('${{ params.query }}', '${{ steps.conclude_analysis.solution }}')"
                }),
                poll: None,
                captures: IndexMap::new(),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsflow_types::ErrorCategory;
    use std::io::Write;

    fn runtime(entries: &[(&str, Value)]) -> Map<String, Value> {
        let mut map = Map::new();
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        map
    }

    #[test]
    fn builtin_quarterly_analysis_instantiates() {
        let catalog = WorkflowCatalog::builtin();
        let specs = catalog
            .instantiate("quarterly_analysis", &runtime(&[("quarter", json!("Q3 2025"))]))
            .expect("instantiate");

        assert_eq!(specs.len(), 4);
        assert_eq!(specs[0].tool, "queryDatabase");
        let sql = specs[0].params["sql"].as_str().expect("sql string");
        assert!(sql.contains("Q3 2025"));

        // The default recipient applies when the caller omits it.
        assert_eq!(specs[3].params["to"], json!("executives@company.com"));

        // Deferred references survive instantiation untouched.
        assert_eq!(
            specs[2].params["session_id"],
            json!("${{ scratch.thinking_session }}")
        );
    }

    #[test]
    fn builtin_competitive_research_keeps_async_step() {
        let catalog = WorkflowCatalog::builtin();
        let specs = catalog
            .instantiate(
                "competitive_research",
                &runtime(&[
                    ("query", json!("widget pricing 2026")),
                    ("competitor_url", json!("https://competitor.test")),
                ]),
            )
            .expect("instantiate");

        assert_eq!(specs.len(), 5);
        let crawl = &specs[1];
        assert_eq!(crawl.tool, "crawlWebsite");
        let poll = crawl.poll.as_ref().expect("poll spec survives");
        assert_eq!(poll.status_tool, "getCrawlStatus");
        assert_eq!(crawl.params["url"], json!("https://competitor.test"));
    }

    #[test]
    fn unknown_template_is_a_validation_error() {
        let catalog = WorkflowCatalog::builtin();
        let error = catalog
            .instantiate("world_domination", &Map::new())
            .expect_err("unknown template");
        assert!(matches!(error, CatalogError::UnknownTemplate(_)));

        let descriptor: ErrorDescriptor = error.into();
        assert_eq!(descriptor.category, ErrorCategory::Validation);
    }

    #[test]
    fn missing_required_parameter_is_rejected() {
        let catalog = WorkflowCatalog::builtin();
        let error = catalog
            .instantiate("quarterly_analysis", &Map::new())
            .expect_err("missing quarter");
        assert!(matches!(
            error,
            CatalogError::MissingParameter { ref parameter, .. } if parameter == "quarter"
        ));
    }

    #[test]
    fn unknown_tool_is_rejected_before_any_call() {
        let template = WorkflowTemplate {
            name: "rogue".into(),
            title: None,
            description: None,
            parameters: IndexMap::new(),
            steps: vec![TemplateStep {
                name: "bad".into(),
                tool: "formatDisk".into(),
                params: json!({}),
                poll: None,
                captures: IndexMap::new(),
            }],
        };
        let catalog = WorkflowCatalog::with_templates(vec![template]).expect("catalog");
        let error = catalog
            .instantiate("rogue", &Map::new())
            .expect_err("unknown tool");
        assert!(matches!(
            error,
            CatalogError::UnknownTool { ref tool, .. } if tool == "formatDisk"
        ));
    }

    #[test]
    fn duplicate_step_names_are_rejected() {
        let step = TemplateStep {
            name: "twice".into(),
            tool: "listTables".into(),
            params: json!({}),
            poll: None,
            captures: IndexMap::new(),
        };
        let template = WorkflowTemplate {
            name: "dupes".into(),
            title: None,
            description: None,
            parameters: IndexMap::new(),
            steps: vec![step.clone(), step],
        };
        let catalog = WorkflowCatalog::with_templates(vec![template]).expect("catalog");
        let error = catalog
            .instantiate("dupes", &Map::new())
            .expect_err("duplicate step");
        assert!(matches!(error, CatalogError::DuplicateStep { .. }));
    }

    #[test]
    fn instantiation_is_idempotent() {
        let catalog = WorkflowCatalog::builtin();
        let params = runtime(&[("quarter", json!("Q1 2026"))]);
        let first = catalog
            .instantiate("quarterly_analysis", &params)
            .expect("first");
        let second = catalog
            .instantiate("quarterly_analysis", &params)
            .expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn duplicate_template_names_fail_catalog_construction() {
        let template = quarterly_analysis_template();
        let error = WorkflowCatalog::with_templates(vec![template.clone(), template])
            .expect_err("duplicate template");
        assert!(error.to_string().contains("duplicate workflow template"));
    }

    #[test]
    fn loads_templates_from_a_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut file = fs::File::create(dir.path().join("db_health.yaml")).expect("create");
        write!(
            file,
            r#"
name: db_health
steps:
  - name: tables
    tool: listTables
    params: {{}}
  - name: probe
    tool: queryDatabase
    params:
      sql: "SELECT 1"
"#
        )
        .expect("write template");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write noise");

        let catalog = WorkflowCatalog::load_dir(dir.path()).expect("load");
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["db_health"]);
        let specs = catalog.instantiate("db_health", &Map::new()).expect("specs");
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].params["sql"], json!("SELECT 1"));
    }
}
