use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use weft_core::error::{Result, ValidationError};

use crate::template::WorkflowTemplate;

/// Name -> template lookup used to resolve sub-workflow nodes.
///
/// Built once, then handed to the engine and only read from.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    templates: HashMap<String, Arc<WorkflowTemplate>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template. Names must be unique.
    pub fn register(&mut self, template: WorkflowTemplate) -> std::result::Result<Arc<WorkflowTemplate>, ValidationError> {
        if self.templates.contains_key(&template.name) {
            return Err(ValidationError::DuplicateWorkflow(template.name));
        }
        let template = Arc::new(template);
        self.templates.insert(template.name.clone(), template.clone());
        Ok(template)
    }

    /// Build a registry and check every sub-workflow reference resolves.
    pub fn from_templates(
        templates: impl IntoIterator<Item = WorkflowTemplate>,
    ) -> std::result::Result<Self, ValidationError> {
        let mut registry = Self::new();
        for template in templates {
            registry.register(template)?;
        }
        registry.validate_references()?;
        Ok(registry)
    }

    /// Load every `*.json`, `*.yaml` and `*.yml` file in `dir`.
    /// Returns the number of templates registered.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_template_file(p))
            .collect();
        paths.sort();

        for path in &paths {
            let template = WorkflowTemplate::from_file(path)?;
            debug!(workflow = %template.name, path = %path.display(), "Loaded template");
            self.register(template)?;
        }
        Ok(paths.len())
    }

    /// Load all template directories, skipping ones that don't exist, then
    /// validate cross-template references.
    pub fn from_dirs(dirs: &[PathBuf]) -> Result<Self> {
        let mut registry = Self::new();
        for dir in dirs {
            if !dir.is_dir() {
                debug!(dir = %dir.display(), "Template directory not found, skipping");
                continue;
            }
            let count = registry.load_dir(dir)?;
            info!(dir = %dir.display(), count, "Loaded workflow templates");
        }
        registry.validate_references()?;
        Ok(registry)
    }

    /// Every sub-workflow node must name a registered template.
    pub fn validate_references(&self) -> std::result::Result<(), ValidationError> {
        for name in self.names() {
            if let Some(template) = self.templates.get(name) {
                self.check_references(template)?;
            }
        }
        Ok(())
    }

    /// Sub-workflow nodes of `template`, registered or not, must name a
    /// registered template.
    pub fn check_references(&self, template: &WorkflowTemplate) -> std::result::Result<(), ValidationError> {
        for (node, workflow) in template.referenced_workflows() {
            if !self.templates.contains_key(workflow) {
                return Err(ValidationError::UnknownWorkflow {
                    node: format!("{}.{}", template.name, node),
                    workflow: workflow.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkflowTemplate>> {
        self.templates.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

pub(crate) fn is_template_file(path: &Path) -> bool {
    path.is_file()
        && matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("json") | Some("yaml") | Some("yml")
        )
}
