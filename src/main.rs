use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::EngineConfig;
use weft_core::types::Params;
use weft_engine::{EchoAgent, EchoTool, Engine, ExecutionPlan, ToolRegistry, WorkflowRegistry, WorkflowTemplate};

#[derive(Parser)]
#[command(name = "weft", version, about = "Declarative workflow template engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate template files or directories
    Validate {
        /// Template files or directories of templates
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print the execution plan of a template
    Plan {
        /// Registered template name or path to a template file
        template: String,
    },
    /// Dry-run a template with echo executors
    Run {
        /// Registered template name or path to a template file
        template: String,
        /// User input, also available as {input}
        #[arg(short, long, default_value = "")]
        input: String,
        /// Parameter override as key=value (value parsed as JSON when possible)
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "weft", &mut std::io::stdout());
        return Ok(());
    }

    let config = EngineConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { paths } => validate(&paths),
        Commands::Plan { template } => {
            let (_, template) = load_target(&config, &template)?;
            let plan = ExecutionPlan::build(&template)?;
            print_plan(&template, &plan);
            Ok(())
        }
        Commands::Run {
            template,
            input,
            params,
            json,
        } => {
            let (registry, template) = load_target(&config, &template)?;
            let tools = ToolRegistry::new().with_fallback(EchoTool);
            let engine = Engine::new(Arc::new(registry), Arc::new(EchoAgent), Arc::new(tools))
                .with_settings(config.engine.clone());

            let params: Params = params.into_iter().collect();
            info!(workflow = %template.name, "Dry run with echo executors");
            let result = engine.execute(&template, &input, params).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for line in &result.execution_log {
                    println!("{}", line);
                }
                println!();
                println!("{}", result.final_text());
            }

            if let Some(err) = &result.error {
                bail!("workflow '{}' failed: {}", result.workflow_name, err);
            }
            Ok(())
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }
}

/// Load the registry from the configured directories and pick the target:
/// a template file (added to the registry if new) or a registered name.
fn load_target(config: &EngineConfig, target: &str) -> anyhow::Result<(WorkflowRegistry, Arc<WorkflowTemplate>)> {
    let mut registry = WorkflowRegistry::from_dirs(&config.template_dirs())?;

    let path = Path::new(target);
    let name = if path.is_file() {
        let template = WorkflowTemplate::from_file(path)?;
        let name = template.name.clone();
        if registry.contains(&name) {
            warn!(workflow = %name, "Template already registered from a template directory, using that copy");
        } else {
            registry.register(template)?;
            registry.validate_references()?;
        }
        name
    } else {
        target.to_string()
    };

    let template = registry
        .get(&name)
        .with_context(|| format!("no template named '{}' in {:?}", name, config.templates.dirs))?;
    Ok((registry, template))
}

fn validate(paths: &[PathBuf]) -> anyhow::Result<()> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("json" | "yaml" | "yml")))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }

    let mut failures = 0;
    let mut registry = WorkflowRegistry::new();
    for file in &files {
        match WorkflowTemplate::from_file(file) {
            Ok(template) => {
                println!("  ok    {} ({} nodes)  {}", template.name, template.nodes.len(), file.display());
                if let Err(e) = registry.register(template) {
                    println!("  FAIL  {}: {}", file.display(), e);
                    failures += 1;
                }
            }
            Err(e) => {
                println!("  FAIL  {}: {}", file.display(), e);
                failures += 1;
            }
        }
    }
    if let Err(e) = registry.validate_references() {
        println!("  FAIL  {}", e);
        failures += 1;
    }

    if failures > 0 {
        bail!("{} of {} templates failed validation", failures, files.len());
    }
    println!("{} templates valid", files.len());
    Ok(())
}

fn print_plan(template: &WorkflowTemplate, plan: &ExecutionPlan) {
    println!("{} v{}", template.name, template.version);
    if !template.description.is_empty() {
        println!("{}", template.description);
    }
    if !template.parameters.is_empty() {
        let mut names: Vec<&String> = template.parameters.keys().collect();
        names.sort();
        println!();
        println!("Parameters:");
        for name in names {
            println!("  {} = {}", name, template.parameters[name]);
        }
    }
    println!();
    println!("Steps:");
    print!("{}", plan);
    if !template.conditional_edges.is_empty() {
        println!();
        println!("Routes:");
        for edge in &template.conditional_edges {
            for c in &edge.conditions {
                println!("  {} -> {}  when {} {} {}", edge.from_node, c.next_node, c.field, c.operator, c.value);
            }
            println!("  {} -> {}  otherwise", edge.from_node, edge.default);
        }
    }
}

fn parse_param(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.trim().to_string(), value))
}
