use clap::{Parser, Subcommand};
use tokenshift::compiler::core::Compiler;
use tokenshift::compiler::loader::load_process_from_yaml;
use tokenshift::config::EngineConfig;
use tokenshift::migration::{ChangeStateRequest, MoveOperation, MoveSource};
use tokenshift::runtime::engine::Engine;
use tokenshift::runtime::events::{RecordingSink, TracingSink};
use tokenshift::runtime::execution::{ExecutionId, ExecutionTree};
use tokenshift::runtime::graph::GraphIndex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the compiled graph of a process definition
    Inspect {
        /// Path to the process YAML file
        #[arg(long, short)]
        file: PathBuf,
    },

    /// Run a process in memory, driven by a script of completions and moves
    Simulate {
        #[arg(long, short)]
        file: PathBuf,

        /// YAML list of steps, e.g. `- complete: task1` or `- move: {from: [a], to: [b, c]}`
        #[arg(long, short)]
        script: Option<PathBuf>,

        /// Initial variables (key=value)
        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, serde_json::Value)>,
    },

    /// Start a process instance in the configured store
    Start {
        #[arg(long, short)]
        file: PathBuf,

        /// Engine configuration YAML, in-memory defaults when omitted
        #[arg(long, short)]
        config: Option<PathBuf>,

        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, serde_json::Value)>,
    },

    /// Apply a change-state request to a stored process instance
    Migrate {
        /// Definition of the instance
        #[arg(long, short)]
        file: PathBuf,

        #[arg(long, short)]
        config: Option<PathBuf>,

        #[arg(long)]
        instance: Uuid,

        /// Request YAML (`operations: [{sources: {activity_ids: [..]}, targets: [..]}]`)
        #[arg(long, short)]
        request: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ScriptStep {
    Complete(String),
    Move { from: Vec<String>, to: Vec<String> },
}

fn parse_key_val(s: &str) -> Result<(String, serde_json::Value), String> {
    let pos = s.find('=').ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].to_string();
    let val_str = &s[pos + 1..];
    // Try parsing as JSON, otherwise treat as string
    let val = serde_json::from_str(val_str).unwrap_or_else(|_| serde_json::Value::String(val_str.to_string()));
    Ok((key, val))
}

fn load_engine(config: Option<&Path>) -> Result<Engine> {
    let config = match config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    Engine::from_config(&config)
}

fn print_graph(graph: &GraphIndex) {
    println!("{} ({})", graph.id, graph.name);
    for node in &graph.nodes {
        let scope = graph.scope_label(node.scope);
        let targets: Vec<String> = node.outgoing.iter()
            .map(|f| match &f.condition {
                Some(c) => format!("{} [{}]", graph.node(f.target).id, c),
                None => graph.node(f.target).id.clone(),
            })
            .collect();
        println!("  {:<24} {:<14} scope={:<16} -> {}", node.id, format!("{:?}", node.kind), scope, targets.join(", "));
    }
}

fn print_tree(tree: &ExecutionTree) {
    fn walk(tree: &ExecutionTree, id: ExecutionId, depth: usize) {
        let Some(e) = tree.get(id) else {
            return;
        };
        let mut flags = Vec::new();
        if e.is_scope { flags.push("scope"); }
        if e.is_concurrent_root { flags.push("concurrent-root"); }
        if e.is_concurrent { flags.push("concurrent"); }
        if !e.is_active { flags.push("inactive"); }
        println!(
            "{}{} {} [{}]",
            "  ".repeat(depth),
            e.activity_id.as_deref().unwrap_or("<root>"),
            e.id,
            flags.join(",")
        );
        for child in tree.children(id) {
            walk(tree, *child, depth + 1);
        }
    }
    walk(tree, tree.root(), 0);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { file } => {
            let definition = load_process_from_yaml(&file)?;
            let graph = Compiler::new().compile(definition)?;
            print_graph(&graph);
        }
        Commands::Simulate { file, script, vars } => {
            let engine = Engine::new();
            let definition = load_process_from_yaml(&file)?;
            let definition_id = definition.id.clone();
            engine.register_definition(definition)?;

            let steps: Vec<ScriptStep> = match script {
                Some(path) => {
                    let content = fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read script {}", path.display()))?;
                    serde_yaml::from_str(&content)
                        .with_context(|| format!("Failed to parse script {}", path.display()))?
                }
                None => Vec::new(),
            };

            let instance_id = engine.start_process(&definition_id, vars.into_iter().collect()).await?;
            println!("== started {}", instance_id);
            print_tree(&engine.instance(instance_id).await?.tree);

            let sink = RecordingSink::new();
            for step in steps {
                match &step {
                    ScriptStep::Complete(activity_id) => {
                        engine.complete_activity(instance_id, activity_id).await?;
                    }
                    ScriptStep::Move { from, to } => {
                        let request = ChangeStateRequest {
                            process_instance_id: Some(instance_id),
                            operations: vec![MoveOperation {
                                sources: MoveSource::ActivityIds(from.clone()),
                                targets: to.clone(),
                            }],
                        };
                        sink.clear();
                        engine.change_state(&request, &sink).await?;
                        for event in sink.events() {
                            println!("   {} {}", event.event_type, event.activity_id);
                        }
                    }
                }

                let instance = engine.instance(instance_id).await?;
                println!("== {:?}", step);
                print_tree(&instance.tree);
                if instance.ended {
                    println!("== process instance completed");
                    break;
                }
            }
        }
        Commands::Start { file, config, vars } => {
            let engine = load_engine(config.as_deref())?;
            let definition = load_process_from_yaml(&file)?;
            let definition_id = definition.id.clone();
            engine.register_definition(definition)?;

            let initial_vars: HashMap<_, _> = vars.into_iter().collect();
            let instance_id = engine.start_process(&definition_id, initial_vars).await?;
            info!(instance_id = %instance_id, "Process instance started");
            println!("{}", instance_id);
        }
        Commands::Migrate { file, config, instance, request } => {
            let engine = load_engine(config.as_deref())?;
            engine.register_definition(load_process_from_yaml(&file)?)?;

            let content = fs::read_to_string(&request)
                .with_context(|| format!("Failed to read request {}", request.display()))?;
            let mut change: ChangeStateRequest = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse request {}", request.display()))?;
            change.process_instance_id = Some(instance);

            let events = engine.change_state(&change, &TracingSink).await?;
            info!(instance_id = %instance, events = events.len(), "Change state committed");
            print_tree(&engine.instance(instance).await?.tree);
        }
    }

    Ok(())
}
