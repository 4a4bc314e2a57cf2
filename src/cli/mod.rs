//! CLI subcommands — init, validate, resolve, deps, graph, run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Subcommand;

use crate::core::config::{Config, ConfigFile};
use crate::core::loader::Loader;
use crate::extract;
use crate::transport::local::{dir_locator, FileFetcher};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a module root with a sample configuration
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a halyard.yaml configuration file
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "halyard.yaml")]
        config: PathBuf,
    },

    /// Resolve an identifier to its canonical locator
    Resolve {
        /// Module identifier
        id: String,

        /// Referencing locator (default: the session context)
        #[arg(short, long)]
        reference: Option<String>,

        /// Module root directory
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Configuration file (default: <root>/halyard.yaml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the dependency identifiers extracted from a source file
    Deps {
        /// Source file to scan
        file: PathBuf,
    },

    /// Load entry modules and print the dependency graph with statuses
    Graph {
        /// Entry module identifiers
        #[arg(required = true)]
        entries: Vec<String>,

        /// Module root directory
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Configuration file (default: <root>/halyard.yaml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Load, compile, and print the exports of entry modules
    Run {
        /// Entry module identifiers
        #[arg(required = true)]
        entries: Vec<String>,

        /// Module root directory
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Configuration file (default: <root>/halyard.yaml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Dispatch a CLI command.
pub async fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Resolve {
            id,
            reference,
            root,
            config,
        } => cmd_resolve(&id, reference.as_deref(), &root, config.as_deref()),
        Commands::Deps { file } => cmd_deps(&file),
        Commands::Graph {
            entries,
            root,
            config,
        } => cmd_graph(&entries, &root, config.as_deref()).await,
        Commands::Run {
            entries,
            root,
            config,
        } => cmd_run(&entries, &root, config.as_deref()).await,
    }
}

/// Build a loader session rooted at `root`, applying `<root>/halyard.yaml`
/// (or an explicit config file) when present.
fn build_session(root: &Path, config_path: Option<&Path>) -> Result<Arc<Loader>, String> {
    let root = root
        .canonicalize()
        .map_err(|e| format!("cannot resolve root {}: {}", root.display(), e))?;
    let base = dir_locator(&root);
    let config = Config {
        base: base.clone(),
        context: base,
        ..Config::default()
    };
    let loader = Loader::with_config(config, Arc::new(FileFetcher::new(&root)));

    let file = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = root.join("halyard.yaml");
            default.exists().then_some(default)
        }
    };
    if let Some(path) = file {
        let patch = ConfigFile::load(&path)
            .and_then(ConfigFile::into_patch)
            .map_err(|e| e.to_string())?;
        loader.configure(patch);
    }
    Ok(loader)
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("halyard.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;

    let template = r#"# Halyard session configuration.
alias: {}
vars: {}
map: []
preload: []
charset: "utf-8"
"#;
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    let main = r#"{"dependencies": ["./greet"], "exports": {"entry": true}}
"#;
    let greet = r#"{"exports": "hello"}
"#;
    std::fs::write(path.join("main.js"), main)
        .map_err(|e| format!("cannot write main.js: {}", e))?;
    std::fs::write(path.join("greet.js"), greet)
        .map_err(|e| format!("cannot write greet.js: {}", e))?;

    println!("Initialized module root at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}", path.join("main.js").display());
    println!("  Created: {}", path.join("greet.js").display());
    Ok(())
}

fn cmd_validate(config: &Path) -> Result<(), String> {
    let file = ConfigFile::load(config).map_err(|e| e.to_string())?;
    let aliases = file.alias.len();
    let vars = file.vars.len();
    let rules = file.map.len();
    let preloads = file.preload.len();
    file.into_patch().map_err(|e| e.to_string())?;

    println!(
        "OK: {} ({} aliases, {} vars, {} map rules, {} preloads)",
        config.display(),
        aliases,
        vars,
        rules,
        preloads
    );
    Ok(())
}

fn cmd_resolve(
    id: &str,
    reference: Option<&str>,
    root: &Path,
    config: Option<&Path>,
) -> Result<(), String> {
    let loader = build_session(root, config)?;
    let locator = loader.resolve(id, reference).map_err(|e| e.to_string())?;
    println!("{locator}");
    Ok(())
}

fn cmd_deps(file: &Path) -> Result<(), String> {
    let source = std::fs::read_to_string(file)
        .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
    for id in extract::extract(&source) {
        println!("{id}");
    }
    Ok(())
}

async fn cmd_graph(entries: &[String], root: &Path, config: Option<&Path>) -> Result<(), String> {
    let loader = build_session(root, config)?;
    let ids: Vec<&str> = entries.iter().map(String::as_str).collect();
    let locators = loader.ensure(&ids).await.map_err(|e| e.to_string())?;

    for locator in &locators {
        let mut visited = HashSet::new();
        print_tree(&loader, locator, 0, &mut visited);
    }
    println!();
    println!("{} modules known", loader.modules().len());
    Ok(())
}

fn print_tree(loader: &Arc<Loader>, locator: &str, depth: usize, visited: &mut HashSet<String>) {
    let indent = "  ".repeat(depth);
    let status = loader
        .module(locator)
        .map(|m| m.status.to_string())
        .unwrap_or_else(|| "unregistered".to_string());

    if !visited.insert(locator.to_string()) {
        println!("{indent}{locator} [{status}] (repeat)");
        return;
    }
    println!("{indent}{locator} [{status}]");

    let dependencies = loader
        .module(locator)
        .map(|m| m.dependencies)
        .unwrap_or_default();
    for dep in dependencies {
        print_tree(loader, &dep, depth + 1, visited);
    }
}

async fn cmd_run(entries: &[String], root: &Path, config: Option<&Path>) -> Result<(), String> {
    let loader = build_session(root, config)?;
    let ids: Vec<&str> = entries.iter().map(String::as_str).collect();
    let exports = loader.load(&ids).await.map_err(|e| e.to_string())?;

    for (id, value) in entries.iter().zip(exports) {
        let rendered =
            serde_json::to_string_pretty(&value).map_err(|e| format!("render error: {}", e))?;
        println!("{id} = {rendered}");
    }
    Ok(())
}
