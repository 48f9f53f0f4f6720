//! kgsync CLI: dual-write knowledge graph engine.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use kg_dualwrite::config::EngineConfig;
use kg_dualwrite::consistency::{ValidationMode, ensure_consistent};
use kg_dualwrite::engine::{MutationRequest, Operation, SyncEngine};
use kg_dualwrite::space::SpaceId;
use kg_dualwrite::term::Term;
use kg_dualwrite::unit::{UnitKind, UnitState};

#[derive(Parser)]
#[command(name = "kgsync", version, about = "Dual-write knowledge graph engine")]
struct Cli {
    /// Configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for persistent storage. Overrides the config file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file.
    InitConfig {
        /// Where to write it.
        path: PathBuf,
    },

    /// Manage spaces.
    Space {
        #[command(subcommand)]
        action: SpaceAction,
    },

    /// Run a SPARQL-style update statement against a space.
    Update {
        space: SpaceId,
        /// The statement. Read from --file when omitted.
        statement: Option<String>,
        /// File holding the statement.
        #[arg(long, conflicts_with = "statement")]
        file: Option<PathBuf>,
    },

    /// Replace an outer unit with the state in a JSON file.
    Replace {
        space: SpaceId,
        /// JSON-encoded unit state.
        #[arg(long)]
        file: PathBuf,
    },

    /// Delete an outer unit.
    Delete {
        space: SpaceId,
        /// Root IRI of the unit.
        root: String,
        /// Unit kind (entity or frame).
        #[arg(long, default_value = "entity")]
        kind: UnitKind,
    },

    /// Submit a JSON-encoded mutation request.
    Submit {
        /// JSON file with the request.
        #[arg(long)]
        file: PathBuf,
    },

    /// Show the unit rooted at an IRI.
    ShowUnit {
        space: SpaceId,
        root: String,
    },

    /// Compare the relational store with the triple store.
    Validate {
        space: SpaceId,
        /// Compare full quad sets, not only counts.
        #[arg(long)]
        full: bool,
        /// Validate a single unit instead of the whole space.
        #[arg(long)]
        unit: Option<String>,
        /// Exit with an error when the stores diverge.
        #[arg(long)]
        strict: bool,
    },

    /// Rebuild the triple store from the relational store.
    Resync {
        space: SpaceId,
        /// Resync a single unit instead of the whole space.
        #[arg(long, conflicts_with = "pending")]
        unit: Option<String>,
        /// Resync only what the space's sync state lists as pending.
        #[arg(long)]
        pending: bool,
    },
}

#[derive(Subcommand)]
enum SpaceAction {
    /// Create a space in both stores.
    Create { name: SpaceId },
    /// Drop a space from both stores.
    Drop { name: SpaceId },
    /// List all spaces.
    List,
    /// Show counts and sync state of a space.
    Status { name: SpaceId },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::InitConfig { path } = &cli.command {
        let config = EngineConfig {
            data_dir: cli.data_dir.clone(),
            ..Default::default()
        };
        config.save(path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir.clone();
    }
    let engine = SyncEngine::new(config)?;

    match cli.command {
        Commands::InitConfig { .. } => {}

        Commands::Space { action } => match action {
            SpaceAction::Create { name } => {
                engine.create_space(&name)?;
                println!("Created space {name}");
            }
            SpaceAction::Drop { name } => {
                if engine.drop_space(&name)? {
                    println!("Dropped space {name}");
                } else {
                    println!("Space {name} did not exist");
                }
            }
            SpaceAction::List => {
                let spaces = engine.list_spaces()?;
                if spaces.is_empty() {
                    println!("No spaces.");
                } else {
                    println!("Spaces ({}):", spaces.len());
                    for record in &spaces {
                        println!("  {:<24} {}", record.name.as_str(), record.sync);
                    }
                }
            }
            SpaceAction::Status { name } => print_json(&engine.space_status(&name)?)?,
        },

        Commands::Update {
            space,
            statement,
            file,
        } => {
            let statement = match (statement, file) {
                (Some(statement), _) => statement,
                (None, Some(file)) => read_file(&file)?,
                (None, None) => miette::bail!("provide a statement or --file"),
            };
            print_json(&engine.execute_update(&space, &statement)?)?;
        }

        Commands::Replace { space, file } => {
            let state: UnitState = serde_json::from_str(&read_file(&file)?).into_diagnostic()?;
            let request = MutationRequest {
                space,
                root: state.root.id.clone(),
                kind: state.kind,
                operation: Operation::Replace(state),
            };
            print_json(&engine.submit(&request)?)?;
        }

        Commands::Delete { space, root, kind } => {
            let request = MutationRequest {
                space,
                root: Term::iri(root),
                kind,
                operation: Operation::Delete,
            };
            print_json(&engine.submit(&request)?)?;
        }

        Commands::Submit { file } => {
            let request: MutationRequest =
                serde_json::from_str(&read_file(&file)?).into_diagnostic()?;
            print_json(&engine.submit(&request)?)?;
        }

        Commands::ShowUnit { space, root } => {
            let report = engine.discover_unit(&space, &Term::iri(root))?;
            if report.is_empty() {
                println!("No unit rooted at {}", report.root);
                return Ok(());
            }
            println!("Unit {}", report.root);
            println!("  quads:       {}", report.quads.len());
            println!("  nodes:       {}", report.nodes.len());
            println!("  edges:       {}", report.edges.len());
            println!("  well-formed: {}", report.is_well_formed());
            for unit in &report.units {
                println!("  frame {} ({} slots)", unit.frame, unit.slots.len());
                for slot in &unit.slots {
                    println!("    slot {slot}");
                }
            }
            for quad in &report.quads {
                println!("  {quad}");
            }
        }

        Commands::Validate {
            space,
            full,
            unit,
            strict,
        } => match unit {
            Some(root) => {
                let report = engine.validate_unit(&space, &Term::iri(root))?;
                print_json(&report)?;
                if strict && !report.consistent {
                    miette::bail!("unit {} diverges between the stores", report.root);
                }
            }
            None => {
                let mode = if full {
                    ValidationMode::Full
                } else {
                    ValidationMode::Counts
                };
                let report = engine.validate(&space, mode)?;
                print_json(&report)?;
                if strict {
                    ensure_consistent(&report)?;
                }
            }
        },

        Commands::Resync {
            space,
            unit,
            pending,
        } => {
            if pending {
                print_json(&engine.resync_pending(&space)?)?;
            } else {
                let root = unit.map(Term::iri);
                print_json(&engine.resync(&space, root.as_ref())?)?;
            }
        }
    }

    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).into_diagnostic()
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{json}");
    Ok(())
}
