//! tagstore CLI
//!
//! Command-line interface for tagstore - tag classes, tags, nodes and
//! library metadata.

use std::fs::File;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tagstore_core::{Config, Library};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "tagstore")]
#[command(about = "tagstore - tagged objects in an embedded library")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tag classes
    Class {
        #[command(subcommand)]
        command: ClassCommands,
    },
    /// Manage tags
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Manage nodes and their links
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },
    /// Read or write library metadata
    Meta {
        #[command(subcommand)]
        command: MetaCommands,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ClassCommands {
    /// Create a tag class
    #[command(alias = "create")]
    Add {
        /// Class name (unique, case-insensitive)
        name: String,
        /// Value type: none, text, number, locator, node
        #[arg(short = 't', long = "type", default_value = "text")]
        value_type: String,
        /// Hide the class from listings in front ends
        #[arg(long)]
        hidden: bool,
    },
    /// List tag classes
    #[command(alias = "ls")]
    List,
    /// Remove a tag class
    #[command(alias = "rm")]
    Remove {
        name: String,
        /// Also remove the class's tags
        #[arg(long)]
        cascade: bool,
    },
    /// Rename a tag class
    Rename { name: String, new_name: String },
    /// Hide a tag class
    Hide { name: String },
    /// Unhide a tag class
    Show { name: String },
}

#[derive(Subcommand)]
enum TagCommands {
    /// Create a tag (returns the existing one for a duplicate value)
    #[command(alias = "create")]
    Add { class: String, value: String },
    /// List tags
    #[command(alias = "ls")]
    List {
        /// Class name pattern (* and ? allowed)
        #[arg(short, long)]
        class: Option<String>,
        /// Text value pattern (* and ? allowed)
        #[arg(short = 'm', long = "match")]
        pattern: Option<String>,
        /// Only tags no node links
        #[arg(long)]
        unused: bool,
    },
    /// Remove a tag
    #[command(alias = "rm")]
    Remove {
        /// Tag id
        id: String,
        /// Also remove its links
        #[arg(long)]
        cascade: bool,
    },
}

#[derive(Subcommand)]
enum NodeCommands {
    /// Create a node
    #[command(alias = "create")]
    Add {
        /// Display-name template, e.g. "{title} by {author}"
        template: String,
        /// Tags to link, as CLASS=VALUE
        #[arg(short, long)]
        tag: Vec<String>,
    },
    /// List nodes
    #[command(alias = "ls")]
    List {
        /// Display-name template pattern (* and ? allowed)
        #[arg(short, long)]
        name: Option<String>,
        /// Required tag, as CLASS=PATTERN
        #[arg(short, long)]
        tag: Vec<String>,
        /// Only nodes without tags
        #[arg(long, conflicts_with = "tag")]
        untagged: bool,
    },
    /// Show node details
    Show { id: String },
    /// Remove a node
    #[command(alias = "rm")]
    Remove {
        id: String,
        /// Also remove tags that reference the node
        #[arg(long)]
        cascade: bool,
    },
    /// Link a tag to a node
    Link {
        id: String,
        /// CLASS=VALUE
        tag: String,
    },
    /// Unlink a tag from a node
    Unlink {
        id: String,
        /// CLASS=VALUE
        tag: String,
    },
}

#[derive(Subcommand)]
enum MetaCommands {
    /// Print a value, or all entries
    Get { key: Option<String> },
    /// Set a value
    Set { key: String, value: String },
    /// Remove a value
    Unset { key: String },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, library_file, storage_dir, log_file)
        key: String,
        /// Configuration value
        value: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config = Config::load().context("Failed to load configuration")?;
    init_logging(&config);

    // Commands that don't need the library
    let command = match cli.command {
        Commands::Config { command } => {
            return match command {
                Some(ConfigCommands::Show) | None => commands::config::show(&config, &output),
                Some(ConfigCommands::Set { key, value }) => {
                    commands::config::set(key, value, &Config::config_file_path(), &output)
                }
            };
        }
        other => other,
    };

    config.ensure_data_dir()?;
    let library = Library::open_with_config(&config).with_context(|| {
        format!(
            "Failed to open library at {}",
            config.library_path().display()
        )
    })?;

    match command {
        Commands::Class { command } => handle_class_command(command, &library, &output),
        Commands::Tag { command } => handle_tag_command(command, &library, &output),
        Commands::Node { command } => handle_node_command(command, &library, &output),
        Commands::Meta { command } => handle_meta_command(command, &library, &output),
        Commands::Config { .. } => Ok(()), // Handled above
    }
}

fn handle_class_command(command: ClassCommands, library: &Library, output: &Output) -> Result<()> {
    match command {
        ClassCommands::Add {
            name,
            value_type,
            hidden,
        } => commands::class::add(library, name, value_type, hidden, output),
        ClassCommands::List => commands::class::list(library, output),
        ClassCommands::Remove { name, cascade } => {
            commands::class::remove(library, name, cascade, output)
        }
        ClassCommands::Rename { name, new_name } => {
            commands::class::rename(library, name, new_name, output)
        }
        ClassCommands::Hide { name } => commands::class::set_hidden(library, name, true, output),
        ClassCommands::Show { name } => commands::class::set_hidden(library, name, false, output),
    }
}

fn handle_tag_command(command: TagCommands, library: &Library, output: &Output) -> Result<()> {
    match command {
        TagCommands::Add { class, value } => commands::tag::add(library, class, value, output),
        TagCommands::List {
            class,
            pattern,
            unused,
        } => commands::tag::list(library, class, pattern, unused, output),
        TagCommands::Remove { id, cascade } => commands::tag::remove(library, id, cascade, output),
    }
}

fn handle_node_command(command: NodeCommands, library: &Library, output: &Output) -> Result<()> {
    match command {
        NodeCommands::Add { template, tag } => commands::node::add(library, template, tag, output),
        NodeCommands::List {
            name,
            tag,
            untagged,
        } => commands::node::list(library, name, tag, untagged, output),
        NodeCommands::Show { id } => commands::node::show(library, id, output),
        NodeCommands::Remove { id, cascade } => {
            commands::node::remove(library, id, cascade, output)
        }
        NodeCommands::Link { id, tag } => commands::node::link(library, id, tag, output),
        NodeCommands::Unlink { id, tag } => commands::node::unlink(library, id, tag, output),
    }
}

fn handle_meta_command(command: MetaCommands, library: &Library, output: &Output) -> Result<()> {
    match command {
        MetaCommands::Get { key } => commands::meta::get(library, key, output),
        MetaCommands::Set { key, value } => commands::meta::set(library, key, value, output),
        MetaCommands::Unset { key } => commands::meta::unset(library, key, output),
    }
}

/// Install a subscriber when TAGSTORE_LOG is set
///
/// Logs go to `config.log_file` when configured, stderr otherwise.
fn init_logging(config: &Config) {
    let Ok(log_level) = std::env::var("TAGSTORE_LOG") else {
        return;
    };

    let env_filter = EnvFilter::new(format!(
        "tagstore_core={},tagstore={}",
        log_level, log_level
    ));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    // Ignore error if already initialized
    match &config.log_file {
        Some(path) => {
            let log_file = match File::create(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not create log file {:?}: {}", path, e);
                    return;
                }
            };
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(log_file))
                .try_init();
            info!("Logging to {:?}", path);
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}
