//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use tagstore_core::{Tag, TagClass};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// A node as shown to the user: rendered name plus linked tags
#[derive(Debug, Serialize)]
pub struct NodeView {
    pub id: i64,
    pub display_name: String,
    pub template: String,
    pub tags: Vec<Tag>,
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("Cannot encode output: {}", e),
        }
    }

    /// Print a list of tag classes with their tag counts
    pub fn print_classes(&self, classes: &[(TagClass, u64)]) {
        match self.format {
            OutputFormat::Human => {
                if classes.is_empty() {
                    println!("No tag classes found.");
                    return;
                }
                for (class, count) in classes {
                    let hidden = if class.hidden { " (hidden)" } else { "" };
                    println!(
                        "{:<20} {:<15} {} tag(s){}",
                        truncate(class.name(), 20),
                        class.value_type(),
                        count,
                        hidden
                    );
                }
                println!("\n{} class(es)", classes.len());
            }
            OutputFormat::Json => {
                let rows: Vec<_> = classes
                    .iter()
                    .map(|(class, count)| {
                        serde_json::json!({
                            "id": class.identity,
                            "name": class.name(),
                            "value_type": class.value_type(),
                            "hidden": class.hidden,
                            "tags": count
                        })
                    })
                    .collect();
                self.json(&rows);
            }
            OutputFormat::Quiet => {
                for (class, _) in classes {
                    println!("{}", class.name());
                }
            }
        }
    }

    /// Print a single tag
    pub fn print_tag(&self, tag: &Tag) {
        match self.format {
            OutputFormat::Human => {
                println!("{} | {} = {}", tag.identity, tag.class().name(), tag.value());
            }
            OutputFormat::Json => self.json(tag),
            OutputFormat::Quiet => println!("{}", tag.identity.id()),
        }
    }

    /// Print a list of tags
    pub fn print_tags(&self, tags: &[Tag]) {
        match self.format {
            OutputFormat::Human => {
                if tags.is_empty() {
                    println!("No tags found.");
                    return;
                }
                for tag in tags {
                    println!(
                        "{:>6} | {:<20} | {}",
                        tag.identity.to_string(),
                        truncate(tag.class().name(), 20),
                        truncate(&tag.value().to_string(), 50)
                    );
                }
                println!("\n{} tag(s)", tags.len());
            }
            OutputFormat::Json => self.json(tags),
            OutputFormat::Quiet => {
                for tag in tags {
                    println!("{}", tag.identity.id());
                }
            }
        }
    }

    /// Print a single node with its tags
    pub fn print_node(&self, node: &NodeView) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:        #{}", node.id);
                println!("Name:      {}", node.display_name);
                println!("Template:  {}", node.template);
                if node.tags.is_empty() {
                    println!("Tags:      (none)");
                } else {
                    println!("Tags:");
                    for tag in &node.tags {
                        println!("  {} = {}", tag.class().name(), tag.value());
                    }
                }
            }
            OutputFormat::Json => self.json(node),
            OutputFormat::Quiet => println!("{}", node.id),
        }
    }

    /// Print a list of nodes
    pub fn print_nodes(&self, nodes: &[NodeView]) {
        match self.format {
            OutputFormat::Human => {
                if nodes.is_empty() {
                    println!("No nodes found.");
                    return;
                }
                for node in nodes {
                    let tags_indicator = if node.tags.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", node.tags.len())
                    };
                    println!(
                        "{:>6} | {}{}",
                        format!("#{}", node.id),
                        truncate(&node.display_name, 60),
                        tags_indicator
                    );
                }
                println!("\n{} node(s)", nodes.len());
            }
            OutputFormat::Json => self.json(nodes),
            OutputFormat::Quiet => {
                for node in nodes {
                    println!("{}", node.id);
                }
            }
        }
    }

    /// Print one meta entry
    pub fn print_meta(&self, key: &str, value: Option<&str>) {
        match self.format {
            OutputFormat::Human => match value {
                Some(v) => println!("{} = {}", key, v),
                None => println!("{} is not set", key),
            },
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"key": key, "value": value}));
            }
            OutputFormat::Quiet => {
                if let Some(v) = value {
                    println!("{}", v);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
