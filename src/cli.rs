//! CLI module
//!
//! This module provides the command-line interface for fractal-focus.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io;
use std::sync::Arc;

use crate::{
    api::{serve, Client, ClientConfig, ServerConfig},
    focus::FocusState,
    generate::{CannedGenerator, GeminiConfig, GeminiGenerator, SubtaskGenerator, DEFAULT_GEMINI_MODEL},
    models::{Core, NewProject, ProjectMode, SessionView},
    store::{seed_example, MemoryStore},
    tree::{is_over_budget, sum_estimate, Task, ROOT_ID},
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API server URL
    #[arg(short, long, env = "FRACTAL_SERVER", default_value = "http://localhost:3000")]
    server: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the fractal-focus API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,

        /// Seed and open an example project
        #[arg(long)]
        example: bool,

        /// API key for subtask generation
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        gemini_api_key: Option<String>,

        /// Model used for subtask generation
        #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
        gemini_model: String,
    },

    /// List projects
    Projects,

    /// Project management commands
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Open a project and show its tree
    Open {
        /// Project id
        id: String,
    },

    /// Show the open project's tree
    Tree,

    /// Expand or collapse a task
    Toggle {
        /// Task id
        id: String,
    },

    /// Add a task
    Add {
        /// Task title
        title: String,

        /// Parent task id
        #[arg(short, long, default_value = ROOT_ID)]
        parent: String,

        /// Estimate in minutes
        #[arg(short, long)]
        estimate: Option<u32>,
    },

    /// Focus on a leaf task
    Focus {
        /// Task id
        id: String,
    },

    /// Move focus to the next leaf
    Next,

    /// Mark the focused task done
    Done,

    /// Leave focus mode
    Exit,

    /// Show the context sent when splitting a task
    Context {
        /// Task id
        id: String,
    },

    /// Ask for subtasks of a task
    Split {
        /// Task id
        id: String,

        /// Save every proposal as a subtask
        #[arg(long)]
        apply: bool,
    },

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a project
    Create {
        /// Project name
        name: String,

        /// Emoji shown next to the name
        #[arg(long)]
        emoji: Option<String>,

        /// Kind of work
        #[arg(long, value_enum)]
        mode: Option<ProjectMode>,

        /// Background for subtask generation
        #[arg(long)]
        context: Option<String>,
    },
}

/// Run the CLI application
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = create_client(&cli.server);

    match cli.command {
        Commands::Serve {
            port,
            example,
            gemini_api_key,
            gemini_model,
        } => {
            let _ = tracing_subscriber::fmt::try_init();
            println!("Starting fractal-focus API server on port {}...", port);

            let store = Arc::new(MemoryStore::new());
            let core = Core::new(store.clone(), create_generator(gemini_api_key, gemini_model));

            if example {
                println!("Populating with an example project...");
                let project = seed_example(store.as_ref()).await?;
                core.open_project(&project.id).await?;
            }

            let config = ServerConfig {
                address: ([127, 0, 0, 1], port).into(),
            };
            serve(core, config).await?;
            Ok(())
        }

        Commands::Projects => {
            let projects = client.list_projects().await?;
            if projects.is_empty() {
                println!("No projects yet. Create one with 'fractal project create <name>'");
            }
            for project in projects {
                println!("{} {}  {}", project.emoji, project.name.bold(), project.id.dimmed());
            }
            Ok(())
        }

        Commands::Project { command } => match command {
            ProjectCommands::Create {
                name,
                emoji,
                mode,
                context,
            } => {
                let new = NewProject {
                    name,
                    emoji,
                    mode,
                    context,
                    category_id: None,
                };
                let project = client.create_project(&new).await?;
                println!("Created project \"{}\" with id {}", project.name, project.id);
                Ok(())
            }
        },

        Commands::Open { id } => {
            print_view(&client.open_project(&id).await?);
            Ok(())
        }

        Commands::Tree => {
            print_view(&client.session().await?);
            Ok(())
        }

        Commands::Toggle { id } => {
            print_view(&client.toggle(&id).await?);
            Ok(())
        }

        Commands::Add {
            title,
            parent,
            estimate,
        } => {
            print_view(&client.add_task(&parent, &title, estimate).await?);
            Ok(())
        }

        Commands::Focus { id } => {
            print_focus(&client.focus(&id).await?);
            Ok(())
        }

        Commands::Next => {
            print_focus(&client.advance().await?);
            Ok(())
        }

        Commands::Done => {
            let view = client.complete_current().await?;
            if let Some(done) = view.completed.first() {
                println!("{} {}", "✓".green(), done.title);
            }
            print_focus(&view);
            Ok(())
        }

        Commands::Exit => {
            print_view(&client.exit_focus().await?);
            Ok(())
        }

        Commands::Context { id } => {
            println!("{}", client.split_context(&id).await?);
            Ok(())
        }

        Commands::Split { id, apply } => {
            let proposals = client.propose_subtasks(&id).await?;
            if proposals.is_empty() {
                println!("No usable subtasks were proposed.");
                return Ok(());
            }
            let preview = client.preview_split(&id, &proposals).await?;
            for proposal in &proposals {
                println!("  • {} {}", proposal.title, format!("{}m", proposal.estimate).dimmed());
            }
            let total = format!(
                "Total {}m of {}m",
                preview.budget.selected_total, preview.budget.target_estimate
            );
            if preview.budget.over_budget {
                println!("{}", total.red());
            } else {
                println!("{}", total.green());
            }

            if apply {
                print_view(&client.apply_subtasks(&id, &proposals).await?);
            } else {
                println!("\nRun again with --apply to save these subtasks.");
            }
            Ok(())
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(shell, &mut cmd, bin_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn create_client(server_url: &str) -> Client {
    let config = ClientConfig {
        base_url: server_url.to_string(),
    };

    Client::with_config(config)
}

fn create_generator(api_key: Option<String>, model: String) -> Arc<dyn SubtaskGenerator> {
    match api_key.filter(|key| !key.trim().is_empty()) {
        Some(key) => {
            let config = GeminiConfig {
                model,
                ..GeminiConfig::new(key)
            };
            Arc::new(GeminiGenerator::new(config))
        }
        None => {
            tracing::warn!("GEMINI_API_KEY is not set; subtask generation is disabled");
            Arc::new(CannedGenerator::unavailable("GEMINI_API_KEY is not set"))
        }
    }
}

fn print_view(view: &SessionView) {
    let Some(project) = &view.project else {
        println!("No project open. Use 'fractal open <id>'.");
        return;
    };
    println!(
        "{} {} {}",
        project.emoji,
        project.name.bold(),
        format!("({}m)", view.total_estimate).dimmed()
    );
    let current = view.current.as_ref().map(|t| t.id());
    for line in tree_lines(&view.tree, current) {
        println!("{}", line);
    }
}

/// One line per visible task, indented by depth
fn tree_lines(tree: &Task, current: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut stack: Vec<&Task> = tree.children().iter().rev().map(|c| c.as_ref()).collect();
    while let Some(task) = stack.pop() {
        let indent = "  ".repeat(task.depth().max(0) as usize + 1);
        let marker = match (task.is_leaf(), task.is_expanded()) {
            (true, _) => "•",
            (false, true) => "▾",
            (false, false) => "▸",
        };
        let title = if current == Some(task.id()) {
            task.title().yellow().bold().to_string()
        } else {
            task.title().to_string()
        };
        let mut line = format!(
            "{}{} {} {} {}",
            indent,
            marker,
            title,
            format!("{}m", task.estimate()).dimmed(),
            format!("[{}]", task.id()).dimmed()
        );
        if is_over_budget(task) {
            line.push_str(&format!(" {}", format!("{}m planned", sum_estimate(task)).red()));
        }
        lines.push(line);

        if task.is_expanded() {
            stack.extend(task.children().iter().rev().map(|c| c.as_ref()));
        }
    }
    lines
}

fn print_focus(view: &SessionView) {
    match &view.focus {
        FocusState::Focus { .. } => {
            if let Some(parent) = view.current_parent.as_ref().filter(|p| !p.is_root()) {
                println!("{}", parent.title().dimmed());
            }
            if let Some(task) = &view.current {
                println!("{} {}", task.title().bold(), format!("{}m", task.estimate()).dimmed());
            }
            if !view.has_more {
                println!("{}", "Last task in this project".dimmed());
            }
        }
        FocusState::Complete => println!("{}", "All tasks done!".green().bold()),
        FocusState::Tree => print_view(view),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlatRow;
    use crate::tree::{build_tree, toggle_expansion};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tree_lines_follow_expansion() {
        colored::control::set_override(false);
        let tree = build_tree(
            &[
                FlatRow::new("a", "A", 5),
                FlatRow::child("a1", "A1", 4, "a"),
                FlatRow::child("a2", "A2", 4, "a"),
                FlatRow::new("b", "B", 3),
            ],
            "Project",
        );

        assert_eq!(
            tree_lines(&tree, Some("a2")),
            vec![
                "  ▾ A 5m [a] 8m planned",
                "    • A1 4m [a1]",
                "    • A2 4m [a2]",
                "  • B 3m [b]",
            ]
        );

        let collapsed = toggle_expansion(&tree, "a");
        assert_eq!(
            tree_lines(&collapsed, None),
            vec!["  ▸ A 5m [a] 8m planned", "  • B 3m [b]"]
        );
    }

    #[test]
    fn test_cli_parses_serve_flags() {
        let cli = Cli::try_parse_from(["fractal", "serve", "--port", "4000", "--example"]).unwrap();
        match cli.command {
            Commands::Serve { port, example, .. } => {
                assert_eq!(port, 4000);
                assert!(example);
            }
            _ => panic!("expected serve"),
        }
    }
}
