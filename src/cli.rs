use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use gistindex::SearchFilter;

#[derive(Debug, Parser)]
#[command(
    name = "gistindex",
    about = "Index and search gists with an embedded or remote engine"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show the resolved indexer configuration
    Status(StatusArgs),
    /// Index gist documents from a JSON file
    Add(AddArgs),
    /// Remove a gist from the index
    Remove {
        /// ID of the gist to remove
        id: u64,
    },
    /// Search gists
    Search(SearchArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Store a setting (e.g. `index embedded`)
    Set {
        key: String,
        value: String,
    },
    /// Delete a stored setting
    Unset {
        key: String,
    },
    /// List stored settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Add --

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// JSON array or JSON lines of documents; `-` reads stdin
    pub input: PathBuf,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Free text matched against gist content
    #[arg(default_value = "")]
    pub query: String,

    /// Search on behalf of this user ID (0 sees public gists only)
    #[arg(short, long, default_value = "0")]
    pub user: u64,

    /// Page number, starting at 1
    #[arg(short, long, default_value = "1")]
    pub page: usize,

    /// Match against every field at once; per-field filters are ignored
    #[arg(long)]
    pub all: Option<String>,

    #[arg(long)]
    pub owner: Option<String>,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub content: Option<String>,

    #[arg(long)]
    pub filename: Option<String>,

    /// File extension, with or without the leading dot
    #[arg(long)]
    pub extension: Option<String>,

    #[arg(long)]
    pub language: Option<String>,

    #[arg(long)]
    pub topic: Option<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchArgs {
    pub fn filter(&self) -> SearchFilter {
        let value = |v: &Option<String>| v.clone().unwrap_or_default();
        SearchFilter {
            all: value(&self.all),
            owner_name: value(&self.owner),
            title: value(&self.title),
            content: value(&self.content),
            filename: value(&self.filename),
            extension: value(&self.extension),
            language: value(&self.language),
            topic: value(&self.topic),
        }
    }
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "gistindex",
            &mut std::io::stdout(),
        );
    }
}
