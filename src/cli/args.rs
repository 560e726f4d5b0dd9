//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser, Debug)]
#[command(name = "dirwatch", version, styles = clap_cargo_style())]
#[command(about = "Watch directory trees for created, modified and deleted files")]
pub struct Cli {
    /// Use this settings file instead of .dirwatch/settings.toml
    #[arg(long, global = true, env = "DIRWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create .dirwatch/settings.toml in the current directory
    Init {
        /// Overwrite an existing settings file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the active settings
    Config,

    /// Print create/modify/delete events under a directory until interrupted
    Watch {
        /// Directory to watch
        path: PathBuf,

        /// Only watch the directory itself, not its subdirectories
        #[arg(long)]
        no_recursive: bool,

        /// Glob of paths to ignore (repeatable, replaces configured patterns)
        #[arg(short, long = "ignore", value_name = "GLOB")]
        ignore: Vec<String>,
    },

    /// List everything below a directory
    Walk {
        /// Directory to walk
        path: PathBuf,

        /// Object types to print: file, dir, symlink, fifo, socket, char, block, all
        #[arg(short = 't', long = "type", value_name = "TYPE", default_value = "all")]
        types: Vec<String>,

        /// Glob of paths to skip (repeatable)
        #[arg(short, long = "ignore", value_name = "GLOB")]
        ignore: Vec<String>,
    },
}
