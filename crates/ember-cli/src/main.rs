//! Command-line entry point for the ember virtual machine: `-c <cmd>` runs
//! an inline program, a positional `<file>` runs a module named `__main`,
//! and no arguments at all drops into the REPL.

mod commands;
mod output;

use clap::{ArgAction, CommandFactory, Parser};
use ember_runtime::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ember",
    about = "ember virtual machine",
    disable_version_flag = true,
    disable_help_flag = true
)]
struct Args {
    /// Execute a string as the program
    #[arg(short = 'c', value_name = "CMD")]
    command: Option<String>,

    /// Force unbuffered standard output
    #[arg(short = 'u')]
    unbuffered: bool,

    /// Print version and exit
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    /// Print usage and exit
    #[arg(short = 'h', long = "help", action = ArgAction::SetTrue)]
    help: bool,

    /// Module to execute as `__main`
    file: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    if args.help {
        Args::command().print_help().ok();
        println!();
        std::process::exit(0);
    }
    if args.version {
        println!("ember {}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    let mut config = Config::from_env();
    if args.unbuffered {
        config.unbuffered = true;
    }

    let exit_code = match (args.command, args.file) {
        (Some(source), _) => commands::eval::execute(&source, &config),
        (None, Some(path)) => commands::run::execute(&path, &config),
        (None, None) => commands::repl::execute(&config),
    };

    std::process::exit(exit_code);
}
