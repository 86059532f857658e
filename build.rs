//! Renders the `aem-provision(1)` manual pages into `OUT_DIR`.
//!
//! One page covers the top-level command and one more is written per
//! lifecycle subcommand, all taken from the clap definitions in `src/cli`.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

const BIN_NAME: &str = "aem-provision";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command();
    render(&out_dir, BIN_NAME, command.clone())?;
    for sub in command.get_subcommands() {
        let page = format!("{BIN_NAME}-{}", sub.get_name());
        render(&out_dir, &page, sub.clone())?;
    }

    Ok(())
}

fn render(out_dir: &Path, page: &str, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    Man::new(command).render(&mut buffer)?;
    File::create(out_dir.join(format!("{page}.1")))?.write_all(&buffer)?;
    Ok(())
}
