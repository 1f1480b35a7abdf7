//! Build script rendering the `demo-deployer(1)` manual page from the clap
//! definitions into `OUT_DIR`.

use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR").map(PathBuf::from).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
    })?;

    let command = cli::Cli::command();
    let mut page = Vec::new();
    Man::new(command.clone()).render(&mut page)?;
    fs::write(out_dir.join("demo-deployer.1"), page)?;

    for subcommand in command.get_subcommands() {
        let mut sub_page = Vec::new();
        Man::new(subcommand.clone()).render(&mut sub_page)?;
        fs::write(
            out_dir.join(format!("demo-deployer-{}.1", subcommand.get_name())),
            sub_page,
        )?;
    }

    Ok(())
}
