//! Renders the `wsman-gateway(8)` manual page from the CLI definition.

use std::{fs, path::Path};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

const MAN_DIR: &str = "target/generated-man";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");

    let name = env!("CARGO_PKG_NAME");
    let man = Man::new(cli::Cli::command())
        .section("8")
        .manual("System Manager's Manual")
        .source(concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")));

    let mut page = Vec::new();
    man.render(&mut page)?;
    let dir = Path::new(MAN_DIR);
    fs::create_dir_all(dir)?;
    fs::write(dir.join(format!("{name}.8")), page)?;
    Ok(())
}
