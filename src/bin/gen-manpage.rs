//! Man page generator for lineio
//!
//! Writes `lineio.1` and one `lineio-<command>.1` page per subcommand.
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::{Command, CommandFactory};
use std::io;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
mod cli;

/// Render `cmd` into `<dir>/<title>.1`
fn write_page(dir: &Path, title: String, cmd: Command) -> io::Result<PathBuf> {
    let path = dir.join(format!("{}.1", title));
    let mut roff = Vec::new();
    clap_mangen::Man::new(cmd).title(title).render(&mut roff)?;
    std::fs::write(&path, roff)?;
    Ok(path)
}

fn main() -> io::Result<()> {
    let dir = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from("man"), PathBuf::from);
    std::fs::create_dir_all(&dir)?;

    let cmd = cli::Cli::command();
    let mut pages = vec![write_page(&dir, "lineio".to_string(), cmd.clone())?];
    for sub in cmd.get_subcommands() {
        let title = format!("lineio-{}", sub.get_name());
        pages.push(write_page(&dir, title, sub.clone())?);
    }

    for page in &pages {
        println!("{}", page.display());
    }
    println!("\n{} pages written; view with: man -l {}", pages.len(), pages[0].display());

    Ok(())
}
