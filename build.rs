use clap_complete::{generate_to, Shell};
use std::env;
use std::io::Error;

#[allow(dead_code)]
mod cli {
    include!("src/cli.rs");
}
use cli::make_cli_app;

fn main() -> Result<(), Error> {
    let outdir = match env::var_os("OUT_DIR") {
        None => return Ok(()),
        Some(outdir) => outdir,
    };
    println!("cargo:rerun-if-changed=src/cli.rs");

    let mut cmd = make_cli_app();
    for shell in [Shell::Bash, Shell::Zsh] {
        generate_to(shell, &mut cmd, "biowrangle", &outdir)?;
    }
    Ok(())
}
