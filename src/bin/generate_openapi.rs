//! Prints the pharmacy storage API's OpenAPI document.
//!
//!   generate_openapi                  # to stdout
//!   generate_openapi --output FILE    # to FILE (`-o` works too)

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use pharmacy_storage_service::api::handlers::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<()> {
    let target = output_path(std::env::args().skip(1))?;
    let document = ApiDoc::openapi()
        .to_pretty_json()
        .context("Failed to serialise the OpenAPI document")?;

    match target {
        Some(path) => {
            fs::write(&path, &document)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("OpenAPI document written to {}", path.display());
        }
        None => io::stdout()
            .lock()
            .write_all(document.as_bytes())
            .context("Failed to write to stdout")?,
    }
    Ok(())
}

fn output_path(mut args: impl Iterator<Item = String>) -> Result<Option<PathBuf>> {
    let Some(flag) = args.next() else {
        return Ok(None);
    };
    if flag != "--output" && flag != "-o" {
        bail!("unexpected argument {flag:?}; usage: generate_openapi [--output FILE]");
    }
    let Some(path) = args.next() else {
        bail!("{flag} requires a file path");
    };
    if let Some(extra) = args.next() {
        bail!("unexpected argument {extra:?}");
    }
    Ok(Some(PathBuf::from(path)))
}
