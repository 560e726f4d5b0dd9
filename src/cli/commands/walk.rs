//! Walk command.

use std::path::Path;

use anyhow::{Context, bail};
use dirwatch::walker::{self, FileTypes};

/// Combine `--type` names into one mask.
fn parse_types(names: &[String]) -> anyhow::Result<FileTypes> {
    let mut types = FileTypes::empty();
    for name in names {
        match FileTypes::from_cli_name(name) {
            Some(t) => types |= t,
            None => bail!("unknown type '{name}'"),
        }
    }
    if types.is_empty() {
        types = FileTypes::ALL;
    }
    Ok(types)
}

/// Run walk command - print every matching path below `path`.
pub fn run_walk(path: &Path, type_names: &[String], ignore: &[String]) -> anyhow::Result<()> {
    let types = parse_types(type_names)?;
    let filter = walker::pattern_filter(ignore)?;

    let mut count = 0usize;
    walker::walk(path, types, |p| filter(p), |p| {
        println!("{}", p.display());
        count += 1;
        Ok(())
    })
    .with_context(|| format!("walking {}", path.display()))?;

    tracing::debug!("[walk] {count} paths under {}", path.display());
    Ok(())
}
