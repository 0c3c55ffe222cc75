//! Export and import of the fleet definition

use std::path::Path;

use anyhow::Result;

use super::common::{commit, open_fleet};
use super::output::Output;
use super::query::read_exchange;
use crate::domain::Mutation;
use crate::storage::ExchangeFormat;

/// Writes the declarative fleet to `dest`, or stdout for `-`
pub fn export(output: &Output, dest: &Path, format: Option<ExchangeFormat>) -> Result<()> {
    let (project, fleet) = open_fleet(output)?;

    if dest == Path::new("-") {
        let content = format.unwrap_or_default().render(&fleet.config().declarative())?;
        print!("{}", content);
        return Ok(());
    }

    let format = format
        .or_else(|| ExchangeFormat::from_path(dest))
        .unwrap_or_default();
    project.store().export(dest, format)?;
    output.success(&format!("Exported fleet to {}", dest.display()));
    Ok(())
}

/// Replaces the fleet with the contents of `src` after validating it
pub fn import(output: &Output, src: &Path, format: Option<ExchangeFormat>) -> Result<()> {
    let (_, fleet) = open_fleet(output)?;
    let config = read_exchange(src, format)?;
    output.verbose_ctx(
        "import",
        &format!(
            "{} groups, {} services, {} applications",
            config.groups.len(),
            config.service_count(),
            config.applications.len()
        ),
    );

    commit(
        output,
        &fleet,
        Mutation::ReplaceConfig(config),
        &format!("Imported fleet from {}", src.display()),
    )
}
