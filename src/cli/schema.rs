use super::CliContext;
use crate::schema::write_schema;

pub fn execute(context: &CliContext) -> anyhow::Result<()> {
    let out_dir = context.root.join("schemas");
    let written = write_schema(&out_dir)?;
    println!("{written} node schemas written to {}", out_dir.display());
    Ok(())
}
