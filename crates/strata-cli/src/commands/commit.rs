use super::{fail, spinner, EXIT_SUCCESS};
use std::io::Write;
use strata_core::{commit_container, CommitOptions, Engine, StoreLock};
use strata_store::Context;

pub fn run(
    ctx: &Context,
    engine: &Engine,
    container: &str,
    repository: &str,
    options: &CommitOptions,
) -> Result<u8, String> {
    engine.initialize().map_err(|e| fail(&e))?;
    let _lock = StoreLock::acquire(&engine.layout().lock_file())
        .map_err(|e| format!("store lock: {e}"))?;

    let pb = spinner(&format!("committing {container}"));
    // Buffer the id so nothing reaches stdout unless the commit succeeded.
    let mut out = Vec::new();
    let result = commit_container(ctx, engine, repository, container, options, &mut out);
    pb.finish_and_clear();
    result.map_err(|e| fail(&e))?;

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(&out)
        .and_then(|()| stdout.flush())
        .map_err(|e| format!("failed to write output: {e}"))?;
    Ok(EXIT_SUCCESS)
}
