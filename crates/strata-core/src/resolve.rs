use crate::CoreError;
use strata_store::{ContainerRecord, ContainerStore, Context};

/// A container matched by [`walk_containers`].
#[derive(Debug)]
pub struct Found<'a> {
    pub container: ContainerRecord,
    /// The reference as given by the user.
    pub req: &'a str,
    /// Number of containers matched by `req`.
    pub match_count: usize,
}

fn matches(container: &ContainerRecord, req: &str) -> bool {
    container.id.starts_with(req) || container.name.as_deref() == Some(req)
}

/// Resolve `req` as a full id, an id prefix or a container name and call
/// `on_found` for every match. Returns the number of matches.
///
/// An exact id or name match wins over prefix matches, so a container can
/// always be addressed unambiguously by its full id.
pub fn walk_containers(
    ctx: &Context,
    store: &ContainerStore,
    req: &str,
    on_found: &mut dyn FnMut(Found<'_>) -> Result<(), CoreError>,
) -> Result<usize, CoreError> {
    if req.is_empty() {
        return Ok(0);
    }
    ctx.check()
        .map_err(|e| CoreError::wrap("list containers")(e.into()))?;
    let all = store
        .list()
        .map_err(CoreError::wrap("list containers"))?;

    let mut found: Vec<ContainerRecord> = all
        .iter()
        .filter(|c| c.id == req || c.name.as_deref() == Some(req))
        .cloned()
        .collect();
    if found.is_empty() {
        found = all.into_iter().filter(|c| matches(c, req)).collect();
    }

    let match_count = found.len();
    for container in found {
        on_found(Found {
            container,
            req,
            match_count,
        })?;
    }
    Ok(match_count)
}
