use std::time::Duration;
use strata_store::Context;

/// Upper bound for a single best-effort cleanup action.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `action` with a context shielded from `parent`.
///
/// The action sees the parent's values (namespace) but none of its
/// cancellation, deadline or error state, and is bounded by
/// [`CLEANUP_TIMEOUT`] instead. Use it to release resources after the
/// triggering operation failed or was canceled. The action reports its own
/// failures; nothing is returned to the caller.
pub fn run_isolated<F>(parent: &Context, action: F)
where
    F: FnOnce(&Context),
{
    let ctx = parent.detached().with_timeout(CLEANUP_TIMEOUT);
    action(&ctx);
}
