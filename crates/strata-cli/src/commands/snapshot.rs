use super::{colorize_kind, fail, json_pretty, EXIT_SUCCESS};
use strata_core::{list_snapshots, snapshot_info, update_snapshot, Engine, StoreLock};
use strata_store::Context;

pub fn list(ctx: &Context, engine: &Engine, snapshotter: &str, json: bool) -> Result<u8, String> {
    let sn = engine
        .snapshot_service(ctx, snapshotter)
        .map_err(|e| fail(&e))?;
    let items = list_snapshots(ctx, &sn).map_err(|e| fail(&e))?;

    if json {
        println!("{}", json_pretty(&items)?);
    } else if items.is_empty() {
        println!("no snapshots");
    } else {
        println!("{:<40} {:<40} {}", "KEY", "PARENT", "KIND");
        for item in &items {
            println!(
                "{:<40} {:<40} {}",
                item.name,
                item.parent.as_deref().unwrap_or_default(),
                colorize_kind(&item.kind.to_string())
            );
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn info(ctx: &Context, engine: &Engine, snapshotter: &str, id: &str) -> Result<u8, String> {
    let sn = engine
        .snapshot_service(ctx, snapshotter)
        .map_err(|e| fail(&e))?;
    let details = snapshot_info(ctx, &sn, id).map_err(|e| fail(&e))?;
    println!("{}", json_pretty(&details)?);
    Ok(EXIT_SUCCESS)
}

pub fn update(
    ctx: &Context,
    engine: &Engine,
    snapshotter: &str,
    id: &str,
    labels: &[String],
) -> Result<u8, String> {
    let _lock = StoreLock::acquire(&engine.layout().lock_file())
        .map_err(|e| format!("store lock: {e}"))?;
    let sn = engine
        .snapshot_service(ctx, snapshotter)
        .map_err(|e| fail(&e))?;
    update_snapshot(ctx, &sn, id, labels).map_err(|e| fail(&e))?;
    println!("Successfully updated snapshot {id}");
    Ok(EXIT_SUCCESS)
}
