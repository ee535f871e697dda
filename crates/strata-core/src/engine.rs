use crate::diff::DiffComparer;
use crate::task::{SignalTasks, TaskControl};
use crate::walking::WalkingComparer;
use crate::CoreError;
use std::path::PathBuf;
use strata_store::{
    ContainerStore, ContentStore, Context, ImageStore, LocalSnapshotter, StoreLayout,
};
use tracing::debug;

/// Entry point to a strata store.
///
/// Bundles the store layout with the shared content store, the diff comparer
/// and task control. Namespaced services (containers, images, snapshotters)
/// are opened per call from the namespace carried by the `Context`.
pub struct Engine {
    layout: StoreLayout,
    content: ContentStore,
    comparer: Box<dyn DiffComparer>,
    tasks: Box<dyn TaskControl>,
}

impl Engine {
    pub fn new(store_root: impl Into<PathBuf>) -> Self {
        let layout = StoreLayout::new(store_root.into());
        Self {
            content: ContentStore::new(layout.clone()),
            comparer: Box::new(WalkingComparer::new(ContentStore::new(layout.clone()))),
            tasks: Box::new(SignalTasks::new(layout.clone())),
            layout,
        }
    }

    #[must_use]
    pub fn with_comparer(mut self, comparer: Box<dyn DiffComparer>) -> Self {
        self.comparer = comparer;
        self
    }

    #[must_use]
    pub fn with_tasks(mut self, tasks: Box<dyn TaskControl>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Create the store directories, or verify the format of an existing store.
    pub fn initialize(&self) -> Result<(), CoreError> {
        self.layout
            .initialize()
            .map_err(CoreError::wrap("initialize store"))
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn comparer(&self) -> &dyn DiffComparer {
        self.comparer.as_ref()
    }

    pub fn tasks(&self) -> &dyn TaskControl {
        self.tasks.as_ref()
    }

    pub fn containers(&self, ctx: &Context) -> ContainerStore {
        ContainerStore::new(&self.layout, ctx.namespace())
    }

    pub fn images(&self, ctx: &Context) -> ImageStore {
        ImageStore::new(&self.layout, ctx.namespace())
    }

    /// Open the snapshotter `name` in the context's namespace.
    pub fn snapshot_service(&self, ctx: &Context, name: &str) -> Result<LocalSnapshotter, CoreError> {
        if name.is_empty() || name.contains('/') || name.starts_with('.') {
            return Err(CoreError::Unsupported(format!("snapshotter name {name:?}")));
        }
        let root = self.layout.snapshotter_dir(ctx.namespace(), name);
        debug!("opening snapshotter {name} at {}", root.display());
        LocalSnapshotter::open(name, root).map_err(CoreError::wrap("open snapshotter"))
    }
}
