use crate::cleanup::run_isolated;
use crate::CoreError;
use strata_store::{ContainerRecord, ContainerState, ContainerStore, Context, StoreLayout};
use tracing::{debug, warn};

/// Freezes and thaws a container's processes around a commit.
pub trait TaskControl: Send + Sync {
    /// Returns `false` when there was nothing to pause.
    fn pause(&self, ctx: &Context, container: &ContainerRecord) -> Result<bool, CoreError>;
    fn resume(&self, ctx: &Context, container: &ContainerRecord) -> Result<(), CoreError>;
}

/// Task control through `SIGSTOP` / `SIGCONT` on the recorded pid.
pub struct SignalTasks {
    layout: StoreLayout,
}

impl SignalTasks {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    fn set_state(
        &self,
        ctx: &Context,
        container: &ContainerRecord,
        state: ContainerState,
    ) -> Result<(), CoreError> {
        ContainerStore::new(&self.layout, ctx.namespace())
            .update_state(&container.id, state, container.pid)
            .map_err(CoreError::upstream("update container state"))?;
        Ok(())
    }
}

fn send_signal(pid: u32, signal: libc::c_int) -> Result<(), CoreError> {
    let pid_i32 = i32::try_from(pid)
        .map_err(|_| CoreError::Unsupported(format!("invalid pid {pid}: exceeds i32 range")))?;
    // SAFETY: kill() with a valid pid and signal is safe; pid validated via i32::try_from above.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(pid_i32, signal) };
    if ret != 0 {
        let errno = std::io::Error::last_os_error();
        if errno.raw_os_error() == Some(libc::ESRCH) {
            debug!("pid {pid} already exited");
            return Ok(());
        }
        return Err(CoreError::Io(errno));
    }
    Ok(())
}

impl TaskControl for SignalTasks {
    fn pause(&self, ctx: &Context, container: &ContainerRecord) -> Result<bool, CoreError> {
        if container.state != ContainerState::Running {
            debug!(
                "container {} is {}, not pausing",
                container.id.short(),
                container.state
            );
            return Ok(false);
        }
        if let Some(pid) = container.pid {
            debug!("sending SIGSTOP to pid {pid}");
            send_signal(pid, libc::SIGSTOP)?;
        }
        self.set_state(ctx, container, ContainerState::Paused)?;
        Ok(true)
    }

    fn resume(&self, ctx: &Context, container: &ContainerRecord) -> Result<(), CoreError> {
        if let Some(pid) = container.pid {
            debug!("sending SIGCONT to pid {pid}");
            send_signal(pid, libc::SIGCONT)?;
        }
        self.set_state(ctx, container, ContainerState::Running)
    }
}

/// Keeps a container paused for its lifetime. The resume on drop runs
/// through [`run_isolated`], so it happens even when the commit was
/// canceled.
pub struct PauseGuard<'a> {
    ctx: &'a Context,
    tasks: &'a dyn TaskControl,
    container: &'a ContainerRecord,
    paused: bool,
}

impl<'a> PauseGuard<'a> {
    pub fn pause(
        ctx: &'a Context,
        tasks: &'a dyn TaskControl,
        container: &'a ContainerRecord,
    ) -> Result<Self, CoreError> {
        let paused = tasks.pause(ctx, container)?;
        Ok(Self {
            ctx,
            tasks,
            container,
            paused,
        })
    }
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        if !self.paused {
            return;
        }
        let (tasks, container) = (self.tasks, self.container);
        run_isolated(self.ctx, |ctx| {
            if let Err(e) = tasks.resume(ctx, container) {
                warn!("failed to resume container {}: {e}", container.id.short());
            }
        });
    }
}
