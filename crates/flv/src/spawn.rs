//! Where deferred finalizers run.

/// A unit of blocking work handed off by [`FlvWriter::close`](crate::writer::FlvWriter::close).
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs deferred finalizer tasks.
///
/// Tasks are fire and forget. They block (they sleep and do file IO), so they
/// must not run on an async executor thread.
pub trait Spawner: Send + Sync {
    /// Run `task` in the background.
    fn spawn(&self, task: Task);
}

/// Runs every task on a new OS thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl Spawner for ThreadSpawner {
    fn spawn(&self, task: Task) {
        if let Err(err) = std::thread::Builder::new().name("flv-finalizer".into()).spawn(task) {
            tracing::error!(error = %err, "failed to spawn flv finalizer thread");
        }
    }
}

/// Runs tasks on the blocking pool of a tokio runtime.
#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
impl Spawner for tokio::runtime::Handle {
    fn spawn(&self, task: Task) {
        // detached, the join handle is not needed
        drop(self.spawn_blocking(task));
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn thread_spawner() {
        let (tx, rx) = mpsc::channel();
        ThreadSpawner.spawn(Box::new(move || {
            tx.send(std::thread::current().name().map(str::to_owned)).unwrap();
        }));

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("flv-finalizer"));
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn tokio_spawner() {
        let runtime = tokio::runtime::Builder::new_multi_thread().worker_threads(1).build().unwrap();

        let (tx, rx) = mpsc::channel();
        Spawner::spawn(
            runtime.handle(),
            Box::new(move || {
                tx.send(42).unwrap();
            }),
        );

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }
}
