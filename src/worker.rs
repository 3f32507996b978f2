//! A pool of worker threads fed through a bounded channel.

use std::{
    io,
    panic::resume_unwind,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender};

/// A builder object that can be used to configure and spawn a [`Worker`] pool.
#[derive(Clone)]
pub struct WorkerBuilder {
    name: String,
    threads: usize,
    capacity: usize,
}

impl WorkerBuilder {
    /// Sets the name of the worker threads. Threads are numbered, as in `name-0`, `name-1`.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    /// Sets the number of threads processing messages. Defaults to 1.
    pub fn threads(self, threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            ..self
        }
    }

    /// Sets the channel capacity of the [`Worker`].
    ///
    /// By default, a capacity of 0 is used, which means that [`Worker::send`] will block until a
    /// thread is ready to take the message.
    pub fn capacity(self, capacity: usize) -> Self {
        Self { capacity, ..self }
    }

    /// Spawns the worker threads, each using `handler` to process the messages it receives.
    pub fn spawn<I, F>(self, handler: F) -> io::Result<Worker<I>>
    where
        I: Send + 'static,
        F: Fn(I) + Send + Sync + 'static,
    {
        let (sender, recv) = crossbeam::channel::bounded(self.capacity);
        let handler = Arc::new(handler);

        let mut handles = Vec::with_capacity(self.threads);
        for i in 0..self.threads {
            let name = format!("{}-{}", self.name, i);
            let recv: Receiver<I> = recv.clone();
            let handler = handler.clone();
            let handle = thread::Builder::new().name(name.clone()).spawn(move || {
                log::trace!("worker '{name}' starting");
                let _guard = ExitLog(name);
                for message in recv {
                    handler(message);
                }
            })?;
            handles.push(handle);
        }

        Ok(Worker {
            sender: Some(sender),
            handles,
        })
    }
}

struct ExitLog(String);

impl Drop for ExitLog {
    fn drop(&mut self) {
        log::trace!("worker '{}' exiting", self.0);
    }
}

/// A handle to a pool of threads that process messages of type `I`.
///
/// When dropped, the channel to the threads will be closed and the threads will be joined after
/// draining it. If a thread has panicked, the panic will be forwarded to the thread dropping the
/// `Worker`.
pub struct Worker<I: Send + 'static> {
    sender: Option<Sender<I>>,
    handles: Vec<JoinHandle<()>>,
}

impl<I: Send + 'static> Drop for Worker<I> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Worker<()> {
    /// Returns a builder that can be used to configure and spawn a [`Worker`].
    #[inline]
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder {
            name: "worker".into(),
            threads: 1,
            capacity: 0,
        }
    }
}

impl<I: Send + 'static> Worker<I> {
    /// Closes the channel and waits for all threads to exit, propagating the first panic.
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.sender.take());

        let mut payload = None;
        for handle in self.handles.drain(..) {
            if let Err(p) = handle.join() {
                payload.get_or_insert(p);
            }
        }
        if let Some(payload) = payload {
            if !thread::panicking() {
                resume_unwind(payload);
            }
        }
    }

    /// Sends a message to the worker pool.
    ///
    /// This will block until the pool is available to accept the message. Returns the message
    /// back if all threads have exited.
    pub fn send(&self, msg: I) -> Result<(), I> {
        match &self.sender {
            Some(sender) => sender.send(msg).map_err(|e| e.into_inner()),
            None => Err(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn silent_panic(payload: String) {
        resume_unwind(Box::new(payload));
    }

    #[test]
    fn processes_all_messages() {
        let count = Arc::new(AtomicUsize::new(0));
        let worker = Worker::builder()
            .name("count")
            .threads(3)
            .capacity(4)
            .spawn({
                let count = count.clone();
                move |n: usize| {
                    count.fetch_add(n, Ordering::Relaxed);
                }
            })
            .unwrap();
        for n in 1..=10 {
            worker.send(n).unwrap();
        }
        worker.join();
        assert_eq!(count.load(Ordering::Relaxed), 55);
    }

    #[test]
    fn worker_propagates_panic_on_drop() {
        let worker = Worker::builder()
            .spawn(|_: ()| silent_panic("worker panic".into()))
            .unwrap();
        worker.send(()).unwrap();
        catch_unwind(AssertUnwindSafe(|| drop(worker))).unwrap_err();
    }
}
