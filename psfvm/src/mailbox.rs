//! A cross-thread deferred-call queue.
//!
//! Calls submitted through a [`Sender`] are executed in submission order by whoever owns the
//! [`Mailbox`], which is always the scheduler thread. This is the only way the caller thread can
//! touch machine state.

use crossbeam::channel::{self, Receiver, TryRecvError};
use easyerr::Error;
use log::trace;

/// A single deferred call. Blocking calls carry their completion signal inside the closure.
type Call<T> = Box<dyn FnOnce(&mut T) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MailboxError {
    #[error("the receiving side of the mailbox is gone")]
    Disconnected,
}

/// The submitting side of a [`Mailbox`]. Cheap to clone and usable from any thread.
pub struct Sender<T> {
    inner: channel::Sender<Call<T>>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("queued", &self.inner.len())
            .finish()
    }
}

impl<T: 'static> Sender<T> {
    /// Enqueues `action` for execution on the receiving side.
    ///
    /// If `blocking` is true, this only returns once the action has been executed. A blocking
    /// call made while the receiver is alive but not draining blocks indefinitely.
    pub fn send_call<F>(&self, action: F, blocking: bool) -> Result<(), MailboxError>
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        if blocking {
            self.call(action)
        } else {
            self.post(action)
        }
    }

    /// Enqueues `action` and returns immediately.
    pub fn post<F>(&self, action: F) -> Result<(), MailboxError>
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.inner
            .send(Box::new(action))
            .map_err(|_| MailboxError::Disconnected)
    }

    /// Enqueues `action`, waits for it to be executed and returns its result.
    pub fn call<F, R>(&self, action: F) -> Result<R, MailboxError>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (done, response) = oneshot::channel();
        self.inner
            .send(Box::new(move |target: &mut T| {
                // the caller may have given up waiting, nothing to do about it
                _ = done.send(action(target));
            }))
            .map_err(|_| MailboxError::Disconnected)?;

        // a call dropped without being executed also disconnects the response
        response.recv().map_err(|_| MailboxError::Disconnected)
    }
}

/// The receiving side of the deferred-call queue.
pub struct Mailbox<T> {
    receiver: Receiver<Call<T>>,
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("pending", &self.receiver.len())
            .finish()
    }
}

impl<T> Mailbox<T> {
    /// Creates a new mailbox and its first sender.
    pub fn new() -> (Sender<T>, Self) {
        let (sender, receiver) = channel::unbounded();
        (Sender { inner: sender }, Self { receiver })
    }

    /// Whether there are calls waiting to be received.
    #[inline(always)]
    pub fn is_pending(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Executes the oldest pending call, if any. Returns whether a call was executed.
    pub fn receive_call(&self, target: &mut T) -> bool {
        let call = match self.receiver.try_recv() {
            Ok(call) => call,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => return false,
        };

        call(target);
        true
    }

    /// Executes every pending call in submission order. Returns how many were executed.
    pub fn drain(&self, target: &mut T) -> usize {
        let mut count = 0;
        while self.is_pending() {
            if !self.receive_call(target) {
                break;
            }

            count += 1;
        }

        if count > 0 {
            trace!(target: "psfvm::mailbox", "drained {count} calls");
        }

        count
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn calls_run_in_submission_order() {
        let (sender, mailbox) = Mailbox::<Vec<u32>>::new();
        for i in 0..16 {
            sender.post(move |log| log.push(i)).unwrap();
        }

        let mut log = Vec::new();
        assert!(mailbox.is_pending());
        assert_eq!(mailbox.drain(&mut log), 16);
        assert!(!mailbox.is_pending());
        assert_eq!(log, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn posted_calls_do_not_run_on_the_caller_thread() {
        let (sender, mailbox) = Mailbox::<Vec<std::thread::ThreadId>>::new();
        sender
            .post(|ids| ids.push(std::thread::current().id()))
            .unwrap();

        let worker = std::thread::spawn(move || {
            let mut ids = Vec::new();
            mailbox.drain(&mut ids);
            (std::thread::current().id(), ids)
        });

        let (worker_id, ids) = worker.join().unwrap();
        assert_eq!(ids, vec![worker_id]);
        assert_ne!(worker_id, std::thread::current().id());
    }

    #[test]
    fn mixed_blocking_and_posted_calls_keep_order() {
        let (sender, mailbox) = Mailbox::<Vec<u32>>::new();
        let worker = std::thread::spawn(move || {
            let mut log = Vec::new();
            loop {
                mailbox.drain(&mut log);
                if log.len() >= 6 {
                    return log;
                }

                std::thread::sleep(Duration::from_millis(1));
            }
        });

        sender.post(|log| log.push(0)).unwrap();
        sender.send_call(|log| log.push(1), true).unwrap();
        sender.send_call(|log| log.push(2), false).unwrap();
        let len = sender
            .call(|log| {
                log.push(3);
                log.len()
            })
            .unwrap();
        assert_eq!(len, 4);
        sender.post(|log| log.push(4)).unwrap();
        sender.call(|log| log.push(5)).unwrap();

        assert_eq!(worker.join().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn blocking_call_fails_once_receiver_is_gone() {
        let (sender, mailbox) = Mailbox::<()>::new();
        drop(mailbox);

        assert_eq!(sender.call(|_| ()), Err(MailboxError::Disconnected));
        assert_eq!(sender.post(|_| ()), Err(MailboxError::Disconnected));
    }
}
