//! Running a tail loop on its own thread.

use super::tail_loop::TailLoop;
use super::{StopHandle, TailStats};
use crate::error::{Result, TailError};
use crate::source::Connector;
use crate::types::ChangeEvent;
use std::thread::JoinHandle;
use std::time::Duration;

/// Handle to a tail loop running on a background thread.
///
/// Events arrive on a bounded channel; a slow consumer blocks the loop
/// rather than losing events.
pub struct TailHandle {
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<ChangeEvent>,
    stop: StopHandle,
    join: Option<JoinHandle<Result<TailStats>>>,
}

impl TailHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<ChangeEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<ChangeEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<ChangeEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Ask the loop to stop at its next cycle boundary.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for the loop thread and return its result.
    ///
    /// Does not stop the loop; call [`stop`](Self::stop) first unless the
    /// loop terminates on its own (fast-stop or a fatal error). Events still
    /// buffered in the channel are dropped with the handle.
    pub fn join(mut self) -> Result<TailStats> {
        match self.join.take() {
            Some(join) => join.join().map_err(|_| TailError::Panicked)?,
            None => Err(TailError::Panicked),
        }
    }
}

impl<C> TailLoop<C>
where
    C: Connector + Send + 'static,
{
    /// Move the loop onto a named thread, delivering into a channel of
    /// `buffer_size` events.
    pub fn spawn(mut self, buffer_size: usize) -> Result<TailHandle> {
        let (mut sender, receiver) = crossbeam_channel::bounded(buffer_size);
        let stop = self.stop_handle();

        let join = std::thread::Builder::new()
            .name("oplog-tail".into())
            .spawn(move || self.run(&mut sender))?;

        Ok(TailHandle {
            receiver,
            stop,
            join: Some(join),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TailConfig;
    use crate::oplog::{MemberRole, ReplicaMember, ReplicaSetConnector};
    use crate::types::{Document, Position};
    use tempfile::TempDir;

    #[test]
    fn test_spawned_loop_delivers_and_stops() {
        let dir = TempDir::new().unwrap();
        let member = ReplicaMember::create(dir.path(), "a", MemberRole::Primary).unwrap();
        for ts in [100u64, 105, 110] {
            member.append_op(Position(ts), "app.users", "i", Document::new()).unwrap();
        }

        let config = TailConfig::new(dir.path().display().to_string())
            .with_start_position(Position::MIN)
            .with_idle_timeout(Duration::from_millis(20));
        let handle = TailLoop::new(config, ReplicaSetConnector::new())
            .unwrap()
            .spawn(16)
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(handle.recv_timeout(Duration::from_secs(5)).unwrap().ts());
        }
        assert_eq!(seen, vec![Position(100), Position(105), Position(110)]);

        handle.stop();
        let stats = handle.join().unwrap();
        assert_eq!(stats.events_delivered, 3);
        assert_eq!(stats.position, Some(Position(110)));
    }

    #[test]
    fn test_dropped_receiver_ends_loop() {
        let dir = TempDir::new().unwrap();
        let member = ReplicaMember::create(dir.path(), "a", MemberRole::Primary).unwrap();
        member.append_op(Position(1), "app.users", "i", Document::new()).unwrap();
        member.append_op(Position(2), "app.users", "i", Document::new()).unwrap();

        let config = TailConfig::new(dir.path().display().to_string())
            .with_start_position(Position::MIN)
            .with_idle_timeout(Duration::from_millis(20));
        let mut handle = TailLoop::new(config, ReplicaSetConnector::new())
            .unwrap()
            .spawn(1)
            .unwrap();

        let (_, orphan) = crossbeam_channel::bounded(1);
        drop(std::mem::replace(&mut handle.receiver, orphan));

        assert!(matches!(handle.join(), Err(TailError::Sink(_))));
    }
}
