use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{DbError, Result, WritePolicy};

/// Single-writer gate.
///
/// A bounded channel holds exactly one token. Taking the token grants the
/// right to write; dropping the returned `WriteToken` puts it back. Readers
/// never touch the gate.
pub struct WriteGate {
    sender: Sender<()>,
    receiver: Receiver<()>,
}

/// Proof of exclusive write access, released on drop
pub struct WriteToken {
    sender: Sender<()>,
}

impl WriteGate {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(1);
        // A fresh channel with capacity 1 always has room for the token
        let _ = sender.try_send(());
        Self { sender, receiver }
    }

    /// Takes the token according to `policy`.
    pub fn acquire(&self, policy: WritePolicy) -> Result<WriteToken> {
        let taken = match policy {
            WritePolicy::FailFast => self.receiver.try_recv().is_ok(),
            WritePolicy::Block => self.receiver.recv().is_ok(),
            WritePolicy::Timeout(timeout) => self.receiver.recv_timeout(timeout).is_ok(),
        };
        if !taken {
            return Err(DbError::WriteConflict);
        }
        Ok(WriteToken {
            sender: self.sender.clone(),
        })
    }

    /// True while some writer holds the token.
    pub fn is_held(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for WriteGate {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WriteToken {
    fn drop(&mut self) {
        // Channel never fills: there is a single token
        let _ = self.sender.try_send(());
    }
}
