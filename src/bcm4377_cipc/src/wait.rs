/*
Copyright 2026  The bcm4377-cipc Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! One-shot wakeups between the interrupt path and waiting threads.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

/// A sticky event: [`Event::signal`] never blocks and a signal raised
/// before the wait starts is not lost. Repeated signals collapse into one.
#[derive(Debug)]
pub(crate) struct Event {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Event {
    pub(crate) fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    pub(crate) fn signal(&self) {
        // Full means a wakeup is already pending; the receiver lives in self.
        let _ = self.tx.try_send(());
    }

    /// Wait for a signal. Returns `false` on timeout.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }

    /// Consume a pending signal without blocking.
    pub(crate) fn try_wait(&self) -> bool {
        self.rx.try_recv().is_ok()
    }

    /// Drop any signal raised before now.
    pub(crate) fn reset(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}
