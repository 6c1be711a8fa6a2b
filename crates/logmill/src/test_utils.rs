// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Writers shared by the unit tests.

#![allow(clippy::unwrap_used)]

use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex};

/// In-memory fallback stream whose contents stay readable after the sink
/// takes ownership of a clone.
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn text(&self) -> String {
        String::from_utf8(self.bytes()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Gate {
    open: bool,
    parked: usize,
}

/// Writer that blocks every write until the gate is opened, standing in for
/// a hung filesystem.
#[derive(Clone, Default)]
pub(crate) struct GatedWriter {
    gate: Arc<(Mutex<Gate>, Condvar)>,
    pub(crate) inner: SharedBuffer,
}

impl GatedWriter {
    pub(crate) fn open(&self) {
        let (gate, cvar) = &*self.gate;
        gate.lock().unwrap().open = true;
        cvar.notify_all();
    }

    /// Blocks until some write is parked at the closed gate.
    pub(crate) fn wait_for_parked_write(&self) {
        let (gate, cvar) = &*self.gate;
        let _gate = cvar
            .wait_while(gate.lock().unwrap(), |gate| gate.parked == 0)
            .unwrap();
    }
}

impl Write for GatedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        {
            let (gate, cvar) = &*self.gate;
            let mut guard = gate.lock().unwrap();
            guard.parked += 1;
            cvar.notify_all();
            let mut guard = cvar.wait_while(guard, |gate| !gate.open).unwrap();
            guard.parked -= 1;
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
