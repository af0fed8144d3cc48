//! Scripted in-memory transport for exercising protocol code without hardware.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{LineSettings, Queue, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Configure(LineSettings),
    Timeout(Duration),
    Break(bool),
    Dtr(bool),
    Rts(bool),
    HalfDuplex(bool),
    Flush(Queue),
    Sleep(u64),
    Read(usize),
    Write(Vec<u8>),
    Close,
}

#[derive(Default)]
pub struct MockState {
    pub rx: VecDeque<u8>,
    pub calls: Vec<Call>,
    pub fail_configure: bool,
    pub fail_reads: bool,
    pub write_limit: Option<usize>,
}

/// Cloning shares the state, so a test keeps one handle while the device owns
/// the other.
#[derive(Clone, Default)]
pub struct MockTransport(Arc<Mutex<MockState>>);

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    pub fn queue(&self, bytes: &[u8]) {
        self.state().rx.extend(bytes.iter().copied());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn boxed(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }
}

impl Transport for MockTransport {
    fn configure(&mut self, settings: &LineSettings) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Configure(*settings));
        if state.fail_configure {
            return Err(io::Error::new(io::ErrorKind::Other, "tcsetattr failed"));
        }
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.state().calls.push(Call::Timeout(timeout));
        Ok(())
    }

    fn set_break(&mut self, level: bool) -> io::Result<()> {
        self.state().calls.push(Call::Break(level));
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.state().calls.push(Call::Dtr(level));
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        self.state().calls.push(Call::Rts(level));
        Ok(())
    }

    fn set_halfduplex(&mut self, enable: bool) -> io::Result<()> {
        self.state().calls.push(Call::HalfDuplex(enable));
        Ok(())
    }

    fn flush(&mut self, queue: Queue) -> io::Result<()> {
        self.state().calls.push(Call::Flush(queue));
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        state.calls.push(Call::Read(buf.len()));
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }

        let n = buf.len().min(state.rx.len());
        for (dst, src) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        let n = state.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        state.calls.push(Call::Write(buf[..n].to_vec()));
        Ok(n)
    }

    fn sleep(&mut self, ms: u64) {
        self.state().calls.push(Call::Sleep(ms));
    }

    fn close(&mut self) -> io::Result<()> {
        self.state().calls.push(Call::Close);
        Ok(())
    }
}
