use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current: u32,
    pub maximum: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevInfo {
    pub model: u32,
    pub firmware: u32,
    pub serial: u32,
}

/// Host time (unix seconds) paired with the device's own clock counter, sampled
/// at the same moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    pub systime: i64,
    pub devtime: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Progress(Progress),
    DevInfo(DevInfo),
    Clock(Clock),
}

pub type EventHandler = Box<dyn FnMut(&Event) + Send>;

/// Delivers events to the caller's handler, if any, on the calling thread.
#[derive(Default)]
pub struct EventSink {
    handler: Option<EventHandler>,
}

impl EventSink {
    pub fn set_handler(&mut self, handler: Option<EventHandler>) {
        self.handler = handler;
    }

    pub fn emit(&mut self, event: Event) {
        debug!("event {:?}", event);
        if let Some(handler) = self.handler.as_mut() {
            handler(&event);
        }
    }
}

impl Progress {
    pub fn new(maximum: u32) -> Self {
        Progress {
            current: 0,
            maximum,
        }
    }

    pub fn advance(&mut self, nbytes: usize, sink: &mut EventSink) {
        self.current = (self.current + nbytes as u32).min(self.maximum);
        sink.emit(Event::Progress(*self));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn progress_is_clamped_and_delivered() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        let mut sink = EventSink::default();
        sink.set_handler(Some(Box::new(move |e: &Event| log.lock().unwrap().push(*e))));

        let mut progress = Progress::new(10);
        progress.advance(6, &mut sink);
        progress.advance(6, &mut sink);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                Event::Progress(Progress {
                    current: 6,
                    maximum: 10
                }),
                Event::Progress(Progress {
                    current: 10,
                    maximum: 10
                }),
            ]
        );
    }
}
