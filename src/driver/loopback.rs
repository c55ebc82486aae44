//! In-process transport
//!
//! Behaves like the MidiShare library from the driver's point of view: events
//! injected through a [`LoopbackPort`] are filtered and delivered on a
//! transport-owned dispatch thread, and scheduled note-offs fire on that same
//! thread once the transport clock reaches them. The clock is either real
//! time or advanced by hand, which makes note durations testable.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::filter::EventFilter;
use super::transport::{EventSink, Scheduler, Transport};
use crate::error::{DriverError, Result};
use crate::midi::ExternalEvent;
use crate::settings::ClientMode;

/// Wait between task checks while note-offs are pending
const ACTIVE_TICK: Duration = Duration::from_millis(1);
/// Wait when nothing is scheduled (woken early by new events)
const IDLE_TICK: Duration = Duration::from_millis(50);

enum Clock {
    Realtime(Instant),
    Manual(AtomicU64),
}

impl Clock {
    fn now_ms(&self) -> u64 {
        match self {
            Clock::Realtime(start) => start.elapsed().as_millis() as u64,
            Clock::Manual(ms) => ms.load(Ordering::SeqCst),
        }
    }
}

struct ScheduledTask {
    deadline: u64,
    seq: u64,
    date: u32,
    event: ExternalEvent,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

#[derive(Default)]
struct State {
    running: bool,
    sink: Option<Arc<dyn EventSink>>,
    filter: Option<EventFilter>,
    incoming: VecDeque<ExternalEvent>,
    tasks: BinaryHeap<Reverse<ScheduledTask>>,
    next_seq: u64,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    clock: Clock,
    fail_registration: AtomicBool,
    fail_filter: AtomicBool,
}

impl Shared {
    fn now(&self) -> u32 {
        self.clock.now_ms() as u32
    }
}

/// Transport-side scheduler handed to sink callbacks
struct LoopbackScheduler {
    shared: Arc<Shared>,
}

impl Scheduler for LoopbackScheduler {
    fn now(&self) -> u32 {
        self.shared.now()
    }

    fn schedule(&self, date: u32, event: ExternalEvent) -> Result<()> {
        let now = self.shared.clock.now_ms();
        // Dates are 32-bit transport times; resolve relative to the wide clock
        let delta = date.wrapping_sub(now as u32) as i32 as i64;
        let deadline = (now as i64 + delta).max(0) as u64;

        let mut state = self.shared.state.lock();
        if !state.running {
            return Err(DriverError::Closed);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.push(Reverse(ScheduledTask {
            deadline,
            seq,
            date,
            event,
        }));
        self.shared.wake.notify_one();
        Ok(())
    }
}

pub struct LoopbackTransport {
    shared: Arc<Shared>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl LoopbackTransport {
    /// Transport driven by wall-clock time
    pub fn new() -> Self {
        Self::with_clock(Clock::Realtime(Instant::now()))
    }

    /// Transport whose clock only moves through [`LoopbackPort::advance`]
    pub fn with_manual_clock() -> Self {
        Self::with_clock(Clock::Manual(AtomicU64::new(0)))
    }

    fn with_clock(clock: Clock) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                wake: Condvar::new(),
                clock,
                fail_registration: AtomicBool::new(false),
                fail_filter: AtomicBool::new(false),
            }),
            thread_handle: None,
        }
    }

    /// Handle for injecting events from any thread
    pub fn port(&self) -> LoopbackPort {
        LoopbackPort {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Make the next `open` fail as if the library refused the client
    pub fn fail_registration(&self, fail: bool) {
        self.shared.fail_registration.store(fail, Ordering::SeqCst);
    }

    /// Make the next `install_filter` fail as if allocation failed
    pub fn fail_filter_allocation(&self, fail: bool) {
        self.shared.fail_filter.store(fail, Ordering::SeqCst);
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn open(
        &mut self,
        name: &str,
        mode: ClientMode,
        _version: i16,
        sink: Arc<dyn EventSink>,
    ) -> Result<()> {
        if self.shared.fail_registration.load(Ordering::SeqCst) {
            return Err(DriverError::Registration {
                name: name.to_string(),
                reason: "registration refused".to_string(),
            });
        }

        {
            let mut state = self.shared.state.lock();
            if state.running {
                return Err(DriverError::Registration {
                    name: name.to_string(),
                    reason: "transport already open".to_string(),
                });
            }
            state.running = true;
            state.sink = Some(sink);
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("midi-loopback".to_string())
            .spawn(move || dispatch_thread(shared));
        match spawned {
            Ok(handle) => self.thread_handle = Some(handle),
            Err(e) => {
                let mut state = self.shared.state.lock();
                state.running = false;
                state.sink = None;
                return Err(e.into());
            }
        }

        log::info!("Loopback client '{}' opened ({:?} mode)", name, mode);
        Ok(())
    }

    fn install_filter(&mut self, filter: &EventFilter) -> Result<()> {
        if self.shared.fail_filter.load(Ordering::SeqCst) {
            return Err(DriverError::FilterAllocation);
        }
        self.shared.state.lock().filter = Some(filter.clone());
        Ok(())
    }

    fn close(&mut self) {
        {
            let mut state = self.shared.state.lock();
            if !state.running && self.thread_handle.is_none() {
                return;
            }
            state.running = false;
            state.sink = None;
            state.filter = None;
            state.incoming.clear();
            if !state.tasks.is_empty() {
                log::debug!("Dropping {} pending note-off(s)", state.tasks.len());
                state.tasks.clear();
            }
            self.shared.wake.notify_all();
        }

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        log::info!("Loopback client closed");
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Injects events into a [`LoopbackTransport`]
#[derive(Clone)]
pub struct LoopbackPort {
    shared: Arc<Shared>,
}

impl LoopbackPort {
    /// Queue an event for delivery.
    /// Returns false if the transport is closed or the filter rejects it.
    pub fn send(&self, event: ExternalEvent) -> bool {
        let mut state = self.shared.state.lock();
        if !state.running {
            log::debug!("Loopback transport closed, event dropped");
            return false;
        }
        if let Some(filter) = &state.filter {
            if !filter.accepts(&event) {
                log::trace!(
                    "Filtered out: type={}, ch={}, port={}",
                    event.type_code,
                    event.channel,
                    event.port
                );
                return false;
            }
        }
        state.incoming.push_back(event.with_date(self.shared.now()));
        self.shared.wake.notify_one();
        true
    }

    /// Move a manual clock forward. No effect on a real-time clock.
    pub fn advance(&self, ms: u32) {
        match &self.shared.clock {
            Clock::Manual(now) => {
                now.fetch_add(ms as u64, Ordering::SeqCst);
                let _state = self.shared.state.lock();
                self.shared.wake.notify_one();
            }
            Clock::Realtime(_) => log::debug!("advance() ignored on real-time clock"),
        }
    }

    /// Current transport time in milliseconds
    pub fn now(&self) -> u32 {
        self.shared.now()
    }

    /// Note-offs scheduled but not yet fired
    pub fn pending_tasks(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().running
    }
}

/// Dispatch thread: the transport's callback context
fn dispatch_thread(shared: Arc<Shared>) {
    let scheduler = LoopbackScheduler {
        shared: Arc::clone(&shared),
    };

    loop {
        let (sink, incoming, due) = {
            let mut state = shared.state.lock();
            if !state.running {
                break;
            }

            let now = shared.clock.now_ms();
            let incoming: Vec<ExternalEvent> = state.incoming.drain(..).collect();
            let mut due = Vec::new();
            while state
                .tasks
                .peek()
                .map_or(false, |Reverse(task)| task.deadline <= now)
            {
                if let Some(Reverse(task)) = state.tasks.pop() {
                    due.push(task);
                }
            }

            if incoming.is_empty() && due.is_empty() {
                let tick = if state.tasks.is_empty() {
                    IDLE_TICK
                } else {
                    ACTIVE_TICK
                };
                shared.wake.wait_for(&mut state, tick);
                continue;
            }

            (state.sink.clone(), incoming, due)
        };

        let Some(sink) = sink else {
            continue;
        };
        // A panicking handler must not take the dispatch thread down with it
        for event in incoming {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                sink.receive(event, &scheduler);
            }));
            if delivered.is_err() {
                log::error!("MIDI handler panicked on {:?}", event);
            }
        }
        for task in due {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                sink.task(task.date, task.event);
            }));
            if delivered.is_err() {
                log::error!("MIDI handler panicked on note-off {:?}", task.event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::EventType;
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(2);

    #[derive(Debug, PartialEq)]
    enum Call {
        Receive(ExternalEvent),
        Task(u32, ExternalEvent),
    }

    /// Sink that reports callbacks and schedules a task per received note
    struct RecordingSink {
        tx: Mutex<mpsc::Sender<Call>>,
    }

    impl EventSink for RecordingSink {
        fn receive(&self, event: ExternalEvent, scheduler: &dyn Scheduler) {
            if event.event_type() == Some(EventType::Note) {
                let _ = scheduler.schedule(scheduler.now() + event.duration(), event);
            }
            let _ = self.tx.lock().send(Call::Receive(event));
        }

        fn task(&self, date: u32, event: ExternalEvent) {
            let _ = self.tx.lock().send(Call::Task(date, event));
        }
    }

    fn open_recording(transport: &mut LoopbackTransport) -> mpsc::Receiver<Call> {
        let (tx, rx) = mpsc::channel();
        transport
            .open(
                "recorder",
                ClientMode::Application,
                100,
                Arc::new(RecordingSink { tx: Mutex::new(tx) }),
            )
            .unwrap();
        rx
    }

    #[test]
    fn test_events_stamped_and_delivered() {
        let mut transport = LoopbackTransport::with_manual_clock();
        let rx = open_recording(&mut transport);
        let port = transport.port();

        port.advance(42);
        assert!(port.send(ExternalEvent::key_on(0, 60, 100)));

        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            Call::Receive(ExternalEvent::key_on(0, 60, 100).with_date(42))
        );
    }

    #[test]
    fn test_unfiltered_until_filter_installed() {
        let mut transport = LoopbackTransport::new();
        let _rx = open_recording(&mut transport);
        let port = transport.port();
        let chan_press = ExternalEvent::new(EventType::ChanPress.code(), 0, 0, [64, 0, 0]);

        assert!(port.send(chan_press));
        transport.install_filter(&EventFilter::new()).unwrap();
        assert!(!port.send(chan_press));
    }

    #[test]
    fn test_tasks_fire_in_date_order() {
        let mut transport = LoopbackTransport::with_manual_clock();
        let rx = open_recording(&mut transport);
        let port = transport.port();

        let long = ExternalEvent::note(0, 60, 100, 200);
        let short = ExternalEvent::note(0, 67, 100, 100);
        port.send(long);
        port.send(short);
        rx.recv_timeout(WAIT).unwrap();
        rx.recv_timeout(WAIT).unwrap();
        assert_eq!(port.pending_tasks(), 2);

        port.advance(300);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Call::Task(100, short));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Call::Task(200, long));
    }

    #[test]
    fn test_realtime_note_off() {
        let mut transport = LoopbackTransport::new();
        let rx = open_recording(&mut transport);
        let port = transport.port();

        port.send(ExternalEvent::note(0, 60, 100, 20));
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Call::Receive(_)));
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Call::Task(_, _)));
    }

    #[test]
    fn test_close_drops_pending_tasks() {
        let mut transport = LoopbackTransport::with_manual_clock();
        let rx = open_recording(&mut transport);
        let port = transport.port();

        port.send(ExternalEvent::note(0, 60, 100, 1_000));
        rx.recv_timeout(WAIT).unwrap();
        assert_eq!(port.pending_tasks(), 1);

        transport.close();
        assert!(!port.is_open());
        assert_eq!(port.pending_tasks(), 0);

        let scheduler = LoopbackScheduler {
            shared: Arc::clone(&transport.shared),
        };
        assert!(matches!(
            scheduler.schedule(0, ExternalEvent::note(0, 60, 100, 0)),
            Err(DriverError::Closed)
        ));
    }

    #[test]
    fn test_open_twice_rejected() {
        let mut transport = LoopbackTransport::new();
        let _rx = open_recording(&mut transport);
        let (tx, _rx2) = mpsc::channel();
        let second = transport.open(
            "again",
            ClientMode::Driver,
            100,
            Arc::new(RecordingSink { tx: Mutex::new(tx) }),
        );
        assert!(matches!(second, Err(DriverError::Registration { .. })));
    }
}
