//! Transport backed by the MidiShare library
//!
//! MidiShare calls back into the driver from its own thread: the receive
//! alarm when events are waiting, and a task routine for every scheduled
//! note-off. Both look up their [`EventSink`] by the client's reference
//! number and hold their own `Arc` to it while they run, so closing the
//! client never frees a context a callback is still using.

use std::collections::HashMap;
use std::ffi::CString;
use std::os::raw::{c_char, c_long, c_short, c_ulong};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;

use super::sys::*;
use crate::driver::{EventFilter, EventSink, Scheduler, Transport};
use crate::error::{DriverError, Result};
use crate::midi::{EventType, ExternalEvent, MAX_FIELDS};
use crate::settings::{ClientMode, MIDI_CHANNELS, MIDI_PORTS};

static API: OnceCell<MidiShareApi> = OnceCell::new();

/// Callback contexts of the open clients, by MidiShare reference number
static CONTEXTS: Lazy<Mutex<HashMap<c_short, Arc<CallbackContext>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Load the MidiShare library on first use; later calls reuse it
pub fn load_library(path: Option<&Path>) -> Result<&'static MidiShareApi> {
    API.get_or_try_init(|| {
        let path = path.unwrap_or_else(|| default_library_path());
        // Safety: the path names a MidiShare build; symbols are checked on load
        unsafe { MidiShareApi::load(path) }
    })
}

struct CallbackContext {
    api: &'static MidiShareApi,
    sink: Arc<dyn EventSink>,
}

fn attach_context(refnum: c_short, ctx: Arc<CallbackContext>) {
    CONTEXTS.lock().insert(refnum, ctx);
}

fn detach_context(refnum: c_short) -> Option<Arc<CallbackContext>> {
    CONTEXTS.lock().remove(&refnum)
}

fn context(refnum: c_short) -> Option<Arc<CallbackContext>> {
    CONTEXTS.lock().get(&refnum).cloned()
}

pub struct MidiShareTransport {
    api: &'static MidiShareApi,
    refnum: c_short,
    mode: ClientMode,
    filter: MidiFilterPtr,
    slot: Option<SlotRefNum>,
}

// Safety: the filter pointer is owned by this transport and only touched from
// install_filter/close, which take &mut self.
unsafe impl Send for MidiShareTransport {}

impl MidiShareTransport {
    pub fn new(api: &'static MidiShareApi) -> Self {
        Self {
            api,
            refnum: -1,
            mode: ClientMode::Application,
            filter: ptr::null_mut(),
            slot: None,
        }
    }

    /// MidiShare reference number, negative when not registered
    pub fn refnum(&self) -> i16 {
        self.refnum
    }

    /// Output slot created in driver mode
    pub fn slot(&self) -> Option<SlotRefNum> {
        self.slot
    }

    unsafe fn register_application(&mut self, name: &CString, ctx: Arc<CallbackContext>) -> c_short {
        let refnum = (self.api.open)(name.as_ptr());
        if refnum >= 0 {
            attach_context(refnum, ctx);
            (self.api.set_rcv_alarm)(refnum, Some(receive_alarm));
            (self.api.connect)(MIDISHARE_REF, refnum, 1);
        }
        refnum
    }

    unsafe fn register_driver(
        &mut self,
        name: &CString,
        version: i16,
        ctx: Arc<CallbackContext>,
    ) -> c_short {
        let mut infos = TDriverInfos {
            name: [0; DRIVER_NAME_LEN],
            version,
            slots: 0,
            reserved: [0; 2],
        };
        for (dst, &src) in infos
            .name
            .iter_mut()
            .zip(name.as_bytes().iter().take(DRIVER_NAME_LEN - 1))
        {
            *dst = src as c_char;
        }
        let mut op = TDriverOperation {
            wakeup: Some(driver_wakeup),
            sleep: Some(driver_sleep),
            reserved: [0; 3],
        };

        let refnum = (self.api.register_driver)(&mut infos, &mut op);
        if refnum >= 0 {
            self.slot = Some((self.api.add_slot)(refnum, name.as_ptr(), MIDI_OUTPUT_SLOT));
            attach_context(refnum, ctx);
            (self.api.set_rcv_alarm)(refnum, Some(receive_alarm));
        }
        refnum
    }
}

impl Transport for MidiShareTransport {
    fn open(
        &mut self,
        name: &str,
        mode: ClientMode,
        version: i16,
        sink: Arc<dyn EventSink>,
    ) -> Result<()> {
        let cname = CString::new(name)
            .map_err(|e| DriverError::Settings(format!("invalid client name: {}", e)))?;

        self.mode = mode;
        let ctx = Arc::new(CallbackContext {
            api: self.api,
            sink,
        });

        let refnum = unsafe {
            match mode {
                ClientMode::Application => self.register_application(&cname, ctx),
                ClientMode::Driver => self.register_driver(&cname, version, ctx),
            }
        };

        if refnum < 0 {
            return Err(DriverError::Registration {
                name: name.to_string(),
                reason: format!("MidiShare returned {}", refnum),
            });
        }

        self.refnum = refnum;
        log::info!("MidiShare client '{}' registered as ref {}", name, refnum);
        Ok(())
    }

    fn install_filter(&mut self, filter: &EventFilter) -> Result<()> {
        let api = self.api;
        unsafe {
            let handle = (api.new_filter)();
            if handle.is_null() {
                return Err(DriverError::FilterAllocation);
            }

            for i in 0..MIDI_PORTS {
                (api.accept_port)(handle, i as c_short, filter.port_accepted(i as u8) as Boolean);
                (api.accept_type)(handle, i as c_short, filter.type_accepted(i as u8) as Boolean);
            }
            for chan in 0..MIDI_CHANNELS {
                (api.accept_chan)(handle, chan as c_short, filter.channel_accepted(chan as u8) as Boolean);
            }

            (api.set_filter)(self.refnum, handle);

            // The client now uses the new filter; release the one it replaced
            if !self.filter.is_null() {
                (api.free_filter)(self.filter);
            }
            self.filter = handle;
        }
        Ok(())
    }

    fn close(&mut self) {
        unsafe {
            if !self.filter.is_null() {
                (self.api.free_filter)(self.filter);
                self.filter = ptr::null_mut();
            }

            if self.refnum > 0 {
                // Callbacks already running keep their own Arc to the context
                detach_context(self.refnum);
                match self.mode {
                    ClientMode::Application => (self.api.close)(self.refnum),
                    ClientMode::Driver => (self.api.unregister_driver)(self.refnum),
                }
                log::info!("MidiShare client ref {} closed", self.refnum);
            }
            self.refnum = -1;
            self.slot = None;
        }
    }
}

impl Drop for MidiShareTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Scheduler view of the MidiShare clock for one client
struct MidiShareScheduler {
    api: &'static MidiShareApi,
    refnum: c_short,
}

impl Scheduler for MidiShareScheduler {
    fn now(&self) -> u32 {
        unsafe { (self.api.get_time)() as u32 }
    }

    fn schedule(&self, date: u32, event: ExternalEvent) -> Result<()> {
        let (a1, a2, a3) = pack_note(&event);
        let task = unsafe {
            (self.api.task)(
                Some(note_off_task),
                date as c_ulong,
                self.refnum,
                a1,
                a2,
                a3,
            )
        };
        if task.is_null() {
            return Err(DriverError::Schedule { date });
        }
        Ok(())
    }
}

/// Pack a note into the three integer task arguments
fn pack_note(event: &ExternalEvent) -> (c_long, c_long, c_long) {
    (
        ((event.port as c_long) << 8) | event.channel as c_long,
        event.pitch() as c_long,
        event.velocity() as c_long,
    )
}

fn unpack_note(date: u32, a1: c_long, a2: c_long, a3: c_long) -> ExternalEvent {
    ExternalEvent::note((a1 & 0xFF) as u8, a2 as u8, a3 as u8, 0)
        .with_port(((a1 >> 8) & 0xFF) as u8)
        .with_date(date)
}

/// Copy a MidiShare event into an owned record
unsafe fn read_event(api: &MidiShareApi, ev: MidiEvPtr) -> ExternalEvent {
    let (ty, port, chan, date) = event_header(ev);
    let count = EventType::from_code(ty).map_or(0, |t| t.field_count());
    let mut fields = [0u32; MAX_FIELDS];
    for (index, field) in fields.iter_mut().enumerate().take(count) {
        *field = (api.get_field)(ev, index as c_long) as u32;
    }
    ExternalEvent::new(ty, port, chan, fields).with_date(date)
}

unsafe extern "C" fn receive_alarm(refnum: c_short) {
    let Some(ctx) = context(refnum) else {
        return;
    };
    let api = ctx.api;
    let scheduler = MidiShareScheduler { api, refnum };

    loop {
        let ev = (api.get_ev)(refnum);
        if ev.is_null() {
            break;
        }
        let event = read_event(api, ev);
        (api.free_ev)(ev);

        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
            ctx.sink.receive(event, &scheduler);
        }));
        if delivered.is_err() {
            log::error!("MIDI handler panicked on {:?}", event);
        }
    }
}

unsafe extern "C" fn note_off_task(date: c_long, refnum: c_short, a1: c_long, a2: c_long, a3: c_long) {
    let Some(ctx) = context(refnum) else {
        return;
    };

    let date = date as u32;
    let event = unpack_note(date, a1, a2, a3);
    let delivered = panic::catch_unwind(AssertUnwindSafe(|| ctx.sink.task(date, event)));
    if delivered.is_err() {
        log::error!("MIDI handler panicked on note-off {:?}", event);
    }
}

unsafe extern "C" fn driver_wakeup(refnum: c_short) {
    if let Some(api) = API.get() {
        (api.connect)(MIDISHARE_DRV_REF, refnum, 1);
        (api.connect)(refnum, MIDISHARE_DRV_REF, 1);
    }
}

unsafe extern "C" fn driver_sleep(_refnum: c_short) {}
