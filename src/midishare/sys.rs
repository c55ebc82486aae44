//! MidiShare FFI structures and entry points
//!
//! These match the public MidiShare C API (MidiShare.h). Only the calls the
//! driver needs are bound. The library is loaded at runtime, once per process.

use std::os::raw::{c_char, c_int, c_long, c_short, c_uchar, c_ulong};
use std::path::Path;

use libloading::{Library, Symbol};

use crate::error::{DriverError, Result};

// =============================================================================
// Types
// =============================================================================

/// Fixed header of a MidiShare event. The type-specific `info` union
/// follows it and is only read through `MidiGetField`.
#[repr(C)]
pub struct TMidiEv {
    pub link: *mut TMidiEv,
    pub date: c_ulong,
    pub ev_type: u8,
    pub ref_num: u8,
    pub port: u8,
    pub chan: u8,
}
pub type MidiEvPtr = *mut TMidiEv;

/// Opaque MidiShare filter (`MidiFilterPtr`)
#[repr(C)]
pub struct TFilter {
    _private: [u8; 0],
}
pub type MidiFilterPtr = *mut TFilter;

pub type Boolean = c_uchar;

pub type RcvAlarmPtr = Option<unsafe extern "C" fn(refnum: c_short)>;
pub type TaskPtr =
    Option<unsafe extern "C" fn(date: c_long, refnum: c_short, a1: c_long, a2: c_long, a3: c_long)>;
pub type WakeupPtr = Option<unsafe extern "C" fn(refnum: c_short)>;
pub type SleepPtr = Option<unsafe extern "C" fn(refnum: c_short)>;

/// Reference number of the MidiShare physical driver
pub const MIDISHARE_DRV_REF: c_short = 127;
/// Reference number of the MidiShare application itself
pub const MIDISHARE_REF: c_short = 0;

/// `SlotDirection` is a C enum, passed as int
pub type SlotDirection = c_int;
pub const MIDI_OUTPUT_SLOT: SlotDirection = 2;

pub const DRIVER_NAME_LEN: usize = 32;

#[repr(C)]
pub struct TDriverInfos {
    pub name: [c_char; DRIVER_NAME_LEN],
    pub version: c_short,
    pub slots: c_short,
    pub reserved: [c_long; 2],
}

#[repr(C)]
pub struct TDriverOperation {
    pub wakeup: WakeupPtr,
    pub sleep: SleepPtr,
    pub reserved: [c_long; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SlotRefNum {
    pub drv_ref: c_short,
    pub slot_ref: c_short,
}

// =============================================================================
// Entry points
// =============================================================================

pub struct MidiShareApi {
    /// Keeps the function pointers below valid
    pub(crate) _library: Option<Library>,

    pub open: unsafe extern "C" fn(name: *const c_char) -> c_short,
    pub close: unsafe extern "C" fn(refnum: c_short),
    pub register_driver:
        unsafe extern "C" fn(infos: *mut TDriverInfos, op: *mut TDriverOperation) -> c_short,
    pub unregister_driver: unsafe extern "C" fn(refnum: c_short),
    pub add_slot: unsafe extern "C" fn(refnum: c_short, name: *const c_char, direction: SlotDirection) -> SlotRefNum,

    pub set_rcv_alarm: unsafe extern "C" fn(refnum: c_short, alarm: RcvAlarmPtr),
    pub connect: unsafe extern "C" fn(src: c_short, dest: c_short, state: Boolean),

    pub new_filter: unsafe extern "C" fn() -> MidiFilterPtr,
    pub free_filter: unsafe extern "C" fn(filter: MidiFilterPtr),
    pub accept_port: unsafe extern "C" fn(filter: MidiFilterPtr, port: c_short, state: Boolean),
    pub accept_chan: unsafe extern "C" fn(filter: MidiFilterPtr, chan: c_short, state: Boolean),
    pub accept_type: unsafe extern "C" fn(filter: MidiFilterPtr, ty: c_short, state: Boolean),
    pub set_filter: unsafe extern "C" fn(refnum: c_short, filter: MidiFilterPtr),

    pub get_ev: unsafe extern "C" fn(refnum: c_short) -> MidiEvPtr,
    pub free_ev: unsafe extern "C" fn(ev: MidiEvPtr),
    pub get_field: unsafe extern "C" fn(ev: MidiEvPtr, field: c_long) -> c_long,
    pub get_time: unsafe extern "C" fn() -> c_ulong,
    pub task: unsafe extern "C" fn(
        routine: TaskPtr,
        date: c_ulong,
        refnum: c_short,
        a1: c_long,
        a2: c_long,
        a3: c_long,
    ) -> MidiEvPtr,
}

/// Resolve one entry point and copy out the function pointer
unsafe fn symbol<T: Copy>(library: &Library, name: &str) -> Result<T> {
    let symbol: Symbol<T> = library
        .get(name.as_bytes())
        .map_err(|e| DriverError::LibraryLoad(format!("missing symbol {}: {}", name, e)))?;
    Ok(*symbol)
}

impl MidiShareApi {
    /// Load the MidiShare library and resolve every entry point
    ///
    /// # Safety
    /// The library at `path` must be a MidiShare build exporting the C API.
    pub unsafe fn load(path: &Path) -> Result<Self> {
        log::info!("Loading MidiShare library from: {:?}", path);
        let library = Library::new(path)
            .map_err(|e| DriverError::LibraryLoad(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            open: symbol(&library, "MidiOpen")?,
            close: symbol(&library, "MidiClose")?,
            register_driver: symbol(&library, "MidiRegisterDriver")?,
            unregister_driver: symbol(&library, "MidiUnregisterDriver")?,
            add_slot: symbol(&library, "MidiAddSlot")?,
            set_rcv_alarm: symbol(&library, "MidiSetRcvAlarm")?,
            connect: symbol(&library, "MidiConnect")?,
            new_filter: symbol(&library, "MidiNewFilter")?,
            free_filter: symbol(&library, "MidiFreeFilter")?,
            accept_port: symbol(&library, "MidiAcceptPort")?,
            accept_chan: symbol(&library, "MidiAcceptChan")?,
            accept_type: symbol(&library, "MidiAcceptType")?,
            set_filter: symbol(&library, "MidiSetFilter")?,
            get_ev: symbol(&library, "MidiGetEv")?,
            free_ev: symbol(&library, "MidiFreeEv")?,
            get_field: symbol(&library, "MidiGetField")?,
            get_time: symbol(&library, "MidiGetTime")?,
            task: symbol(&library, "MidiTask")?,
            _library: Some(library),
        })
    }
}

/// Default library location for this platform
pub fn default_library_path() -> &'static Path {
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Frameworks/MidiShare.framework/MidiShare")
    }
    #[cfg(target_os = "windows")]
    {
        Path::new("mshare32.dll")
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        Path::new("libMidiShare.so")
    }
}

// =============================================================================
// Event access (MidiShare.h macros)
// =============================================================================

/// `EvType(e)`, `Port(e)`, `Chan(e)` and `Date(e)` of a live event
///
/// # Safety
/// `ev` must be a valid, non-null event owned by the caller.
pub unsafe fn event_header(ev: MidiEvPtr) -> (u8, u8, u8, u32) {
    let header = &*ev;
    (header.ev_type, header.port, header.chan, header.date as u32)
}
