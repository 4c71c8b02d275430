//! Drives the crate the way a plugin host does: load a module, bind an entry point, and call it from worker threads.

use std::sync::Arc;

use osdep::dso::{self, Handle};
use osdep::sync::{Condvar, Mutex};
use osdep::{fault, thread, Error};

cfg_match::cfg_match! {
    all(target_os = "linux", target_env = "musl") => {
        const LIBRARY: &str = "libc.so";
    }
    target_os = "linux" => {
        const LIBRARY: &str = "libc.so.6";
    }
    target_os = "macos" => {
        const LIBRARY: &str = "/usr/lib/libSystem.B.dylib";
    }
    windows => {
        const LIBRARY: &str = "kernel32.dll";
    }
    _ => {
        const LIBRARY: &str = "libc.so";
    }
}

#[cfg(unix)]
type ProcessId = unsafe extern "C" fn() -> i32;
#[cfg(unix)]
const PROCESS_ID: &str = "getpid";

#[cfg(windows)]
type ProcessId = unsafe extern "system" fn() -> u32;
#[cfg(windows)]
const PROCESS_ID: &str = "GetCurrentProcessId";

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[test]
fn test_bind_and_call_entry_point() {
    init_logging();
    let handle = Handle::open(LIBRARY).unwrap();
    let entry: ProcessId = unsafe { handle.function_sym(PROCESS_ID) }.unwrap();
    assert!(dso::looks_valid(entry as *const _));

    #[allow(clippy::cast_sign_loss)]
    let pid = unsafe { fault::invoke(|| entry() as u32) }.unwrap();
    assert_eq!(pid, std::process::id());

    handle.close().unwrap();
}

#[test]
fn test_missing_symbol_is_not_an_error() {
    init_logging();
    let handle = Handle::open(LIBRARY).unwrap();
    let before = dso::last_error();
    for _ in 0..3 {
        assert!(handle.raw_sym("osdep_no_such_entry_point").is_none());
    }
    assert_eq!(dso::last_error(), before);
}

#[test]
fn test_bad_path_reports_load_error() {
    init_logging();
    let err = Handle::open("./osdep-no-such-module.so").unwrap_err();
    assert!(matches!(err, Error::Load { .. }));
    assert!(err.is_recoverable());
    assert!(dso::take_last_error().is_some());
    assert!(dso::take_last_error().is_none());
}

#[test]
fn test_workers_call_into_module() {
    const WORKERS: usize = 8;

    init_logging();
    let handle = Arc::new(Handle::open(LIBRARY).unwrap());
    let entry: ProcessId = unsafe { handle.function_sym(PROCESS_ID) }.unwrap();
    let state = Arc::new((Mutex::new().unwrap(), Condvar::new().unwrap()));
    let results = Arc::new(std::sync::Mutex::new(Vec::new()));

    for _ in 0..WORKERS {
        let state = Arc::clone(&state);
        let results = Arc::clone(&results);
        let handle = Arc::clone(&handle);
        thread::spawn(move || {
            let _module = handle;
            #[allow(clippy::cast_sign_loss)]
            let pid = unsafe { fault::invoke(|| entry() as u32) };
            let (mutex, condvar) = &*state;
            let guard = mutex.lock().unwrap();
            results.lock().unwrap().push(pid);
            condvar.signal().unwrap();
            guard.unlock().unwrap();
        })
        .unwrap();
    }

    let (mutex, condvar) = &*state;
    let mut guard = mutex.lock().unwrap();
    condvar
        .wait_while(&mut guard, || results.lock().unwrap().len() < WORKERS)
        .unwrap();
    drop(guard);

    let results = results.lock().unwrap();
    assert_eq!(results.len(), WORKERS);
    assert!(results.iter().all(|pid| *pid == Ok(std::process::id())));
}
