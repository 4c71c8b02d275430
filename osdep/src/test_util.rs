//! Shared helpers for the unit tests

cfg_match::cfg_match! {
    all(target_os = "linux", target_env = "musl") => {
        pub const SYSTEM_LIBRARY: &str = "libc.so";
        pub const SYSTEM_SYMBOL: &str = "getpid";
    }
    target_os = "linux" => {
        pub const SYSTEM_LIBRARY: &str = "libc.so.6";
        pub const SYSTEM_SYMBOL: &str = "getpid";
    }
    target_os = "macos" => {
        pub const SYSTEM_LIBRARY: &str = "/usr/lib/libSystem.B.dylib";
        pub const SYSTEM_SYMBOL: &str = "getpid";
    }
    windows => {
        pub const SYSTEM_LIBRARY: &str = "kernel32.dll";
        pub const SYSTEM_SYMBOL: &str = "GetCurrentProcessId";
    }
    _ => {
        pub const SYSTEM_LIBRARY: &str = "libc.so";
        pub const SYSTEM_SYMBOL: &str = "getpid";
    }
}

/// Routes `tracing` output through the test harness' captured output
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
