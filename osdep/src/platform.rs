cfg_match::cfg_match! {
    target_os = "linux" => {
        /// Name of the host platform, as used to select platform-specific plugin entries
        pub const PLATFORM: &str = "linux";
    }
    windows => {
        /// Name of the host platform, as used to select platform-specific plugin entries
        pub const PLATFORM: &str = "win32";
    }
    target_os = "macos" => {
        /// Name of the host platform, as used to select platform-specific plugin entries
        pub const PLATFORM: &str = "macos";
    }
    unix => {
        /// Name of the host platform, as used to select platform-specific plugin entries
        pub const PLATFORM: &str = "unix";
    }
    _ => {
        compile_error!("osdep: unrecognized host operating system");
    }
}

cfg_match::cfg_match! {
    windows => {
        /// The file name extension used for dynamically loaded modules on the host, without the leading `.`
        pub const DSO_EXTENSION: &str = "dll";
        /// The file name prefix conventionally used for dynamically loaded modules on the host
        pub const DSO_PREFIX: &str = "";
    }
    target_os = "macos" => {
        /// The file name extension used for dynamically loaded modules on the host, without the leading `.`
        pub const DSO_EXTENSION: &str = "dylib";
        /// The file name prefix conventionally used for dynamically loaded modules on the host
        pub const DSO_PREFIX: &str = "lib";
    }
    _ => {
        /// The file name extension used for dynamically loaded modules on the host, without the leading `.`
        pub const DSO_EXTENSION: &str = "so";
        /// The file name prefix conventionally used for dynamically loaded modules on the host
        pub const DSO_PREFIX: &str = "lib";
    }
}

/// Builds the platform file name of a module from its base name, e.g. `audio_mixer` becomes `libaudio_mixer.so` on linux
#[must_use]
pub fn dso_file_name(base: &str) -> String {
    format!("{DSO_PREFIX}{base}.{DSO_EXTENSION}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_platform_nonempty() {
        assert!(!PLATFORM.is_empty());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_linux_names() {
        assert_eq!(PLATFORM, "linux");
        assert_eq!(dso_file_name("audio_mixer"), "libaudio_mixer.so");
    }

    #[test]
    #[cfg(windows)]
    fn test_win32_names() {
        assert_eq!(PLATFORM, "win32");
        assert_eq!(dso_file_name("audio_mixer"), "audio_mixer.dll");
    }
}
