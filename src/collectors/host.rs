use sysinfo::{System, SystemExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub host_name: String,
    pub os_name: String,
    pub os_release: String,
}

impl HostInfo {
    pub fn detect() -> Self {
        let system = System::new();
        Self {
            host_name: system.host_name().unwrap_or_else(|| "unknown".to_string()),
            os_name: kernel_family(std::env::consts::OS),
            os_release: system.kernel_version().unwrap_or_default(),
        }
    }

    /// `host (OS release)`, as shown in the report header.
    pub fn describe(&self) -> String {
        let os = format!("{} {}", self.os_name, self.os_release);
        format!("{} ({})", self.host_name, os.trim_end())
    }
}

/// Kernel family as `uname -s` spells it, not the distribution name.
fn kernel_family(os: &str) -> String {
    match os {
        "linux" => "Linux".to_string(),
        "macos" | "ios" => "Darwin".to_string(),
        "windows" => "Windows".to_string(),
        "freebsd" => "FreeBSD".to_string(),
        "netbsd" => "NetBSD".to_string(),
        "openbsd" => "OpenBSD".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}
