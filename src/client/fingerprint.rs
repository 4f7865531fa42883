use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Best-effort device signature the service uses for abuse heuristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub renderer: String,
    pub hardware: String,
    pub connection: String,
    /// Minutes to add to local time to reach UTC.
    pub timezone_offset_minutes: i32,
}

impl Fingerprint {
    pub fn detect() -> Self {
        let offset = time::UtcOffset::current_local_offset()
            .map(|offset| -(offset.whole_minutes() as i32))
            .unwrap_or(0);
        Self {
            renderer: "none".to_string(),
            hardware: format!("{}-{}", num_cpus::get(), num_cpus::get_physical()),
            connection: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            timezone_offset_minutes: offset,
        }
    }

    pub fn encode(&self) -> String {
        BASE64.encode(format!(
            "{}-{}-{}-{}",
            self.renderer, self.hardware, self.connection, self.timezone_offset_minutes
        ))
    }
}
