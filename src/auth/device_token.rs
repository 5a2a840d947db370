//! MSA device token acquisition
//!
//! The FE3 delivery service authenticates the machine with an MSA device
//! token. The real ticket lives in the SYSTEM user's identity hive and is
//! only readable with SYSTEM rights, so acquisition walks an ordered chain
//! of sources, each best-effort:
//!
//! 1. the on-disk cache file,
//! 2. direct extraction via a SYSTEM-scope scheduled task (admin only),
//! 3. a hidden elevated helper process plus sentinel polling,
//! 4. two machine-wide registry locations that mirror the token,
//! 5. a hard-coded fallback constant.
//!
//! Whatever happens, the provider yields a syntactically valid token.

#[cfg(windows)]
use crate::auth::dpapi;
use crate::error::Result;
use crate::utils::paths;
#[cfg(windows)]
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use std::path::PathBuf;
#[cfg(windows)]
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Substring a decrypted device ticket must contain to be accepted
#[cfg(windows)]
const TICKET_VALIDATION_MARKER: &str = "ztd.dds.microsoft.com";

/// Registry hive path holding per-device identity tickets (SYSTEM user)
#[cfg(windows)]
const IDENTITY_TOKEN_KEY: &str =
    r"S-1-5-18\Software\Microsoft\IdentityCRL\Immersive\production\Token";

/// Machine-wide StoreClient mirror of the service token
#[cfg(windows)]
const STORE_CLIENT_KEY: &str = r"SOFTWARE\Microsoft\Windows\CurrentVersion\StoreClient";

/// Windows Update orchestrator mirror of the token
#[cfg(windows)]
const ORCHESTRATOR_KEY: &str = r"SOFTWARE\Microsoft\WindowsUpdate\Orchestrator";

/// How long the elevation helper is polled before giving up
#[cfg(windows)]
const ELEVATION_TIMEOUT: Duration = Duration::from_secs(20);

/// Poll interval while waiting for the helper's sentinel file
#[cfg(windows)]
const ELEVATION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Opaque vendor-provided default used when every source fails
pub const FALLBACK_DEVICE_TOKEN: &str = "<Device>dAA9AEUAdwBDADQAQQBtAE8AQgBJAEIAQQBBAVcAaQBO\
AGQAcQBCAE0AdABLAFgAZQBnAEkAPQAmAHAAPQA=</Device>";

/// Options controlling a token acquisition
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenOptions {
    /// Allow spawning a hidden elevated helper when not already admin
    pub elevate_if_needed: bool,
    /// Ignore the in-memory and on-disk caches and re-enter extraction
    pub skip_cache: bool,
}

/// A validated `<Device>…</Device>` token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceToken(String);

impl DeviceToken {
    /// Wrap a string, asserting nothing; use [`is_valid_token`] to check
    fn new(value: String) -> Self {
        Self(value)
    }

    /// The token text, ready to embed in a SOAP ticket
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The inner payload with the `<Device>` wrapper removed
    pub fn payload(&self) -> &str {
        self.0
            .strip_prefix("<Device>")
            .and_then(|rest| rest.strip_suffix("</Device>"))
            .unwrap_or(&self.0)
    }
}

#[cfg(test)]
impl DeviceToken {
    /// Construct directly from a literal, bypassing the acquisition chain
    pub(crate) fn from_raw_for_tests(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl std::fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check the `^<Device>.+</Device>$` cached-token shape
pub fn is_valid_token(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.starts_with("<Device>")
        && trimmed.ends_with("</Device>")
        && trimmed.len() > "<Device></Device>".len()
        && !trimmed.contains('\n')
}

/// Acquires, caches, and refreshes the MSA device token
pub struct DeviceTokenProvider {
    cached: Mutex<Option<String>>,
}

impl DeviceTokenProvider {
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    /// Well-known cache file, world-readable under the shared data root
    pub fn cache_path() -> PathBuf {
        paths::shared_data_dir().join("device_token.txt")
    }

    /// Acquire a token, walking the source chain
    ///
    /// Always returns a syntactically valid token; the fallback constant is
    /// the terminal source.
    pub fn get(&self, options: TokenOptions) -> DeviceToken {
        if !options.skip_cache {
            if let Some(token) = self.cached.lock().clone() {
                return DeviceToken::new(token);
            }
            if let Some(token) = Self::read_cache_file() {
                debug!("device token loaded from cache file");
                *self.cached.lock() = Some(token.clone());
                return DeviceToken::new(token);
            }
        }

        if let Some(token) = self.extract(options) {
            self.store(&token);
            return DeviceToken::new(token);
        }

        if let Some(token) = Self::from_machine_registry() {
            info!("device token recovered from machine registry mirror");
            self.store(&token);
            return DeviceToken::new(token);
        }

        warn!("all device token sources failed, using fallback constant");
        DeviceToken::new(FALLBACK_DEVICE_TOKEN.to_string())
    }

    /// Force re-extraction, equivalent to `get` with `skip_cache`
    pub fn refresh(&self) -> DeviceToken {
        self.get(TokenOptions {
            elevate_if_needed: false,
            skip_cache: true,
        })
    }

    fn store(&self, token: &str) {
        *self.cached.lock() = Some(token.to_string());
        if let Err(e) = Self::write_cache_file(token) {
            warn!("failed to write device token cache: {e}");
        }
    }

    fn read_cache_file() -> Option<String> {
        let contents = std::fs::read_to_string(Self::cache_path()).ok()?;
        let trimmed = contents.trim();
        if is_valid_token(trimmed) {
            Some(trimmed.to_string())
        } else {
            None
        }
    }

    fn write_cache_file(token: &str) -> Result<()> {
        paths::write_atomic(&Self::cache_path(), token)
    }

    /// Run the privileged extraction, directly or through elevation
    fn extract(&self, options: TokenOptions) -> Option<String> {
        if let Some(token) = extract_device_ticket() {
            return Some(token);
        }
        if is_admin() {
            match extract_via_system_task() {
                Ok(token) => return Some(token),
                Err(e) => warn!("SYSTEM-scope extraction failed: {e}"),
            }
        } else if options.elevate_if_needed {
            match extract_via_elevated_helper() {
                Ok(token) => return Some(token),
                Err(e) => warn!("elevated extraction failed: {e}"),
            }
        }
        None
    }

    /// Step 4: machine-wide registry mirrors, wrapped in `<Device>…</Device>`
    #[cfg(windows)]
    fn from_machine_registry() -> Option<String> {
        use winreg::enums::HKEY_LOCAL_MACHINE;
        use winreg::RegKey;

        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        for (key_path, value_name) in [
            (STORE_CLIENT_KEY, "ServiceToken"),
            (ORCHESTRATOR_KEY, "TokenData"),
        ] {
            let Ok(key) = hklm.open_subkey(key_path) else {
                continue;
            };
            if let Ok(value) = key.get_value::<String, _>(value_name) {
                if !value.is_empty() {
                    let token = format!("<Device>{value}</Device>");
                    if is_valid_token(&token) {
                        return Some(token);
                    }
                }
            }
            // Some builds store the mirror as raw bytes.
            if let Ok(raw) = key.get_raw_value(value_name) {
                if !raw.bytes.is_empty() {
                    let token = format!("<Device>{}</Device>", BASE64.encode(&raw.bytes));
                    return Some(token);
                }
            }
        }
        None
    }

    #[cfg(not(windows))]
    fn from_machine_registry() -> Option<String> {
        None
    }
}

impl Default for DeviceTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the current process holds administrator capability
#[cfg(windows)]
pub fn is_admin() -> bool {
    use windows::Win32::UI::Shell::IsUserAnAdmin;
    unsafe { IsUserAnAdmin().as_bool() }
}

#[cfg(not(windows))]
pub fn is_admin() -> bool {
    false
}

/// Extract the device ticket from the SYSTEM identity hive
///
/// Only succeeds when the hive is readable (SYSTEM, or an elevated context
/// on builds that grant it). Each `DeviceTicket` value is tried in turn:
/// 4-byte header stripped, machine-scope DPAPI unprotect, UTF-16LE decode,
/// and the plaintext must name the device directory service.
#[cfg(windows)]
pub fn extract_device_ticket() -> Option<String> {
    use winreg::enums::{HKEY_USERS, KEY_READ};
    use winreg::RegKey;

    let hku = RegKey::predef(HKEY_USERS);
    let token_root = hku
        .open_subkey_with_flags(IDENTITY_TOKEN_KEY, KEY_READ)
        .ok()?;

    for subkey_name in token_root.enum_keys().filter_map(|k| k.ok()) {
        let Ok(subkey) = token_root.open_subkey_with_flags(&subkey_name, KEY_READ) else {
            continue;
        };
        let Ok(raw) = subkey.get_raw_value("DeviceTicket") else {
            continue;
        };
        if raw.bytes.len() <= 4 {
            continue;
        }
        let stripped = &raw.bytes[4..];
        let Ok(plaintext) = dpapi::unprotect_local_machine(stripped) else {
            continue;
        };
        let decoded = dpapi::decode_utf16_le(&plaintext);
        if decoded.contains(TICKET_VALIDATION_MARKER) {
            debug!(subkey = %subkey_name, "accepted device ticket");
            return Some(format!("<Device>{}</Device>", BASE64.encode(&plaintext)));
        }
    }
    None
}

#[cfg(not(windows))]
pub fn extract_device_ticket() -> Option<String> {
    None
}

/// Write the extracted token to a file, used by the hidden CLI subcommand
///
/// When `marker` is given, an empty sentinel file is created after the
/// token write so a polling parent can distinguish "done" from "partial".
pub fn extract_token_to_file(output: &std::path::Path, marker: Option<&std::path::Path>) -> Result<()> {
    let token = extract_device_ticket().unwrap_or_else(|| FALLBACK_DEVICE_TOKEN.to_string());
    paths::write_atomic(output, &token)?;
    if let Some(marker) = marker {
        paths::write_atomic(marker, "ok")?;
    }
    Ok(())
}

/// Step 2: run extraction as SYSTEM through a one-shot scheduled task
#[cfg(windows)]
fn extract_via_system_task() -> Result<String> {
    use crate::error::ToolkitError;
    use std::process::Command;

    const TASK_NAME: &str = "mstoolkit-device-token";

    let exe = std::env::current_exe()?;
    let output_path = std::env::temp_dir().join(format!("mstoolkit-token-{}.txt", uuid::Uuid::new_v4()));

    let action = format!(
        "\"{}\" extract-token --output \"{}\"",
        exe.display(),
        output_path.display()
    );

    let created = Command::new("schtasks")
        .args([
            "/Create", "/TN", TASK_NAME, "/TR", &action, "/SC", "ONCE", "/ST", "00:00", "/RU",
            "SYSTEM", "/F",
        ])
        .output()?;
    if !created.status.success() {
        return Err(ToolkitError::AuthToken(format!(
            "schtasks create failed: {}",
            String::from_utf8_lossy(&created.stderr).trim()
        )));
    }

    let run = Command::new("schtasks").args(["/Run", "/TN", TASK_NAME]).output();
    let token = run
        .map_err(ToolkitError::from)
        .and_then(|_| wait_for_token_file(&output_path, ELEVATION_TIMEOUT));

    // The task and scratch file are removed on every path.
    let _ = Command::new("schtasks")
        .args(["/Delete", "/TN", TASK_NAME, "/F"])
        .output();
    let _ = std::fs::remove_file(&output_path);

    token
}

#[cfg(not(windows))]
fn extract_via_system_task() -> Result<String> {
    Err(crate::error::ToolkitError::AuthToken(
        "scheduled-task extraction is only available on Windows".to_string(),
    ))
}

/// Step 3: hidden elevated helper plus sentinel marker polling
#[cfg(windows)]
fn extract_via_elevated_helper() -> Result<String> {
    use crate::error::ToolkitError;
    use std::process::Command;

    let exe = std::env::current_exe()?;
    let stamp = uuid::Uuid::new_v4();
    let output_path = std::env::temp_dir().join(format!("mstoolkit-token-{stamp}.txt"));
    let marker_path = std::env::temp_dir().join(format!("mstoolkit-token-{stamp}.done"));

    let command = format!(
        "Start-Process -FilePath '{}' -ArgumentList 'extract-token','--output','{}','--marker','{}' -Verb RunAs -WindowStyle Hidden",
        exe.display(),
        output_path.display(),
        marker_path.display()
    );

    let launched = Command::new("powershell")
        .args(["-NoProfile", "-WindowStyle", "Hidden", "-Command", &command])
        .output()?;
    if !launched.status.success() {
        return Err(ToolkitError::AuthToken(format!(
            "elevation launch refused: {}",
            String::from_utf8_lossy(&launched.stderr).trim()
        )));
    }

    let deadline = Instant::now() + ELEVATION_TIMEOUT;
    let result = loop {
        if marker_path.exists() {
            break wait_for_token_file(&output_path, Duration::from_secs(2));
        }
        if Instant::now() >= deadline {
            break Err(ToolkitError::Timeout(
                "elevated helper did not produce a token within 20s".to_string(),
            ));
        }
        std::thread::sleep(ELEVATION_POLL_INTERVAL);
    };

    let _ = std::fs::remove_file(&output_path);
    let _ = std::fs::remove_file(&marker_path);
    result
}

#[cfg(not(windows))]
fn extract_via_elevated_helper() -> Result<String> {
    Err(crate::error::ToolkitError::AuthToken(
        "elevation is only available on Windows".to_string(),
    ))
}

/// Poll for the helper's output file until the deadline
#[cfg(windows)]
fn wait_for_token_file(path: &std::path::Path, timeout: Duration) -> Result<String> {
    use crate::error::ToolkitError;

    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(contents) = std::fs::read_to_string(path) {
            let trimmed = contents.trim();
            if is_valid_token(trimmed) {
                return Ok(trimmed.to_string());
            }
        }
        if Instant::now() >= deadline {
            return Err(ToolkitError::Timeout(
                "token extraction task produced no output".to_string(),
            ));
        }
        std::thread::sleep(ELEVATION_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_token_shape() {
        assert!(is_valid_token(FALLBACK_DEVICE_TOKEN));
    }

    #[test]
    fn test_token_shape_validation() {
        assert!(is_valid_token("<Device>abc</Device>"));
        assert!(is_valid_token("  <Device>abc</Device>\n"));
        assert!(!is_valid_token("<Device></Device>"));
        assert!(!is_valid_token("abc"));
        assert!(!is_valid_token("<Device>a\nb</Device>"));
    }

    #[test]
    fn test_payload_strips_wrapper() {
        let token = DeviceToken::new("<Device>payload==</Device>".to_string());
        assert_eq!(token.payload(), "payload==");
    }

    #[test]
    fn test_provider_always_yields_valid_token() {
        // In a test environment no real source exists, so the chain must
        // terminate at the fallback constant.
        let provider = DeviceTokenProvider::new();
        let token = provider.get(TokenOptions {
            elevate_if_needed: false,
            skip_cache: true,
        });
        assert!(is_valid_token(token.as_str()));
    }
}
