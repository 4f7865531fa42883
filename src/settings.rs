use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::languages::{self, LanguageCode};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
pub const API_BASE_ENV: &str = "MANGA_OVERLAY_API_BASE";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_base: String,
    pub client_version: String,
    pub target_language: Option<LanguageCode>,
    pub translation_model: Option<String>,
    pub max_in_flight: usize,
    pub clear_cache: bool,
    pub font_family: Option<String>,
    pub font_path: Option<String>,
    pub active_urls: Vec<String>,
    pub client_uuid: Option<String>,
    pub email: Option<String>,
    pub server_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: "https://ichigoreader.com".to_string(),
            client_version: "1.0.1".to_string(),
            target_language: None,
            translation_model: None,
            max_in_flight: crate::gate::DEFAULT_MAX_IN_FLIGHT,
            clear_cache: false,
            font_family: None,
            font_path: None,
            active_urls: Vec::new(),
            client_uuid: None,
            email: None,
            server_addr: "127.0.0.1:8787".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct SettingsFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    api: Option<ApiSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    translation: Option<TranslationSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    overlay: Option<OverlaySettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sites: Option<SiteSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    account: Option<AccountSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server: Option<ServerSettings>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ApiSettings {
    base_url: Option<String>,
    client_version: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct TranslationSettings {
    target_language: Option<String>,
    model: Option<String>,
    max_in_flight: Option<usize>,
    clear_cache: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct OverlaySettings {
    font_family: Option<String>,
    font_path: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct SiteSettings {
    active: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct AccountSettings {
    client_uuid: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ServerSettings {
    addr: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).context("failed to parse built-in settings")?;
    settings.merge(defaults);
    ensure_home_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    if let Ok(base) = std::env::var(API_BASE_ENV) {
        let base = base.trim();
        if !base.is_empty() {
            settings.api_base = base.trim_end_matches('/').to_string();
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(api) = incoming.api {
            if let Some(base) = api.base_url {
                if !base.trim().is_empty() {
                    self.api_base = base.trim().trim_end_matches('/').to_string();
                }
            }
            if let Some(version) = api.client_version {
                if !version.trim().is_empty() {
                    self.client_version = version;
                }
            }
        }
        if let Some(translation) = incoming.translation {
            if let Some(code) = translation.target_language {
                // An unsupported code falls back to the locale default.
                self.target_language = code.parse().ok();
            }
            if let Some(model) = translation.model {
                self.translation_model = non_empty(model);
            }
            if let Some(limit) = translation.max_in_flight {
                if limit > 0 {
                    self.max_in_flight = limit;
                }
            }
            if let Some(flag) = translation.clear_cache {
                self.clear_cache = flag;
            }
        }
        if let Some(overlay) = incoming.overlay {
            if let Some(family) = overlay.font_family {
                self.font_family = non_empty(family);
            }
            if let Some(path) = overlay.font_path {
                self.font_path = non_empty(path);
            }
        }
        if let Some(sites) = incoming.sites {
            if let Some(active) = sites.active {
                self.active_urls = active
                    .into_iter()
                    .filter_map(|host| normalize_host(&host))
                    .collect();
            }
        }
        if let Some(account) = incoming.account {
            if let Some(uuid) = account.client_uuid {
                self.client_uuid = non_empty(uuid);
            }
            if let Some(email) = account.email {
                self.email = non_empty(email);
            }
        }
        if let Some(server) = incoming.server {
            if let Some(addr) = server.addr {
                if !addr.trim().is_empty() {
                    self.server_addr = addr;
                }
            }
        }
    }

    /// Keys that change at runtime. Written as the last layer so they win.
    fn mutable_layer(&self) -> SettingsFile {
        SettingsFile {
            translation: Some(TranslationSettings {
                target_language: Some(
                    self.target_language
                        .map(|code| code.as_str().to_string())
                        .unwrap_or_default(),
                ),
                model: Some(self.translation_model.clone().unwrap_or_default()),
                max_in_flight: None,
                clear_cache: Some(self.clear_cache),
            }),
            overlay: Some(OverlaySettings {
                font_family: Some(self.font_family.clone().unwrap_or_default()),
                font_path: None,
            }),
            sites: Some(SiteSettings {
                active: Some(self.active_urls.clone()),
            }),
            account: Some(AccountSettings {
                client_uuid: Some(self.client_uuid.clone().unwrap_or_default()),
                email: Some(self.email.clone().unwrap_or_default()),
            }),
            ..SettingsFile::default()
        }
    }
}

/// Persisted key-value configuration shared by every pipeline stage.
///
/// Implementors provide `load` and `save`; everything else is derived.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Settings>;

    fn save(&self, settings: &Settings) -> Result<()>;

    fn update(&self, apply: &mut dyn FnMut(&mut Settings)) -> Result<Settings> {
        let mut settings = self.load()?;
        apply(&mut settings);
        self.save(&settings)?;
        Ok(settings)
    }

    /// Stable client identifier, generated on first use.
    fn client_uuid(&self) -> Result<String> {
        if let Some(uuid) = self.load()?.client_uuid {
            return Ok(uuid);
        }
        let generated = uuid::Uuid::new_v4().to_string();
        let settings = self.update(&mut |settings| {
            if settings.client_uuid.is_none() {
                settings.client_uuid = Some(generated.clone());
            }
        })?;
        Ok(settings.client_uuid.unwrap_or(generated))
    }

    fn target_language(&self) -> Result<LanguageCode> {
        Ok(self
            .load()?
            .target_language
            .unwrap_or_else(|| languages::default_language(&languages::system_locale())))
    }

    fn set_target_language(&self, code: LanguageCode) -> Result<()> {
        self.update(&mut |settings| settings.target_language = Some(code))?;
        Ok(())
    }

    fn translation_model(&self) -> Result<Option<String>> {
        Ok(self.load()?.translation_model)
    }

    fn set_translation_model(&self, model: Option<String>) -> Result<()> {
        let model = model.and_then(non_empty);
        self.update(&mut |settings| settings.translation_model = model.clone())?;
        Ok(())
    }

    /// Family used for translated text, honouring languages that need
    /// system glyph coverage.
    fn font_family(&self) -> Result<String> {
        let settings = self.load()?;
        let language = settings
            .target_language
            .unwrap_or_else(|| languages::default_language(&languages::system_locale()));
        Ok(languages::font_family_for(
            language,
            settings.font_family.as_deref(),
        ))
    }

    fn set_font_family(&self, family: Option<String>) -> Result<()> {
        let family = family.and_then(non_empty);
        self.update(&mut |settings| settings.font_family = family.clone())?;
        Ok(())
    }

    fn active_urls(&self) -> Result<Vec<String>> {
        Ok(self.load()?.active_urls)
    }

    fn is_active_host(&self, hostname: &str) -> Result<bool> {
        let Some(hostname) = normalize_host(hostname) else {
            return Ok(false);
        };
        Ok(self.load()?.active_urls.iter().any(|host| *host == hostname))
    }

    /// Returns false when the host was already listed.
    fn add_active_url(&self, hostname: &str) -> Result<bool> {
        let host = normalize_host(hostname)
            .ok_or_else(|| anyhow!("invalid hostname '{}'", hostname))?;
        let mut added = false;
        self.update(&mut |settings| {
            if !settings.active_urls.contains(&host) {
                settings.active_urls.push(host.clone());
                added = true;
            }
        })?;
        Ok(added)
    }

    fn remove_active_url(&self, hostname: &str) -> Result<bool> {
        let Some(host) = normalize_host(hostname) else {
            return Ok(false);
        };
        let mut removed = false;
        self.update(&mut |settings| {
            let before = settings.active_urls.len();
            settings.active_urls.retain(|existing| *existing != host);
            removed = settings.active_urls.len() != before;
        })?;
        Ok(removed)
    }

    fn clear_cache_flag(&self) -> Result<bool> {
        Ok(self.load()?.clear_cache)
    }

    fn set_clear_cache_flag(&self, flag: bool) -> Result<()> {
        self.update(&mut |settings| settings.clear_cache = flag)?;
        Ok(())
    }

    fn email(&self) -> Result<Option<String>> {
        Ok(self.load()?.email)
    }

    fn set_email(&self, email: Option<String>) -> Result<()> {
        let email = email.and_then(non_empty);
        self.update(&mut |settings| settings.email = email.clone())?;
        Ok(())
    }
}

/// Layered TOML settings; mutations go to `~/.manga-overlay/settings.local.toml`.
pub struct FileConfigStore {
    extra_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl FileConfigStore {
    pub fn new(extra_path: Option<PathBuf>) -> Self {
        Self {
            extra_path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn local_path() -> Result<PathBuf> {
        home_dir()
            .map(|home| home.join("settings.local.toml"))
            .ok_or_else(|| anyhow!("HOME is not set"))
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Settings> {
        load_settings(self.extra_path.as_deref())
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let path = Self::local_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(&settings.mutable_layer())
            .context("failed to serialize settings")?;
        fs::write(&path, content)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
        Ok(())
    }
}

/// In-process store used by tests and embedders that persist elsewhere.
#[derive(Default)]
pub struct MemoryConfigStore {
    settings: Mutex<Settings>,
}

impl MemoryConfigStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Settings> {
        Ok(self
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        Ok(())
    }

    fn update(&self, apply: &mut dyn FnMut(&mut Settings)) -> Result<Settings> {
        let mut guard = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut guard);
        Ok(guard.clone())
    }
}

/// Lowercased bare hostname, accepting full URLs for convenience.
pub fn normalize_host(value: &str) -> Option<String> {
    let value = value.trim();
    let without_scheme = value.split_once("://").map_or(value, |(_, rest)| rest);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .rsplit('@')
        .next()
        .unwrap_or("");
    let host = host.split(':').next().unwrap_or("").trim().to_ascii_lowercase();
    if host.is_empty() { None } else { Some(host) }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".manga-overlay"))
        }
    })
}
