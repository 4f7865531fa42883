use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use manga_overlay_rust::background::Background;
use manga_overlay_rust::chrome::HeadlessChrome;
use manga_overlay_rust::client::{HttpImageSource, LoginStatus, RemoteApi, SignupStatus};
use manga_overlay_rust::compositor::{Compositor, FontContext};
use manga_overlay_rust::languages::{self, LanguageCode};
use manga_overlay_rust::settings::{ConfigStore, FileConfigStore};

const EXTENSION_ID: &str = "manga-overlay";

#[derive(Parser, Debug)]
#[command(
    name = "manga-overlay-rust",
    version,
    about = "Translate manga pages and serve the overlay background"
)]
struct Cli {
    /// Image file or URL to translate
    #[arg(short = 'd', long = "data")]
    data: Option<String>,

    /// Where to write the translated image (default: <input>.translated.png)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Target language for this run (default: configured or from locale)
    #[arg(short = 'l', long = "lang")]
    lang: Option<String>,

    /// Translation model id for this run
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Run the background message server
    #[arg(long = "server")]
    server: bool,

    /// Address for --server (default: settings [server] addr)
    #[arg(long = "addr")]
    addr: Option<String>,

    /// Enable translation on a site
    #[arg(long = "add-site")]
    add_site: Option<String>,

    /// Disable translation on a site
    #[arg(long = "remove-site")]
    remove_site: Option<String>,

    /// Show sites translation is enabled on and exit
    #[arg(long = "show-sites")]
    show_sites: bool,

    /// Show supported target languages and exit
    #[arg(long = "show-enabled-languages")]
    show_enabled_languages: bool,

    /// Show translation models offered by the service and exit
    #[arg(long = "show-models-list")]
    show_models_list: bool,

    /// Persist the target language
    #[arg(long = "set-lang")]
    set_lang: Option<String>,

    /// Persist the translation model ("" resets to the service default)
    #[arg(long = "set-model")]
    set_model: Option<String>,

    /// Persist the overlay font family ("" resets to the default)
    #[arg(long = "set-font")]
    set_font: Option<String>,

    /// Ask running backgrounds to drop their translation cache
    #[arg(long = "clear-cache")]
    clear_cache: bool,

    /// Log in; the password is read from stdin
    #[arg(long = "login")]
    login: Option<String>,

    /// Log out
    #[arg(long = "logout")]
    logout: bool,

    /// Create an account; the password is read from stdin
    #[arg(long = "signup")]
    signup: Option<String>,

    /// Send feedback text
    #[arg(long = "feedback")]
    feedback: Option<String>,

    /// Show the current account and exit
    #[arg(long = "whoami")]
    whoami: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    manga_overlay_rust::logging::init(cli.verbose)?;

    let config: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(
        cli.read_settings.as_deref().map(PathBuf::from),
    ));

    if apply_settings_flags(&cli, config.as_ref())? {
        return Ok(());
    }

    let api = Arc::new(RemoteApi::new(Arc::clone(&config))?);
    if run_account_flags(&cli, &api, config.as_ref()).await? {
        return Ok(());
    }

    let images = Arc::new(HttpImageSource::new(api.http_client()));
    let chrome = Arc::new(HeadlessChrome::new(EXTENSION_ID));
    let background = Arc::new(Background::new(
        Arc::clone(&config),
        api,
        images.clone(),
        chrome,
    )?);

    if cli.server {
        let addr = match cli.addr.clone() {
            Some(addr) => addr,
            None => config.load()?.server_addr,
        };
        return manga_overlay_rust::server::run_server(background, addr).await;
    }

    let Some(input) = cli.data.as_deref() else {
        return Err(anyhow!(
            "nothing to do: pass --data <image> or --server (see --help)"
        ));
    };
    let target = match cli.lang.as_deref() {
        Some(code) => parse_language(code)?,
        None => config.target_language()?,
    };
    let model = match cli.model.clone() {
        Some(model) => Some(model),
        None => config.translation_model()?,
    };
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(input));
    let output_mime = image::ImageFormat::from_path(&output)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| "image/png".to_string());

    let settings = config.load()?;
    let family = languages::font_family_for(target, settings.font_family.as_deref());
    let fonts = FontContext::load(settings.font_path.as_deref().map(Path::new), &family)?;
    let compositor = Arc::new(Compositor::new(fonts));

    let translated = manga_overlay_rust::translate_file(
        &background,
        images.as_ref(),
        compositor,
        input,
        target,
        model.as_deref(),
        &output_mime,
    )
    .await?;
    std::fs::write(&output, &translated.bytes)
        .with_context(|| format!("failed to write output: {}", output.display()))?;
    for text_box in &translated.results.translations {
        println!("{}", text_box.translated_text);
    }
    eprintln!("wrote {} ({})", output.display(), translated.mime);
    Ok(())
}

/// Handles flags that only read or write settings. Returns true when one ran.
fn apply_settings_flags(cli: &Cli, config: &dyn ConfigStore) -> Result<bool> {
    let mut handled = false;
    if let Some(host) = cli.add_site.as_deref() {
        if config.add_active_url(host)? {
            println!("enabled on {}", host);
        } else {
            println!("already enabled on {}", host);
        }
        handled = true;
    }
    if let Some(host) = cli.remove_site.as_deref() {
        if config.remove_active_url(host)? {
            println!("disabled on {}", host);
        } else {
            println!("not enabled on {}", host);
        }
        handled = true;
    }
    if let Some(code) = cli.set_lang.as_deref() {
        let code = parse_language(code)?;
        config.set_target_language(code)?;
        println!("lang set to {}", code.as_str());
        handled = true;
    }
    if let Some(model) = cli.set_model.clone() {
        config.set_translation_model(Some(model))?;
        match config.translation_model()? {
            Some(model) => println!("model set to {}", model),
            None => println!("model reset to the service default"),
        }
        handled = true;
    }
    if let Some(family) = cli.set_font.clone() {
        config.set_font_family(Some(family))?;
        println!("font set to {}", config.font_family()?);
        handled = true;
    }
    if cli.clear_cache {
        config.set_clear_cache_flag(true)?;
        println!("translation cache will be cleared on the next request");
        handled = true;
    }
    if cli.show_sites {
        for host in config.active_urls()? {
            println!("{}", host);
        }
        handled = true;
    }
    if cli.show_enabled_languages {
        let current = config.target_language()?;
        for code in LanguageCode::ALL {
            let marker = if code == current { "*" } else { " " };
            println!("{} {}\t{}", marker, code.as_str(), code.display_name());
        }
        handled = true;
    }
    Ok(handled)
}

/// Handles flags that talk to the account service. Returns true when one ran.
async fn run_account_flags(cli: &Cli, api: &RemoteApi, config: &dyn ConfigStore) -> Result<bool> {
    if let Some(email) = cli.login.as_deref() {
        let password = read_password()?;
        match api.login(email, &password).await {
            LoginStatus::Success => {
                config.set_email(Some(email.to_string()))?;
                println!("logged in as {}", email);
            }
            LoginStatus::UnknownEmail => return Err(anyhow!("no account for {}", email)),
            LoginStatus::BadPassword => return Err(anyhow!("wrong password")),
            LoginStatus::InvalidEmail => return Err(anyhow!("invalid email address")),
            LoginStatus::Unknown => return Err(anyhow!("login failed")),
        }
        return Ok(true);
    }
    if let Some(email) = cli.signup.as_deref() {
        let password = read_password()?;
        match api.signup(email, &password).await {
            SignupStatus::Success => println!("account created for {}", email),
            SignupStatus::EmailTaken => return Err(anyhow!("{} is already registered", email)),
            SignupStatus::Unknown => return Err(anyhow!("signup failed")),
        }
        return Ok(true);
    }
    if cli.logout {
        if !api.logout().await {
            return Err(anyhow!("logout failed"));
        }
        config.set_email(None)?;
        println!("logged out");
        return Ok(true);
    }
    if let Some(text) = cli.feedback.as_deref() {
        if text.trim().is_empty() {
            return Err(anyhow!("feedback is empty"));
        }
        if !api.submit_feedback(text).await {
            return Err(anyhow!("failed to send feedback"));
        }
        println!("thanks for the feedback");
        return Ok(true);
    }
    if cli.whoami {
        let user = api.current_user().await?;
        println!(
            "{} ({})",
            user.email.as_deref().unwrap_or("anonymous"),
            user.subscription_tier
        );
        return Ok(true);
    }
    if cli.show_models_list {
        let current = config.translation_model()?;
        for model in api.available_models().await {
            let marker = if current.as_deref() == Some(model.id.as_str()) {
                "*"
            } else {
                " "
            };
            println!("{} {}\t{}", marker, model.id, model.name);
        }
        return Ok(true);
    }
    Ok(false)
}

fn parse_language(code: &str) -> Result<LanguageCode> {
    code.parse::<LanguageCode>()
        .map_err(|_| anyhow!("unsupported language '{}'", code))
}

fn read_password() -> Result<String> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("password: ");
        io::stderr().flush()?;
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(anyhow!("password is empty"));
    }
    Ok(password)
}

fn default_output_path(input: &str) -> PathBuf {
    let name = input
        .rsplit(['/', '\\'])
        .next()
        .and_then(|name| name.split(['?', '#']).next())
        .filter(|name| !name.is_empty())
        .unwrap_or("image");
    let stem = Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("image");
    PathBuf::from(format!("{}.translated.png", stem))
}
