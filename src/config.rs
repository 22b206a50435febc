use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

pub const DEFAULT_PROJECT_NAME: &str = "{{ .sbomReport.report.artifact.repository }}";
pub const DEFAULT_PROJECT_VERSION: &str = "{{ .sbomReport.report.artifact.tag }}";
/// Upper bound for every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 3600);

static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*(ms|s|m|h)?\s*$").expect("duration pattern is valid")
});

/// Connection settings and field templates, from flags or the environment.
///
/// Template fields use the syntax described in [`crate::template`] and are
/// rendered against each report's data.
#[derive(clap::Args, Debug, Clone)]
pub struct Config {
    /// Base URL of the Dependency-Track API server
    #[arg(long, env = "DT_BASE_URL")]
    pub base_url: String,

    /// Dependency-Track API key
    #[arg(long, env = "DT_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Timeout of every single request to Dependency-Track, e.g. 30s
    #[arg(long, env = "DT_CLIENT_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    pub client_timeout: Duration,

    /// How long to wait for Dependency-Track to process an uploaded BOM
    #[arg(long, env = "SBOM_UPLOAD_TIMEOUT", default_value = "5m", value_parser = parse_duration)]
    pub upload_timeout: Duration,

    /// How often to ask Dependency-Track whether an uploaded BOM is processed
    #[arg(long, env = "SBOM_UPLOAD_CHECK_INTERVAL", default_value = "1s", value_parser = parse_duration)]
    pub upload_check_interval: Duration,

    /// Template for the project name
    #[arg(long, env = "DT_PROJECT_NAME", default_value = DEFAULT_PROJECT_NAME)]
    pub project_name: String,

    /// Template for the project version
    #[arg(long, env = "DT_PROJECT_VERSION", default_value = DEFAULT_PROJECT_VERSION)]
    pub project_version: String,

    /// Comma-separated templates for tags added to the project after the upload
    #[arg(long, env = "DT_PROJECT_TAGS", value_delimiter = ',')]
    pub project_tags: Vec<String>,

    /// Template for the parent project name, empty for no parent
    #[arg(long, env = "DT_PARENT_NAME", default_value = "")]
    pub parent_name: String,

    /// Template for the parent project version
    #[arg(long, env = "DT_PARENT_VERSION", default_value = "")]
    pub parent_version: String,
}

/// Accepts `500ms`, `30s`, `5m`, `1h` or a bare number of seconds, between
/// one millisecond and [`MAX_DURATION`].
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let captures = DURATION_REGEX.captures(value).ok_or_else(|| {
        format!(
            "invalid duration {:?}, expected e.g. 500ms, 30s, 5m or 1h",
            value
        )
    })?;
    let amount: u64 = captures[1]
        .parse()
        .map_err(|e| format!("invalid duration {:?}: {}", value, e))?;
    let duration = match captures.get(2).map(|unit| unit.as_str()) {
        Some("ms") => Duration::from_millis(amount),
        Some("m") => Duration::from_secs(amount.saturating_mul(60)),
        Some("h") => Duration::from_secs(amount.saturating_mul(3600)),
        _ => Duration::from_secs(amount),
    };
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    if duration > MAX_DURATION {
        return Err(format!("duration {:?} is longer than 720h", value));
    }
    Ok(duration)
}
