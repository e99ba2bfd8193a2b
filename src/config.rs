use serde::Deserialize;

/// Default per-owner image quota.
pub const DEFAULT_IMAGE_QUOTA: i64 = 10;

/// Default upload size cap: 2 MiB of decoded image bytes.
pub const DEFAULT_MAX_IMAGE_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Environment name ("development", "production", ...).
    pub env: String,
    pub database_url: String,
    /// Static administrator secret accepted as a bearer credential.
    pub admin_token: String,
    /// Maximum number of images retained per owner token.
    /// Set via IMGVAULT_IMAGE_QUOTA. Default: 10.
    pub image_quota: i64,
    /// Maximum decoded upload size in bytes.
    /// Set via IMGVAULT_MAX_IMAGE_SIZE. Default: 2 MiB.
    pub max_image_size: usize,
    /// Externally visible base URL used to build image URLs.
    pub base_url: String,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let port: u16 = parse_or(std::env::var("IMGVAULT_PORT").ok(), 3000);
    let env = std::env::var("IMGVAULT_ENV").unwrap_or_else(|_| "development".into());

    let admin_token =
        std::env::var("IMGVAULT_ADMIN_TOKEN").unwrap_or_else(|_| "admin".into());
    if admin_token == "admin" {
        if env == "production" {
            anyhow::bail!(
                "IMGVAULT_ADMIN_TOKEN is still the insecure placeholder. \
                 Set a proper admin secret before running in production."
            );
        }
        tracing::warn!(
            "IMGVAULT_ADMIN_TOKEN is not set, using the insecure placeholder"
        );
    }

    let base_url = std::env::var("IMGVAULT_BASE_URL")
        .unwrap_or_else(|_| format!("http://localhost:{port}"));
    url::Url::parse(&base_url)
        .map_err(|e| anyhow::anyhow!("IMGVAULT_BASE_URL is not a valid URL: {e}"))?;

    Ok(Config {
        port,
        env,
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/imgvault".into()),
        admin_token,
        image_quota: parse_or(
            std::env::var("IMGVAULT_IMAGE_QUOTA").ok(),
            DEFAULT_IMAGE_QUOTA,
        ),
        max_image_size: parse_or(
            std::env::var("IMGVAULT_MAX_IMAGE_SIZE").ok(),
            DEFAULT_MAX_IMAGE_SIZE,
        ),
        base_url,
    })
}

/// Parse an optional env value, falling back to the default on absence or garbage.
fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}
