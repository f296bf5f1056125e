use clap::Parser;

#[derive(Debug, Parser)] // requires `derive` feature
#[command(name = "blob-mirror")]
#[command(about = "Mirrors file trees between a local directory and an S3 bucket")]
pub struct Cli {
    /// Local directory every local path in requests is resolved against
    #[arg(long, default_value = "./data")]
    pub local_directory: String,
    /// S3 url, credentials are derived from
    /// AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables
    #[arg(long, default_value = "http://localhost:9000")]
    pub s3_endpoint: String,
    /// S3 region to use
    #[arg(long, default_value = "eu-central-1")]
    pub s3_region: String,
    /// S3 bucket acting as the mirrored container
    #[arg(long, default_value = "mirror-container")]
    pub s3_bucket: String,
    /// Listening address with port for HTTP server
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    pub listen_address: String,
    /// Concurrent blob transfers per request
    #[arg(long, short, default_value = "8")]
    pub parallelism: usize,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(name) => {
                write!(f, "{name} environment variable is required to be set")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Shared secrets, fetching accepts either token, everything that writes
/// needs the write token. Compared by plain string equality.
#[derive(Debug, Clone)]
pub struct AccessTokens {
    read: String,
    write: String,
}

impl AccessTokens {
    pub fn new(read: impl Into<String>, write: impl Into<String>) -> Self {
        AccessTokens {
            read: read.into(),
            write: write.into(),
        }
    }

    /// Reads READ_TOKEN and WRITE_TOKEN, call `dotenv` before this
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AccessTokens::new(
            required_var("READ_TOKEN")?,
            required_var("WRITE_TOKEN")?,
        ))
    }

    pub fn can_read(&self, token: &str) -> bool {
        token == self.read || token == self.write
    }

    pub fn can_write(&self, token: &str) -> bool {
        token == self.write
    }
}

fn required_var(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVariable(name)),
    }
}

#[test]
fn test_token_permissions() {
    let tokens = AccessTokens::new("r", "w");
    assert!(tokens.can_read("r"));
    assert!(tokens.can_read("w"));
    assert!(!tokens.can_read("x"));
    assert!(!tokens.can_read(""));
    assert!(tokens.can_write("w"));
    assert!(!tokens.can_write("r"));
}

#[test]
fn test_cli_defaults() {
    let cli = Cli::parse_from(["server"]);
    assert_eq!(cli.local_directory, "./data");
    assert_eq!(cli.listen_address, "127.0.0.1:8080");
    assert_eq!(cli.parallelism, 8);

    let cli = Cli::parse_from(["server", "--local-directory", "/srv/mirror", "-p", "2"]);
    assert_eq!(cli.local_directory, "/srv/mirror");
    assert_eq!(cli.parallelism, 2);
}
