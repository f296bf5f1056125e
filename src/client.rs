use std::error::Error;

use clap::{Parser, Subcommand};
use common::data::{
    FetchFileRequest, OperationResponse, SyncLocalToRemoteRequest, SyncRemoteToLocalRequest,
    UploadFileRequest,
};
use serde::Serialize;

/// Program to drive a blob mirror server from the command line
#[derive(Debug, Parser)] // requires `derive` feature
#[command(name = "blob-mirror")]
#[command(about = "Blob mirror client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Blob mirror server url
    #[arg(long, short, default_value = "http://localhost:8080")]
    server_url: String,
    /// Access token, falls back to the MIRROR_TOKEN environment variable
    #[arg(long, short)]
    token: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print a single file stored in the bucket
    Fetch {
        /// Key of the file inside the bucket
        path: String,
    },
    /// Store a local file in the bucket under the given key
    Upload {
        /// Key of the file inside the bucket
        path: String,
        /// Local file whose content is uploaded
        #[arg(short, long)]
        file: String,
    },
    /// Copy a bucket prefix into the server's local directory
    Pull {
        /// Prefix inside the bucket, trailing `/` copies only its contents
        source: String,
        /// Destination inside the server's local directory
        destination: String,
    },
    /// Copy a path of the server's local directory into the bucket
    Push {
        /// Path inside the server's local directory, trailing `/` copies only its contents
        source: String,
        /// Destination prefix inside the bucket
        destination: String,
    },
    /// Compare a local file with the file stored in the bucket
    Verify {
        /// Key of the file inside the bucket
        path: String,
        /// Local file to compare against
        #[arg(short, long)]
        file: String,
    },
}

#[derive(Debug)]
pub enum ClientErrors {
    MissingToken,
    RequestFailed { status: u16, error: String },
    OperationFailed { message: String },
}

impl std::error::Error for ClientErrors {}

impl std::fmt::Display for ClientErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientErrors::MissingToken => {
                write!(f, "No token given, pass --token or set MIRROR_TOKEN")
            }
            ClientErrors::RequestFailed { status, error } => {
                write!(f, "Server responded with status {status}: {error}")
            }
            ClientErrors::OperationFailed { message } => write!(f, "{message}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv::dotenv().ok();
    let args = Cli::parse();
    let token = match &args.token {
        Some(token) => token.clone(),
        None => std::env::var("MIRROR_TOKEN").map_err(|_| ClientErrors::MissingToken)?,
    };

    match &args.command {
        Commands::Fetch { path } => {
            let code = fetch_file(&args, path, &token).await?;
            print!("{code}");
        }
        Commands::Upload { path, file } => {
            let code = tokio::fs::read_to_string(file).await?;
            let res = call(
                &args,
                "/upload-code-to-azure",
                &UploadFileRequest {
                    path: path.clone(),
                    code,
                    token,
                },
            )
            .await?;
            println!("{}", res.message);
        }
        Commands::Pull {
            source,
            destination,
        } => {
            let start = std::time::Instant::now();
            let res = call(
                &args,
                "/sync-blobs-azure-to-local",
                &SyncRemoteToLocalRequest {
                    source_path_inside_azure_container: source.clone(),
                    destination_path_inside_local_directory: destination.clone(),
                    token,
                },
            )
            .await?;
            print_sync(&res, start);
        }
        Commands::Push {
            source,
            destination,
        } => {
            let start = std::time::Instant::now();
            let res = call(
                &args,
                "/sync-blobs-local-to-azure",
                &SyncLocalToRemoteRequest {
                    source_path_inside_local_directory: source.clone(),
                    destination_path_inside_azure_container: destination.clone(),
                    token,
                },
            )
            .await?;
            print_sync(&res, start);
        }
        Commands::Verify { path, file } => {
            let remote = fetch_file(&args, path, &token).await?;
            let local = tokio::fs::read(file).await?;
            let remote_hash = hex::encode(hmac_sha256::Hash::hash(remote.as_bytes()));
            let local_hash = hex::encode(hmac_sha256::Hash::hash(&local));
            if remote_hash == local_hash {
                println!("File {file} matches {path}, sha256: {local_hash}");
            } else {
                println!("File {file} hashes mismatch, local: {local_hash}, remote: {remote_hash}");
            }
        }
    }
    Ok(())
}

fn print_sync(res: &OperationResponse, start: std::time::Instant) {
    println!(
        "{} {} files ({:.3}s)",
        res.message,
        res.files.unwrap_or_default(),
        start.elapsed().as_secs_f64()
    );
    for skipped in &res.skipped {
        println!("skipped {}: {}", skipped.path, skipped.reason);
    }
}

async fn fetch_file(
    args: &Cli,
    path: &str,
    token: &str,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    let res = call(
        args,
        "/fetch-file-from-azure",
        &FetchFileRequest {
            path: path.to_string(),
            token: token.to_string(),
        },
    )
    .await?;
    Ok(res.data.map(|d| d.code).unwrap_or_default())
}

/// Posts `body` to `route`, a response with `success: 0` becomes an error
async fn call<T: Serialize>(
    args: &Cli,
    route: &str,
    body: &T,
) -> Result<OperationResponse, Box<dyn Error + Send + Sync>> {
    let server_url = &args.server_url;
    let res = reqwest::Client::default()
        .post(format!("{server_url}{route}"))
        .json(body)
        .send()
        .await?;

    let status = res.status();
    let bytes = res.bytes().await?.to_vec();
    if !status.is_success() {
        // error bodies may still be the usual json shape
        let error = match serde_json::from_slice::<OperationResponse>(&bytes) {
            Ok(res) => res.message,
            Err(_) => String::from_utf8(bytes)?,
        };
        return Err(Box::new(ClientErrors::RequestFailed {
            status: status.as_u16(),
            error,
        }));
    }

    let res = serde_json::from_slice::<OperationResponse>(&bytes)?;
    if !res.is_success() {
        return Err(Box::new(ClientErrors::OperationFailed {
            message: res.message,
        }));
    }
    Ok(res)
}
