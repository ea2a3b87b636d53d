use anyhow::{Context, Result};
use bucketfs::cadapter::memory::MemoryBackend;
use bucketfs::cadapter::s3::S3Backend;
use bucketfs::config::Config;
use bucketfs::vfs::listing::FindOptions;
use bucketfs::{ObjectBackend, ObjectFs};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bucketfs", about = "Browse and move data in S3-compatible object stores")]
struct Cli {
    /// YAML config with `fs` and `s3` sections
    #[arg(short, long, env = "BUCKETFS_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// S3 endpoint URL; implies path-style addressing
    #[arg(long, env = "BUCKETFS_ENDPOINT")]
    endpoint: Option<String>,

    /// Use an empty in-process store instead of S3
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List a bucket, a directory, or all buckets
    Ls {
        #[arg(default_value = "")]
        path: String,
        /// Show size, kind and modification time
        #[arg(short, long)]
        long: bool,
    },
    /// Show details of one path
    Info { path: String },
    /// Print an object to stdout
    Cat { path: String },
    /// Upload a local file
    Put {
        local: PathBuf,
        remote: String,
        /// Multipart chunk size in bytes
        #[arg(long)]
        chunksize: Option<u64>,
    },
    /// Download an object
    Get { remote: String, local: PathBuf },
    /// Server-side copy
    Cp {
        src: String,
        dst: String,
        #[arg(short, long)]
        recursive: bool,
        /// Keep the multipart layout so the etag stays the same
        #[arg(long)]
        preserve_etag: bool,
    },
    /// Copy then delete
    Mv {
        src: String,
        dst: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Delete objects, trees or buckets
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Create a bucket
    Mkdir {
        path: String,
        #[arg(short, long)]
        parents: bool,
        #[arg(long)]
        acl: Option<String>,
    },
    /// Every path below a directory
    Find {
        path: String,
        #[arg(long)]
        maxdepth: Option<usize>,
        #[arg(long)]
        withdirs: bool,
    },
    /// Presigned download URL
    Url {
        path: String,
        /// Validity in seconds
        #[arg(long, default_value_t = 3600)]
        expires: u64,
    },
    /// Content checksum, stable while the object is unchanged
    Checksum { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bucketfs=info")),
        )
        .init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(endpoint) = cli.endpoint {
        config.s3.endpoint = Some(endpoint);
        config.s3.force_path_style = true;
    }
    config.s3.anonymous |= config.fs.anonymous;

    if cli.memory {
        let fs = ObjectFs::new(MemoryBackend::new(), config.fs);
        return run(fs, cli.command).await;
    }
    let backend = S3Backend::new(config.s3)
        .await
        .context("failed to build S3 client")?;
    run(ObjectFs::new(backend, config.fs), cli.command).await
}

async fn run<B: ObjectBackend>(fs: ObjectFs<B>, command: Commands) -> Result<()> {
    match command {
        Commands::Ls { path, long } => {
            for entry in fs.ls(&path, false).await? {
                if long {
                    let modified = entry
                        .last_modified
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{:>12} {:<9} {modified:<19} {}", entry.size, format!("{:?}", entry.kind), entry.name);
                } else {
                    println!("{}", entry.name);
                }
            }
        }
        Commands::Info { path } => {
            let entry = fs.info(&path).await?;
            println!("{entry:#?}");
        }
        Commands::Cat { path } => {
            let data = fs.cat_file(&path, None, None).await?;
            let mut out = std::io::stdout().lock();
            out.write_all(&data)?;
            out.flush()?;
        }
        Commands::Put {
            local,
            remote,
            chunksize,
        } => {
            fs.put_file(&local, &remote, chunksize)
                .await
                .with_context(|| format!("upload of {} failed", local.display()))?;
        }
        Commands::Get { remote, local } => {
            fs.get_file(&remote, &local)
                .await
                .with_context(|| format!("download of {remote} failed"))?;
        }
        Commands::Cp {
            src,
            dst,
            recursive,
            preserve_etag,
        } => {
            if recursive {
                fs.copy(&src, &dst, true).await?;
            } else {
                fs.cp_file(&src, &dst, preserve_etag).await?;
            }
        }
        Commands::Mv {
            src,
            dst,
            recursive,
        } => fs.mv(&src, &dst, recursive).await?,
        Commands::Rm { paths, recursive } => fs.rm(&paths, recursive, None).await?,
        Commands::Mkdir { path, parents, acl } => {
            fs.mkdir(&path, acl.as_deref(), parents, None).await?
        }
        Commands::Find {
            path,
            maxdepth,
            withdirs,
        } => {
            let mut opts = FindOptions::default().withdirs(withdirs);
            opts.maxdepth = maxdepth;
            for name in fs.find_names(&path, opts).await? {
                println!("{name}");
            }
        }
        Commands::Url { path, expires } => {
            println!("{}", fs.url(&path, Some(Duration::from_secs(expires))).await?);
        }
        Commands::Checksum { path } => {
            println!("{:032x}  {path}", fs.checksum(&path, false).await?);
        }
    }
    Ok(())
}
