use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use clap::{Parser, Subcommand};
use game_fs::mount_manifest::load_mount_manifest;
use game_fs::path_policy::check_path;
use game_fs::{Filesystem, FsConfig, FsError};
use tracing::warn;

const EXIT_SUCCESS: i32 = 0;
const EXIT_USAGE: i32 = 2;
const EXIT_CONFIG: i32 = 10;
const EXIT_MOUNT: i32 = 11;
const EXIT_NOT_FOUND: i32 = 12;
const EXIT_IO: i32 = 13;

#[derive(Parser)]
#[command(name = "fstool", version, about = "Inspect a layered game filesystem")]
struct Cli {
    /// Mount manifest: `<dir|gamedir|archive|pak|wad|zip|pk3|vpk> <path> [flags]`.
    #[arg(long, global = true, value_name = "PATH")]
    manifest: Option<PathBuf>,

    /// TOML filesystem config.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Overrides `max_open_descriptors` from the config.
    #[arg(long, global = true, value_name = "N")]
    max_fds: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List search paths, highest priority first.
    Paths,
    Search {
        pattern: String,
        #[arg(long)]
        ignore_case: bool,
        #[arg(long)]
        gamedir: bool,
    },
    /// Write a file to stdout.
    Cat {
        path: String,
        #[arg(long)]
        gamedir: bool,
    },
    /// Show which layer serves a file and which layers it shadows.
    Info {
        path: String,
        #[arg(long)]
        gamedir: bool,
    },
    Extract {
        pattern: String,
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
        #[arg(long)]
        ignore_case: bool,
    },
}

fn main() {
    game_fs::logging::init("warn");
    let cli = Cli::parse();
    let filesystem = match build_filesystem(cli.config.as_deref(), cli.manifest.as_deref(), cli.max_fds) {
        Ok(filesystem) => filesystem,
        Err(code) => std::process::exit(code),
    };
    let exit_code = match cli.command {
        Commands::Paths => run_paths(&filesystem),
        Commands::Search {
            pattern,
            ignore_case,
            gamedir,
        } => run_search(&filesystem, &pattern, ignore_case, gamedir),
        Commands::Cat { path, gamedir } => run_cat(&filesystem, &path, gamedir),
        Commands::Info { path, gamedir } => run_info(&filesystem, &path, gamedir),
        Commands::Extract {
            pattern,
            out,
            ignore_case,
        } => run_extract(&filesystem, &pattern, &out, ignore_case),
    };
    std::process::exit(exit_code);
}

fn build_filesystem(
    config_path: Option<&Path>,
    manifest_path: Option<&Path>,
    max_fds: Option<usize>,
) -> Result<Filesystem, i32> {
    let mut config = match config_path {
        Some(path) => match FsConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{}", err);
                return Err(EXIT_CONFIG);
            }
        },
        None => FsConfig::default(),
    };
    if max_fds.is_some() {
        config.max_open_descriptors = max_fds;
    }
    let filesystem = Filesystem::new(config);

    let Some(manifest_path) = manifest_path else {
        return Ok(filesystem);
    };
    let entries = match load_mount_manifest(manifest_path) {
        Ok(entries) => entries,
        Err(err) => {
            eprintln!("{}", err);
            return Err(EXIT_MOUNT);
        }
    };
    for failure in filesystem.apply_manifest(&entries) {
        warn!(
            line = failure.line,
            path = %failure.path.display(),
            "mount failed: {}",
            failure.error
        );
    }
    Ok(filesystem)
}

fn exit_code_for(err: &FsError) -> i32 {
    match err {
        FsError::NotFound(_) => EXIT_NOT_FOUND,
        FsError::UnsafePath(_) | FsError::InvalidMode(_) => EXIT_USAGE,
        FsError::MountFailure { .. } => EXIT_MOUNT,
        _ => EXIT_IO,
    }
}

fn run_paths(filesystem: &Filesystem) -> i32 {
    let lines = filesystem.describe_paths();
    if lines.is_empty() {
        println!("no search paths mounted");
    }
    for (index, line) in lines.iter().enumerate() {
        println!("{:>3} {}", index, line);
    }
    EXIT_SUCCESS
}

fn run_search(filesystem: &Filesystem, pattern: &str, ignore_case: bool, gamedir: bool) -> i32 {
    let found = filesystem.search(pattern, ignore_case, gamedir);
    for name in found.iter() {
        println!("{}", name);
    }
    if found.is_empty() {
        EXIT_NOT_FOUND
    } else {
        EXIT_SUCCESS
    }
}

fn run_cat(filesystem: &Filesystem, path: &str, gamedir: bool) -> i32 {
    let data = match filesystem.load_file(path, gamedir) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("{}: {}", path, err);
            return exit_code_for(&err);
        }
    };
    let mut stdout = std::io::stdout().lock();
    if let Err(err) = stdout.write_all(&data).and_then(|_| stdout.flush()) {
        eprintln!("write failed: {}", err);
        return EXIT_IO;
    }
    EXIT_SUCCESS
}

fn run_info(filesystem: &Filesystem, path: &str, gamedir: bool) -> i32 {
    let layers = match filesystem.explain(path, gamedir) {
        Ok(layers) => layers,
        Err(err) => {
            eprintln!("{}: {}", path, err);
            return exit_code_for(&err);
        }
    };
    let Some(winner) = layers.first() else {
        eprintln!("{}: not found", path);
        return EXIT_NOT_FOUND;
    };
    println!("name:  {}", winner.entry.name);
    println!("layer: [{}] {}", winner.path.kind(), winner.path.backend().describe());
    match filesystem.file_size(path, gamedir) {
        Ok(size) => println!("size:  {}", size),
        Err(err) => println!("size:  unavailable ({})", err),
    }
    let mtime = filesystem
        .file_time(path, gamedir)
        .ok()
        .flatten()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok());
    match mtime {
        Some(since_epoch) => println!("mtime: {}", since_epoch.as_secs()),
        None => println!("mtime: unknown"),
    }
    if let Some(host) = filesystem.disk_path(path, gamedir) {
        println!("disk:  {}", host.display());
    }
    for shadowed in &layers[1..] {
        println!(
            "shadows: [{}] {}",
            shadowed.path.kind(),
            shadowed.path.backend().describe()
        );
    }
    EXIT_SUCCESS
}

fn run_extract(filesystem: &Filesystem, pattern: &str, out_dir: &Path, ignore_case: bool) -> i32 {
    match extract(filesystem, pattern, out_dir, ignore_case) {
        Ok(0) => {
            eprintln!("nothing matched {}", pattern);
            EXIT_NOT_FOUND
        }
        Ok(count) => {
            println!("extracted {} files to {}", count, out_dir.display());
            EXIT_SUCCESS
        }
        Err(err) => {
            eprintln!("extract failed: {}", err);
            exit_code_for(&err)
        }
    }
}

/// Copies every matching file to `out_dir`. Directory names yielded by
/// archive searches are skipped.
fn extract(
    filesystem: &Filesystem,
    pattern: &str,
    out_dir: &Path,
    ignore_case: bool,
) -> Result<usize, FsError> {
    let mut count = 0;
    for name in filesystem.search(pattern, ignore_case, false) {
        if check_path(&name, false).is_err() || !filesystem.file_exists(&name, false) {
            continue;
        }
        let data = filesystem.load_file(&name, false)?;
        let target = out_dir.join(&name);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, data)?;
        count += 1;
    }
    Ok(count)
}
