use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use anitsu::bridge::{self, Request, SessionPaths};
use anitsu::config::{self, Config, LoadOptions};
use anitsu::logging;

/// Browse the anitsu catalog in fzf and download what you pick.
#[derive(Debug, Parser)]
#[command(name = "anitsu", version, about)]
struct Cli {
    /// Config file to use instead of the default location.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open the selected keys in the running session and print the next level.
    Reload {
        #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
        keys: Vec<String>,
    },
    /// Print the preview of one key.
    Preview {
        #[arg(allow_hyphen_values = true)]
        key: String,
    },
    /// Download everything under the selected keys.
    #[command(name = "download_folder")]
    DownloadFolder {
        #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
        keys: Vec<String>,
    },
    /// Toggle the flat files-only view.
    #[command(name = "files_only")]
    FilesOnly,
    /// Go up one level.
    #[command(alias = "..")]
    Back,
    /// Refresh the catalog with the external scrape pipeline.
    Update {
        /// Also download cover images.
        #[arg(short = 'i', long = "download-images")]
        download_images: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let code = match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("anitsu: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

fn execute(cli: Cli) -> Result<i32> {
    match cli.command {
        None => {
            let _log = init_logging(false);
            let cfg = load_config(cli.config)?;
            Ok(anitsu::run(&cfg)?.code())
        }
        Some(Command::Update { download_images }) => {
            let _log = init_logging(true);
            let cfg = load_config(cli.config)?;
            anitsu::update::run_pipeline(&cfg.update, download_images)?;
            Ok(0)
        }
        Some(Command::Reload { keys }) => control(Request::Reload(keys)),
        Some(Command::Preview { key }) => control(Request::Preview(key)),
        Some(Command::DownloadFolder { keys }) => control(Request::DownloadFolder(keys)),
        Some(Command::FilesOnly) => control(Request::FilesOnly),
        Some(Command::Back) => control(Request::Reload(vec!["..".into()])),
    }
}

/// Forward one request to the session named by the environment.
fn control(request: Request) -> Result<i32> {
    let _log = init_logging(false);
    let paths = SessionPaths::from_env()?;
    let lines = bridge::request(&paths, &request)?;
    print_lines(&lines)?;
    Ok(0)
}

fn init_logging(console: bool) -> Option<logging::Guard> {
    logging::init(logging::Options { console, dir: None })
        .map_err(|err| eprintln!("anitsu: {err:#}"))
        .ok()
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    config::load(LoadOptions {
        config_file: path,
        env_prefix: None,
    })
}

fn print_lines(lines: &[String]) -> Result<()> {
    let mut out = io::stdout().lock();
    for line in lines {
        match writeln!(out, "{line}") {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
            Err(err) => return Err(err.into()),
        }
    }
    match out.flush() {
        Err(err) if err.kind() != io::ErrorKind::BrokenPipe => Err(err.into()),
        _ => Ok(()),
    }
}
