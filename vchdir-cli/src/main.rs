use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::builder::styling::{AnsiColor, Effects, Style, Styles};
use clap::error::ErrorKind;
use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use vchdir::{
    BackupType, Config, Diagnostics, Error, ExitStatus, FileKind, Removal, RemoveOption, Session,
    Warning, Warnings, compression_program,
};

const HEADER: Style = AnsiColor::Green.on_default().effects(Effects::BOLD);
const USAGE: Style = AnsiColor::Green.on_default().effects(Effects::BOLD);
const LITERAL: Style = AnsiColor::Cyan.on_default().effects(Effects::BOLD);
const PLACEHOLDER: Style = AnsiColor::Cyan.on_default();
const ERROR: Style = AnsiColor::Red.on_default().effects(Effects::BOLD);
const VALID: Style = AnsiColor::Cyan.on_default().effects(Effects::BOLD);
const INVALID: Style = AnsiColor::Yellow.on_default().effects(Effects::BOLD);

/// Cargo's color style
/// [source](https://github.com/crate-ci/clap-cargo/blob/master/src/style.rs)
const CARGO_STYLING: Styles = Styles::styled()
    .header(HEADER)
    .usage(USAGE)
    .literal(LITERAL)
    .placeholder(PLACEHOLDER)
    .error(ERROR)
    .valid(VALID)
    .invalid(INVALID);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None, subcommand_required = true)]
#[clap(styles = CARGO_STYLING)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Follow a symbolic link given as the last component of a -C directory
    #[arg(long, global = true)]
    dereference: bool,

    /// Treat archive names containing a colon as local files
    #[arg(long, global = true)]
    force_local: bool,

    /// Do not fail on files that cannot be read
    #[arg(long, global = true)]
    ignore_failed_read: bool,

    /// Enable or disable a warning: [no-]failed-read, [no-]file-removed, all, none
    #[arg(long = "warning", value_name = "KEYWORD", global = true)]
    warnings: Vec<String>,

    /// Back up files before overwriting or removing them
    #[arg(long, value_name = "CONTROL", num_args = 0..=1, require_equals = true, global = true)]
    backup: Option<Option<String>>,

    /// Version control used when --backup is given without CONTROL
    #[arg(long, env = "VERSION_CONTROL", value_name = "CONTROL", hide = true, global = true)]
    version_control: Option<String>,

    /// Suffix for simple backups
    #[arg(long, env = "SIMPLE_BACKUP_SUFFIX", default_value = "~", global = true)]
    suffix: OsString,

    /// Report renames and removals
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show how each name resolves
    Show(Operands),
    /// Remove each name
    Remove {
        /// Remove non-empty directories with their contents
        #[arg(short, long)]
        recursive: bool,

        /// Only report non-empty directories
        #[arg(long, conflicts_with = "recursive")]
        probe: bool,

        #[command(flatten)]
        operands: Operands,
    },
    /// Move each name aside under its backup name
    Backup {
        /// Restore each backup right after making it
        #[arg(long)]
        undo: bool,

        #[command(flatten)]
        operands: Operands,
    },
}

#[derive(Args, Debug)]
struct Operands {
    /// Change to DIR before handling the names that follow
    #[arg(short = 'C', long = "directory", value_name = "DIR")]
    directory: Vec<PathBuf>,

    /// Names, relative to the most recent -C directory
    #[arg(value_name = "NAME")]
    names: Vec<PathBuf>,
}

enum Operand {
    Directory(PathBuf),
    Name(PathBuf),
}

/// Recovers the command-line order of `-C` and name operands.
fn operands(matches: &ArgMatches) -> Vec<Operand> {
    let mut ordered = Vec::new();
    if let (Some(indices), Some(values)) = (
        matches.indices_of("directory"),
        matches.get_many::<PathBuf>("directory"),
    ) {
        ordered.extend(indices.zip(values.map(|v| Operand::Directory(v.clone()))));
    }
    if let (Some(indices), Some(values)) = (
        matches.indices_of("names"),
        matches.get_many::<PathBuf>("names"),
    ) {
        ordered.extend(indices.zip(values.map(|v| Operand::Name(v.clone()))));
    }
    ordered.sort_by_key(|(index, _)| *index);
    ordered.into_iter().map(|(_, operand)| operand).collect()
}

fn parse_warnings(keywords: &[String]) -> Result<Warnings, String> {
    let mut warnings = Warnings::all();
    for keyword in keywords {
        warnings = match keyword.as_str() {
            "all" => Warnings::all(),
            "none" => Warnings::none(),
            _ => match keyword.strip_prefix("no-") {
                Some(name) => warnings.disable(name.parse::<Warning>()?),
                None => warnings.enable(keyword.parse::<Warning>()?),
            },
        };
    }
    Ok(warnings)
}

fn backup_type(cli: &Cli) -> Result<Option<BackupType>, Error> {
    let Some(control) = &cli.backup else {
        return Ok(None);
    };
    let keyword = control
        .as_deref()
        .or(cli.version_control.as_deref())
        .unwrap_or("existing");
    BackupType::from_version_control(keyword)
}

fn run(cli: &Cli, session: &mut Session, operands: Vec<Operand>) -> Result<(), Error> {
    // Register every directory up front, as an archiver does while parsing
    // its member list, then visit the names in order.
    let mut names = Vec::new();
    let mut dir = 0;
    for operand in operands {
        match operand {
            Operand::Directory(path) => dir = session.chdir_arg(path)?,
            Operand::Name(name) => names.push((dir, name)),
        }
    }

    for (dir, name) in names {
        session.chdir_do(dir)?;
        match &cli.command {
            Command::Show(_) => show(session, dir, name),
            Command::Remove {
                recursive, probe, ..
            } => {
                let option = if *recursive {
                    RemoveOption::Recursive
                } else if *probe {
                    RemoveOption::WantDirectory
                } else {
                    RemoveOption::Ordinary
                };
                remove(session, name, option);
            }
            Command::Backup { undo, .. } => {
                if let Err(err) = session.maybe_backup_file(&name, false) {
                    session.diagnostics().error(&err);
                } else if *undo {
                    session.undo_last_backup();
                }
            }
        }
    }

    let stats = session.dirs().stats();
    log::debug!(
        "{} directories opened, {} closed early",
        stats.opened,
        stats.evicted
    );
    Ok(())
}

fn show(session: &mut Session, dir: usize, name: PathBuf) {
    match session.deref_stat(&name) {
        Ok(stat) => {
            let program = name
                .to_str()
                .and_then(|name| compression_program(name, None))
                .unwrap_or("-");
            println!(
                "{}\t{}\t{}\t{}",
                dir,
                FileKind::of(&stat),
                program,
                session.normalize_filename(dir, &name).display()
            );
        }
        Err(errno) => {
            session
                .diagnostics()
                .file_removed_diag(&name, true, errno, Diagnostics::stat_diag);
        }
    }
}

fn remove(session: &mut Session, name: PathBuf, option: RemoveOption) {
    match session.remove_any_file(&name, option) {
        Ok(Removal::Removed) => log::info!("Removed {}", name.display()),
        Ok(Removal::Kept) => log::warn!("{}: not removing the working directory", name.display()),
        Ok(Removal::NeedsRecursion) => println!("{}: directory not empty", name.display()),
        Err(source) => session.diagnostics().error(&Error::Remove { name, source }),
    }
}

fn main() -> ExitCode {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());

    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let warnings = parse_warnings(&cli.warnings).unwrap_or_else(|msg| {
        Cli::command()
            .error(ErrorKind::InvalidValue, format!("--warning: {msg}"))
            .exit()
    });
    let backup = backup_type(&cli).unwrap_or_else(|err| {
        Cli::command()
            .error(ErrorKind::InvalidValue, format!("--backup: {err}"))
            .exit()
    });

    let config = Config::new()
        .dereference(cli.dereference)
        .force_local(cli.force_local)
        .ignore_failed_read(cli.ignore_failed_read)
        .warnings(warnings)
        .backup(backup)
        .backup_suffix(cli.suffix.clone());

    let failure = ExitCode::from(ExitStatus::Failure.code() as u8);
    let mut session = Session::new(&config);

    let Some((_, sub_matches)) = matches.subcommand() else {
        return failure;
    };
    if let Err(err) = run(&cli, &mut session, operands(sub_matches)) {
        report_fatal(&err);
        return failure;
    }

    ExitCode::from(session.diagnostics().status().code() as u8)
}

fn report_fatal(err: &Error) {
    match std::error::Error::source(err) {
        Some(source) => log::error!("{err}: {source}"),
        None => log::error!("{err}"),
    }
    log::error!("Error is not recoverable: exiting now");
}
