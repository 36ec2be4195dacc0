use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use haltpoint_core::{
    Address, DebugStopReason, DebuggerController, DebuggerError, DebuggerSettings, ExecutableImage, ProcessId,
    Result as DebuggerResult, SessionState, TargetImage,
};
use haltpoint_utils::{LogFormat, LogLevel, LogSettings, debug, info, init_with, warn};

/// Drive a target process through the Haltpoint execution-control engine.
#[derive(Parser, Debug)]
#[command(name = "haltpoint")]
#[command(version)]
#[command(about = "Launch or attach to a process, run it to breakpoints and inspect registers", long_about = None)]
struct Cli
{
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format (overrides HALTPOINT_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Do not stop at the program entry point after launch
    #[arg(long, global = true, default_value_t = false)]
    no_entry_stop: bool,

    /// Launch with address space layout randomisation left on
    #[arg(long, global = true, default_value_t = false)]
    keep_aslr: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Launch a program and report every stop until it exits
    Run
    {
        /// Path to the executable to launch
        program: PathBuf,
        /// Breakpoint at an address (0x1000 or decimal) or a symbol of the program
        #[arg(short, long = "break", value_name = "LOCATION")]
        breakpoints: Vec<String>,
        /// Single-step this many instructions after every breakpoint
        #[arg(long, default_value_t = 0)]
        step: u32,
        /// Print the registers at every stop
        #[arg(long, default_value_t = false)]
        regs: bool,
        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Attach to a running process, print its state, run until Ctrl-C and detach
    Attach
    {
        /// Process ID (PID) to attach to
        pid: u32,
        /// Executable of the process (defaults to /proc/<pid>/exe on Linux)
        #[arg(long)]
        image: Option<PathBuf>,
        /// Kill the process on exit instead of detaching
        #[arg(long, default_value_t = false)]
        kill: bool,
    },
    /// Launch a program, print its registers at the entry point and kill it
    Regs
    {
        /// Path to the executable to launch
        program: PathBuf,
    },
    /// Launch a program, print its memory map at the entry point and kill it
    Regions
    {
        /// Path to the executable to launch
        program: PathBuf,
    },
}

fn main()
{
    let cli = Cli::parse();

    let log_settings = LogSettings {
        level: cli.log_level,
        format: cli.log_format.unwrap_or(LogSettings::from_env().format),
        ..LogSettings::from_env()
    };
    let log_guard = match init_with(&log_settings) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    let code = match run_command(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };
    // process::exit skips destructors; flush the log file first.
    drop(log_guard);
    process::exit(code);
}

fn settings(cli: &Cli) -> DebuggerSettings
{
    let mut settings = DebuggerSettings::from_env();
    if cli.no_entry_stop {
        settings.stop_at_entry_point = false;
    }
    if cli.keep_aslr {
        settings.disable_aslr = false;
    }
    settings
}

/// Runs the selected command; the result is the process exit code.
fn run_command(cli: Cli) -> DebuggerResult<i32>
{
    let settings = settings(&cli);
    match cli.command {
        Commands::Run {
            program,
            breakpoints,
            step,
            regs,
            args,
        } => {
            let (session, image) = launch(&program, &args, settings)?;
            for location in &breakpoints {
                let address = resolve_location(&session, &image, location)?;
                if session.add_breakpoint(address)? {
                    println!("breakpoint at {address} ({location})");
                } else {
                    warn!(%address, location, "Breakpoint was not installed");
                }
            }
            install_pause_handler(&session);
            run_to_exit(&session, step, regs)
        }
        Commands::Attach { pid, image, kill } => {
            let image_path = match image {
                Some(path) => path,
                None => default_image(pid)?,
            };
            let image = Arc::new(ExecutableImage::open(&image_path)?);
            let session = Arc::new(DebuggerController::with_settings(image, settings)?);
            if !session.attach(ProcessId(pid))? {
                return Err(DebuggerError::AttachFailed(format!("could not attach to process {pid}")));
            }
            println!("attached to process {pid}");
            print_threads(&session)?;
            print_registers(&session)?;

            install_pause_handler(&session);
            println!("running; press Ctrl-C to stop");
            let reason = session.go()?;
            report_stop(&session, reason);
            if reason.is_exit() {
                return Ok(exit_code(&session));
            }
            if kill {
                session.destroy()?;
                println!("killed process {pid}");
            } else {
                session.detach()?;
                println!("detached from process {pid}");
            }
            Ok(0)
        }
        Commands::Regs { program } => {
            let (session, _) = launch(&program, &[], settings)?;
            print_registers(&session)?;
            session.destroy()?;
            Ok(0)
        }
        Commands::Regions { program } => {
            let (session, _) = launch(&program, &[], settings)?;
            for region in session.memory_regions()? {
                println!(
                    "{}-{} {} {}",
                    region.start,
                    region.end,
                    region.permissions,
                    region.name.as_deref().unwrap_or("")
                );
            }
            session.destroy()?;
            Ok(0)
        }
    }
}

/// Launch `program` and, when the settings ask for it, run to the entry point.
fn launch(
    program: &Path,
    args: &[String],
    settings: DebuggerSettings,
) -> DebuggerResult<(Arc<DebuggerController>, Arc<ExecutableImage>)>
{
    let program = program.canonicalize()?;
    let stop_at_entry = settings.stop_at_entry_point;
    let image = Arc::new(ExecutableImage::open(&program)?);
    let session = Arc::new(DebuggerController::with_settings(image.clone(), settings)?);

    info!(program = %program.display(), ?args, "Launching");
    if !session.launch_with(&args.join(" "))? {
        return Err(DebuggerError::LaunchFailed(program.display().to_string()));
    }
    println!("launched {} (pid {})", program.display(), session.pid().map_or(0, ProcessId::raw));

    if stop_at_entry {
        let reason = session.go()?;
        report_stop(&session, reason);
        if reason.is_exit() {
            return Err(DebuggerError::LaunchFailed("the program exited before its entry point".into()));
        }
    }
    Ok((session, image))
}

fn default_image(pid: u32) -> DebuggerResult<PathBuf>
{
    if cfg!(target_os = "linux") {
        Ok(std::fs::read_link(format!("/proc/{pid}/exe"))?)
    } else {
        Err(DebuggerError::InvalidArgument("--image is required on this platform".into()))
    }
}

/// Address of `location`: a number, or a symbol of the image moved by the
/// load bias observed at the entry point.
fn resolve_location(session: &DebuggerController, image: &ExecutableImage, location: &str) -> DebuggerResult<Address>
{
    if let Some(address) = parse_address(location) {
        return Ok(address);
    }
    let symbol = image
        .symbol_address(location)
        .ok_or_else(|| DebuggerError::InvalidArgument(format!("no symbol named `{location}`")))?;
    let bias = session.entry_point().value().wrapping_sub(image.entry_point().value());
    debug!(location, %symbol, bias = format_args!("{bias:#x}"), "Resolved symbol");
    Ok(Address::new(symbol.value().wrapping_add(bias)))
}

fn parse_address(text: &str) -> Option<Address>
{
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => text.parse().ok()?,
    };
    Some(Address::new(value))
}

fn install_pause_handler(session: &Arc<DebuggerController>)
{
    let session = Arc::clone(session);
    if let Err(err) = ctrlc::set_handler(move || {
        if !session.pause() {
            debug!("Ctrl-C while the target is not running");
        }
    }) {
        warn!(error = %err, "Could not install the Ctrl-C handler");
    }
}

fn run_to_exit(session: &DebuggerController, step: u32, regs: bool) -> DebuggerResult<i32>
{
    loop {
        let reason = session.go()?;
        report_stop(session, reason);
        if reason.is_exit() {
            return Ok(exit_code(session));
        }
        if regs {
            print_registers(session)?;
        }
        if reason == DebugStopReason::Breakpoint {
            for _ in 0..step {
                let reason = session.step_into()?;
                report_stop(session, reason);
                if reason.is_exit() {
                    return Ok(exit_code(session));
                }
            }
        }
        if reason.is_fault() {
            println!("passing the fault to the target");
        }
        if reason == DebugStopReason::UserRequestedBreak {
            session.quit()?;
            return Ok(130);
        }
    }
}

fn report_stop(session: &DebuggerController, reason: DebugStopReason)
{
    if reason.is_exit() {
        match session.exit_status() {
            Some(status) => println!("process exited: {status}"),
            None => println!("process exited"),
        }
        return;
    }
    match (session.active_thread(), session.state()) {
        (Ok(thread), SessionState::Stopped) => {
            println!("stopped: {reason} at {:#x} (thread {})", thread.instruction_pointer, thread.tid);
        }
        _ => println!("stopped: {reason}"),
    }
}

fn exit_code(session: &DebuggerController) -> i32
{
    session.exit_code().map_or(0, |code| (code & 0xFF) as i32)
}

fn print_threads(session: &DebuggerController) -> DebuggerResult<()>
{
    let active = session.active_thread()?.tid;
    for thread in session.threads()? {
        let marker = if thread.tid == active { '*' } else { ' ' };
        println!("{marker} thread {} at {:#x}", thread.tid, thread.instruction_pointer);
    }
    Ok(())
}

fn print_registers(session: &DebuggerController) -> DebuggerResult<()>
{
    let width = usize::from(session.architecture().pointer_size_bytes()) * 2;
    for register in session.registers()? {
        println!("{:>8} = {:#0w$x}", register.name, register.value, w = width + 2);
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid()
    {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_address()
    {
        assert_eq!(parse_address("0x401000"), Some(Address::new(0x40_1000)));
        assert_eq!(parse_address("4096"), Some(Address::new(4096)));
        assert_eq!(parse_address("main"), None);
        assert_eq!(parse_address("0xzz"), None);
    }

    #[test]
    fn test_run_collects_trailing_arguments()
    {
        let cli = Cli::parse_from(["haltpoint", "run", "-b", "main", "./target", "--flag", "value"]);
        match cli.command {
            Commands::Run {
                program,
                breakpoints,
                args,
                ..
            } => {
                assert_eq!(program, PathBuf::from("./target"));
                assert_eq!(breakpoints, vec!["main".to_string()]);
                assert_eq!(args, vec!["--flag".to_string(), "value".to_string()]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_flags()
    {
        let cli = Cli::parse_from(["haltpoint", "--no-entry-stop", "--log-level", "debug", "regs", "./target"]);
        assert!(cli.no_entry_stop);
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert!(!settings(&cli).stop_at_entry_point);
    }
}
