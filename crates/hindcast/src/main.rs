//! hindcast, a non-interactive fault debugger for Win32 targets.
//!
//! Three subcommands share the observer pipeline of `hindcast-core`:
//! `launch` records a fresh target to the selected sinks, `replay` re-emits
//! a recorded journal, and `mortem` ingests an OS just-in-time crash
//! handoff. Global flags pick the sinks; per-subcommand flags control break
//! policy and trace breadth.

mod path_template;

use std::collections::HashSet;
use std::fs::File;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use console::Style;

use hindcast_core::emit::{TerminalSink, TextEmitter, Utf16FileSink};
use hindcast_core::error::{HindcastError, HindcastResult};
use hindcast_core::events::EventObserver;
use hindcast_core::journal::{JournalReader, JournalWriter, ReplayOptions, FILTER_NAMES};

/// A portable hindsight-style debugger for software that has already
/// shipped: it records what a process did at the moment it faulted.
#[derive(Parser)]
#[command(name = "hindcast", version = hindcast_core::version::display(), about, long_about = None)]
#[command(
    after_help = "note: use the _NT_SYMBOL_PATH and _NT_ALT_SYMBOL_PATH environment variables to \
                  override default search paths for .pdb files.\n      --pdb-search-path can be \
                  given multiple times to add directories."
)]
struct Cli
{
    /// Print events to stdout
    #[arg(short = 's', long = "stdout", global = true)]
    stdout: bool,

    /// Write events to a UTF-16 text file (path may use $time $date $image
    /// $hostname $username $random)
    #[arg(short = 'l', long = "log", global = true, value_name = "PATH")]
    log: Option<String>,

    /// Write events to a binary journal for later replay
    #[arg(short = 'w', long = "write-binary", global = true, value_name = "PATH")]
    write_binary: Option<String>,

    /// Disable colored output
    #[arg(short = 'b', long = "bland", global = true, requires = "stdout")]
    bland: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command
{
    /// Start a program suspended and record its debug events to completion
    Launch(LaunchArgs),
    /// Re-emit the events of a previously recorded journal
    Replay(ReplayArgs),
    /// Attach to an already-faulted process via the OS JIT handoff
    Mortem(MortemArgs),
}

#[derive(Args)]
struct LaunchArgs
{
    /// Path of the program image to launch
    image: String,

    /// Arguments passed to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Working directory for the target
    #[arg(short = 'd', long = "workdir", default_value = "")]
    workdir: String,

    #[command(flatten)]
    breaks: BreakArgs,

    #[command(flatten)]
    trace: TraceArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct ReplayArgs
{
    /// Path of the binary journal to replay
    journal: String,

    /// Only re-emit the named events (repeatable)
    #[arg(short = 'f', long = "filter", value_name = "EVENT", value_parser = parse_event_name)]
    filter: Vec<String>,

    /// Skip the whole-file checksum verification
    #[arg(long = "no-sanity-check")]
    no_sanity_check: bool,

    #[command(flatten)]
    breaks: BreakArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct MortemArgs
{
    /// Pid of the faulted process
    #[arg(short = 'p', long = "process-id")]
    process_id: u32,

    /// Handle value of the OS handoff event
    #[arg(short = 'e', long = "event-handle")]
    event_handle: u64,

    /// Address of the JIT_DEBUG_INFO block in the target
    #[arg(short = 'j', long = "jit-debug-info")]
    jit_debug_info: u64,

    /// Explain to the operator where the crash artifacts were written
    #[arg(short = 'n', long = "notify")]
    notify: bool,

    #[command(flatten)]
    trace: TraceArgs,

    #[command(flatten)]
    output: OutputArgs,
}

/// Break-prompt policy flags shared by launch and replay.
#[derive(Args)]
struct BreakArgs
{
    /// Prompt [c]ontinue/[a]bort at breakpoints
    #[arg(long = "break-breakpoint")]
    break_breakpoint: bool,

    /// Prompt [c]ontinue/[a]bort at exceptions
    #[arg(long = "break-exception")]
    break_exception: bool,

    /// Only break on first-chance exceptions
    #[arg(long = "first-chance", requires = "break_exception")]
    first_chance: bool,
}

/// Trace breadth flags shared by launch and mortem.
#[derive(Args)]
struct TraceArgs
{
    /// Collapse direct self-recursion longer than this many frames
    /// (0 disables folding)
    #[arg(short = 'r', long = "max-recursion", default_value_t = 0)]
    max_recursion: u64,

    /// Disassemble up to this many instructions per frame (0 disables)
    #[arg(short = 'i', long = "max-instruction", default_value_t = 0)]
    max_instructions: u64,

    /// Extra directory for the symbol engine search path (repeatable)
    #[arg(short = 'S', long = "pdb-search-path", value_name = "DIR")]
    pdb_search_path: Vec<String>,

    /// Also search for symbols next to the target image
    #[arg(long = "pdb-search-self")]
    pdb_search_self: bool,
}

/// Text-rendering flags shared by all subcommands.
#[derive(Args)]
struct OutputArgs
{
    /// Print the thread's CPU context before stack traces
    #[arg(short = 'c', long = "print-context")]
    print_context: bool,

    /// Prefix every event with its timestamp
    #[arg(short = 't', long = "print-timestamp")]
    print_timestamp: bool,
}

fn parse_event_name(value: &str) -> Result<String, String>
{
    if FILTER_NAMES.contains(&value) {
        Ok(value.to_string())
    } else {
        Err(format!("invalid event '{value}', options: {}", FILTER_NAMES.join(", ")))
    }
}

fn error_line(message: &str)
{
    eprintln!("{}", Style::new().red().bright().apply_to(format!("error: {message}")));
}

fn main() -> ExitCode
{
    if let Err(error) = hindcast_utils::init_logging() {
        eprintln!("Failed to initialize logging: {error}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();

    // Text-only toggles make no sense without a text sink to apply them to.
    let textual = cli.stdout || cli.log.is_some();
    let wants_text_flags = match &cli.command {
        Command::Launch(args) => args.output.print_context || args.output.print_timestamp,
        Command::Replay(args) => args.output.print_context || args.output.print_timestamp,
        Command::Mortem(args) => args.output.print_context || args.output.print_timestamp,
    };
    if wants_text_flags && !textual {
        error_line("cannot use --print-context or --print-timestamp without either --stdout or --log");
        return ExitCode::FAILURE;
    }

    let result = match &cli.command {
        Command::Launch(_) => run_launch(&cli),
        Command::Replay(_) => run_replay(&cli),
        Command::Mortem(_) => run_mortem(&cli),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error_line(&error.to_string());
            ExitCode::FAILURE
        }
    }
}

/// Sink paths with their templates expanded.
///
/// Expansion happens exactly once per run: `$time` and `$random` must agree
/// between the sink that opens and any message naming it afterwards.
struct ResolvedSinks
{
    log: Option<String>,
    write_binary: Option<String>,
}

fn resolve_sinks(cli: &Cli, image: &str) -> ResolvedSinks
{
    ResolvedSinks {
        log: cli.log.as_deref().map(|template| path_template::expand(template, image)),
        write_binary: cli
            .write_binary
            .as_deref()
            .map(|template| path_template::expand(template, image)),
    }
}

/// Construct the observer set selected by the global sink flags.
fn build_observers(cli: &Cli, output: &OutputArgs, sinks: &ResolvedSinks) -> HindcastResult<Vec<Box<dyn EventObserver>>>
{
    let mut observers: Vec<Box<dyn EventObserver>> = Vec::new();

    if cli.stdout {
        let sink = TerminalSink::new(!cli.bland);
        observers.push(Box::new(TextEmitter::new(sink, output.print_timestamp, output.print_context)));
    }

    if let Some(path) = &sinks.log {
        ensure_parent_exists(path)?;
        let sink = Utf16FileSink::new(File::create(path)?)?;
        // Timestamps are always written to text files.
        observers.push(Box::new(TextEmitter::new(sink, true, output.print_context)));
    }

    if let Some(path) = &sinks.write_binary {
        ensure_parent_exists(path)?;
        observers.push(Box::new(JournalWriter::new(File::create(path)?)));
    }

    Ok(observers)
}

fn ensure_parent_exists(path: &str) -> HindcastResult<()>
{
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn run_replay(cli: &Cli) -> HindcastResult<()>
{
    let Command::Replay(args) = &cli.command else { unreachable!() };

    let options = ReplayOptions {
        event_filter: (!args.filter.is_empty())
            .then(|| args.filter.iter().cloned().collect::<HashSet<_>>()),
        no_sanity_check: args.no_sanity_check,
        break_on_breakpoint: args.breaks.break_breakpoint,
        break_on_exception: args.breaks.break_exception,
        first_chance_only: args.breaks.first_chance,
    };

    let stream = File::open(&args.journal)?;
    let mut reader = JournalReader::open(stream, options)?;

    let sinks = resolve_sinks(cli, &args.journal);
    for observer in build_observers(cli, &args.output, &sinks)? {
        reader.add_observer(observer);
    }

    reader.play()
}

#[cfg(windows)]
fn run_launch(cli: &Cli) -> HindcastResult<()>
{
    use hindcast_core::debugger::{DebugOptions, EventDispatcher};
    use hindcast_core::platform::windows::launch::start_suspended;

    let Command::Launch(args) = &cli.command else { unreachable!() };

    let process = start_suspended(&args.image, &args.workdir, &args.args)?;
    let options = DebugOptions {
        kill_on_detach: false,
        break_on_breakpoint: args.breaks.break_breakpoint,
        break_on_exception: args.breaks.break_exception,
        first_chance_only: args.breaks.first_chance,
        max_recursion: args.trace.max_recursion,
        max_instructions: args.trace.max_instructions,
        symbol_search_paths: args.trace.pdb_search_path.clone(),
        symbol_search_self: args.trace.pdb_search_self,
    };

    let sinks = resolve_sinks(cli, &process.path);
    let mut dispatcher = EventDispatcher::new(process, options)?;
    for observer in build_observers(cli, &args.output, &sinks)? {
        dispatcher.add_observer(observer);
    }

    dispatcher.attach()?;
    tracing::info!("attached, resuming target");
    dispatcher.resume_target()?;
    dispatcher.run()
}

#[cfg(not(windows))]
fn run_launch(_cli: &Cli) -> HindcastResult<()>
{
    Err(HindcastError::LaunchFailed(
        "live debugging requires a Windows host; replay works everywhere".into(),
    ))
}

#[cfg(windows)]
fn run_mortem(cli: &Cli) -> HindcastResult<()>
{
    use hindcast_core::debugger::{DebugOptions, EventDispatcher};
    use hindcast_core::platform::windows as os;
    use hindcast_core::postmortem::JitHandoff;
    use hindcast_core::types::ProcessRef;

    let Command::Mortem(args) = &cli.command else { unreachable!() };

    // Postmortem output must survive the session; a console nobody watches
    // does not qualify.
    if cli.stdout {
        return Err(HindcastError::LaunchFailed(
            "cannot use --stdout in the post-mortem debug mode".into(),
        ));
    }
    if cli.log.is_none() && cli.write_binary.is_none() {
        return Err(HindcastError::LaunchFailed(
            "the mortem subcommand requires a file-based sink (--log or --write-binary)".into(),
        ));
    }

    let h_process = os::open_process(args.process_id)?;
    let path = os::main_module_path(h_process).unwrap_or_default();
    let process = ProcessRef::from_raw(
        path.clone(),
        String::new(),
        Vec::new(),
        args.process_id,
        0,
        h_process,
        0,
    );

    let options = DebugOptions {
        max_recursion: args.trace.max_recursion,
        max_instructions: args.trace.max_instructions,
        symbol_search_paths: args.trace.pdb_search_path.clone(),
        symbol_search_self: args.trace.pdb_search_self,
        ..DebugOptions::default()
    };
    let handoff = JitHandoff {
        process_id: args.process_id,
        event_handle: args.event_handle,
        jit_info_address: args.jit_debug_info,
    };

    let sinks = resolve_sinks(cli, &path);
    let mut dispatcher = EventDispatcher::new_postmortem(process, options, handoff)?;
    for observer in build_observers(cli, &args.output, &sinks)? {
        dispatcher.add_observer(observer);
    }

    dispatcher.attach()?;

    if args.notify {
        notify_operator(&sinks, &path, args.process_id);
    }
    Ok(())
}

#[cfg(not(windows))]
fn run_mortem(_cli: &Cli) -> HindcastResult<()>
{
    Err(HindcastError::LaunchFailed(
        "post-mortem attach requires a Windows host".into(),
    ))
}

/// Tell the human at the machine what just happened and where the crash
/// artifacts went.
#[cfg(windows)]
fn notify_operator(sinks: &ResolvedSinks, image: &str, process_id: u32)
{
    let name = std::path::Path::new(image)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.to_string());

    println!("You were running {name} with PID {process_id},");
    println!("but this process has crashed in a way that could not be recovered.");
    println!();
    println!("program path: {image}");
    println!();
    println!("hindcast, the debugger that you are seeing right now, has");
    println!("placed information about this crash in one or more files on your device:");
    println!();
    if let Some(log) = &sinks.log {
        println!(" - {log}");
    }
    if let Some(journal) = &sinks.write_binary {
        println!(" - {journal}");
    }
    println!();
    println!("You can view these files yourself, or send them unmodified to your");
    println!("systems administrator for further inspection.");
    println!();
    println!("hindcast {}", hindcast_core::version::display());
    println!("Press any key to close this window.");
    let _ = console::Term::stdout().read_char();
}
