//! Purpose: `iginx` CLI entry point: argument parsing, bootstrap and output helpers.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Insert documents are validated and normalized before any connection is made.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::time::Duration;

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use iginx_client::api::{
    DEFAULT_CHUNK_SIZE, DEFAULT_PASSWORD, DEFAULT_URL, DEFAULT_USER, DataSet, Error, ErrorKind,
    HttpTransport, MAX_KEY, MIN_KEY, Session, SessionOptions, to_exit_code,
};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod insert_doc;

use insert_doc::value_json;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    let result = command_dispatch::dispatch_command(cli.command, &cli.connect, color_mode);

    result
        .map_err(add_transport_hint)
        .map_err(add_decode_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let replacement = arg.to_str().and_then(|value| match value {
                "---help" => Some("--help"),
                "---version" => Some("--version"),
                _ => None,
            });
            replacement.map(OsString::from).unwrap_or_else(|| arg)
        })
        .collect()
}

#[derive(Parser)]
#[command(
    name = "iginx",
    version,
    about = "Command-line client for IGinX polystore servers",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Writes and reads time series through the IGinX binary wire format.

Mental model:
  - `insert` sends a batch of keyed values (write)
  - `query` / `last` read a key range back (read)
  - `exec` streams the rows of any SQL statement
"#,
    after_help = r#"EXAMPLES
  $ iginx insert '{"paths":["us.d1.s1"],"keys":[1,2],"types":["LONG"],"values":[[10],[20]]}'
  $ iginx query us.d1.s1 --start 0 --end 100
  $ iginx exec "SELECT s1 FROM us.d1;"

LEARN MORE
  $ iginx <command> --help
  Set RUST_LOG=debug to trace requests."#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics and pretty JSON output: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Debug)]
struct ConnectArgs {
    #[arg(
        long,
        global = true,
        default_value = DEFAULT_URL,
        help = "Server base URL",
        help_heading = "Connection"
    )]
    url: String,
    #[arg(long, global = true, default_value = DEFAULT_USER, help_heading = "Connection")]
    user: String,
    #[arg(long, global = true, default_value = DEFAULT_PASSWORD, help_heading = "Connection")]
    password: String,
    #[arg(
        long,
        global = true,
        help = "Bearer token sent with every request",
        help_heading = "Connection"
    )]
    token: Option<String>,
    #[arg(
        long = "token-file",
        global = true,
        value_name = "PATH",
        help = "Read bearer token from file",
        conflicts_with = "token",
        value_hint = ValueHint::FilePath,
        help_heading = "Connection"
    )]
    token_file: Option<PathBuf>,
    #[arg(
        long = "timeout-ms",
        global = true,
        value_name = "MS",
        help = "Per-request timeout in milliseconds",
        help_heading = "Connection"
    )]
    timeout_ms: Option<u64>,
    #[arg(
        long = "tls-ca",
        global = true,
        value_name = "PATH",
        help = "Trust this PEM CA/certificate for TLS",
        value_hint = ValueHint::FilePath,
        help_heading = "Connection"
    )]
    tls_ca: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Insert a batch of keyed values",
        long_about = r#"Insert a batch of keyed values.

The batch is a JSON document; `values` is row-major (one array per key) unless
--columns is given (one array per path). Paths and keys are sorted and checked
locally before anything is sent."#,
        after_help = r#"EXAMPLES
  $ iginx insert '{"paths":["b.b","a.a"],"keys":[2,1],"types":["LONG","BINARY"],"values":[[20,"x"],[10,null]]}'
  $ iginx insert --columns -f batch.json
  $ cat batch.json | iginx insert -f -
  $ iginx insert --dry-run -f batch.json

NOTES
  - Types: BOOLEAN, INTEGER, LONG, FLOAT, DOUBLE, BINARY (case-insensitive)
  - `null` marks an absent value; BINARY takes a string or an array of bytes
  - --dry-run prints the normalized batch without connecting"#
    )]
    Insert {
        #[arg(help = "Inline JSON insert document")]
        data: Option<String>,
        #[arg(
            short = 'f',
            long = "file",
            help = "Read the document from a file (use - for stdin)",
            conflicts_with = "data",
            value_hint = ValueHint::FilePath
        )]
        file: Option<String>,
        #[arg(long, help = "Treat `values` as one array per path")]
        columns: bool,
        #[arg(long = "non-aligned", help = "Use the non-aligned insert variant")]
        non_aligned: bool,
        #[arg(long = "time-precision", help = "Key time unit understood by the server (e.g. ms)")]
        time_precision: Option<String>,
        #[arg(long = "dry-run", help = "Validate and print the normalized batch only")]
        dry_run: bool,
    },
    #[command(
        arg_required_else_help = true,
        about = "Read a key range",
        after_help = r#"EXAMPLES
  $ iginx query us.d1.s1 us.d1.s2 --start 0 --end 1000
  $ iginx query 'us.d1.*'"#
    )]
    Query {
        #[arg(required = true, help = "Paths to read (wildcards allowed)")]
        paths: Vec<String>,
        #[arg(long, default_value_t = MIN_KEY, allow_negative_numbers = true)]
        start: i64,
        #[arg(long, default_value_t = MAX_KEY, allow_negative_numbers = true)]
        end: i64,
    },
    #[command(
        arg_required_else_help = true,
        about = "Read the latest value of each path",
        after_help = r#"EXAMPLES
  $ iginx last us.d1.s1 --start 100"#
    )]
    Last {
        #[arg(required = true, help = "Paths to read (wildcards allowed)")]
        paths: Vec<String>,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        start: i64,
    },
    #[command(
        arg_required_else_help = true,
        about = "Run a statement and stream its rows as JSON Lines",
        after_help = r#"EXAMPLES
  $ iginx exec "SELECT * FROM us.d1;" --fetch-size 1000
  $ iginx exec "SHOW COLUMNS;""#
    )]
    Exec {
        #[arg(help = "Statement text")]
        sql: String,
        #[arg(long = "fetch-size", help = "Rows per fetch (default: everything in one page)")]
        fetch_size: Option<i32>,
    },
    #[command(
        name = "export-csv",
        arg_required_else_help = true,
        about = "Write a statement's rows to a CSV file",
        after_help = r#"EXAMPLES
  $ iginx export-csv "SELECT * FROM us.d1;" --out d1.csv
  $ iginx export-csv "SELECT * FROM us.d1;" --out d1.csv --no-header --key-as-time"#
    )]
    ExportCsv {
        #[arg(help = "Statement text")]
        sql: String,
        #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
        out: PathBuf,
        #[arg(long = "no-header", help = "Omit the header row")]
        no_header: bool,
        #[arg(long = "key-as-time", help = "Render keys as RFC 3339 (keys are seconds)")]
        key_as_time: bool,
        #[arg(long = "fetch-size")]
        fetch_size: Option<i32>,
    },
    #[command(
        name = "export-stream",
        arg_required_else_help = true,
        about = "Write each column's raw bytes to its own file",
        after_help = r#"EXAMPLES
  $ iginx export-stream "SELECT * FROM images.raw;" --dir ./images"#
    )]
    ExportStream {
        #[arg(help = "Statement text")]
        sql: String,
        #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
        dir: PathBuf,
        #[arg(long = "fetch-size")]
        fetch_size: Option<i32>,
    },
    #[command(
        name = "export",
        arg_required_else_help = true,
        about = "Run an export statement and follow the server's export directive",
        after_help = r#"EXAMPLES
  $ iginx export "SELECT * FROM us.d1 INTO OUTFILE \"/tmp/d1.csv\" AS CSV;""#
    )]
    Export {
        #[arg(help = "Statement text")]
        sql: String,
    },
    #[command(
        name = "load-dir",
        arg_required_else_help = true,
        about = "Load every file in a directory as chunked BINARY values",
        after_help = r#"EXAMPLES
  $ iginx load-dir ./images --chunk-size 65536

NOTES
  - Each file becomes the path `<dir>.<file_name>`; '.' and '-' turn into '_'
  - Chunk i of a file is stored under key i"#
    )]
    LoadDir {
        #[arg(value_hint = ValueHint::DirPath)]
        dir: PathBuf,
        #[arg(long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
    #[command(
        arg_required_else_help = true,
        about = "Delete a key range from paths",
        after_help = r#"EXAMPLES
  $ iginx delete us.d1.s1 --start 0 --end 100"#
    )]
    Delete {
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(long, default_value_t = MIN_KEY, allow_negative_numbers = true)]
        start: i64,
        #[arg(long, default_value_t = MAX_KEY, allow_negative_numbers = true)]
        end: i64,
    },
    #[command(
        about = "Print version info as JSON",
        long_about = r#"Emit version info as JSON (stable, machine-readable)."#,
        after_help = r#"EXAMPLES
  $ iginx version"#
    )]
    Version,
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        long_about = r#"Generate shell completion scripts.

Prints a completion script for the given shell to stdout."#,
        after_help = r#"EXAMPLES
  $ iginx completion bash > ~/.local/share/bash-completion/completions/iginx
  $ iginx completion zsh > ~/.zfunc/_iginx
  $ iginx completion fish > ~/.config/fish/completions/iginx.fish"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn connect(args: &ConnectArgs) -> Result<Session<HttpTransport>, Error> {
    let mut transport = HttpTransport::new(args.url.clone())?;
    if let Some(token) = resolve_token_value(args)? {
        transport = transport.with_token(token);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        transport = transport.with_timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(path) = &args.tls_ca {
        transport = transport.with_tls_ca_file(path)?;
    }
    Session::open(
        transport,
        SessionOptions::new(args.user.clone(), args.password.clone()),
    )
}

fn resolve_token_value(args: &ConnectArgs) -> Result<Option<String>, Error> {
    if let Some(token) = &args.token {
        return Ok(Some(token.clone()));
    }
    let Some(path) = &args.token_file else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("failed to read token file")
            .with_path(path)
            .with_source(err)
    })?;
    let token = raw.trim().to_string();
    if token.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("token file is empty")
            .with_path(path));
    }
    Ok(Some(token))
}

fn read_insert_input(data: Option<String>, file: Option<&str>) -> Result<String, Error> {
    if let Some(data) = data {
        return Ok(data);
    }
    let Some(path) = file else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("missing insert document")
            .with_hint("Provide JSON inline, via --file, or --file - for stdin."));
    };
    let mut text = String::new();
    if path == "-" {
        io::stdin().read_to_string(&mut text).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read stdin")
                .with_source(err)
        })?;
    } else {
        text = std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read insert document")
                .with_path(path)
                .with_source(err)
        })?;
    }
    Ok(text)
}

fn data_set_json(data: &DataSet) -> Value {
    let rows = data
        .rows()
        .map(|row| {
            let values = row.values.into_iter().map(value_json).collect::<Vec<_>>();
            match row.key {
                Some(key) => json!({ "key": key, "values": values }),
                None => json!({ "values": values }),
            }
        })
        .collect::<Vec<_>>();
    json!({
        "paths": data.paths(),
        "types": data.types().iter().map(|data_type| data_type.name()).collect::<Vec<_>>(),
        "rows": rows,
    })
}

fn add_transport_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Transport => {
            err.with_hint("Could not reach the server. Check --url and that IGinX is running.")
        }
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
}

fn add_decode_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::ProtocolDecode || err.hint().is_some() {
        return err;
    }
    err.with_hint("The server response did not match the expected layout. Check client/server versions.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_BACKTRACE=1 and share command/context if it persists.",
    )
}

fn emit_version_output(color_mode: ColorMode) {
    if io::stdout().is_terminal() {
        println!("iginx {}", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(
            json!({
                "name": "iginx",
                "version": env!("CARGO_PKG_VERSION"),
            }),
            color_mode,
        );
    }
}

fn emit_json(value: serde_json::Value, color_mode: ColorMode) {
    let is_tty = io::stdout().is_terminal();
    let pretty = is_tty || color_mode.use_color(is_tty);
    let json = if pretty {
        serde_json::to_string_pretty(&value)
            .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    } else {
        serde_json::to_string(&value)
            .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    };
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::MalformedRequest => "malformed request".to_string(),
        ErrorKind::ProtocolDecode => "protocol decode error".to_string(),
        ErrorKind::Transport => "transport error".to_string(),
        ErrorKind::ServerStatus => "server rejected the request".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(code) = err.status_code() {
        inner.insert("status".to_string(), json!(code));
    }
    if let Some(row) = err.row() {
        inner.insert("row".to_string(), json!(row));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(code) = err.status_code() {
        lines.push(format!(
            "{} {code}",
            colorize_label("status:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(row) = err.row() {
        lines.push(format!(
            "{} {row}",
            colorize_label("row:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(offset) = err.offset() {
        lines.push(format!(
            "{} {offset}",
            colorize_label("offset:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `iginx --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "iginx") else {
        return "Try `iginx --help`.".to_string();
    };

    let parts: Vec<&str> = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| {
            !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
        })
        .copied()
        .collect();

    if parts.is_empty() {
        return "Try `iginx --help`.".to_string();
    }
    format!("Try `iginx {} --help`.", parts.join(" "))
}
