use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use clap::Subcommand;
use env_logger::Builder;
use log::{debug, info};

use rox::ast_printer::AstPrinter;
use rox::error::{ErrorKind, LoxError};
use rox::scanner::{scan_tokens, Scanner};
use rox::session::{ErrorSink, Lox};
use rox::token::Token;

/// Exit status for invocations clap rejects.
const EXIT_USAGE: i32 = 1;

#[derive(ClapParser, Debug)]
#[command(name = "rox", version, about = "Lox language interpreter", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Option<Commands>,

    /// Enable logging to app.log
    #[arg(long, global = true)]
    log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tokenizes input from a file, printing each token
    Tokenize {
        filename: PathBuf,

        /// Print the tokens as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Parses input from a file as a program and prints its AST
    Parse { filename: PathBuf },

    /// Evaluates input from a file as a single expression and prints the result
    Evaluate { filename: PathBuf },

    /// Runs input from a file as a Lox program
    Run { filename: PathBuf },

    /// Reads and runs Lox one line at a time (the default)
    Repl,
}

/// Reads the contents of a file into a String
fn read_file(filename: &Path) -> Result<String> {
    info!("Reading file: {:?}", filename);
    let file = File::open(filename).context(format!("Failed to open file {:?}", filename))?;
    let mut reader = BufReader::new(file);
    let mut buf = String::new();

    let bytes = reader
        .read_to_string(&mut buf)
        .context(format!("Failed to read file {:?}", filename))?;

    info!("Read {} bytes from {:?}", bytes, filename);

    Ok(buf)
}

fn init_logger() -> Result<()> {
    // Create or open the log file
    let log_file = File::create("app.log").context("Failed to create app.log")?;

    Builder::new()
        .format(|buf, record| {
            let module = record.module_path().unwrap_or("<unnamed>");
            writeln!(
                buf,
                "[{}:{}] - {}",
                module.strip_prefix("rox::").unwrap_or(module),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter(None, log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    info!("Logger initialized, writing to app.log");
    Ok(())
}

fn stderr_sink() -> ErrorSink {
    Box::new(|kind: ErrorKind, message: &str| {
        debug!("{:?} error reported", kind);
        eprintln!("{}", message);
    })
}

/// Exit status of the first error in `errors`.
fn exit_code(errors: &[LoxError]) -> i32 {
    errors
        .first()
        .map_or(0, |error| error.kind().exit_code())
}

fn tokenize(filename: &Path, json: bool) -> Result<i32> {
    info!("Running Tokenize subcommand");
    let source = read_file(filename)?;

    if json {
        let (tokens, errors) = scan_tokens(&source);
        for error in &errors {
            eprintln!("{}", error);
        }

        println!(
            "{}",
            serde_json::to_string_pretty(&tokens).context("Failed to serialize tokens")?
        );
        return Ok(exit_code(&errors));
    }

    let mut code = 0;
    for token in Scanner::new(&source) {
        match token {
            Ok(token) => {
                debug!("Scanned token: {}", token);
                println!("{}", token);
            }

            Err(e) => {
                debug!("Tokenization debug: {}", e);
                eprintln!("{}", e);
                code = e.kind().exit_code();
            }
        }
    }

    info!("Tokenize subcommand completed");
    Ok(code)
}

fn parse(filename: &Path) -> Result<i32> {
    info!("Running Parse subcommand");
    let source = read_file(filename)?;

    let (tokens, errors): (Vec<Token>, Vec<LoxError>) = scan_tokens(&source);
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("{}", error);
        }
        return Ok(exit_code(&errors));
    }

    let (statements, errors) = rox::parse(&tokens);
    if !errors.is_empty() {
        for error in &errors {
            debug!("Parse debug: {}", error);
            eprintln!("{}", error);
        }
        return Ok(exit_code(&errors));
    }

    println!("{}", AstPrinter::print_program(&statements));

    info!("Parse subcommand completed");
    Ok(0)
}

fn evaluate(filename: &Path) -> Result<i32> {
    info!("Running Evaluate subcommand");
    let source = read_file(filename)?;
    let mut lox = Lox::new().on_error(stderr_sink());

    let code = match lox.evaluate(&source) {
        Ok(value) => {
            debug!("Evaluated to: {}", value);
            println!("{}", value);
            0
        }
        Err(errors) => exit_code(&errors),
    };

    info!("Evaluate subcommand completed");
    Ok(code)
}

fn run(filename: &Path) -> Result<i32> {
    info!("Running Run subcommand");
    let source = read_file(filename)?;
    info!("Provided input:\n {}", source);

    let mut lox = Lox::new().on_error(stderr_sink());

    match lox.run(&source) {
        Ok(()) => {
            info!("Program executed successfully");
            Ok(0)
        }
        Err(errors) => Ok(exit_code(&errors)),
    }
}

fn repl() -> Result<i32> {
    info!("Running Repl subcommand");
    let mut lox = Lox::new().on_error(stderr_sink());

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let line: String = match lines.next() {
            Some(line) => line.context("Failed to read from stdin")?,
            None => break,
        };

        if line.trim().is_empty() {
            break;
        }

        // Errors were already written by the sink; keep the session going.
        if let Ok(Some(value)) = lox.run_line(&line) {
            println!("{}", value);
        }
    }

    info!("Repl session ended");
    Ok(0)
}

fn main() {
    let args: Cli = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help and version go to stdout and are not failures.
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Initialize logger only if --log flag is provided
    if args.log {
        if let Err(e) = init_logger() {
            eprintln!("{:#}", e);
            std::process::exit(ErrorKind::Io.exit_code());
        }
    } else {
        // Initialize a minimal logger to avoid "no logger" errors
        Builder::new().filter_level(log::LevelFilter::Off).init();
    }

    info!("CLI arguments: {:?}", args);

    let outcome: Result<i32> = match args.commands.unwrap_or(Commands::Repl) {
        Commands::Tokenize { filename, json } => tokenize(&filename, json),
        Commands::Parse { filename } => parse(&filename),
        Commands::Evaluate { filename } => evaluate(&filename),
        Commands::Run { filename } => run(&filename),
        Commands::Repl => repl(),
    };

    let code = match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{:#}", e);
            ErrorKind::Io.exit_code()
        }
    };

    debug!("Exiting with code {}", code);
    std::process::exit(code);
}
