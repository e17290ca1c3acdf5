use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use base64::Engine;
use clap::{ArgAction, Parser, ValueEnum};
use ctcalign::{codec, ctc_align, AlignConfig, Error, Lod, LodTensor, Result, Token};
use env_logger::Env;
use log::{debug, LevelFilter};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(
    name = "ctcalign",
    version,
    about = "Collapse CTC frame tokens: drop blanks and merge repeats",
    after_help = "When no paths are given, reads from stdin.\n\
                  Input is either JSON {\"tokens\": [...], \"lod\": [[...]]} or plain text\n\
                  with one segment of whitespace-separated token ids per line."
)]
struct Cli {
    /// Blank token id (default: from --config, else 0)
    #[arg(short, long, allow_negative_numbers = true)]
    blank: Option<Token>,

    /// Merge consecutive repeated tokens (default)
    #[arg(long, conflicts_with = "no_merge")]
    merge_repeated: bool,

    /// Keep consecutive repeated tokens
    #[arg(long)]
    no_merge: bool,

    /// JSON file with alignment settings
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short = 'q', long, action = ArgAction::Count)]
    quiet: u8,

    /// Input files
    paths: Vec<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    /// One collapsed segment per line
    Text,
    /// {"tokens": [...], "lod": [[...]]} per input
    Json,
    /// Binary tensor stream, base64url encoded
    Encoded,
}

#[derive(Deserialize)]
struct BatchIn {
    tokens: Vec<Token>,
    #[serde(default)]
    lod: Option<Lod>,
}

#[derive(Serialize)]
struct BatchOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    tokens: &'a [Token],
    lod: &'a Lod,
}

struct Input {
    name: Option<String>,
    text: String,
}

fn init_logging(verbose: u8, quiet: u8) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("warn"));
    builder.format_timestamp_millis();
    if quiet > 0 {
        builder.filter_level(if quiet == 1 { LevelFilter::Error } else { LevelFilter::Off });
    } else if verbose > 0 {
        builder.filter_level(match verbose {
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        });
    }
    let _ = builder.try_init();
}

fn resolve_config(cli: &Cli) -> Result<AlignConfig> {
    let mut config = match &cli.config {
        Some(path) => AlignConfig::from_path(path)?,
        None => AlignConfig::default(),
    };
    if let Some(blank) = cli.blank {
        config.blank = blank;
    }
    if cli.merge_repeated {
        config.merge_repeated = true;
    }
    if cli.no_merge {
        config.merge_repeated = false;
    }
    Ok(config)
}

fn read_inputs(paths: &[PathBuf]) -> Result<Vec<Input>> {
    if paths.is_empty() {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        return Ok(vec![Input { name: None, text: buf }]);
    }
    paths
        .iter()
        .map(|p| {
            if p.is_dir() {
                return Err(Error::InvalidInput(format!("{}: Is a directory", p.display())));
            }
            let text = fs::read_to_string(p).map_err(|e| {
                Error::Io(io::Error::new(e.kind(), format!("{}: {}", p.display(), e)))
            })?;
            Ok(Input {
                name: Some(p.to_string_lossy().to_string()),
                text,
            })
        })
        .collect()
}

/// JSON batch, or one whitespace-separated segment per non-empty line.
fn parse_batch(text: &str) -> Result<LodTensor> {
    if text.trim_start().starts_with('{') {
        let batch: BatchIn = serde_json::from_str(text)?;
        let lod = batch
            .lod
            .unwrap_or_else(|| Lod::new(vec![vec![0, batch.tokens.len()]]));
        return LodTensor::column(batch.tokens, lod);
    }

    let mut tokens = Vec::new();
    let mut offsets = vec![0];
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        for word in line.split_whitespace() {
            let token: Token = word.parse().map_err(|_| {
                Error::InvalidInput(format!("line {}: '{}' is not a token id", lineno + 1, word))
            })?;
            tokens.push(token);
        }
        offsets.push(tokens.len());
    }
    if offsets.len() < 2 {
        return Err(Error::InvalidInput("no segments in input".to_string()));
    }
    LodTensor::column(tokens, Lod::new(vec![offsets]))
}

fn base64url_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn format_segments(out: &LodTensor, label: Option<&str>) -> String {
    let mut s = String::new();
    let boundaries = out.lod().lowest_level().unwrap_or(&[]);
    for w in boundaries.windows(2) {
        let line = out.data()[w[0]..w[1]]
            .iter()
            .map(Token::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        match label {
            Some(label) => s.push_str(&format!("{}: {}\n", label, line)),
            None => s.push_str(&format!("{}\n", line)),
        }
    }
    s
}

fn render(out: &LodTensor, name: Option<&str>, format: Format) -> Result<String> {
    Ok(match format {
        Format::Text => format_segments(out, name),
        Format::Json => {
            let batch = BatchOut {
                name,
                tokens: out.data(),
                lod: out.lod(),
            };
            format!("{}\n", serde_json::to_string(&batch)?)
        }
        Format::Encoded => format!("{}\n", base64url_encode(&codec::to_bytes(out))),
    })
}

fn run(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;
    let inputs = read_inputs(&cli.paths)?;
    debug!("{} input(s), config {:?}", inputs.len(), config);

    let align_one = |input: &Input| -> Result<LodTensor> {
        let tensor = parse_batch(&input.text).map_err(|e| with_name(e, input))?;
        ctc_align(&tensor, &config).map_err(|e| with_name(e, input))
    };
    let use_parallel = inputs.len() > 1;
    let results: Vec<Result<LodTensor>> = if use_parallel {
        inputs.par_iter().map(align_one).collect()
    } else {
        inputs.iter().map(align_one).collect()
    };

    print!("{}", render_all(&inputs, results, cli.format)?);
    Ok(())
}

/// Renders nothing unless every input aligned.
fn render_all(inputs: &[Input], results: Vec<Result<LodTensor>>, format: Format) -> Result<String> {
    let outputs = results.into_iter().collect::<Result<Vec<_>>>()?;
    // only label lines when several inputs are mixed together
    let labelled = inputs.len() > 1;
    let mut text = String::new();
    for (input, out) in inputs.iter().zip(&outputs) {
        let name = if labelled { input.name.as_deref() } else { None };
        text.push_str(&render(out, name, format)?);
    }
    Ok(text)
}

fn with_name(err: Error, input: &Input) -> Error {
    match (&input.name, err) {
        (Some(name), Error::InvalidInput(msg)) => Error::InvalidInput(format!("{}: {}", name, msg)),
        (_, err) => err,
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
