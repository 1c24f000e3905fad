use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use smap_io::{JsonArraySink, SourceRegistry};
use smap_pipeline::{build_converter, examine, load_rules_file, load_rules_files, Converter};
use smap_tx::FunctionRegistry;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "smap", version, about = "Remap datasets onto a canonical schema")]
struct Args {
    /// Rules files (YAML or JSON), each describing one or more datasets
    #[arg(required = true)]
    rules: Vec<PathBuf>,
    /// Print the first raw record of the dataset in RULES, to inspect its schema
    #[arg(short, long)]
    examine: bool,
    /// Write output to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
    /// What to do when reading a dataset fails
    #[arg(long, value_enum, default_value_t = OnError::Abort)]
    on_error: OnError,
    /// Pretty-print each output record
    #[arg(long)]
    pretty: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OnError {
    /// Stop with an error
    Abort,
    /// Log the error and continue with the next dataset
    SkipDataset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
    let args = Args::parse();

    let cancel = CancellationToken::new();
    let mut worker = {
        let cancel = cancel.child_token();
        tokio::task::spawn_blocking(move || run(args, cancel))
    };
    // Ctrl-C handling
    tokio::select! {
        result = &mut worker => return result?,
        _ = signal::ctrl_c() => {
            warn!("interrupted, stopping");
            cancel.cancel();
        }
    }
    worker.await?
}

fn run(args: Args, cancel: CancellationToken) -> Result<()> {
    let sources = SourceRegistry::with_defaults();
    if args.examine {
        return examine_rules(&args.rules, &sources, &mut io::stdout().lock());
    }

    let specs = load_rules_files(&args.rules)?;
    let converter = build_converter(&specs, &sources, &FunctionRegistry::new())?;

    let out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let sink = JsonArraySink::new(out).pretty(args.pretty);
    write_records(converter, sink, args.on_error, &cancel)
}

fn examine_rules<W: Write>(rules: &[PathBuf], sources: &SourceRegistry, out: &mut W) -> Result<()> {
    let [path] = rules else {
        bail!("--examine takes exactly one rules file, got {}", rules.len());
    };
    let datasets = load_rules_file(path)?;
    let Some(dataset) = datasets.first() else {
        bail!("{} declares no dataset", path.display());
    };
    match examine(&dataset.reader, sources)? {
        Some(record) => {
            serde_json::to_writer_pretty(&mut *out, &record)?;
            writeln!(out)?;
            Ok(())
        }
        None => bail!("dataset {} is empty", dataset.reader.path),
    }
}

fn write_records<W: Write>(
    mut converter: Converter,
    mut sink: JsonArraySink<W>,
    on_error: OnError,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            warn!(written = sink.written(), "cancelled, output truncated");
            break;
        }
        let Some(item) = converter.next() else {
            break;
        };
        match item {
            Ok(record) => sink.write(&record)?,
            Err(e) if e.is_source_io() && on_error == OnError::SkipDataset => {
                let e = anyhow::Error::new(e);
                error!("read failed, skipping dataset: {e:#}");
                converter.skip_dataset();
            }
            Err(e) => return Err(e.into()),
        }
    }

    let written = sink.written();
    sink.finish()?;
    for dataset in converter.stats() {
        info!(
            dataset = dataset.index,
            format = %dataset.format,
            read = dataset.stats.read,
            kept = dataset.stats.kept,
            discarded = dataset.stats.discarded,
            completed = dataset.completed,
            "dataset summary"
        );
    }
    info!(records = written, "conversion finished");
    Ok(())
}
