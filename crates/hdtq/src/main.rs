//! hdtq - query an HDT dataset through the WebAssembly triple store.

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use tracing_subscriber::EnvFilter;

use hdtrun::Dataset;
use hdtrun::DatasetBuilder;
use hdtrun::GuestSource;
use hdtrun::MemoryStrategy;
use hdtrun::Term;
use hdtrun::Triple;

/// Query a compressed RDF dataset with a memory64 WebAssembly triple store.
#[derive(Parser)]
#[command(name = "hdtq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Dataset path or URL
    data: String,

    /// Guest module path or URL (defaults to $HDTRUN_GUEST, then hdt.wasm)
    #[arg(short, long)]
    guest: Option<String>,

    /// Provide guest memory from the host instead of the module's own export
    #[arg(long)]
    imported_memory: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// A triple pattern. Terms use the store's syntax: bare IRIs, `_:id` blank
/// nodes, `"v"`, `"v"@lang` or `"v"^^<datatype>` literals.
#[derive(clap::Args)]
struct PatternArgs {
    /// Subject constraint
    #[arg(short, long)]
    subject: Option<String>,

    /// Predicate constraint
    #[arg(short, long)]
    predicate: Option<String>,

    /// Object constraint
    #[arg(short, long)]
    object: Option<String>,
}

impl PatternArgs {
    fn terms(&self) -> Result<[Option<Term>; 3]> {
        let parse = |value: &Option<String>| -> Result<Option<Term>> {
            value
                .as_deref()
                .map(|v| Term::from_pattern(v).with_context(|| format!("invalid term {:?}", v)))
                .transpose()
        };
        Ok([parse(&self.subject)?, parse(&self.predicate)?, parse(&self.object)?])
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the number of triples
    Size,

    /// Count triples matching a pattern
    Count(PatternArgs),

    /// Print triples matching a pattern as N-Triples
    Match {
        #[command(flatten)]
        pattern: PatternArgs,

        /// Stop after this many triples
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Exit with status 1 unless the triple is present
    Has {
        subject: String,
        predicate: String,
        object: String,
    },

    /// Print every triple as N-Triples
    Dump,

    /// Print store size and guest call counters
    Stats,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_triples<'a>(triples: impl Iterator<Item = &'a Triple>) {
    for triple in triples {
        println!("{}", triple);
    }
}

fn run(dataset: &mut Dataset, command: Command) -> Result<bool> {
    match command {
        Command::Size => println!("{}", dataset.size()?),
        Command::Count(pattern) => {
            let [s, p, o] = pattern.terms()?;
            println!("{}", dataset.count_matches(s.as_ref(), p.as_ref(), o.as_ref())?);
        }
        Command::Match { pattern, limit } => {
            let [s, p, o] = pattern.terms()?;
            let found = dataset.match_pattern(s.as_ref(), p.as_ref(), o.as_ref(), None)?;
            print_triples(found.triples().iter().take(limit.unwrap_or(usize::MAX)));
        }
        Command::Has {
            subject,
            predicate,
            object,
        } => {
            let triple = Triple::new(
                Term::from_pattern(&subject)?,
                Term::from_pattern(&predicate)?,
                Term::from_pattern(&object)?,
            );
            let present = dataset.has(&triple)?;
            println!("{}", present);
            return Ok(present);
        }
        Command::Dump => print_triples(dataset.quads()?.triples().iter()),
        Command::Stats => {
            let size = dataset.size()?;
            let bytes = dataset.size_in_bytes()?;
            let stats = dataset.stats();
            println!("triples:       {}", size);
            println!("store bytes:   {}", bytes);
            println!("loads:         {}", stats.loads);
            println!("queries:       {}", stats.queries);
            println!("counts:        {}", stats.counts);
            println!("allocations:   {}", stats.allocations);
            println!("frees:         {}", stats.frees);
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut builder = DatasetBuilder::new();
    if let Some(location) = cli.guest {
        builder = builder.guest(GuestSource::Location(location));
    }
    if cli.imported_memory {
        builder = builder.memory(MemoryStrategy::Imported);
    }

    let mut dataset = builder
        .load_location(&cli.data)
        .await
        .with_context(|| format!("Failed to load {}", cli.data))?;
    tracing::info!(data = %cli.data, "dataset ready");

    let ok = run(&mut dataset, cli.command)?;
    if let Ok(Some(log)) = dataset.debug_log() {
        tracing::debug!(target: "hdtrun::guest", "{}", log);
    }
    dataset.close();

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
