use aee_atom::AtomStore;
use aee_core::simulation::{synthetic_plan, PlanShape, SimulatedGenerator};
use aee_core::{EngineConfig, EngineContext, FanoutSink, TracingSink, WaveExecutor};
use aee_graph::{GraphBuilder, SharedSymbols};
use anyhow::Context as _;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn plan_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("atoms")
                .long("atoms")
                .default_value("200")
                .value_parser(value_parser!(usize))
                .help("Number of atoms in the synthetic plan"),
        )
        .arg(
            Arg::new("modules")
                .long("modules")
                .default_value("8")
                .value_parser(value_parser!(usize))
                .help("Modules to spread the atoms over (four per component)"),
        )
        .arg(
            Arg::new("fan-in")
                .long("fan-in")
                .default_value("3")
                .value_parser(value_parser!(usize))
                .help("Upper bound on dependencies per atom"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .default_value("42")
                .value_parser(value_parser!(u64))
                .help("Random seed for reproducibility"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output as JSON"),
        )
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("Engine configuration file (TOML)")
}

fn cli() -> Command {
    Command::new("aee")
        .version(aee_core::VERSION)
        .about("Atomic Execution Engine")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            plan_args(Command::new("simulate").about("Run a synthetic plan against the simulated generator"))
                .arg(config_arg())
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.05")
                        .value_parser(value_parser!(f64))
                        .help("Probability that an attempt hits a simulated outage"),
                )
                .arg(
                    Arg::new("bad-output-rate")
                        .long("bad-output-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Probability of unparsable output on a first attempt"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .value_parser(value_parser!(usize))
                        .help("Override the configured worker pool size"),
                ),
        )
        .subcommand(
            plan_args(Command::new("plan").about("Level a synthetic plan and print its waves"))
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .arg(config_arg()),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn arg<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> anyhow::Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

fn load_config(args: &ArgMatches) -> anyhow::Result<EngineConfig> {
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn shape(args: &ArgMatches) -> anyhow::Result<PlanShape> {
    Ok(PlanShape {
        atoms: arg(args, "atoms")?,
        modules: arg(args, "modules")?,
        fan_in: arg(args, "fan-in")?,
        seed: arg(args, "seed")?,
    })
}

async fn simulate(args: &ArgMatches) -> anyhow::Result<bool> {
    let mut config = load_config(args)?;
    if let Some(concurrency) = args.get_one::<usize>("concurrency") {
        config = config.with_concurrency(*concurrency);
    }
    let shape = shape(args)?;
    let generator = SimulatedGenerator::new(shape.seed)
        .with_failure_rate(arg(args, "failure-rate")?)
        .with_bad_output_rate(arg(args, "bad-output-rate")?);

    let store = Arc::new(AtomStore::from_atoms(synthetic_plan(shape)).context("building plan")?);
    let sink = FanoutSink::new().with(Arc::new(TracingSink));
    let ctx = Arc::new(EngineContext::new(config, store).with_sink(Arc::new(sink)));
    let executor = WaveExecutor::new(ctx, Arc::new(generator));

    let report = executor.run().await;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(report.is_completed())
}

fn plan(args: &ArgMatches) -> anyhow::Result<bool> {
    let config = load_config(args)?;
    let atoms = synthetic_plan(shape(args)?);
    let mut builder = GraphBuilder::new();
    if config.derive_symbol_edges {
        builder = builder.with_policy(SharedSymbols);
    }
    let graph = builder.add_atoms(atoms.iter())?.build()?;

    if args.get_flag("json") {
        let waves: Vec<&[aee_atom::AtomId]> = graph.waves().iter().map(|w| w.atoms.as_slice()).collect();
        let out = serde_json::json!({ "stats": graph.stats(), "waves": waves });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        let stats = graph.stats();
        println!("Plan: {} atoms, {} edges, {} waves", stats.atoms, stats.edges, stats.waves);
        for wave in graph.waves() {
            println!("  wave {:>3}: {} atoms", wave.level, wave.len());
        }
    }
    Ok(true)
}

fn show_config(args: &ArgMatches) -> anyhow::Result<bool> {
    let config = load_config(args)?;
    print!("{}", config.to_toml_string()?);
    Ok(true)
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let result = match matches.subcommand() {
        Some(("simulate", args)) => simulate(args).await,
        Some(("plan", args)) => plan(args),
        Some(("config", args)) => show_config(args),
        _ => {
            let _ = cli().print_help();
            Ok(true)
        }
    };

    match result {
        Ok(success) => std::process::exit(if success { 0 } else { 1 }),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(2);
        }
    }
}
