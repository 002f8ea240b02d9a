use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use loadiso_app::{
    init_tracing, run_simulator, DatasourceStrategy, IsolationConfig, LogFormat, SimulatorConfig,
    StreamStrategy,
};
use std::path::PathBuf;

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .value_parser(value_parser!(PathBuf))
        .help("TOML configuration file")
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}

fn load_config(args: &ArgMatches) -> anyhow::Result<IsolationConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => IsolationConfig::load(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(IsolationConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("loadiso")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Load-test data isolation for datasource, cache and stream")
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("compact")
                .value_parser(value_parser!(LogFormat))
                .help("Log output: pretty, compact or json"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run mixed production and load-test traffic and check isolation")
                .arg(config_arg())
                .arg(
                    Arg::new("requests")
                        .long("requests")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Number of requests to simulate"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .default_value("8")
                        .value_parser(value_parser!(usize))
                        .help("Number of concurrent workers"),
                )
                .arg(
                    Arg::new("test-ratio")
                        .long("test-ratio")
                        .default_value("0.5")
                        .value_parser(value_parser!(f64))
                        .help("Share of requests marked as load test"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("datasource")
                        .long("datasource")
                        .value_parser(["session", "routing"])
                        .help("Override the datasource strategy"),
                )
                .arg(
                    Arg::new("stream")
                        .long("stream")
                        .value_parser(["single", "topic"])
                        .help("Override the stream strategy"),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .arg(config_arg())
                .arg(json_arg()),
        );

    let matches = cli.get_matches();
    let format = matches
        .get_one::<LogFormat>("log-format")
        .copied()
        .unwrap_or_default();
    init_tracing(format);

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let mut isolation = load_config(args)?;
            match args.get_one::<String>("datasource").map(String::as_str) {
                Some("routing") => {
                    isolation = isolation.with_datasource_strategy(DatasourceStrategy::Routing);
                }
                Some(_) => isolation = isolation.with_datasource_strategy(DatasourceStrategy::Session),
                None => {}
            }
            match args.get_one::<String>("stream").map(String::as_str) {
                Some("topic") => isolation = isolation.with_stream_strategy(StreamStrategy::Topic),
                Some(_) => isolation = isolation.with_stream_strategy(StreamStrategy::Single),
                None => {}
            }

            let config = SimulatorConfig {
                seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
                requests: args.get_one::<u64>("requests").copied().unwrap_or(200),
                concurrency: args.get_one::<usize>("concurrency").copied().unwrap_or(8),
                test_ratio: args.get_one::<f64>("test-ratio").copied().unwrap_or(0.5),
                isolation,
            };

            let report = run_simulator(config).await.context("simulation setup failed")?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.generate_text());
            }

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("config", args)) => {
            let config = load_config(args)?;
            config.validate()?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", config.to_toml()?);
            }
        }
        _ => unreachable!("clap requires a subcommand"),
    }
    Ok(())
}
