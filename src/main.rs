//! Gridplate - render spreadsheet report templates from JSON data

mod config;
mod default_functions;

use anyhow::{Context, bail};
use gridplate_core::backend::{BACKEND_ENV, choose_backend_name};
use gridplate_core::storage::parse_template;
use gridplate_core::{Report, ReportOptions, create_backend, load_data};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

fn print_usage() {
    eprintln!("Usage: gridplate [OPTIONS] <TEMPLATE> <DATA.json>");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <TEMPLATE>                Report template (.grt)");
    eprintln!("  <DATA.json>               Data the template is rendered against");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -o, --output <FILE>       Write the report to FILE instead of stdout");
    eprintln!("  -b, --backend <NAME>      Output format: grd (default), md/markdown, csv");
    eprintln!("  -f, --functions <FILE>    Load custom Rhai functions (can be repeated)");
    eprintln!("  --no-default-functions    Do not load default.rhai from the config dir");
    eprintln!("  --config <FILE>           Read settings from FILE instead of config.toml");
    eprintln!("  --strict                  Fail when formula references cannot be remapped");
    eprintln!("  -h, --help                Print help");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  {}         Default output format", BACKEND_ENV);
    eprintln!("  RUST_LOG                  Log filter (default: warn)");
}

#[derive(Debug, Default, PartialEq)]
struct Args {
    template: PathBuf,
    data: PathBuf,
    output: Option<PathBuf>,
    backend: Option<String>,
    functions: Vec<PathBuf>,
    no_default_functions: bool,
    config: Option<PathBuf>,
    strict: bool,
}

enum Parsed {
    Help,
    Run(Args),
}

fn parse_args(args: &[String]) -> Result<Parsed, String> {
    let mut parsed = Args::default();
    let mut positional: Vec<PathBuf> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(Parsed::Help),
            "-o" | "--output" => {
                i += 1;
                let path = args.get(i).ok_or("--output requires a file path")?;
                parsed.output = Some(PathBuf::from(path));
            }
            "-b" | "--backend" => {
                i += 1;
                let name = args.get(i).ok_or("--backend requires a name")?;
                parsed.backend = Some(name.to_string());
            }
            "-f" | "--functions" => {
                i += 1;
                let path = args.get(i).ok_or("--functions requires a file path")?;
                parsed.functions.push(PathBuf::from(path));
            }
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires a file path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--no-default-functions" => parsed.no_default_functions = true,
            "--strict" => parsed.strict = true,
            arg if arg.starts_with('-') && arg.len() > 1 => {
                return Err(format!("Unknown option: {}", arg));
            }
            arg => {
                if positional.len() == 2 {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                positional.push(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    match (positional.next(), positional.next()) {
        (Some(template), Some(data)) => {
            parsed.template = template;
            parsed.data = data;
            Ok(Parsed::Run(parsed))
        }
        _ => Err("expected a template and a data file".to_string()),
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = config::load_config(args.config.as_deref())?;

    let mut functions = config.functions.clone();
    functions.extend(args.functions.iter().cloned());
    default_functions::prepend_default_functions_if_present(
        &mut functions,
        args.no_default_functions,
    );
    let functions = default_functions::load_functions(&functions)?;

    let env_backend = env::var(BACKEND_ENV).ok();
    let backend_name = choose_backend_name(
        args.backend.as_deref(),
        env_backend.as_deref(),
        config.backend.as_deref(),
    );
    let backend = create_backend(backend_name)?;

    let template = parse_template(&args.template)
        .with_context(|| format!("Failed to read template {}", args.template.display()))?;
    let data = std::fs::read_to_string(&args.data)
        .with_context(|| format!("Failed to read data {}", args.data.display()))?;
    let data = load_data(&data)?;

    let options = ReportOptions {
        functions,
        fixed_point: config.fixed_point,
    };
    let report = Report::with_options(&template, &options)?;
    let rendered = report.render(data)?;

    let warnings = &rendered.result.warnings;
    if (args.strict || config.strict) && !warnings.is_empty() {
        for warning in warnings {
            eprintln!("Warning: {}", warning);
        }
        bail!("{} formula reference(s) could not be remapped", warnings.len());
    }

    let content = backend.render(&rendered.output);
    match args.output {
        Some(path) => {
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} report to {}", backend.name(), path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let args = match parse_args(&args) {
        Ok(Parsed::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(Parsed::Run(args)) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    init_tracing();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
