use anyhow::{anyhow, Context, Result};
use boutiques::config::{BoshConfig, EnvOverrides};
use boutiques::descriptor::{Descriptor, Invocation};
use boutiques::evaluate::{evaluate, Query};
use boutiques::exec::{ExecOptions, Executor, ExecutorOutput};
use boutiques::generate::generate_random;
use boutiques::invocation_schema::{compile, validate_invocation};
use boutiques::util::load_json;
use boutiques::{logging, testing, validate};
use clap::Parser;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod cli;

use cli::{
    Command, EvaluateArgs, ExampleArgs, ExecCommand, ExecFlags, InvocationArgs, LaunchArgs,
    PrepareArgs, RootArgs, SimulateArgs, TestArgs, ValidateArgs,
};

/// Exit status when the tool succeeded but a required output is missing.
const MISSING_OUTPUTS_EXIT: u8 = 2;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    logging::init(args.debug);
    match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: RootArgs) -> Result<ExitCode> {
    let session = Session {
        debug: args.debug,
        config: args.config,
    };
    match args.command {
        Command::Validate(args) => cmd_validate(args),
        Command::Invocation(args) => cmd_invocation(args),
        Command::Exec(ExecCommand::Launch(args)) => session.launch(args),
        Command::Exec(ExecCommand::Simulate(args)) => cmd_simulate(args),
        Command::Exec(ExecCommand::Prepare(args)) => session.prepare(args),
        Command::Example(args) => cmd_example(args),
        Command::Evaluate(args) => cmd_evaluate(args),
        Command::Test(args) => session.test(args),
    }
}

/// Global switches every executing command layers under its own flags.
struct Session {
    debug: bool,
    config: Option<PathBuf>,
}

impl Session {
    fn exec_options(&self, flags: &ExecFlags) -> Result<ExecOptions> {
        let config = BoshConfig::load(self.config.as_deref())?;
        Ok(config.exec_options(&EnvOverrides::from_env(), flags.options(self.debug)))
    }

    fn launch(&self, args: LaunchArgs) -> Result<ExitCode> {
        let descriptor = load_valid_descriptor(&args.descriptor)?;
        let invocation = load_invocation(&args.invocation)?;
        let executor = Executor::new(&descriptor, self.exec_options(&args.exec)?)?;
        let result = executor.launch(&invocation)?;
        if args.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("serialize result")?
            );
        } else {
            print!("{result}");
        }
        Ok(launch_exit_code(&result))
    }

    fn prepare(&self, args: PrepareArgs) -> Result<ExitCode> {
        let descriptor = load_valid_descriptor(&args.descriptor)?;
        let executor = Executor::new(&descriptor, self.exec_options(&args.exec)?)?;
        match executor.prepare()? {
            Some(prepared) => {
                println!("{} ({})", prepared.reference, prepared.location);
            }
            None => println!("Descriptor does not specify a container image."),
        }
        Ok(ExitCode::SUCCESS)
    }

    fn test(&self, args: TestArgs) -> Result<ExitCode> {
        let descriptor = load_valid_descriptor(&args.descriptor)?;
        if descriptor.tests.is_empty() {
            return Err(anyhow!("descriptor {} declares no tests", descriptor.name));
        }
        let executor = Executor::new(&descriptor, self.exec_options(&args.exec)?)?;
        let outcomes = testing::run_tests(&executor);
        let mut failed = 0;
        for outcome in &outcomes {
            if outcome.passed() {
                println!("PASS {}", outcome.name);
                continue;
            }
            failed += 1;
            println!("FAIL {}", outcome.name);
            for failure in &outcome.failures {
                println!("  - {failure}");
            }
        }
        if failed > 0 {
            return Err(anyhow!("{failed} of {} tests failed", outcomes.len()));
        }
        Ok(ExitCode::SUCCESS)
    }
}

/// The tool's own exit code when it failed, else 2 when required outputs
/// are missing.
fn launch_exit_code(result: &ExecutorOutput) -> ExitCode {
    if result.exit_code != 0 {
        let code = u8::try_from(result.exit_code & 0xff).unwrap_or(1);
        return ExitCode::from(if code == 0 { 1 } else { code });
    }
    if !result.missing_files.is_empty() {
        return ExitCode::from(MISSING_OUTPUTS_EXIT);
    }
    ExitCode::SUCCESS
}

fn load_descriptor(input: &str) -> Result<Descriptor> {
    Descriptor::load(input).with_context(|| format!("load descriptor {input}"))
}

fn load_valid_descriptor(input: &str) -> Result<Descriptor> {
    let descriptor = load_descriptor(input)?;
    validate::validate(&descriptor)?;
    Ok(descriptor)
}

fn load_invocation(input: &str) -> Result<Invocation> {
    Invocation::load(input).with_context(|| format!("load invocation {input}"))
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serialize JSON")?
    );
    Ok(())
}

fn cmd_validate(args: ValidateArgs) -> Result<ExitCode> {
    let descriptor = load_valid_descriptor(&args.descriptor)?;
    if args.format {
        let path = Path::new(&args.descriptor);
        if !path.is_file() {
            return Err(anyhow!("--format needs a descriptor file, not inline JSON"));
        }
        validate::format_output(path, &descriptor)?;
    }
    println!("OK");
    Ok(ExitCode::SUCCESS)
}

fn cmd_invocation(args: InvocationArgs) -> Result<ExitCode> {
    let descriptor = load_valid_descriptor(&args.descriptor)?;
    if args.write_schema {
        let path = Path::new(&args.descriptor);
        if !path.is_file() {
            return Err(anyhow!("--write-schema needs a descriptor file, not inline JSON"));
        }
        let mut raw = load_json(&args.descriptor)?;
        if let Value::Object(fields) = &mut raw {
            fields.insert("invocation-schema".to_string(), compile(&descriptor));
        }
        let mut text = serde_json::to_string_pretty(&raw).context("serialize descriptor")?;
        text.push('\n');
        std::fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
    }
    match &args.invocation {
        Some(input) => {
            let invocation = load_invocation(input)?.with_defaults(&descriptor);
            validate_invocation(&descriptor, &invocation)?;
            println!("OK");
        }
        None if !args.write_schema => print_json(&compile(&descriptor))?,
        None => {}
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_simulate(args: SimulateArgs) -> Result<ExitCode> {
    let descriptor = load_valid_descriptor(&args.descriptor)?;
    let invocation = match &args.invocation {
        Some(input) => load_invocation(input)?,
        None => generate_random(&descriptor, args.complete)?,
    };
    let executor = Executor::new(&descriptor, ExecOptions::default())?;
    if args.json {
        let rendered = executor.simulate(&invocation)?;
        print_json(&rendered.invocation.to_value())?;
    } else {
        println!("{}", executor.dry_run(&invocation)?.stdout);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_example(args: ExampleArgs) -> Result<ExitCode> {
    let descriptor = load_valid_descriptor(&args.descriptor)?;
    let invocation = generate_random(&descriptor, args.complete)?;
    print_json(&invocation.to_value())?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_evaluate(args: EvaluateArgs) -> Result<ExitCode> {
    let descriptor = load_valid_descriptor(&args.descriptor)?;
    let invocation = load_invocation(&args.invocation)?;
    let executor = Executor::new(&descriptor, ExecOptions::default())?;
    let rendered = executor.simulate(&invocation)?;
    let mut results = Vec::new();
    for text in &args.queries {
        let query: Query = text.parse()?;
        results.push(Value::Object(evaluate(&descriptor, &rendered, &query)));
    }
    let output = if results.len() == 1 {
        results.remove(0)
    } else {
        Value::Array(results)
    };
    print_json(&output)?;
    Ok(ExitCode::SUCCESS)
}
