//! CLI argument parsing for `bosh`.
//!
//! The CLI is thin: every subcommand maps onto one core operation, and
//! execution switches are layered with the config file and environment in
//! `config.rs` before they reach the core.
use boutiques::exec::ExecOptions;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "bosh",
    version,
    about = "Validate, render and run tools described by JSON descriptors",
    after_help = "Examples:\n  bosh validate tool.json\n  bosh example tool.json --complete > inv.json\n  bosh exec simulate tool.json -i inv.json\n  bosh exec launch tool.json inv.json --no-container\n  bosh evaluate tool.json inv.json output-files/optional=False",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Verbose logs, and keep generated container scripts
    #[arg(long, global = true)]
    pub debug: bool,

    /// JSON file of execution defaults
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Validate(ValidateArgs),
    Invocation(InvocationArgs),
    /// Run, dry-run or prepare a described tool
    #[command(subcommand)]
    Exec(ExecCommand),
    Example(ExampleArgs),
    Evaluate(EvaluateArgs),
    Test(TestArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Check a descriptor and report every violation")]
pub struct ValidateArgs {
    /// Descriptor file or inline JSON
    pub descriptor: String,

    /// Rewrite the descriptor file in canonical form when it is valid
    #[arg(long)]
    pub format: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Print a descriptor's invocation schema or check an invocation against it")]
pub struct InvocationArgs {
    /// Descriptor file or inline JSON
    pub descriptor: String,

    /// Invocation file or inline JSON to check
    #[arg(short = 'i', long, value_name = "INVOCATION")]
    pub invocation: Option<String>,

    /// Store the compiled schema in the descriptor file
    #[arg(short = 'w', long)]
    pub write_schema: bool,
}

#[derive(Subcommand, Debug)]
pub enum ExecCommand {
    Launch(LaunchArgs),
    Simulate(SimulateArgs),
    Prepare(PrepareArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Validate, render and run an invocation")]
pub struct LaunchArgs {
    /// Descriptor file or inline JSON
    pub descriptor: String,

    /// Invocation file or inline JSON
    pub invocation: String,

    /// Emit the result as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub exec: ExecFlags,
}

#[derive(Parser, Debug)]
#[command(about = "Render the command line without running it")]
pub struct SimulateArgs {
    /// Descriptor file or inline JSON
    pub descriptor: String,

    /// Invocation file or inline JSON; a random one is generated when absent
    #[arg(short = 'i', long, value_name = "INVOCATION")]
    pub invocation: Option<String>,

    /// Fill every optional input when generating
    #[arg(short = 'c', long, conflicts_with = "invocation")]
    pub complete: bool,

    /// Print the invocation used instead of the command line
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Resolve or pull the descriptor's container image")]
pub struct PrepareArgs {
    /// Descriptor file or inline JSON
    pub descriptor: String,

    #[command(flatten)]
    pub exec: ExecFlags,
}

#[derive(Parser, Debug)]
#[command(about = "Print a random valid invocation")]
pub struct ExampleArgs {
    /// Descriptor file or inline JSON
    pub descriptor: String,

    /// Fill every optional input that fits
    #[arg(short = 'c', long)]
    pub complete: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Query resolved outputs, inputs or groups of an invocation")]
pub struct EvaluateArgs {
    /// Descriptor file or inline JSON
    pub descriptor: String,

    /// Invocation file or inline JSON
    pub invocation: String,

    /// `<section>[/<field>=<value>,...]` with section output-files, inputs or groups
    #[arg(required = true, value_name = "QUERY")]
    pub queries: Vec<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Run the tests embedded in a descriptor")]
pub struct TestArgs {
    /// Descriptor file or inline JSON
    pub descriptor: String,

    #[command(flatten)]
    pub exec: ExecFlags,
}

/// Switches shared by every command that executes or pulls.
#[derive(Args, Debug, Clone, Default)]
pub struct ExecFlags {
    /// Extra bind mount, HOST:CONTAINER (repeatable)
    #[arg(short = 'v', long = "volume", value_name = "HOST:CONTAINER")]
    pub volumes: Vec<String>,

    /// Singularity image file to use or pull to
    #[arg(long = "imagepath", value_name = "PATH")]
    pub image_path: Option<PathBuf>,

    /// Run with Docker even for Singularity images
    #[arg(long, conflicts_with = "force_singularity")]
    pub force_docker: bool,

    /// Run with Singularity even for Docker images
    #[arg(long)]
    pub force_singularity: bool,

    /// Run on the host even when an image is declared
    #[arg(long)]
    pub no_container: bool,

    /// Do not mount File inputs automatically
    #[arg(long)]
    pub no_automounts: bool,

    /// Run Docker containers as the calling user
    #[arg(short = 'u', long = "user")]
    pub change_user: bool,

    /// Stream tool output line by line
    #[arg(short = 's', long)]
    pub stream: bool,

    /// Interpreter for the command instead of the descriptor's shell
    #[arg(long, value_name = "SHELL")]
    pub shell: Option<String>,
}

impl ExecFlags {
    pub fn options(&self, debug: bool) -> ExecOptions {
        ExecOptions {
            force_docker: self.force_docker,
            force_singularity: self.force_singularity,
            no_container: self.no_container,
            no_automounts: self.no_automounts,
            change_user: self.change_user,
            stream: self.stream,
            debug,
            image_path: self.image_path.clone(),
            volumes: self.volumes.clone(),
            shell_override: self.shell.clone(),
            ..ExecOptions::default()
        }
    }
}
