use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use const_format::concatcp;
use eyre::Result as EyreResult;

use crate::defaults;

mod config;
mod init;
mod run;

use config::ConfigCommand;
use init::InitCommand;
use run::RunCommand;

pub const EXAMPLES: &str = r"
  # Initialize a relay node
  $ nectard --node-name relay1 init --base-port 9470

  # Adjust an existing node
  $ nectard --node-name relay1 config --http-port 8080

  # Run a node
  $ nectard --node-name relay1 run
";

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(after_help = concatcp!(
    "Environment variables:\n",
    "  NECTAR_HOME    Directory for config and data\n\n",
    "Examples:",
    EXAMPLES
))]
pub struct RootCommand {
    #[command(flatten)]
    pub args: RootArgs,

    #[command(subcommand)]
    pub action: SubCommands,
}

#[derive(Debug, Subcommand)]
pub enum SubCommands {
    Config(ConfigCommand),
    Init(InitCommand),
    #[command(alias = "up")]
    Run(RunCommand),
}

#[derive(Debug, Parser)]
pub struct RootArgs {
    /// Directory for config and data
    #[arg(long, value_name = "PATH", default_value_t = defaults::default_node_dir())]
    #[arg(env = "NECTAR_HOME", hide_env_values = true)]
    pub home: Utf8PathBuf,

    /// Name of the node
    #[arg(short, long, value_name = "NAME")]
    pub node_name: Utf8PathBuf,
}

impl RootArgs {
    #[must_use]
    pub fn node_dir(&self) -> Utf8PathBuf {
        self.home.join(&self.node_name)
    }
}

impl RootCommand {
    pub async fn run(self) -> EyreResult<()> {
        match self.action {
            SubCommands::Config(config) => config.run(&self.args),
            SubCommands::Init(init) => init.run(&self.args),
            SubCommands::Run(run) => run.run(&self.args).await,
        }
    }
}
