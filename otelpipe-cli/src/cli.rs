// Copyright 2021-Present Datadog, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

use crate::check_config::{CheckConfigCliCommand, build_check_config_command};
use crate::demo_service::{DemoServiceCliCommand, build_demo_service_command};
use crate::service::{RunCliCommand, build_run_command};

pub fn build_cli() -> Command {
    Command::new("otelpipe")
        .arg(
            // Following https://no-color.org/
            Arg::new("no-color")
                .long("no-color")
                .help(
                    "Disable ANSI terminal codes (colors, etc...) being injected into the logging \
                     output",
                )
                .env("NO_COLOR")
                .value_parser(clap::builder::FalseyValueParser::new())
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand(build_run_command().display_order(1))
        .subcommand(build_check_config_command().display_order(2))
        .subcommand(build_demo_service_command().display_order(3))
        .arg_required_else_help(true)
        .disable_help_subcommand(true)
        .subcommand_required(true)
}

#[derive(Debug, PartialEq)]
pub enum CliCommand {
    Run(RunCliCommand),
    CheckConfig(CheckConfigCliCommand),
    DemoService(DemoServiceCliCommand),
}

impl CliCommand {
    pub fn default_log_level(&self) -> Level {
        match self {
            CliCommand::Run(_) => Level::INFO,
            CliCommand::CheckConfig(_) => Level::WARN,
            CliCommand::DemoService(_) => Level::INFO,
        }
    }

    pub fn parse_cli_args(mut matches: ArgMatches) -> anyhow::Result<Self> {
        let (subcommand, submatches) = matches
            .remove_subcommand()
            .context("failed to parse command")?;
        match subcommand.as_str() {
            "run" => RunCliCommand::parse_cli_args(submatches).map(CliCommand::Run),
            "check-config" => {
                CheckConfigCliCommand::parse_cli_args(submatches).map(CliCommand::CheckConfig)
            }
            "demo-service" => {
                DemoServiceCliCommand::parse_cli_args(submatches).map(CliCommand::DemoService)
            }
            _ => bail!("unknown command `{subcommand}`"),
        }
    }

    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            CliCommand::Run(subcommand) => subcommand.execute().await,
            CliCommand::CheckConfig(subcommand) => subcommand.execute().await,
            CliCommand::DemoService(subcommand) => subcommand.execute().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unknown_command() {
        let command = build_cli().no_binary_name(true);
        command.try_get_matches_from(["index", "list"]).unwrap_err();
    }

    #[test]
    fn test_parse_demo_service_requires_service_name() {
        let command = build_cli().no_binary_name(true);
        command.try_get_matches_from(["demo-service"]).unwrap_err();
    }
}
