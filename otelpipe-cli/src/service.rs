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

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgMatches, Command, arg};
use otelpipe_serve::{serve_otelpipe, shutdown_signal};
use tracing::{debug, info};

use crate::{config_cli_arg, load_pipeline_config};

pub fn build_run_command() -> Command {
    Command::new("run")
        .about("Runs the collector pipeline described by the config file.")
        .args(&[
            config_cli_arg(),
            arg!(--"listen-address" <LISTEN_ADDRESS> "Address the REST server binds to. Overrides the `listen_address` of the config file.")
                .env("OTELPIPE_LISTEN_ADDRESS")
                .required(false),
        ])
}

#[derive(Debug, Eq, PartialEq)]
pub struct RunCliCommand {
    pub config_path: PathBuf,
    pub listen_address_opt: Option<SocketAddr>,
}

impl RunCliCommand {
    pub fn parse_cli_args(mut matches: ArgMatches) -> anyhow::Result<Self> {
        let config_path = matches
            .remove_one::<String>("config")
            .map(PathBuf::from)
            .context("`config` should be a required arg")?;
        let listen_address_opt = matches
            .remove_one::<String>("listen-address")
            .map(|listen_address| {
                listen_address
                    .parse::<SocketAddr>()
                    .with_context(|| format!("invalid listen address `{listen_address}`"))
            })
            .transpose()?;
        Ok(RunCliCommand {
            config_path,
            listen_address_opt,
        })
    }

    pub async fn execute(self) -> anyhow::Result<()> {
        debug!(args=?self, "run-collector");
        let mut pipeline_config = load_pipeline_config(&self.config_path).await?;

        if let Some(listen_address) = self.listen_address_opt {
            info!(listen_address=%listen_address, "setting listen address from override");
            pipeline_config.listen_address = listen_address;
        }
        let shutdown_report = serve_otelpipe(pipeline_config, shutdown_signal()).await?;

        if shutdown_report.num_abandoned_batches() > 0 {
            let shutdown_report_json = serde_json::to_string(&shutdown_report)?;
            info!(shutdown_report=%shutdown_report_json, "some batches were abandoned");
        }
        Ok(())
    }
}
