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

use std::fmt::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgMatches, Command};
use otelpipe_config::PipelineConfig;
use tracing::debug;

use crate::{config_cli_arg, load_pipeline_config};

pub fn build_check_config_command() -> Command {
    Command::new("check-config")
        .about("Validates a pipeline config file and prints its routes.")
        .arg(config_cli_arg())
}

#[derive(Debug, Eq, PartialEq)]
pub struct CheckConfigCliCommand {
    pub config_path: PathBuf,
}

impl CheckConfigCliCommand {
    pub fn parse_cli_args(mut matches: ArgMatches) -> anyhow::Result<Self> {
        let config_path = matches
            .remove_one::<String>("config")
            .map(PathBuf::from)
            .context("`config` should be a required arg")?;
        Ok(CheckConfigCliCommand { config_path })
    }

    pub async fn execute(self) -> anyhow::Result<()> {
        debug!(args=?self, "check-config");
        let pipeline_config = load_pipeline_config(&self.config_path).await?;
        println!("config `{}` is valid", self.config_path.display());
        print!("{}", config_summary(&pipeline_config));
        Ok(())
    }
}

fn config_summary(pipeline_config: &PipelineConfig) -> String {
    let mut summary = String::new();
    let _ = writeln!(summary, "listen address: {}", pipeline_config.listen_address);

    for (kind, route) in pipeline_config.pipelines.iter() {
        let processors = if route.processors.is_empty() {
            "-".to_string()
        } else {
            route.processors.join(" -> ")
        };
        let _ = writeln!(
            summary,
            "{kind}: processors [{processors}], exporters [{}]",
            route.exporters.join(", ")
        );
    }
    for (exporter_id, exporter_config) in &pipeline_config.exporters {
        let endpoint = exporter_config.endpoint.as_deref().unwrap_or("-");
        let _ = writeln!(
            summary,
            "exporter `{exporter_id}`: type {}, endpoint {endpoint}, {} attempt(s), unhealthy \
             after {} failed batch(es)",
            exporter_config.exporter_type.as_str(),
            exporter_config.retry.max_attempts,
            exporter_config.unhealthy_threshold,
        );
    }
    summary
}
