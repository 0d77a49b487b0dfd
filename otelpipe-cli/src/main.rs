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

use anyhow::Context;
use otelpipe_cli::cli::{CliCommand, build_cli};
use otelpipe_cli::logger::setup_logging;
use tracing::error;

fn main() -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("main_runtime_thread")
        .build()
        .context("failed to start main Tokio runtime")?;
    rt.block_on(main_impl())
}

async fn main_impl() -> anyhow::Result<()> {
    let about_text = "Telemetry pipeline: instrumented services export traces, metrics, and logs \
                      to a collector that processes and routes them to backend sinks.";
    let app = build_cli()
        .about(about_text)
        .version(env!("CARGO_PKG_VERSION"));
    let matches = app.get_matches();
    let ansi_colors = !matches.get_flag("no-color");

    let command = match CliCommand::parse_cli_args(matches) {
        Ok(command) => command,
        Err(error) => {
            eprintln!("failed to parse command line arguments: {error:?}");
            std::process::exit(1);
        }
    };
    setup_logging(command.default_log_level(), ansi_colors)?;

    if let Err(command_error) = command.execute().await {
        error!(error=%command_error, "command failed");
        eprintln!("command failed: {command_error:?}");
        std::process::exit(1);
    }
    Ok(())
}
