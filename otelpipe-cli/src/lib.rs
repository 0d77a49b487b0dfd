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

#![deny(clippy::disallowed_methods)]

use std::path::Path;

use anyhow::Context;
use clap::Arg;
use otelpipe_config::{ConfigFormat, PipelineConfig};
use tracing::info;

pub mod check_config;
pub mod cli;
pub mod demo_service;
pub mod logger;
pub mod service;

pub const DEFAULT_CONFIG_PATH: &str = "config/otelpipe.yaml";

pub const OTELPIPE_CONFIG_ENV_KEY: &str = "OTELPIPE_CONFIG";

fn config_cli_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .help("Pipeline config file location (JSON, TOML, or YAML)")
        .env(OTELPIPE_CONFIG_ENV_KEY)
        .default_value(DEFAULT_CONFIG_PATH)
        .display_order(1)
}

/// Reads, renders, and validates a pipeline config file. The format is inferred from the file
/// extension.
pub async fn load_pipeline_config(config_path: &Path) -> anyhow::Result<PipelineConfig> {
    let config_format = ConfigFormat::sniff_from_path(config_path)?;
    let config_content = tokio::fs::read(config_path)
        .await
        .with_context(|| format!("failed to read config file `{}`", config_path.display()))?;
    let pipeline_config = PipelineConfig::load(config_format, &config_content)
        .with_context(|| format!("failed to parse config file `{}`", config_path.display()))?;
    info!(config_path=%config_path.display(), "loaded pipeline config");
    Ok(pipeline_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const PIPELINE_CONFIG_YAML: &str = r#"
version: 0.3
listen_address: 127.0.0.1:4318
exporters:
  memory:
    type: memory
pipelines:
  traces:
    exporters: [memory]
"#;

    #[tokio::test]
    async fn test_load_pipeline_config() {
        let mut config_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        config_file
            .write_all(PIPELINE_CONFIG_YAML.as_bytes())
            .unwrap();
        let pipeline_config = load_pipeline_config(config_file.path()).await.unwrap();
        assert!(pipeline_config.exporters.contains_key("memory"));
        assert!(pipeline_config.pipelines.traces.is_some());
        assert!(pipeline_config.pipelines.logs.is_none());
    }

    #[tokio::test]
    async fn test_load_default_pipeline_config() {
        let config_path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join(DEFAULT_CONFIG_PATH);
        let pipeline_config = load_pipeline_config(&config_path).await.unwrap();
        assert_eq!(pipeline_config.exporters.len(), 4);
        assert!(pipeline_config.pipelines.metrics.is_some());
    }

    #[tokio::test]
    async fn test_load_pipeline_config_errors() {
        let error = load_pipeline_config(Path::new("otelpipe.ini"))
            .await
            .unwrap_err();
        assert!(format!("{error:#}").contains("file extension `.ini` is not supported"));

        let error = load_pipeline_config(Path::new("does-not-exist.yaml"))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("failed to read config file"));

        let mut config_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        config_file
            .write_all(b"version: 0.3\npipelines:\n  traces:\n    exporters: [tempo]\n")
            .unwrap();
        let error = load_pipeline_config(config_file.path()).await.unwrap_err();
        assert!(format!("{error:#}").contains("unknown exporter `tempo`"));
    }
}
