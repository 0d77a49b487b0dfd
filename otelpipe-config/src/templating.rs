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

use anyhow::{Context, Result, bail};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

// Matches `${ENV_VAR}` and `${ENV_VAR:-default}`, ignoring whitespaces in the curly braces.
static TEMPLATE_ENV_VAR_CAPTURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{\s*([A-Za-z0-9_]+)\s*(?::\-\s*([^\s\}]+)\s*)?}")
        .expect("regular expression should compile")
});

/// Substitutes environment variables in a config file. Commented out lines are left untouched.
pub fn render_config(config_content: &[u8]) -> Result<String> {
    let config_str = std::str::from_utf8(config_content)
        .context("config file contains invalid UTF-8 characters")?;

    let mut rendered_lines = Vec::new();

    for (line_no, line) in config_str.split('\n').enumerate() {
        if line.trim_start().starts_with('#') {
            if TEMPLATE_ENV_VAR_CAPTURE.is_match(line) {
                debug!("config file line #{line_no} is commented out, skipping");
            }
            rendered_lines.push(line.to_string());
            continue;
        }
        let mut missing_env_var: Option<String> = None;

        let rendered_line = TEMPLATE_ENV_VAR_CAPTURE.replace_all(line, |captures: &Captures| {
            let env_var_key = &captures[1];

            if let Ok(env_var_value) = std::env::var(env_var_key) {
                debug!(
                    env_var_name=%env_var_key,
                    "environment variable is set, substituting with environment variable value"
                );
                return env_var_value;
            }
            if let Some(default_match) = captures.get(2) {
                debug!(
                    env_var_name=%env_var_key,
                    default_value=%default_match.as_str(),
                    "environment variable is not set, substituting with default value"
                );
                return default_match.as_str().to_string();
            }
            missing_env_var.get_or_insert_with(|| env_var_key.to_string());
            String::new()
        });
        if let Some(env_var_key) = missing_env_var {
            bail!(
                "failed to render config file template: environment variable `{env_var_key}` is \
                 not set and no default value is provided"
            );
        }
        rendered_lines.push(rendered_line.into_owned());
    }
    Ok(rendered_lines.join("\n"))
}
