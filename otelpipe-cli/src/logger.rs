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

use std::{env, fmt};

use anyhow::Context;
use otelpipe_common::get_from_env_opt;
use time::format_description::BorrowedFormatItem;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{
    DefaultFields, Format, FormatEvent, FormatFields, Full, Json, JsonFields, Writer,
};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::field::RecordFields;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

pub const OTELPIPE_LOG_FORMAT_ENV_KEY: &str = "OTELPIPE_LOG_FORMAT";

/// Installs the global `tracing` subscriber. `RUST_LOG` takes precedence over `level`.
pub fn setup_logging(level: Level, ansi_colors: bool) -> anyhow::Result<()> {
    let env_filter = env::var("RUST_LOG")
        .map(|_| EnvFilter::from_default_env())
        .or_else(|_| EnvFilter::try_new(format!("otelpipe={level}")))
        .context("failed to set up tracing env filter")?;
    let event_format = EventFormat::get_from_env();
    let fmt_fields = event_format.format_fields();

    // Setting the ansi boolean on the event format alone does not disable colors.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(event_format)
                .fmt_fields(fmt_fields)
                .with_ansi(ansi_colors),
        )
        .try_init()
        .context("failed to register tracing subscriber")?;
    Ok(())
}

enum EventFormat<'a> {
    Full(Format<Full, UtcTime<Vec<BorrowedFormatItem<'a>>>>),
    Json(Format<Json>),
}

impl EventFormat<'_> {
    /// JSON if `OTELPIPE_LOG_FORMAT` is set to `json`, full text format otherwise.
    fn get_from_env() -> Self {
        let is_json = get_from_env_opt::<String>(OTELPIPE_LOG_FORMAT_ENV_KEY)
            .map(|log_format| log_format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            return EventFormat::Json(tracing_subscriber::fmt::format().json());
        }
        // Millisecond precision, RFC3339 would print nanoseconds.
        let timer_format = time::format_description::parse(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z",
        )
        .unwrap_or_default();
        let timer = UtcTime::new(timer_format);
        let full_format = tracing_subscriber::fmt::format()
            .with_target(true)
            .with_timer(timer);
        EventFormat::Full(full_format)
    }

    fn format_fields(&self) -> FieldFormat {
        match self {
            EventFormat::Full(_) => FieldFormat::Default(DefaultFields::new()),
            EventFormat::Json(_) => FieldFormat::Json(JsonFields::new()),
        }
    }
}

impl<S, N> FormatEvent<S, N> for EventFormat<'_>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        match self {
            EventFormat::Full(format) => format.format_event(ctx, writer, event),
            EventFormat::Json(format) => format.format_event(ctx, writer, event),
        }
    }
}

enum FieldFormat {
    Default(DefaultFields),
    Json(JsonFields),
}

impl FormatFields<'_> for FieldFormat {
    fn format_fields<R: RecordFields>(&self, writer: Writer<'_>, fields: R) -> fmt::Result {
        match self {
            FieldFormat::Default(default_fields) => default_fields.format_fields(writer, fields),
            FieldFormat::Json(json_fields) => json_fields.format_fields(writer, fields),
        }
    }
}
