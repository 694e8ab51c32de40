use std::{fmt::Write, io::IsTerminal};

use jiff::Timestamp;
use log::{Level, Record};
use logforth::{
    append::Stdout,
    diagnostic::Diagnostic,
    layout::{JsonLayout, Layout},
};

use crate::args::{Args, LogFormat};

/// `<timestamp> <level> <target>: <message>`.
#[derive(Debug, Clone, Copy)]
struct LineLayout {
    color: bool,
}

fn ansi_color(level: Level) -> &'static str {
    match level {
        Level::Error => "31",
        Level::Warn => "33",
        Level::Info => "32",
        Level::Debug => "34",
        Level::Trace => "35",
    }
}

impl Layout for LineLayout {
    fn format(&self, record: &Record<'_>, _diagnostics: &[Box<dyn Diagnostic>]) -> anyhow::Result<Vec<u8>> {
        let mut line = String::new();
        let level = record.level();

        write!(line, "{:.3} ", Timestamp::now())?;

        if self.color {
            write!(line, "\x1b[{}m{level:>5}\x1b[0m", ansi_color(level))?;
        } else {
            write!(line, "{level:>5}")?;
        }

        write!(line, " {}: {}", record.target(), record.args())?;

        Ok(line.into_bytes())
    }
}

pub(super) fn init(args: &Args) -> anyhow::Result<()> {
    let filter = args.log_filter()?;
    let color = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();

    logforth::builder()
        .dispatch(|d| {
            let d = d.filter(filter);

            match args.log_format {
                LogFormat::Text => d.append(Stdout::default().with_layout(LineLayout { color })),
                LogFormat::Json => d.append(Stdout::default().with_layout(JsonLayout::default())),
            }
        })
        .apply();

    Ok(())
}
