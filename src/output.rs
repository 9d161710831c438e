//! Writes scan results in the supported export formats, and reads the
//! machine-readable ones back.
use std::io::{BufRead, BufReader, Read, Write};

use clap::ValueEnum;
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde_derive::Deserialize;

use crate::error::OutputError;
use crate::scanner::{PortState, ProbeResult};

const TEXT_COLUMNS: [&str; 7] = ["HOST", "ADDRESS", "PORT", "STATE", "ATTEMPTS", "RTT_MS", "ERROR"];

/// Result export formats.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `pretty` on a terminal, `json` in a file.
    Auto,
    /// Aligned plain text columns.
    #[value(alias = "txt")]
    Text,
    /// Colored table for humans.
    Pretty,
    Csv,
    Tsv,
    /// One JSON array.
    Json,
    /// One JSON object per line.
    Jsonl,
    #[value(alias = "yml")]
    Yaml,
}

impl OutputFormat {
    /// Settles `Auto` depending on where the results are going.
    pub fn resolve(self, to_file: bool) -> Self {
        match self {
            OutputFormat::Auto if to_file => OutputFormat::Json,
            OutputFormat::Auto => OutputFormat::Pretty,
            other => other,
        }
    }
}

/// Writes `results` to `writer` in `format`.
pub fn write_results<W: Write>(
    format: OutputFormat,
    results: &[ProbeResult],
    mut writer: W,
) -> Result<(), OutputError> {
    match format.resolve(false) {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, results)?;
            writeln!(writer)?;
        }
        OutputFormat::Jsonl => {
            for result in results {
                serde_json::to_writer(&mut writer, result)?;
                writeln!(writer)?;
            }
        }
        OutputFormat::Yaml => serde_yaml::to_writer(&mut writer, results)?,
        OutputFormat::Csv => write_delimited(b',', results, &mut writer)?,
        OutputFormat::Tsv => write_delimited(b'\t', results, &mut writer)?,
        OutputFormat::Text => writer.write_all(text_table(results).as_bytes())?,
        OutputFormat::Pretty | OutputFormat::Auto => {
            writer.write_all(pretty_table(results).as_bytes())?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Parses results previously written with [`write_results`].
pub fn read_results<R: Read>(format: OutputFormat, reader: R) -> Result<Vec<ProbeResult>, OutputError> {
    match format {
        OutputFormat::Json => Ok(serde_json::from_reader(reader)?),
        OutputFormat::Jsonl => BufReader::new(reader)
            .lines()
            .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
            .map(|line| -> Result<ProbeResult, OutputError> { Ok(serde_json::from_str(&line?)?) })
            .collect(),
        OutputFormat::Yaml => Ok(serde_yaml::from_reader(reader)?),
        OutputFormat::Csv => read_delimited(b',', reader),
        OutputFormat::Tsv => read_delimited(b'\t', reader),
        OutputFormat::Text => read_text(reader),
        OutputFormat::Pretty => Err(OutputError::Unparseable("pretty")),
        OutputFormat::Auto => Err(OutputError::Unparseable("auto")),
    }
}

fn write_delimited<W: Write>(delimiter: u8, results: &[ProbeResult], writer: W) -> Result<(), OutputError> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(writer);
    for result in results {
        wtr.serialize(result)?;
    }
    wtr.flush()?;
    Ok(())
}

fn read_delimited<R: Read>(delimiter: u8, reader: R) -> Result<Vec<ProbeResult>, OutputError> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_reader(reader)
        .deserialize()
        .map(|row| row.map_err(OutputError::from))
        .collect()
}

fn text_row(result: &ProbeResult) -> [String; 7] {
    [
        result.host.clone(),
        result.address.to_string(),
        result.port.to_string(),
        result.state.to_string(),
        result.attempts.to_string(),
        result.rtt_ms.map_or_else(|| "-".to_owned(), |rtt| format!("{rtt:.3}")),
        result.error.clone().unwrap_or_else(|| "-".to_owned()),
    ]
}

fn text_table(results: &[ProbeResult]) -> String {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Disabled)
        .set_header(TEXT_COLUMNS)
        .add_rows(results.iter().map(text_row));
    let mut out = table
        .lines()
        .map(|line| line.trim().to_owned())
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    out
}

fn read_text<R: Read>(reader: R) -> Result<Vec<ProbeResult>, OutputError> {
    let mut results = Vec::new();
    for (index, line) in BufReader::new(reader).lines().enumerate().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |reason: &str| OutputError::Malformed {
            line: index + 1,
            reason: reason.to_owned(),
        };

        let cells = line.split_whitespace().collect::<Vec<_>>();
        if cells.len() < 7 {
            return Err(malformed("expected 7 columns"));
        }
        let error = cells[6..].join(" ");
        results.push(ProbeResult {
            host: cells[0].to_owned(),
            address: cells[1].parse().map_err(|_| malformed("bad address"))?,
            port: cells[2].parse().map_err(|_| malformed("bad port"))?,
            state: cells[3].parse().map_err(|e: String| malformed(&e))?,
            attempts: cells[4].parse().map_err(|_| malformed("bad attempts"))?,
            rtt_ms: match cells[5] {
                "-" => None,
                rtt => Some(rtt.parse().map_err(|_| malformed("bad rtt"))?),
            },
            error: (error != "-").then_some(error),
        });
    }
    Ok(results)
}

fn pretty_table(results: &[ProbeResult]) -> String {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            TEXT_COLUMNS
                .iter()
                .map(|column| Cell::new(column).add_attribute(Attribute::Bold)),
        );
    if colored::control::SHOULD_COLORIZE.should_colorize() {
        table.enforce_styling();
    } else {
        table.force_no_tty();
    }

    for (result, row) in results.iter().zip(results.iter().map(text_row)) {
        table.add_row(row.into_iter().enumerate().map(|(column, cell)| {
            let cell = Cell::new(cell);
            if column == 3 {
                paint(result.state, cell)
            } else {
                cell
            }
        }));
    }
    format!("{table}\n")
}

fn paint(state: PortState, cell: Cell) -> Cell {
    match state {
        PortState::Open => cell.fg(Color::Green).add_attribute(Attribute::Bold),
        PortState::Closed => cell.fg(Color::Red),
        PortState::OpenOrFiltered => cell.fg(Color::Yellow),
        PortState::Error => cell.fg(Color::Magenta),
    }
}
