//! JSON line I/O for the CLI
//!
//! Requests are read one JSON object per line from stdin; every response
//! is written as one JSON object per line to stdout.

use std::io::{self, BufRead, Write};

use serde_json::{json, Value};

use super::errors::{CliError, CliResult};

/// Reads JSON requests from `input`, skipping blank lines.
pub fn read_requests<R: BufRead>(input: R) -> impl Iterator<Item = CliResult<Value>> {
    input
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .map(|line| {
            let line = line.map_err(CliError::from)?;
            serde_json::from_str(&line).map_err(CliError::from)
        })
}

/// Writes a success response.
pub fn write_response<W: Write>(out: &mut W, data: Value) -> CliResult<()> {
    write_line(out, &json!({"status": "ok", "data": data}))
}

/// Writes an error response.
pub fn write_error<W: Write>(out: &mut W, code: &str, message: &str) -> CliResult<()> {
    write_line(
        out,
        &json!({"status": "error", "code": code, "message": message}),
    )
}

/// Success response on stdout.
pub fn respond(data: Value) -> CliResult<()> {
    write_response(&mut io::stdout().lock(), data)
}

fn write_line<W: Write>(out: &mut W, value: &Value) -> CliResult<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}
