use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::clock;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("unable to enumerate serial ports: {0}")]
    Enumerate(#[from] serialport::Error),
    #[error("no serial ports available")]
    NoPorts,
    #[error("console error: {0}")]
    Console(#[from] std::io::Error),
    #[error("console input ended before a selection was made")]
    InputClosed,
    #[error("unable to format log file date: {0}")]
    Date(#[from] time::error::Format),
}

pub fn list_ports() -> Result<Vec<String>, SetupError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|port| port.port_name)
        .collect())
}

/// Shows `ports` as a numbered list and asks for an index until a valid one
/// is entered.
pub fn prompt_port<R: BufRead, W: Write>(
    ports: &[String],
    input: &mut R,
    output: &mut W,
) -> Result<String, SetupError> {
    if ports.is_empty() {
        return Err(SetupError::NoPorts);
    }
    writeln!(output, "Available serial ports:")?;
    for (index, port) in ports.iter().enumerate() {
        writeln!(output, "{index}: {port}")?;
    }
    loop {
        let answer = prompt_line(input, output, "Select the serial port index: ")?;
        match answer.trim().parse::<usize>() {
            Ok(index) if index < ports.len() => return Ok(ports[index].clone()),
            Ok(_) => writeln!(output, "Invalid index. Please try again.")?,
            Err(_) => writeln!(output, "Invalid input. Please enter a number.")?,
        }
    }
}

/// Asks for a baud rate until a positive integer is entered.
pub fn prompt_baud_rate<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> Result<u32, SetupError> {
    loop {
        let answer = prompt_line(input, output, "Enter the baud rate: ")?;
        match answer.trim().parse::<u32>() {
            Ok(0) => writeln!(output, "The baud rate must be greater than zero.")?,
            Ok(baud_rate) => return Ok(baud_rate),
            Err(_) => writeln!(output, "Invalid input. Please enter a number.")?,
        }
    }
}

fn prompt_line<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    prompt: &str,
) -> Result<String, SetupError> {
    write!(output, "{prompt}")?;
    output.flush()?;
    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        return Err(SetupError::InputClosed);
    }
    Ok(answer)
}

/// Turns a port identifier into something usable as a file name, e.g.
/// `/dev/ttyUSB0` becomes `_dev_ttyUSB0`.
pub fn sanitize_port_name(port: &str) -> String {
    port.chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c => c,
        })
        .collect()
}

/// `{log_dir}/{sanitized port}_{YYYYMMDD}.log`, dated by `now`.
pub fn log_file_path(
    log_dir: &Path,
    port: &str,
    now: OffsetDateTime,
) -> Result<PathBuf, SetupError> {
    let date = clock::format_compact_date(now)?;
    Ok(log_dir.join(format!("{}_{date}.log", sanitize_port_name(port))))
}
