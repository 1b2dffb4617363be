//! Raw stack dump parser
//!
//! A dump is a sequence of blocks. Each block starts with a header line
//!
//! ```text
//! CPU:2 RIP: 366b2
//! ```
//!
//! followed by zero or more bare hexadecimal stack addresses, one per line,
//! innermost first:
//!
//! ```text
//! ffffe8ff0c344f38
//! ffffe8ff0c342f30
//! ```

use crate::error::ParseError;
use crate::types::stack::Stack;
use crate::utils::parse_hex;
use std::io::BufRead;

const HEADER_PREFIX: &str = "CPU:";
const RIP_TAG: &str = "RIP:";

/// Parse one dump source, appending its stacks to `stacks`.
///
/// The accumulator is taken by value and handed back so several sources can
/// be chained into one list. On error the accumulator is dropped: a source
/// that fails to parse contributes nothing, and neither do earlier ones.
pub fn parse_stacks<R: BufRead>(reader: R, mut stacks: Vec<Stack>) -> Result<Vec<Stack>, ParseError> {
    let mut current: Option<Stack> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let lineno = idx + 1;
        let line = line.trim_end_matches('\r');

        if let Some(rest) = line.strip_prefix(HEADER_PREFIX) {
            let header = parse_header(rest, lineno, line)?;
            if let Some(done) = current.replace(header) {
                stacks.push(done);
            }
            continue;
        }

        let addr = parse_hex(line).ok_or_else(|| ParseError::InvalidAddress {
            line: lineno,
            content: line.to_string(),
        })?;
        match current.as_mut() {
            Some(stack) => stack.frames.push(addr),
            None => {
                return Err(ParseError::NoActiveStack {
                    line: lineno,
                    content: line.to_string(),
                })
            }
        }
    }

    if let Some(done) = current {
        stacks.push(done);
    }
    Ok(stacks)
}

/// Parse a dump held in memory
pub fn parse_stacks_str(text: &str, stacks: Vec<Stack>) -> Result<Vec<Stack>, ParseError> {
    parse_stacks(text.as_bytes(), stacks)
}

/// Parse the part of a header after `CPU:`, e.g. `2 RIP: 366b2`
fn parse_header(rest: &str, lineno: usize, line: &str) -> Result<Stack, ParseError> {
    let malformed = || ParseError::MalformedHeader {
        line: lineno,
        content: line.to_string(),
    };

    let (cpu, tail) = rest.split_once(' ').ok_or_else(malformed)?;
    let rip = tail.strip_prefix(RIP_TAG).ok_or_else(malformed)?.trim_start();
    if rip.is_empty() || rip.contains(char::is_whitespace) {
        return Err(malformed());
    }

    let cpu: u32 = cpu.parse().map_err(|_| ParseError::InvalidCpu {
        line: lineno,
        content: line.to_string(),
    })?;
    let rip = parse_hex(rip).ok_or_else(|| ParseError::InvalidAddress {
        line: lineno,
        content: rip.to_string(),
    })?;

    Ok(Stack::new(cpu, rip))
}
