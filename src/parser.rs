//! Line-oriented parser for solver dump files.
//!
//! Every record kind shares one envelope:
//!
//! ```text
//! ITEM: TIMESTEP
//! <integer>
//! ITEM: NUMBER OF {ATOMS|CELLS|SURFS}
//! <integer N>
//! ITEM: BOX BOUNDS <flags>
//! <xlo> <xhi>
//! <ylo> <yhi>
//! <zlo> <zhi>
//! ITEM: {ATOMS|CELLS|SURFS} <col1> ... <colK>
//! <N rows of K numbers>
//! ```
//!
//! # Process
//! 1. Scan for each header marker in order; the line after it holds its value
//! 2. Take the column names verbatim from the payload marker line
//! 3. Read payload rows until end of input, binding values by position
//! 4. Check the row count against the declared N
//!
//! The input is read once front to back. Record kinds differ only in their
//! [`DumpLayout`] keywords, so a single parser covers all of them.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::bounds::BoxBounds;
use crate::error::{DumpError, DumpResult};
use crate::frame::{DumpLayout, Frame, RecordKind};

const TIMESTEP_MARKER: &str = "ITEM: TIMESTEP";
const BOX_MARKER: &str = "ITEM: BOX BOUNDS";
const MAX_PREALLOCATED_VALUES: usize = 1 << 24;

#[derive(Debug, Clone)]
pub struct DumpRecordParser {
    count_marker: String,
    payload_marker: String,
}

impl DumpRecordParser {
    pub fn new(kind: RecordKind) -> Self {
        Self::with_layout(kind.layout())
    }

    pub fn with_layout(layout: DumpLayout) -> Self {
        Self {
            count_marker: format!("ITEM: NUMBER OF {}", layout.count_keyword),
            payload_marker: format!("ITEM: {}", layout.payload_keyword),
        }
    }

    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> DumpResult<Frame> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| DumpError::io(path, e))?;
        let frame = self.parse_reader(BufReader::new(file), path)?;

        log::debug!(
            "Parsed {}: timestep {}, {} rows x {} columns",
            path.display(),
            frame.timestep(),
            frame.num_rows(),
            frame.num_columns()
        );
        Ok(frame)
    }

    /// Parse from any buffered reader; `source` only labels errors.
    pub fn parse_reader<R: BufRead>(&self, reader: R, source: &Path) -> DumpResult<Frame> {
        let mut lines = NumberedLines::new(reader, source);

        lines.seek_marker(TIMESTEP_MARKER)?;
        let (line_no, text) = lines.value_line(TIMESTEP_MARKER)?;
        let timestep = parse_single::<u64>(&text, line_no, source, "timestep")?;

        lines.seek_marker(&self.count_marker)?;
        let (line_no, text) = lines.value_line(&self.count_marker)?;
        let declared = parse_single::<usize>(&text, line_no, source, "record count")?;

        lines.seek_marker(BOX_MARKER)?;
        let mut ranges = [(0.0, 0.0); 3];
        for range in ranges.iter_mut() {
            let (line_no, text) = lines.value_line(BOX_MARKER)?;
            *range = parse_bound_line(&text, line_no, source)?;
        }
        let bounds = BoxBounds::new(ranges[0], ranges[1], ranges[2])?;

        let columns = lines.seek_marker(&self.payload_marker)?;
        let rows = read_payload(&mut lines, declared, columns.len())?;

        Frame::new(timestep, columns, rows, bounds)
    }
}

/// Parse one dump file of the given kind.
pub fn parse_dump<P: AsRef<Path>>(path: P, kind: RecordKind) -> DumpResult<Frame> {
    DumpRecordParser::new(kind).parse_file(path)
}

fn read_payload<R: BufRead>(
    lines: &mut NumberedLines<R>,
    declared: usize,
    width: usize,
) -> DumpResult<Array2<f64>> {
    let mut values = Vec::with_capacity(declared.saturating_mul(width).min(MAX_PREALLOCATED_VALUES));
    let mut found = 0usize;

    while let Some((line_no, text)) = lines.next_line()? {
        if text.trim().is_empty() {
            continue;
        }
        found += 1;
        if found > declared {
            // Keep counting so the error reports the real payload size.
            continue;
        }
        let before = values.len();
        for token in text.split_whitespace() {
            let value = token.parse::<f64>().map_err(|_| DumpError::CorruptPayload {
                path: lines.source.clone(),
                line: line_no,
                detail: format!("non-numeric token `{token}`"),
            })?;
            values.push(value);
        }
        let row_width = values.len() - before;
        if row_width != width {
            return Err(DumpError::CorruptPayload {
                path: lines.source.clone(),
                line: line_no,
                detail: format!("expected {width} values, found {row_width}"),
            });
        }
    }

    if found != declared {
        return Err(DumpError::TruncatedDump {
            path: lines.source.clone(),
            declared,
            found,
        });
    }

    // Always two-dimensional, including the single-row case.
    Array2::from_shape_vec((declared, width), values)
        .map_err(|e| DumpError::Schema(e.to_string()))
}

fn parse_single<T: std::str::FromStr>(
    text: &str,
    line_no: usize,
    source: &Path,
    what: &str,
) -> DumpResult<T> {
    text.trim().parse::<T>().map_err(|_| DumpError::CorruptPayload {
        path: source.to_path_buf(),
        line: line_no,
        detail: format!("expected {what}, found `{}`", text.trim()),
    })
}

/// `lo hi` with an optional trailing tilt factor.
fn parse_bound_line(text: &str, line_no: usize, source: &Path) -> DumpResult<(f64, f64)> {
    let mut tokens = text.split_whitespace();
    let mut next = |what: &str| -> DumpResult<f64> {
        let token = tokens.next().ok_or_else(|| DumpError::CorruptPayload {
            path: source.to_path_buf(),
            line: line_no,
            detail: format!("missing {what} box bound"),
        })?;
        token.parse::<f64>().map_err(|_| DumpError::CorruptPayload {
            path: source.to_path_buf(),
            line: line_no,
            detail: format!("non-numeric {what} box bound `{token}`"),
        })
    };
    let lo = next("lower")?;
    let hi = next("upper")?;
    Ok((lo, hi))
}

/// Forward-only line cursor with 1-based line numbers.
struct NumberedLines<R> {
    reader: R,
    source: PathBuf,
    line_no: usize,
    buffer: Vec<u8>,
}

impl<R: BufRead> NumberedLines<R> {
    fn new(reader: R, source: &Path) -> Self {
        Self {
            reader,
            source: source.to_path_buf(),
            line_no: 0,
            buffer: Vec::new(),
        }
    }

    fn next_line(&mut self) -> DumpResult<Option<(usize, String)>> {
        self.buffer.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.buffer)
            .map_err(|e| DumpError::io(&self.source, e))?;
        if read == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        // Undecodable bytes are bad content, not a failed read.
        let text = std::str::from_utf8(&self.buffer).map_err(|e| DumpError::CorruptPayload {
            path: self.source.clone(),
            line: self.line_no,
            detail: format!("invalid UTF-8 at byte {}", e.valid_up_to()),
        })?;
        Ok(Some((self.line_no, text.trim_end().to_string())))
    }

    /// Advance past the next line opening with `marker`; returns the tokens after it.
    fn seek_marker(&mut self, marker: &str) -> DumpResult<Vec<String>> {
        let expected: Vec<&str> = marker.split_whitespace().collect();
        while let Some((_, text)) = self.next_line()? {
            let tokens: Vec<&str> = text.split_whitespace().collect();
            if tokens.len() >= expected.len() && tokens[..expected.len()] == expected[..] {
                return Ok(tokens[expected.len()..].iter().map(|t| t.to_string()).collect());
            }
        }
        Err(self.missing(marker))
    }

    fn value_line(&mut self, marker: &str) -> DumpResult<(usize, String)> {
        self.next_line()?.ok_or_else(|| self.missing(marker))
    }

    fn missing(&self, marker: &str) -> DumpError {
        DumpError::MalformedDump {
            path: self.source.clone(),
            marker: marker.to_string(),
        }
    }
}
