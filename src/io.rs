//! Matrix and vector readers for the line-oriented ASCII dialects and the
//! endian-tagged binary format.
//!
//! Index bases are never guessed: the caller states whether a file counts
//! from zero or one, and the binary reader only auto-detects byte order
//! (via the structural sizes in the header), not the base.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{AmgError, Result};
use crate::matrix::CsrMatrix;
use crate::types::Precision;

/// Index base of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IndexBase {
    /// Indices count from zero.
    Zero,
    /// Indices count from one (Fortran-style producers).
    One,
}

impl IndexBase {
    fn offset(self) -> usize {
        match self {
            IndexBase::Zero => 0,
            IndexBase::One => 1,
        }
    }
}

/// Whitespace-separated token stream with line tracking for error reports.
struct TokenReader<R: BufRead> {
    reader: R,
    tokens: Vec<String>,
    pos: usize,
    line: usize,
}

impl<R: BufRead> TokenReader<R> {
    fn new(reader: R) -> Self {
        Self { reader, tokens: Vec::new(), pos: 0, line: 0 }
    }

    fn next_token(&mut self) -> Result<String> {
        while self.pos >= self.tokens.len() {
            let mut buf = String::new();
            if self.reader.read_line(&mut buf)? == 0 {
                return Err(AmgError::FormatMismatch {
                    line: self.line,
                    message: "unexpected end of file".into(),
                });
            }
            self.line += 1;
            self.tokens = buf.split_whitespace().map(str::to_owned).collect();
            self.pos = 0;
        }
        let token = self.tokens[self.pos].clone();
        self.pos += 1;
        Ok(token)
    }

    fn next_usize(&mut self) -> Result<usize> {
        let token = self.next_token()?;
        token.parse().map_err(|_| AmgError::FormatMismatch {
            line: self.line,
            message: format!("expected an integer, found '{}'", token),
        })
    }

    fn next_value(&mut self) -> Result<Precision> {
        let token = self.next_token()?;
        token.parse().map_err(|_| AmgError::FormatMismatch {
            line: self.line,
            message: format!("expected a number, found '{}'", token),
        })
    }
}

/// Read the CSR-triplet ASCII dialect: `n`, then `n + 1` row pointers, then
/// `nnz` column indices, then `nnz` values.
pub fn read_csr_ascii(path: impl AsRef<Path>, base: IndexBase) -> Result<CsrMatrix> {
    let mut tokens = TokenReader::new(BufReader::new(File::open(path)?));
    let n = tokens.next_usize()?;
    let offset = base.offset();

    let mut row_ptr = Vec::with_capacity(n + 1);
    for _ in 0..=n {
        let raw = tokens.next_usize()?;
        row_ptr.push(raw.checked_sub(offset).ok_or(AmgError::FormatMismatch {
            line: tokens.line,
            message: "row pointer below the declared index base".into(),
        })?);
    }
    let nnz = row_ptr[n];
    let mut col_idx = Vec::with_capacity(nnz);
    for _ in 0..nnz {
        let raw = tokens.next_usize()?;
        col_idx.push(raw.checked_sub(offset).ok_or(AmgError::FormatMismatch {
            line: tokens.line,
            message: "column index below the declared index base".into(),
        })?);
    }
    let mut values = Vec::with_capacity(nnz);
    for _ in 0..nnz {
        values.push(tokens.next_value()?);
    }
    CsrMatrix::from_raw_parts(n, n, row_ptr, col_idx, values)
}

/// Read the coordinate ASCII dialect: `n m nnz`, then `nnz` lines `i j v`.
pub fn read_coo_ascii(path: impl AsRef<Path>, base: IndexBase) -> Result<CsrMatrix> {
    let mut tokens = TokenReader::new(BufReader::new(File::open(path)?));
    let n = tokens.next_usize()?;
    let m = tokens.next_usize()?;
    let nnz = tokens.next_usize()?;
    let offset = base.offset();

    let mut triplets = Vec::with_capacity(nnz);
    for _ in 0..nnz {
        let i = tokens.next_usize()?;
        let j = tokens.next_usize()?;
        let v = tokens.next_value()?;
        let (i, j) = (
            i.checked_sub(offset).ok_or(AmgError::FormatMismatch {
                line: tokens.line,
                message: "row index below the declared index base".into(),
            })?,
            j.checked_sub(offset).ok_or(AmgError::FormatMismatch {
                line: tokens.line,
                message: "column index below the declared index base".into(),
            })?,
        );
        triplets.push((i, j, v));
    }
    CsrMatrix::from_triplets(triplets, n, m)
}

/// Read the vector dialect: `n`, then `n` values.
pub fn read_vector_ascii(path: impl AsRef<Path>) -> Result<Vec<Precision>> {
    let mut tokens = TokenReader::new(BufReader::new(File::open(path)?));
    let n = tokens.next_usize()?;
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        values.push(tokens.next_value()?);
    }
    Ok(values)
}

/// Read the binary format: a header of two 32-bit integers (rows,
/// nonzeros), then `nnz` 64-bit values, `n + 1` 32-bit row pointers and
/// `nnz` 32-bit column indices.
///
/// Byte order is detected from the structural sizes in the header; the
/// index base must be supplied by the caller.
pub fn read_binary(path: impl AsRef<Path>, base: IndexBase) -> Result<CsrMatrix> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    if bytes.len() < 8 {
        return Err(AmgError::FormatMismatch {
            line: 0,
            message: "binary header truncated".into(),
        });
    }

    let header = |swap: bool| -> (usize, usize) {
        let read = |at: usize| {
            let raw: [u8; 4] = bytes[at..at + 4].try_into().unwrap();
            if swap {
                u32::from_be_bytes(raw) as usize
            } else {
                u32::from_le_bytes(raw) as usize
            }
        };
        (read(0), read(4))
    };
    let expected_len = |n: usize, nnz: usize| 8 + nnz * 8 + (n + 1) * 4 + nnz * 4;

    let (n, nnz, swap) = {
        let (n_le, nnz_le) = header(false);
        let (n_be, nnz_be) = header(true);
        if expected_len(n_le, nnz_le) == bytes.len() {
            (n_le, nnz_le, false)
        } else if expected_len(n_be, nnz_be) == bytes.len() {
            (n_be, nnz_be, true)
        } else {
            return Err(AmgError::FormatMismatch {
                line: 0,
                message: "binary size does not match either byte order".into(),
            });
        }
    };

    let read_u32 = |at: usize| -> usize {
        let raw: [u8; 4] = bytes[at..at + 4].try_into().unwrap();
        if swap {
            u32::from_be_bytes(raw) as usize
        } else {
            u32::from_le_bytes(raw) as usize
        }
    };
    let read_f64 = |at: usize| -> Precision {
        let raw: [u8; 8] = bytes[at..at + 8].try_into().unwrap();
        if swap {
            f64::from_be_bytes(raw)
        } else {
            f64::from_le_bytes(raw)
        }
    };

    let offset = base.offset();
    let mut at = 8;
    let mut values = Vec::with_capacity(nnz);
    for _ in 0..nnz {
        values.push(read_f64(at));
        at += 8;
    }
    let mut row_ptr = Vec::with_capacity(n + 1);
    for _ in 0..=n {
        let raw = read_u32(at);
        at += 4;
        row_ptr.push(raw.checked_sub(offset).ok_or(AmgError::FormatMismatch {
            line: 0,
            message: "row pointer below the declared index base".into(),
        })?);
    }
    let mut col_idx = Vec::with_capacity(nnz);
    for _ in 0..nnz {
        let raw = read_u32(at);
        at += 4;
        col_idx.push(raw.checked_sub(offset).ok_or(AmgError::FormatMismatch {
            line: 0,
            message: "column index below the declared index base".into(),
        })?);
    }
    CsrMatrix::from_raw_parts(n, n, row_ptr, col_idx, values)
}
