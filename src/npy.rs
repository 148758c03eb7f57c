//! Minimal NumPy `.npy` codec for 2-D float matrices.
//!
//! Writes format v1.0, `<f4`, C order. Reads v1.0/v2.0 headers with
//! `<f4` or `<f8` data in either C or Fortran order; `<f8` is narrowed to
//! `f32`. Anything else is reported as [`IndexError::IndexCorrupt`].

use ndarray::{Array2, ArrayView2, ShapeBuilder};

use ragx_core::embedding::{f32_from_le_bytes, f32_to_le_bytes, f64_le_bytes_to_f32};
use ragx_core::IndexError;

const MAGIC: &[u8] = b"\x93NUMPY";
const ALIGN: usize = 64;

/// Encode a matrix as a complete `.npy` file.
pub fn encode(matrix: ArrayView2<'_, f32>) -> Vec<u8> {
    let (rows, cols) = matrix.dim();
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        rows, cols
    );
    // magic(6) + version(2) + header_len(2) + header + '\n' is a multiple of ALIGN
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    let pad = (ALIGN - unpadded % ALIGN) % ALIGN;
    header.push_str(&" ".repeat(pad));
    header.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + rows * cols * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());

    let standard = matrix.as_standard_layout();
    match standard.as_slice() {
        Some(data) => out.extend_from_slice(&f32_to_le_bytes(data)),
        None => {
            let data: Vec<f32> = standard.iter().copied().collect();
            out.extend_from_slice(&f32_to_le_bytes(&data));
        }
    }
    out
}

/// Decode a `.npy` file into a row-major `(rows, cols)` matrix.
pub fn decode(bytes: &[u8]) -> Result<Array2<f32>, IndexError> {
    if bytes.len() < MAGIC.len() + 4 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(corrupt("not a .npy file (bad magic)"));
    }
    let major = bytes[MAGIC.len()];
    let (header_len, header_start) = match major {
        1 => (
            u16::from_le_bytes([bytes[8], bytes[9]]) as usize,
            MAGIC.len() + 4,
        ),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(corrupt("truncated .npy header"));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                MAGIC.len() + 6,
            )
        }
        v => return Err(corrupt(&format!("unsupported .npy version {}", v))),
    };
    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err(corrupt("truncated .npy header"));
    }
    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|_| corrupt("non-UTF-8 .npy header"))?;
    let header = parse_header(header)?;

    let data = &bytes[data_start..];
    let width = match header.descr.as_str() {
        "<f4" => 4,
        "<f8" => 8,
        other => return Err(corrupt(&format!("unsupported dtype '{}'", other))),
    };
    let (rows, cols) = header.shape;
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(width))
        .ok_or_else(|| corrupt("shape overflows"))?;
    if data.len() != expected {
        return Err(corrupt(&format!(
            "expected {} data bytes for shape ({}, {}), found {}",
            expected,
            rows,
            cols,
            data.len()
        )));
    }

    let values = if width == 4 {
        f32_from_le_bytes(data)
    } else {
        f64_le_bytes_to_f32(data)
    };

    let matrix = if header.fortran_order {
        Array2::from_shape_vec((rows, cols).f(), values)
            .map(|m| m.as_standard_layout().into_owned())
    } else {
        Array2::from_shape_vec((rows, cols), values)
    };
    matrix.map_err(|e| corrupt(&format!("bad matrix shape: {}", e)))
}

struct Header {
    descr: String,
    fortran_order: bool,
    shape: (usize, usize),
}

fn parse_header(header: &str) -> Result<Header, IndexError> {
    let descr = dict_value(header, "descr")
        .map(|v| v.trim_matches(|c| c == '\'' || c == '"').to_string())
        .ok_or_else(|| corrupt("header missing 'descr'"))?;
    let fortran_order = match dict_value(header, "fortran_order") {
        Some("True") => true,
        Some("False") => false,
        _ => return Err(corrupt("header missing 'fortran_order'")),
    };

    let shape_start = header
        .find("'shape'")
        .and_then(|i| header[i..].find('(').map(|j| i + j + 1))
        .ok_or_else(|| corrupt("header missing 'shape'"))?;
    let shape_end = header[shape_start..]
        .find(')')
        .map(|j| shape_start + j)
        .ok_or_else(|| corrupt("header has unterminated 'shape'"))?;
    let dims: Vec<usize> = header[shape_start..shape_end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>())
        .collect::<Result<_, _>>()
        .map_err(|_| corrupt("header has non-numeric 'shape'"))?;
    let shape = match dims.as_slice() {
        [rows, cols] => (*rows, *cols),
        other => {
            return Err(corrupt(&format!(
                "expected a 2-D matrix, found {}-D",
                other.len()
            )))
        }
    };

    Ok(Header {
        descr,
        fortran_order,
        shape,
    })
}

/// Scalar value for `'key': value` in a Python dict literal.
fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("'{}':", key);
    let start = header.find(&needle)? + needle.len();
    let rest = header[start..].trim_start();
    let end = rest.find(',').or_else(|| rest.find('}'))?;
    Some(rest[..end].trim())
}

fn corrupt(msg: &str) -> IndexError {
    IndexError::IndexCorrupt(format!("embeddings.npy: {}", msg))
}
