//! Loading of the per-core memory reference traces.
//!
//! A trace is a whitespace-separated stream of `<op> <addr>` pairs where
//! op is `R` or `W` and the address is a C-style integer literal (`0x…`
//! hex, `0…` octal, or decimal).

use std::fs;
use std::path::Path;

use log::debug;

use crate::commons::{Addr, MemRef, RefQueue, NUM_CORES};
use crate::error::SimError;

/// Load the four traces `{prefix}_proc{0..3}.trace`.
pub fn load_traces(prefix: &str) -> Result<Vec<RefQueue>, SimError> {
    (0..NUM_CORES)
        .map(|c| {
            let path = format!("{prefix}_proc{c}.trace");
            let path = Path::new(&path);
            let text = fs::read_to_string(path)
                .map_err(|source| SimError::TraceIo { path: path.into(), source })?;
            let refs = parse_trace(&text, path)?;
            debug!("core {c}: {} references from {}", refs.len(), path.display());
            Ok(refs)
        })
        .collect()
}

/// Parse one core's trace text. `origin` names the file in diagnostics.
pub fn parse_trace(text: &str, origin: &Path) -> Result<RefQueue, SimError> {
    let malformed = |token: &str| SimError::TraceParse {
        path: origin.into(),
        token: token.to_string(),
    };

    let mut refs = RefQueue::new();
    let mut tokens = text.split_whitespace();
    while let Some(op) = tokens.next() {
        let addr_token = tokens.next().ok_or_else(|| malformed(op))?;
        let addr = Addr(parse_int(addr_token).ok_or_else(|| malformed(addr_token))?);
        refs.push_back(match op {
            "R" => MemRef::Read(addr),
            "W" => MemRef::Write(addr),
            _ => return Err(malformed(op)),
        });
    }
    Ok(refs)
}

/// C-style integer literal.
fn parse_int(token: &str) -> Option<u32> {
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if token.len() > 1 && token.starts_with('0') {
        u32::from_str_radix(&token[1..], 8).ok()
    } else {
        token.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<RefQueue, SimError> {
        parse_trace(text, Path::new("test.trace"))
    }

    #[test]
    fn reads_and_writes() {
        let refs = parse("R 0x10\nW 0x20\nR 4\n").unwrap();
        assert_eq!(
            Vec::from(refs),
            vec![
                MemRef::Read(Addr(0x10)),
                MemRef::Write(Addr(0x20)),
                MemRef::Read(Addr(4)),
            ]
        );
    }

    #[test]
    fn tokens_may_span_lines() {
        let refs = parse("R\n0x10 W 0x14").unwrap();
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn c_style_literals() {
        let refs = parse("R 0X1f R 010 R 0 R 255").unwrap();
        let addrs: Vec<u32> = refs.iter().map(|r| r.addr().0).collect();
        assert_eq!(addrs, vec![0x1f, 8, 0, 255]);
    }

    #[test]
    fn unknown_op_is_fatal() {
        assert!(matches!(parse("X 0x10"), Err(SimError::TraceParse { token, .. }) if token == "X"));
    }

    #[test]
    fn dangling_op_is_fatal() {
        assert!(matches!(parse("R 0x10 W"), Err(SimError::TraceParse { token, .. }) if token == "W"));
    }

    #[test]
    fn junk_address_is_fatal() {
        assert!(matches!(parse("R zzz"), Err(SimError::TraceParse { token, .. }) if token == "zzz"));
    }

    #[test]
    fn empty_trace_is_fine() {
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn missing_file_is_fatal() {
        assert!(matches!(
            load_traces("/nonexistent/sim"),
            Err(SimError::TraceIo { .. })
        ));
    }
}
